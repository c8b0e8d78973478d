/// Result mapping tests
///
/// Tests for joined nested maps, discriminators, multiple result sets,
/// nested queries and auto-mapping
/// Run with: cargo test --test result_mapping_tests

use std::sync::Arc;

use rustsqlmap::core::{ColumnType, DataType, DbError, Value};
use rustsqlmap::driver::memory::{MemoryDataSource, MemoryTable, Response};
use rustsqlmap::mapping::{
    Discriminator, MappedStatement, ObjectType, ParameterMapping, ResultMap, ResultMapping, ResultType,
    RowBounds, SqlCommandType, StaticSqlSource,
};
use rustsqlmap::object::Node;
use rustsqlmap::result::ResultContext;
use rustsqlmap::session::{
    AutoMappingBehavior, AutoMappingUnknownColumnBehavior, Configuration, SessionFactory, Settings,
};
use rustsqlmap::transaction::Environment;

const SELECT_BLOGS: &str = "select blog_id, blog_title, post_id, post_subject from blog left join post";

fn configuration(ds: &MemoryDataSource, settings: Settings) -> Configuration {
    Configuration::new(settings).with_environment(Environment::new("test", Arc::new(ds.clone())))
}

fn select(id: &str, sql: &str, result_map: Arc<ResultMap>) -> Arc<MappedStatement> {
    MappedStatement::builder(id, SqlCommandType::Select, StaticSqlSource::new(sql))
        .result_map(result_map)
        .build()
}

fn joined_blogs(ordered: bool) -> (MemoryDataSource, SessionFactory) {
    let ds = MemoryDataSource::new();
    ds.on_query(
        SELECT_BLOGS,
        MemoryTable::new(&[
            ("blog_id", ColumnType::Integer),
            ("blog_title", ColumnType::Varchar),
            ("post_id", ColumnType::Integer),
            ("post_subject", ColumnType::Varchar),
        ])
        .row(vec![1i64.into(), "rust".into(), 10i64.into(), "ownership".into()])
        .row(vec![1i64.into(), "rust".into(), 11i64.into(), "lifetimes".into()])
        .row(vec![2i64.into(), "empty".into(), Value::Null, Value::Null]),
    );

    let mut configuration = configuration(&ds, Settings::default());
    configuration
        .add_result_map(
            ResultMap::builder("postMap", ResultType::object("Post"))
                .mapping(ResultMapping::column_of("id", "post_id").id())
                .mapping(ResultMapping::column_of("subject", "post_subject"))
                .build(),
        )
        .unwrap();
    let blog = ResultMap::builder("blogMap", ResultType::object("Blog"))
        .mapping(ResultMapping::column_of("id", "blog_id").id())
        .mapping(ResultMapping::column_of("title", "blog_title"))
        .mapping(ResultMapping::new("posts").nested_result_map("postMap").collection())
        .build();
    configuration
        .add_mapped_statement(
            MappedStatement::builder("selectBlogs", SqlCommandType::Select, StaticSqlSource::new(SELECT_BLOGS))
                .result_map(blog)
                .result_ordered(ordered)
                .build(),
        )
        .unwrap();
    (ds, SessionFactory::new(configuration))
}

fn post_subjects(blog: &Node) -> Vec<String> {
    let posts = blog.get_path("posts").unwrap().unwrap();
    posts
        .as_list()
        .unwrap()
        .snapshot()
        .iter()
        .map(|p| p.path_value("subject").unwrap().to_key_string())
        .collect()
}

#[test]
fn test_joined_rows_fold_into_one_to_many() {
    let (_ds, factory) = joined_blogs(false);
    let session = factory.open().unwrap();
    let blogs = session.select_list("selectBlogs", &Node::null()).unwrap();

    assert_eq!(blogs.len(), 2);
    assert_eq!(blogs[0].path_value("title").unwrap(), Value::from("rust"));
    assert_eq!(post_subjects(&blogs[0]), vec!["ownership", "lifetimes"]);
    // a left-joined row of NULLs yields an empty collection, not a null post
    assert!(post_subjects(&blogs[1]).is_empty());
}

#[test]
fn test_ordered_cursor_emits_each_parent_once_complete() {
    let (_ds, factory) = joined_blogs(true);
    let mut session = factory.open().unwrap();
    let mut cursor = session.select_cursor("selectBlogs", &Node::null(), RowBounds::DEFAULT).unwrap();

    let blogs: Vec<Node> = cursor.iter().unwrap().map(|b| b.unwrap()).collect();
    assert_eq!(blogs.len(), 2);
    assert_eq!(post_subjects(&blogs[0]), vec!["ownership", "lifetimes"]);
    assert!(cursor.is_consumed());
}

#[test]
fn test_circular_joined_maps_link_back_to_the_ancestor() {
    let (ds, _unused) = joined_blogs(false);
    let mut configuration = configuration(&ds, Settings::default());
    configuration
        .add_result_map(
            ResultMap::builder("postMap", ResultType::object("Post"))
                .mapping(ResultMapping::column_of("id", "post_id").id())
                .mapping(ResultMapping::column_of("subject", "post_subject"))
                .mapping(ResultMapping::new("blog").nested_result_map("blogMap"))
                .build(),
        )
        .unwrap();
    let blog = ResultMap::builder("blogMap", ResultType::object("Blog"))
        .mapping(ResultMapping::column_of("id", "blog_id").id())
        .mapping(ResultMapping::column_of("title", "blog_title"))
        .mapping(ResultMapping::new("posts").nested_result_map("postMap").collection())
        .build();
    configuration.add_mapped_statement(select("selectBlogs", SELECT_BLOGS, blog)).unwrap();
    let session = SessionFactory::new(configuration).open().unwrap();

    let blogs = session.select_list("selectBlogs", &Node::null()).unwrap();
    assert_eq!(blogs.len(), 2);
    let root = blogs[0].as_object().unwrap();
    let posts = blogs[0].get_path("posts").unwrap().unwrap().as_list().unwrap().snapshot();
    assert_eq!(posts.len(), 2);
    for post in &posts {
        let back = post.get_path("blog").unwrap().unwrap();
        assert!(back.as_object().unwrap().ptr_eq(root));
    }
}

#[test]
fn test_unordered_nested_cursor_is_rejected() {
    let (_ds, factory) = joined_blogs(false);
    let mut session = factory.open().unwrap();
    let err = session
        .select_cursor("selectBlogs", &Node::null(), RowBounds::DEFAULT)
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_nested_map_with_row_bounds_rejected_when_safe() {
    let (_ds, factory) = {
        let (ds, _unused) = joined_blogs(false);
        let mut configuration = configuration(&ds, Settings::default().safe_row_bounds_enabled(true));
        configuration
            .add_result_map(
                ResultMap::builder("postMap", ResultType::object("Post"))
                    .mapping(ResultMapping::column_of("id", "post_id").id())
                    .build(),
            )
            .unwrap();
        configuration
            .add_mapped_statement(select(
                "selectBlogs",
                SELECT_BLOGS,
                ResultMap::builder("blogMap", ResultType::object("Blog"))
                    .mapping(ResultMapping::column_of("id", "blog_id").id())
                    .mapping(ResultMapping::new("posts").nested_result_map("postMap").collection())
                    .build(),
            ))
            .unwrap();
        (ds, SessionFactory::new(configuration))
    };
    let session = factory.open().unwrap();
    let err = session
        .select_list_with_bounds("selectBlogs", &Node::null(), RowBounds::new(1, 1))
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_custom_handler_on_unordered_nested_map_rejected() {
    let (_ds, factory) = joined_blogs(false);
    let session = factory.open().unwrap();
    let mut handler = |_: &mut ResultContext| -> rustsqlmap::Result<()> { Ok(()) };
    let err = session
        .select_with_handler("selectBlogs", &Node::null(), RowBounds::DEFAULT, &mut handler)
        .unwrap_err();
    assert!(err.is_configuration());
}

// ============================================================================
// Discriminators
// ============================================================================

fn vehicles() -> SessionFactory {
    let ds = MemoryDataSource::new();
    ds.on_query(
        "select id, kind, doors, payload from vehicle",
        MemoryTable::new(&[
            ("id", ColumnType::Integer),
            ("kind", ColumnType::Varchar),
            ("doors", ColumnType::Integer),
            ("payload", ColumnType::Integer),
        ])
        .row(vec![1i64.into(), "car".into(), 4i64.into(), Value::Null])
        .row(vec![2i64.into(), "truck".into(), 2i64.into(), 9000i64.into()])
        .row(vec![3i64.into(), "boat".into(), Value::Null, Value::Null]),
    );

    let mut configuration = configuration(&ds, Settings::default());
    // car and truck point back at each other
    configuration
        .add_result_map(
            ResultMap::builder("carMap", ResultType::object("Car"))
                .mapping(ResultMapping::column_of("id", "id").id())
                .mapping(ResultMapping::column_of("doors", "doors"))
                .discriminator(Discriminator::new("kind").case("car", "truckMap"))
                .build(),
        )
        .unwrap();
    configuration
        .add_result_map(
            ResultMap::builder("truckMap", ResultType::object("Truck"))
                .mapping(ResultMapping::column_of("id", "id").id())
                .mapping(ResultMapping::column_of("payload", "payload"))
                .discriminator(Discriminator::new("kind").case("car", "carMap"))
                .build(),
        )
        .unwrap();
    let vehicle = ResultMap::builder("vehicleMap", ResultType::object("Vehicle"))
        .mapping(ResultMapping::column_of("id", "id").id())
        .discriminator(
            Discriminator::new("kind")
                .data_type(DataType::Text)
                .case("car", "carMap")
                .case("truck", "truckMap"),
        )
        .auto_mapping(false)
        .build();
    configuration
        .add_mapped_statement(select("selectVehicles", "select id, kind, doors, payload from vehicle", vehicle))
        .unwrap();
    SessionFactory::new(configuration)
}

#[test]
fn test_discriminator_picks_variant_and_stops_on_cycles() {
    let session = vehicles().open().unwrap();
    let vehicles = session.select_list("selectVehicles", &Node::null()).unwrap();
    let type_of = |n: &Node| n.as_object().unwrap().type_name().to_string();

    assert_eq!(vehicles.len(), 3);
    // vehicleMap -> carMap -> truckMap -> carMap: stops once carMap repeats
    assert_eq!(type_of(&vehicles[0]), "Car");
    assert_eq!(vehicles[0].path_value("doors").unwrap(), Value::from(4i64));
    // truckMap has no case for "truck"
    assert_eq!(type_of(&vehicles[1]), "Truck");
    assert_eq!(vehicles[1].path_value("payload").unwrap(), Value::from(9000i64));
    // no case for "boat": the declaring map is used
    assert_eq!(type_of(&vehicles[2]), "Vehicle");
}

// ============================================================================
// Multiple result sets and nested queries
// ============================================================================

#[test]
fn test_second_result_set_links_children_to_parents() {
    let ds = MemoryDataSource::new();
    ds.on("{call blogs_with_posts()}", |_| {
        Ok(Response::table(
            MemoryTable::new(&[("id", ColumnType::Integer), ("title", ColumnType::Varchar)])
                .row(vec![1i64.into(), "rust".into()])
                .row(vec![2i64.into(), "go".into()]),
        )
        .with_result_set(
            MemoryTable::new(&[
                ("id", ColumnType::Integer),
                ("blog_id", ColumnType::Integer),
                ("subject", ColumnType::Varchar),
            ])
            .row(vec![10i64.into(), 1i64.into(), "ownership".into()])
            .row(vec![11i64.into(), 2i64.into(), "goroutines".into()])
            .row(vec![12i64.into(), 1i64.into(), "lifetimes".into()]),
        ))
    });

    let mut configuration = configuration(&ds, Settings::default());
    configuration
        .add_result_map(
            ResultMap::builder("postMap", ResultType::object("Post"))
                .mapping(ResultMapping::column_of("id", "id").id())
                .mapping(ResultMapping::column_of("subject", "subject"))
                .build(),
        )
        .unwrap();
    let blog = ResultMap::builder("blogMap", ResultType::object("Blog"))
        .mapping(ResultMapping::column_of("id", "id").id())
        .mapping(
            ResultMapping::new("posts")
                .column("id")
                .foreign_column("blog_id")
                .result_set("posts")
                .nested_result_map("postMap")
                .collection(),
        )
        .build();
    configuration
        .add_mapped_statement(
            MappedStatement::builder(
                "selectBlogsWithPosts",
                SqlCommandType::Select,
                StaticSqlSource::new("{call blogs_with_posts()}"),
            )
            .result_map(blog)
            .result_sets(&["blogs", "posts"])
            .build(),
        )
        .unwrap();

    let session = SessionFactory::new(configuration).open().unwrap();
    let blogs = session.select_list("selectBlogsWithPosts", &Node::null()).unwrap();

    assert_eq!(blogs.len(), 2);
    assert_eq!(blogs[0].path_value("title").unwrap(), Value::from("rust"));
    assert_eq!(post_subjects(&blogs[0]), vec!["ownership", "lifetimes"]);
    assert_eq!(post_subjects(&blogs[1]), vec!["goroutines"]);
}

#[test]
fn test_nested_query_runs_once_per_distinct_key() {
    let ds = MemoryDataSource::new();
    ds.on_query(
        "select id, author_id from blog",
        MemoryTable::new(&[("id", ColumnType::Integer), ("author_id", ColumnType::Integer)])
            .row(vec![1i64.into(), 7i64.into()])
            .row(vec![2i64.into(), 7i64.into()])
            .row(vec![3i64.into(), Value::Null]),
    );
    ds.on_query(
        "select id, name from author where id = ?",
        MemoryTable::new(&[("id", ColumnType::Integer), ("name", ColumnType::Varchar)])
            .row(vec![7i64.into(), "ann".into()]),
    );

    let mut configuration = configuration(&ds, Settings::default());
    configuration
        .add_mapped_statement(
            MappedStatement::builder(
                "selectAuthor",
                SqlCommandType::Select,
                StaticSqlSource::new("select id, name from author where id = ?").param(ParameterMapping::new("id")),
            )
            .result_map(ResultMap::builder("selectAuthor-Inline", ResultType::object("Author")).build())
            .build(),
        )
        .unwrap();
    let blog = ResultMap::builder("blogMap", ResultType::object("Blog"))
        .mapping(ResultMapping::column_of("id", "id").id())
        .mapping(ResultMapping::new("author").column("author_id").nested_query("selectAuthor"))
        .build();
    configuration
        .add_mapped_statement(select("selectBlogs", "select id, author_id from blog", blog))
        .unwrap();

    let session = SessionFactory::new(configuration).open().unwrap();
    let blogs = session.select_list("selectBlogs", &Node::null()).unwrap();

    assert_eq!(ds.executions("select id, name from author where id = ?"), 1);
    let first = blogs[0].get_path("author").unwrap().unwrap();
    let second = blogs[1].get_path("author").unwrap().unwrap();
    assert!(first.as_object().unwrap().ptr_eq(second.as_object().unwrap()));
    assert_eq!(first.path_value("name").unwrap(), Value::from("ann"));
    assert!(blogs[2].get_path("author").unwrap().is_none());
}

// ============================================================================
// Auto-mapping
// ============================================================================

fn users(settings: Settings) -> SessionFactory {
    let ds = MemoryDataSource::new();
    ds.on_query(
        "select id, first_name, shoe_size from users",
        MemoryTable::new(&[
            ("id", ColumnType::Integer),
            ("first_name", ColumnType::Varchar),
            ("shoe_size", ColumnType::Integer),
        ])
        .row(vec![1i64.into(), "ann".into(), 38i64.into()]),
    );
    let user = ObjectType::new("User")
        .property("id", DataType::Integer)
        .property("firstName", DataType::Text);
    let mut configuration = configuration(&ds, settings);
    configuration
        .add_mapped_statement(select(
            "selectUsers",
            "select id, first_name, shoe_size from users",
            ResultMap::builder("selectUsers-Inline", ResultType::Object(user)).build(),
        ))
        .unwrap();
    SessionFactory::new(configuration)
}

#[test]
fn test_auto_mapping_converts_underscores_to_camel_case() {
    let settings = Settings::default().map_underscore_to_camel_case(true);
    let session = users(settings).open().unwrap();
    let user = session.select_one("selectUsers", &Node::null()).unwrap().unwrap();

    assert_eq!(user.path_value("firstName").unwrap(), Value::from("ann"));
    assert_eq!(user.path_value("id").unwrap(), Value::from(1i64));
    assert!(!user.as_object().unwrap().has_property("shoe_size"));
}

#[test]
fn test_unknown_column_fails_when_configured() {
    let settings = Settings::default()
        .map_underscore_to_camel_case(true)
        .auto_mapping_unknown_column_behavior(AutoMappingUnknownColumnBehavior::Failing);
    let session = users(settings).open().unwrap();
    let err = session.select_list("selectUsers", &Node::null()).unwrap_err();

    assert!(matches!(err, DbError::Configuration(ref m) if m.contains("columnName=shoe_size")));
}

#[test]
fn test_auto_mapping_off_returns_null_rows() {
    let settings = Settings::default().auto_mapping_behavior(AutoMappingBehavior::None);
    let session = users(settings).open().unwrap();
    let rows = session.select_list("selectUsers", &Node::null()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_null());
}

#[test]
fn test_cursor_offset_rows_are_not_mapped() {
    let ds = MemoryDataSource::new();
    let mut blogs = MemoryTable::new(&[("id", ColumnType::Integer), ("author_id", ColumnType::Integer)]);
    for id in 1..=4i64 {
        blogs = blogs.row(vec![id.into(), (id * 10).into()]);
    }
    ds.on_query("select id, author_id from blog", blogs);
    ds.on("select id from author where id = ?", |params| {
        let id = params.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Response::table(MemoryTable::new(&[("id", ColumnType::Integer)]).row(vec![id.into()])))
    });

    let mut configuration = configuration(&ds, Settings::default());
    configuration
        .add_mapped_statement(
            MappedStatement::builder(
                "selectAuthor",
                SqlCommandType::Select,
                StaticSqlSource::new("select id from author where id = ?").param(ParameterMapping::new("id")),
            )
            .result_map(ResultMap::builder("selectAuthor-Inline", ResultType::object("Author")).build())
            .build(),
        )
        .unwrap();
    let blog = ResultMap::builder("blogMap", ResultType::object("Blog"))
        .mapping(ResultMapping::column_of("id", "id").id())
        .mapping(ResultMapping::new("author").column("author_id").nested_query("selectAuthor"))
        .build();
    configuration
        .add_mapped_statement(select("selectBlogs", "select id, author_id from blog", blog))
        .unwrap();
    let mut session = SessionFactory::new(configuration).open().unwrap();

    let mut cursor = session
        .select_cursor("selectBlogs", &Node::null(), RowBounds::new(2, 1))
        .unwrap();
    let rows: Vec<Node> = cursor.iter().unwrap().map(|b| b.unwrap()).collect();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path_value("id").unwrap(), Value::from(3i64));
    assert_eq!(rows[0].path_value("author.id").unwrap(), Value::from(30i64));
    assert_eq!(ds.executions("select id from author where id = ?"), 1);
    assert_eq!(cursor.current_index(), Some(2));
    assert!(cursor.is_consumed());
}
