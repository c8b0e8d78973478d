/// Local cache tests
///
/// Tests for the per-session result cache: identity on hits, invalidation
/// on writes, statement scope, and nested queries that hit in-flight keys
/// Run with: cargo test --test local_cache_tests

use std::sync::Arc;

use rustsqlmap::core::{ColumnType, Value};
use rustsqlmap::driver::memory::{MemoryDataSource, MemoryTable, Response};
use rustsqlmap::mapping::{
    FetchType, MappedStatement, ParameterMapping, ResultMap, ResultMapping, ResultType, SqlCommandType,
    StaticSqlSource,
};
use rustsqlmap::object::Node;
use rustsqlmap::session::{Configuration, LocalCacheScope, SessionFactory, Settings};
use rustsqlmap::transaction::Environment;

const SELECT_PERSON: &str = "select id, name, parent_id from person where id = ?";
const RENAME_PERSON: &str = "update person set name = ? where id = ?";

fn person_table(id: i64) -> MemoryTable {
    let table = MemoryTable::new(&[
        ("id", ColumnType::Integer),
        ("name", ColumnType::Varchar),
        ("parent_id", ColumnType::Integer),
    ]);
    match id {
        1 => table.row(vec![1i64.into(), "root".into(), 1i64.into()]),
        2 => table.row(vec![2i64.into(), "child".into(), 1i64.into()]),
        _ => table,
    }
}

fn factory(settings: Settings, parent_fetch: Option<FetchType>) -> (MemoryDataSource, SessionFactory) {
    let ds = MemoryDataSource::new();
    ds.on(SELECT_PERSON, |params| {
        let id = params.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(Response::table(person_table(id)))
    });
    ds.on_update(RENAME_PERSON, 1);

    let mut parent = ResultMapping::new("parent").column("parent_id").nested_query("selectPerson");
    if let Some(fetch) = parent_fetch {
        parent = parent.fetch(fetch);
    }
    let person = ResultMap::builder("personMap", ResultType::object("Person"))
        .mapping(ResultMapping::column_of("id", "id").id())
        .mapping(ResultMapping::column_of("name", "name"))
        .mapping(parent)
        .build();

    let mut configuration = Configuration::new(settings)
        .with_environment(Environment::new("test", Arc::new(ds.clone())));
    configuration
        .add_mapped_statement(
            MappedStatement::builder(
                "selectPerson",
                SqlCommandType::Select,
                StaticSqlSource::new(SELECT_PERSON).param(ParameterMapping::new("id")),
            )
            .result_map(person)
            .build(),
        )
        .unwrap();
    configuration
        .add_mapped_statement(
            MappedStatement::builder(
                "renamePerson",
                SqlCommandType::Update,
                StaticSqlSource::new(RENAME_PERSON)
                    .param(ParameterMapping::new("name"))
                    .param(ParameterMapping::new("id")),
            )
            .build(),
        )
        .unwrap();
    (ds, SessionFactory::new(configuration))
}

#[test]
fn test_repeated_query_returns_the_cached_list() {
    let (ds, factory) = factory(Settings::default(), None);
    let session = factory.open().unwrap();

    let first = session.select_list("selectPerson", &Node::from(2i64)).unwrap();
    let second = session.select_list("selectPerson", &Node::from(2i64)).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // selectPerson(2) plus its parent selectPerson(1), once each
    assert_eq!(ds.executions(SELECT_PERSON), 2);
}

#[test]
fn test_write_invalidates_the_local_cache() {
    let (ds, factory) = factory(Settings::default(), None);
    let mut session = factory.open().unwrap();

    let before = session.select_list("selectPerson", &Node::from(1i64)).unwrap();
    let param = rustsqlmap::object::ObjectRef::new("args");
    param.set("id", 1i64).unwrap();
    param.set("name", "renamed").unwrap();
    session.update("renamePerson", &Node::Object(param)).unwrap();
    let after = session.select_list("selectPerson", &Node::from(1i64)).unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(ds.executions(SELECT_PERSON), 2);
}

#[test]
fn test_statement_scope_clears_after_each_query() {
    let settings = Settings::default().local_cache_scope(LocalCacheScope::Statement);
    let (ds, factory) = factory(settings, None);
    let session = factory.open().unwrap();

    session.select_list("selectPerson", &Node::from(1i64)).unwrap();
    session.select_list("selectPerson", &Node::from(1i64)).unwrap();
    assert_eq!(ds.executions(SELECT_PERSON), 2);
}

#[test]
fn test_self_reference_resolves_without_a_second_execution() {
    let (ds, factory) = factory(Settings::default(), None);
    let session = factory.open().unwrap();

    let root = session.select_one("selectPerson", &Node::from(1i64)).unwrap().unwrap();
    let root = root.as_object().unwrap().clone();
    let parent = root.get("parent").unwrap().unwrap();

    assert!(parent.as_object().unwrap().ptr_eq(&root));
    assert_eq!(ds.executions(SELECT_PERSON), 1);
}

#[test]
fn test_lazy_parent_is_fetched_once_on_first_access() {
    let (ds, factory) = factory(Settings::default(), Some(FetchType::Lazy));
    let session = factory.open().unwrap();

    let child = session.select_one("selectPerson", &Node::from(2i64)).unwrap().unwrap();
    let child = child.as_object().unwrap().clone();
    assert!(child.is_lazy_pending("parent"));
    assert_eq!(ds.executions(SELECT_PERSON), 1);

    let parent = child.get("parent").unwrap().unwrap();
    assert_eq!(parent.path_value("name").unwrap(), Value::from("root"));
    assert_eq!(ds.executions(SELECT_PERSON), 2);

    child.get("parent").unwrap();
    assert!(!child.is_lazy_pending("parent"));
    assert_eq!(ds.executions(SELECT_PERSON), 2);
}

#[test]
fn test_lazy_load_after_close_uses_a_fresh_executor() {
    let (ds, factory) = factory(Settings::default(), Some(FetchType::Lazy));
    let mut session = factory.open().unwrap();
    let child = session.select_one("selectPerson", &Node::from(2i64)).unwrap().unwrap();
    session.close();

    let parent = child.get_path("parent").unwrap().unwrap();
    assert_eq!(parent.path_value("id").unwrap(), Value::from(1i64));
    assert_eq!(ds.executions(SELECT_PERSON), 2);
    assert_eq!(ds.connections_opened(), ds.connections_closed());
}
