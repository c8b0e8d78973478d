/// Settings file tests
///
/// Tests for loading engine settings from JSON files and their effect on
/// sessions opened from them
/// Run with: cargo test --test settings_tests

use std::io::Write;
use std::sync::Arc;

use rustsqlmap::core::{ColumnType, DbError};
use rustsqlmap::driver::memory::{MemoryDataSource, MemoryTable};
use rustsqlmap::mapping::{MappedStatement, ResultMap, ResultType, SqlCommandType, StaticSqlSource};
use rustsqlmap::object::Node;
use rustsqlmap::session::{
    AutoMappingUnknownColumnBehavior, Configuration, ExecutorType, LocalCacheScope, SessionFactory, Settings,
};
use rustsqlmap::transaction::Environment;
use tempfile::NamedTempFile;

fn settings_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_settings_from_file() {
    let file = settings_file(
        r#"{
            "default_executor_type": "REUSE",
            "local_cache_scope": "STATEMENT",
            "auto_mapping_unknown_column_behavior": "FAILING",
            "default_statement_timeout": 30
        }"#,
    );

    let settings = Settings::from_path(file.path()).unwrap();
    assert_eq!(settings.default_executor_type, ExecutorType::Reuse);
    assert_eq!(settings.local_cache_scope, LocalCacheScope::Statement);
    assert_eq!(
        settings.auto_mapping_unknown_column_behavior,
        AutoMappingUnknownColumnBehavior::Failing
    );
    assert_eq!(settings.default_statement_timeout, Some(30));
    assert!(settings.cache_enabled);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Settings::from_path(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, DbError::Io(_)));
}

#[test]
fn test_invalid_settings_are_rejected() {
    let unknown_variant = settings_file(r#"{ "local_cache_scope": "FOREVER" }"#);
    assert!(Settings::from_path(unknown_variant.path()).unwrap_err().is_configuration());

    let zero_timeout = settings_file(r#"{ "default_statement_timeout": 0 }"#);
    assert!(Settings::from_path(zero_timeout.path()).unwrap_err().is_configuration());
}

#[test]
fn test_file_settings_drive_opened_sessions() {
    let file = settings_file(r#"{ "local_cache_scope": "STATEMENT" }"#);
    let settings = Settings::from_path(file.path()).unwrap();

    let ds = MemoryDataSource::new();
    ds.on_query("select 1", MemoryTable::new(&[("one", ColumnType::Integer)]).row(vec![1i64.into()]));
    let mut configuration =
        Configuration::new(settings).with_environment(Environment::new("test", Arc::new(ds.clone())));
    configuration
        .add_mapped_statement(
            MappedStatement::builder("selectOne", SqlCommandType::Select, StaticSqlSource::new("select 1"))
                .result_map(ResultMap::builder("selectOne-Inline", ResultType::Map).build())
                .build(),
        )
        .unwrap();
    let session = SessionFactory::new(configuration).open().unwrap();

    session.select_list("selectOne", &Node::null()).unwrap();
    session.select_list("selectOne", &Node::null()).unwrap();
    assert_eq!(ds.executions("select 1"), 2);
}
