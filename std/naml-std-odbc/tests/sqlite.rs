///
/// # SQLite Source Tests
///
/// End-to-end runs through the environment, connection and cursor API on
/// top of real SQLite databases, in memory and on disk.
///

use tempfile::TempDir;

use naml_std_odbc::{
    Environment, ErrorKind, Execution, FieldValue, OdbcConfig, OdbcError, SemanticType,
    SqliteDriver,
};

fn text(s: &str) -> FieldValue {
    FieldValue::String(s.to_string())
}

fn row_count<S: naml_std_odbc::Statement>(execution: Execution<S>) -> i64 {
    execution.row_count().expect("statement should not return rows")
}

#[test]
fn test_file_database_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("people.db");
    let path = path.to_str().unwrap();

    let env = Environment::new(SqliteDriver::new());
    {
        let mut conn = env.connect(path, None, None).expect("Failed to open database");
        row_count(conn.execute("CREATE TABLE people (name VARCHAR(40), age INTEGER)").unwrap());
        let inserted = row_count(
            conn.execute("INSERT INTO people VALUES ('Ada', 36), ('Bob', NULL), ('Cy', 41)")
                .unwrap(),
        );
        assert_eq!(inserted, 3);
        conn.close().unwrap();
    }

    let conn = env.connect(path, None, None).expect("Failed to reopen database");
    let mut cursor = conn
        .execute("SELECT name, age FROM people ORDER BY rowid")
        .unwrap()
        .into_cursor()
        .expect("cursor");

    let types: Vec<SemanticType> =
        cursor.columns().unwrap().iter().map(|c| c.semantic_type).collect();
    assert_eq!(types, vec![SemanticType::String, SemanticType::Number]);

    let rows: Vec<Vec<FieldValue>> = cursor
        .by_ref()
        .map(|row| row.map(|r| r.into_values()))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![text("Ada"), FieldValue::Number(36.0)],
            vec![text("Bob"), FieldValue::Null],
            vec![text("Cy"), FieldValue::Number(41.0)],
        ]
    );
    assert!(cursor.next_row().unwrap().is_none());
}

#[test]
fn test_long_text_with_small_chunks() {
    let config = OdbcConfig {
        chunk_size: 5,
        ..OdbcConfig::default()
    };
    let env = Environment::with_config(SqliteDriver::new(), config);
    let conn = env.connect(":memory:", None, None).unwrap();
    conn.execute("CREATE TABLE notes (body TEXT, data BLOB)").unwrap();
    conn.execute(
        "INSERT INTO notes VALUES ('héllo wörld, in several chunks', x'00010203040506070809')",
    )
    .unwrap();

    let mut cursor = conn.execute("SELECT body, data FROM notes").unwrap().into_cursor().unwrap();
    let row = cursor.next_row().unwrap().unwrap();
    assert_eq!(row.by_name("body"), Some(&text("héllo wörld, in several chunks")));
    assert_eq!(
        row.by_name("data"),
        Some(&FieldValue::Binary((0..10).collect()))
    );
}

#[test]
fn test_boolean_and_real_columns() {
    let env = Environment::new(SqliteDriver::new());
    let conn = env.connect(":memory:", None, None).unwrap();
    conn.execute("CREATE TABLE flags (on_off BOOLEAN, ratio REAL)").unwrap();
    conn.execute("INSERT INTO flags VALUES (1, 0.25), (0, NULL), (NULL, 2)").unwrap();

    let mut cursor = conn
        .execute("SELECT on_off, ratio FROM flags")
        .unwrap()
        .into_cursor()
        .unwrap();
    let mut values = Vec::new();
    let mut seen = Vec::new();
    while cursor.fetch_values_into(&mut values).unwrap() {
        seen.push(values.clone());
    }
    assert_eq!(
        seen,
        vec![
            vec![FieldValue::Boolean(true), FieldValue::Number(0.25)],
            vec![FieldValue::Boolean(false), FieldValue::Null],
            vec![FieldValue::Null, FieldValue::Number(2.0)],
        ]
    );
}

#[test]
fn test_empty_result_is_exhausted_immediately() {
    let env = Environment::new(SqliteDriver::new());
    let conn = env.connect(":memory:", None, None).unwrap();
    conn.execute("CREATE TABLE t (v INTEGER)").unwrap();

    let mut cursor = conn.execute("SELECT v FROM t").unwrap().into_cursor().unwrap();
    assert_eq!(cursor.columns().unwrap().len(), 1);
    assert!(cursor.next_row().unwrap().is_none());
}

#[test]
fn test_sql_error_is_a_source_failure() {
    let env = Environment::new(SqliteDriver::new());
    let conn = env.connect(":memory:", None, None).unwrap();

    let err = conn.execute("SELECT * FROM missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceProtocol);
    assert_eq!(err.diagnostics().len(), 1);
    assert!(err.diagnostics()[0].starts_with("[42000] no such table: missing"));
    assert_eq!(conn.cursor_count(), 0);
}

#[test]
fn test_unopenable_path_fails_connect() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("missing").join("db.sqlite");

    let env = Environment::new(SqliteDriver::new());
    let err = env.connect(path.to_str().unwrap(), None, None).unwrap_err();
    assert!(matches!(err, OdbcError::SourceProtocol { operation: "connect", .. }));
    assert!(err.diagnostics()[0].starts_with("[08001]"));
}
