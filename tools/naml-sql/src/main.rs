///
/// naml-sql - Command-line SQL runner
///
/// Runs each SQL argument in order against one SQLite connection:
/// - statements without a result set print `{"changes": N}`
/// - statements with a result set print one JSON document per row, laid
///   out by the fetch mode ("n" array, "a" object, "na" both)
///
/// Settings come from the `[odbc]` table of `--config`; `--mode`
/// overrides its fetch mode. Logs go to stderr.
///

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use serde_json::{json, Map, Value};
use tracing::Level;

use naml_std_odbc::{
    Environment, Execution, FetchMode, FieldValue, OdbcConfig, RowTable, SqliteDriver,
};

#[derive(Parser)]
#[command(name = "naml-sql")]
#[command(author, version, about = "Run SQL through the naml database driver", long_about = None)]
struct Cli {
    /// Database file, or :memory:
    #[arg(long, default_value = ":memory:")]
    database: String,

    /// naml.toml with an [odbc] section
    #[arg(long)]
    config: Option<PathBuf>,

    /// Row layout: n (positional), a (by column name) or na (both)
    #[arg(long)]
    mode: Option<FetchMode>,

    /// Log driver activity to stderr
    #[arg(long)]
    verbose: bool,

    /// Statements to execute, in order
    #[arg(required = true)]
    sql: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let stdout = std::io::stdout();
    if let Err(e) = run(&cli, &mut stdout.lock()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, out: &mut impl Write) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => OdbcConfig::from_path(path)?,
        None => OdbcConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.fetch_mode = mode;
    }
    let mode = config.fetch_mode;

    let env = Environment::with_config(SqliteDriver::new(), config);
    let mut conn = env.connect(&cli.database, None, None)?;

    for sql in &cli.sql {
        match conn.execute(sql)? {
            Execution::RowCount(n) => writeln!(out, "{}", json!({ "changes": n }))?,
            Execution::Cursor(mut cursor) => {
                let mut table = RowTable::new();
                while cursor.fetch_into(&mut table, mode)? {
                    writeln!(out, "{}", row_to_json(&table, mode))?;
                }
                cursor.close()?;
            }
        }
    }

    conn.close()?;
    Ok(())
}

fn row_to_json(table: &RowTable, mode: FetchMode) -> Value {
    let positional = || Value::Array(table.positional.iter().map(value_to_json).collect());
    let named = || {
        Value::Object(
            table
                .named
                .iter()
                .map(|(name, value)| (name.clone(), value_to_json(value)))
                .collect::<Map<_, _>>(),
        )
    };
    match mode {
        FetchMode::Positional => positional(),
        FetchMode::Named => named(),
        FetchMode::Both => json!({ "n": positional(), "a": named() }),
    }
}

fn value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Number(n) => {
            serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number)
        }
        FieldValue::Boolean(b) => Value::Bool(*b),
        FieldValue::Binary(bytes) => {
            Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(args: &[&str]) -> String {
        let cli = Cli::try_parse_from(std::iter::once("naml-sql").chain(args.iter().copied()))
            .expect("Failed to parse arguments");
        let mut out = Vec::new();
        run(&cli, &mut out).expect("Failed to run statements");
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_prints_changes_and_rows() {
        let out = output(&[
            "--mode",
            "a",
            "CREATE TABLE t (name TEXT, n INTEGER, ok BOOLEAN)",
            "INSERT INTO t VALUES ('a', 1, 1), ('b', NULL, 0)",
            "SELECT name, n, ok FROM t",
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"changes":0}"#,
                r#"{"changes":2}"#,
                r#"{"name":"a","n":1.0,"ok":true}"#,
                r#"{"name":"b","n":null,"ok":false}"#,
            ]
        );
    }

    #[test]
    fn test_positional_and_both_layouts() {
        let out = output(&["SELECT 'x' AS s, x'0aff' AS b"]);
        assert_eq!(out.trim(), r#"["x","0aff"]"#);

        let out = output(&["--mode", "na", "SELECT 2 AS two"]);
        assert_eq!(out.trim(), r#"{"n":[2.0],"a":{"two":2.0}}"#);
    }

    #[test]
    fn test_named_layout_keeps_column_order() {
        let out = output(&["--mode", "a", "SELECT 1 AS zeta, 2 AS alpha"]);
        assert_eq!(out.trim(), r#"{"zeta":1.0,"alpha":2.0}"#);

        let out = output(&["--mode", "na", "SELECT 1 AS zeta, 2 AS alpha"]);
        assert_eq!(out.trim(), r#"{"n":[1.0,2.0],"a":{"zeta":1.0,"alpha":2.0}}"#);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["naml-sql", "--mode", "x", "SELECT 1"]).is_err());
    }

    #[test]
    fn test_failure_stops_the_run() {
        let cli = Cli::try_parse_from(["naml-sql", "SELECT * FROM nowhere", "SELECT 1"]).unwrap();
        let mut out = Vec::new();
        let err = run(&cli, &mut out).unwrap_err();
        assert!(err.to_string().contains("no such table: nowhere"));
        assert!(out.is_empty());
    }
}
