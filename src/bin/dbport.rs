use dbport::{load_options, ExecuteResult, FetchMode, Options, Session, SqliteDriver};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const USAGE: &str = "usage: dbport <database> <sql> [--assoc] [--config <file>]";

#[derive(Debug, PartialEq)]
struct Args {
    database: String,
    sql: String,
    assoc: bool,
    config: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut assoc = false;
    let mut config = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--assoc" => assoc = true,
            "--config" => match args.next() {
                Some(path) => config = Some(path),
                None => return Err("--config needs a file argument".to_string()),
            },
            flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
            _ => positional.push(arg),
        }
    }

    match <[String; 2]>::try_from(positional) {
        Ok([database, sql]) => Ok(Args {
            database,
            sql,
            assoc,
            config,
        }),
        Err(_) => Err("expected a database path and one SQL string".to_string()),
    }
}

/// Runs the query and prints every row of every result set as a JSON line.
fn run(args: Args) -> dbport::Result<()> {
    let options = match &args.config {
        Some(path) => load_options(path)?,
        None => Options::default(),
    };
    let driver = SqliteDriver::connect(&args.database)?;
    let session = Arc::new(Session::new(driver, options));
    let mode = if args.assoc {
        FetchMode::Assoc
    } else {
        FetchMode::Default
    };

    match session.query(&args.sql)? {
        ExecuteResult::Affected(affected) => {
            println!("{}", serde_json::json!({ "affected": affected }));
        }
        ExecuteResult::Rows(mut cursor) => {
            loop {
                while let Some(row) = cursor.fetch_row(mode, None)? {
                    println!("{}", serde_json::to_string(&row)?);
                }
                if !cursor.next_result()? {
                    break;
                }
            }
            cursor.free()?;
        }
        ExecuteResult::Native(_) | ExecuteResult::Nothing => {}
    }
    Ok(())
}

fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };

    info!(database = %args.database, "running query");
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "query failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
