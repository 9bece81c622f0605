//! CLI entry point for the bloomdb migration tool.
//! Provides clap-based command routing, fan-out over migration directories,
//! exit code mapping based on error type, and signal handling.

mod output;

use std::io::BufRead;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;

use bloomdb_core::config::{BloomConfig, CliOverrides};
use bloomdb_core::directory::MigrationDirectory;
use bloomdb_core::error::BloomError;
use bloomdb_core::BloomDb;

use output::Printer;

/// Exit code after SIGINT or SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "bloomdb",
    about = "Flyway-style SQL migrations for SQLite, PostgreSQL, MySQL and Oracle",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path (default: bloomdb.toml if present)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Connection string, e.g. sqlite:app.db or postgres://user@host/db
    #[arg(long, value_name = "DSN", global = true)]
    conn: Option<String>,

    /// Migration root directory
    #[arg(long, value_name = "DIR", global = true)]
    path: Option<PathBuf>,

    /// Version table for the root directory
    #[arg(long, value_name = "TABLE", global = true)]
    table_name: Option<String>,

    /// SQL script to run after each successful migrate
    #[arg(long, value_name = "FILE", global = true)]
    post_migration_script: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available bloomdb subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the version table and record a baseline
    Baseline {
        /// Version to baseline at (default: 1)
        #[arg(long, value_name = "VER")]
        baseline_version: Option<String>,
    },

    /// Apply pending migrations
    Migrate,

    /// Show migration status
    Info,

    /// Remove failed records and realign checksums with the files on disk
    Repair,

    /// Drop every object in the database
    Destroy,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&e);
            exit_code(&e)
        }
    };
    process::exit(code);
}

/// Install env_logger; `RUST_LOG` still takes precedence.
fn init_logging(cli: &Cli) {
    let verbose = cli.verbose || std::env::var("BLOOMDB_VERBOSE").is_ok_and(|v| is_truthy(&v));
    let filter = if cli.json || cli.quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &BloomError) -> i32 {
    match error {
        BloomError::ConfigError(_)
        | BloomError::UnknownScheme(_)
        | BloomError::DialectNotEnabled(_) => 2,
        BloomError::FailedMigrationsPresent { .. } | BloomError::ChecksumMismatch(_) => 3,
        BloomError::DatabaseError(_)
        | BloomError::SqliteError(_)
        | BloomError::MysqlError(_)
        | BloomError::ConnectionUnavailable(_)
        | BloomError::ConnectionTimeout { .. } => 4,
        #[cfg(feature = "oracle")]
        BloomError::OracleError(_) => 4,
        BloomError::MigrationFailed { .. }
        | BloomError::RecordFailed { .. }
        | BloomError::PostMigrationFailed { .. }
        | BloomError::PlaceholderNotFound { .. } => 5,
        BloomError::VersionTableMissing { .. }
        | BloomError::BaselineMissing { .. }
        | BloomError::MultipleBaselines { .. } => 6,
        BloomError::DestroyNotConfirmed => 7,
        BloomError::Interrupted { .. } => EXIT_INTERRUPTED,
        BloomError::MigrateIncomplete { cause, .. } => exit_code(cause),
        _ => 1,
    }
}

/// Load configuration, connect, and run the command until it finishes or a
/// termination signal stops it at a migration boundary.
async fn run(cli: Cli) -> Result<i32, BloomError> {
    let overrides = CliOverrides {
        conn: cli.conn,
        path: cli.path,
        table_name: cli.table_name,
        baseline_version: match &cli.command {
            Commands::Baseline { baseline_version } => baseline_version.clone(),
            _ => None,
        },
        post_migration_script: cli.post_migration_script,
    };

    let config = BloomConfig::load(cli.config.as_deref(), &overrides)?;
    let bloom = BloomDb::new(config).await?;
    let ctx = Context {
        bloom: &bloom,
        printer: Printer::from_env(),
        json: cli.json,
    };

    // A signal raises the shutdown flag; the command stops at the next
    // migration boundary after recording the one in flight.
    let work = dispatch(&cli.command, &ctx);
    tokio::pin!(work);
    let (result, interrupted) = tokio::select! {
        result = &mut work => (result, false),
        signal = shutdown_signal() => {
            log::warn!("Interrupted, finishing the migration in flight; signal={}", signal);
            bloom.request_shutdown();
            (work.await, true)
        }
    };

    if let Err(e) = bloom.close().await {
        log::warn!("Failed to close connection: {}", e);
    }

    match result {
        Ok(()) if interrupted => Ok(EXIT_INTERRUPTED),
        other => other.map(|()| 0),
    }
}

/// Resolve when SIGINT or (on Unix) SIGTERM arrives.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                log::warn!("Could not listen for SIGINT: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                name = ctrl_c => name,
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                log::warn!("Could not listen for SIGTERM: {}", e);
                ctrl_c.await
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await
}

/// Shared state for one command run.
struct Context<'a> {
    bloom: &'a BloomDb,
    printer: Printer,
    json: bool,
}

impl Context<'_> {
    /// Print a report as JSON or through the printer.
    ///
    /// In subdirectory mode JSON goes out as one line per directory so
    /// partial results survive a later failure.
    fn emit<T: Serialize>(&self, dir: Option<&MigrationDirectory>, report: &T, human: impl FnOnce(&T)) {
        if !self.json {
            human(report);
            return;
        }

        let rendered = match dir.filter(|d| d.is_subdirectory) {
            Some(d) => serde_json::to_string(&serde_json::json!({
                "directory": d.name,
                "table": d.version_table,
                "report": report,
            })),
            None => serde_json::to_string_pretty(report),
        };
        match rendered {
            Ok(text) => println!("{}", text),
            Err(e) => log::error!("Failed to serialize report: {}", e),
        }
    }
}

/// Run the command once per migration directory, stopping at the first error.
async fn dispatch(command: &Commands, ctx: &Context<'_>) -> Result<(), BloomError> {
    let bloom = ctx.bloom;

    if let Commands::Destroy = command {
        ctx.printer.destroy_prompt();
        let typed = tokio::select! {
            typed = read_confirmation() => typed?,
            _ = shutdown_signal() => {
                return Err(BloomError::Interrupted {
                    next: "destroy".to_string(),
                })
            }
        };
        let report = bloom.destroy(&typed).await?;
        ctx.emit(None, &report, |r| ctx.printer.destroy(r));
        return Ok(());
    }

    let dirs = bloom.directories()?;
    if dirs.is_empty() {
        log::warn!(
            "No migrations found; path={}",
            bloom.config.migrations.path.display()
        );
    }

    for dir in &dirs {
        if bloom.shutdown_requested() {
            return Err(BloomError::Interrupted {
                next: dir.version_table.clone(),
            });
        }
        if dir.is_subdirectory && !ctx.json {
            ctx.printer.directory_header(dir);
        }
        match command {
            Commands::Baseline { .. } => {
                let report = bloom.baseline(dir).await?;
                ctx.emit(Some(dir), &report, |r| ctx.printer.baseline(r));
            }
            Commands::Migrate => match bloom.migrate(dir).await {
                Ok(report) => ctx.emit(Some(dir), &report, |r| ctx.printer.migrate(r)),
                Err(BloomError::MigrateIncomplete { report, cause }) => {
                    ctx.emit(Some(dir), &*report, |r| ctx.printer.migrate(r));
                    return Err(*cause);
                }
                Err(e) => return Err(e),
            },
            Commands::Info => {
                let infos = bloom.info(dir).await?;
                ctx.emit(Some(dir), &infos, |i| ctx.printer.info(i));
            }
            Commands::Repair => {
                let report = bloom.repair(dir).await?;
                ctx.emit(Some(dir), &report, |r| ctx.printer.repair(r));
            }
            Commands::Destroy => unreachable!("handled before directory fan-out"),
        }
    }

    Ok(())
}

/// Read one line from stdin with its line terminator removed.
async fn read_confirmation() -> Result<String, BloomError> {
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await
    .map_err(|e| BloomError::ConfigError(format!("Failed to read confirmation: {}", e)))??;
    Ok(strip_line_ending(&line).to_string())
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Print a formatted error message with actionable hints to stderr.
fn print_error(error: &BloomError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    let hint = match error.cause() {
        BloomError::ConfigError(_) | BloomError::UnknownScheme(_) => Some(
            "Hint: Pass --conn, set BLOOMDB_CONNECT_STRING, or add connect_string to bloomdb.toml.",
        ),
        BloomError::DialectNotEnabled(_) => {
            Some("Hint: Rebuild bloomdb with the dialect's cargo feature enabled.")
        }
        BloomError::DatabaseError(_)
        | BloomError::SqliteError(_)
        | BloomError::MysqlError(_)
        | BloomError::ConnectionUnavailable(_)
        | BloomError::ConnectionTimeout { .. } => {
            Some("Hint: Verify the database is running and the connection string is correct.")
        }
        BloomError::VersionTableMissing { .. } | BloomError::BaselineMissing { .. } => {
            Some("Hint: Run 'bloomdb baseline' to create the version table.")
        }
        BloomError::ChecksumMismatch(_) => Some(
            "Hint: Run 'bloomdb repair' to accept the new checksums, or restore the original migration files.",
        ),
        BloomError::FailedMigrationsPresent { .. } => Some(
            "Hint: Fix the failing migration, then run 'bloomdb repair' to clear the failed records.",
        ),
        BloomError::MigrationFailed { .. } | BloomError::RecordFailed { .. } => {
            Some("Hint: The failure is recorded in the version table. Fix the script and run 'bloomdb repair'.")
        }
        BloomError::PlaceholderNotFound { .. } | BloomError::PostMigrationFailed { .. } => Some(
            "Hint: Define placeholders in [placeholders] of bloomdb.toml or as BLOOMDB_PLACEHOLDER_<KEY>.",
        ),
        BloomError::DestroyNotConfirmed => Some("Hint: Type DESTROY exactly, in capitals."),
        _ => None,
    };

    if let Some(hint) = hint {
        eprintln!("{}", hint.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bloomdb",
            "baseline",
            "--baseline-version",
            "3",
            "--conn",
            "sqlite:app.db",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.conn.as_deref(), Some("sqlite:app.db"));
        assert!(matches!(
            cli.command,
            Commands::Baseline { baseline_version: Some(ref v) } if v == "3"
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&BloomError::ConfigError("x".into())), 2);
        assert_eq!(exit_code(&BloomError::ChecksumMismatch(Vec::new())), 3);
        assert_eq!(exit_code(&BloomError::ConnectionTimeout { secs: 5 }), 4);
        assert_eq!(
            exit_code(&BloomError::MigrationFailed {
                script: "V2__b".into(),
                reason: "boom".into()
            }),
            5
        );
        assert_eq!(
            exit_code(&BloomError::BaselineMissing {
                table: "BLOOMDB_VERSION".into()
            }),
            6
        );
        assert_eq!(exit_code(&BloomError::DestroyNotConfirmed), 7);
        assert_eq!(
            exit_code(&BloomError::ConnectionUnavailable("closed".into())),
            4
        );
        assert_eq!(
            exit_code(&BloomError::Interrupted {
                next: "V3__c".into()
            }),
            EXIT_INTERRUPTED
        );
        assert_eq!(exit_code(&BloomError::MigrationParseError("x".into())), 1);
    }

    #[test]
    fn test_strip_line_ending_keeps_other_whitespace() {
        assert_eq!(strip_line_ending("DESTROY\n"), "DESTROY");
        assert_eq!(strip_line_ending("DESTROY\r\n"), "DESTROY");
        assert_eq!(strip_line_ending("DESTROY \n"), "DESTROY ");
        assert_eq!(strip_line_ending(""), "");
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
