//! Command-line front end for offline consistency checks.
#![forbid(unsafe_code)]

#[path = "check/ui.rs"]
mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sombra_consistency::config::CheckConfig;
use sombra_consistency::consistency::{
    CheckOptions, CheckResult, ConsistencyCheckService, ConsistencyFlags, DebugContext,
    InconsistencyCategory,
};
use sombra_consistency::logging::TracingLog;
use sombra_consistency::progress::{ConsoleProgress, NoProgress, ProgressMonitorFactory};
use sombra_consistency::storage::{DatabaseLayout, StoreBuilder};
use sombra_consistency::types::{SombraError, TxId};
use tracing_subscriber::EnvFilter;

use ui::{Theme, Ui};

const EXIT_INCONSISTENT: u8 = 2;
const EXIT_INCOMPLETE: u8 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "sombra-check",
    version,
    about = "Offline consistency checker for Sombra databases",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for the check result"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_enum, default_value_t = Theme::Auto, help = "Color theme")]
    theme: Theme,

    #[arg(long, global = true, help = "Plain output without icons")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a database and write a report of every inconsistency found.
    Check(CheckCmd),
    /// Write a small consistent database to experiment with.
    SeedDemo(SeedDemoCmd),
}

#[derive(Args, Debug)]
struct CheckCmd {
    #[arg(value_name = "DB_DIR")]
    db_dir: PathBuf,

    #[arg(long, value_name = "FILE", help = "Check config (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory receiving the report")]
    report_dir: Option<PathBuf>,

    #[arg(long, help = "Print scan details to stdout")]
    verbose: bool,

    #[arg(long, value_name = "N", help = "Worker threads (defaults to host parallelism)")]
    threads: Option<usize>,

    #[arg(long, help = "Skip node, edge, chain, counts and degrees checks")]
    skip_graph: bool,

    #[arg(long, help = "Skip property index contents")]
    skip_indexes: bool,

    #[arg(long, help = "Skip index ordering and statistics")]
    skip_index_structure: bool,

    #[arg(long, help = "Skip label index contents")]
    skip_label_index: bool,

    #[arg(long, help = "Skip property key token checks")]
    skip_property_keys: bool,

    #[arg(long, help = "Show progress bars on stderr")]
    progress: bool,
}

#[derive(Args, Debug)]
struct SeedDemoCmd {
    #[arg(value_name = "DB_DIR")]
    db_dir: PathBuf,

    #[arg(long, help = "Overwrite an existing database")]
    force: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Outcome<'a> {
    Consistent { result: &'a CheckResult },
    Inconsistent { result: &'a CheckResult },
    Incomplete { error: String, unrecovered: bool },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ui = Ui::new(cli.theme, cli.quiet);
    let outcome = match &cli.command {
        Command::Check(cmd) => run_check(cmd, cli.format, &ui),
        Command::SeedDemo(cmd) => run_seed_demo(cmd, &ui).map(|()| ExitCode::SUCCESS),
    };
    outcome.unwrap_or_else(|err| {
        ui.error(&format!("error: {err}"));
        ExitCode::from(EXIT_INCOMPLETE)
    })
}

fn run_check(cmd: &CheckCmd, format: OutputFormat, ui: &Ui) -> Result<ExitCode, Box<dyn Error>> {
    let mut config = CheckConfig::load_or_default(cmd.config.as_deref())?;
    if cmd.threads.is_some() {
        config.scan_threads = cmd.threads;
    }
    let progress: Arc<dyn ProgressMonitorFactory> = if cmd.progress {
        Arc::new(ConsoleProgress::new())
    } else {
        Arc::new(NoProgress)
    };
    let flags = ConsistencyFlags {
        check_graph: !cmd.skip_graph,
        check_indexes: !cmd.skip_indexes,
        check_index_structure: !cmd.skip_index_structure,
        check_label_index: !cmd.skip_label_index,
        check_property_keys: !cmd.skip_property_keys,
    };
    let mut options = CheckOptions::new()
        .progress(progress)
        .log(Arc::new(TracingLog))
        .flags(flags)
        .debug(DebugContext::verbose(cmd.verbose));
    if let Some(dir) = &cmd.report_dir {
        options = options.report_dir(dir);
    }

    let layout = DatabaseLayout::new(&cmd.db_dir);
    let service = ConsistencyCheckService::new();
    match service.run_full_consistency_check(&layout, &config, options) {
        Ok(result) => {
            let consistent = result.is_successful();
            match format {
                OutputFormat::Json => {
                    let outcome = if consistent {
                        Outcome::Consistent { result: &result }
                    } else {
                        Outcome::Inconsistent { result: &result }
                    };
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                OutputFormat::Text => print_result(ui, &layout, &result),
            }
            Ok(if consistent {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_INCONSISTENT)
            })
        }
        Err(err) => {
            match format {
                OutputFormat::Json => {
                    let outcome = Outcome::Incomplete {
                        error: err.to_string(),
                        unrecovered: err.is_unrecovered(),
                    };
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                OutputFormat::Text => ui.error(&err.to_string()),
            }
            Ok(ExitCode::from(EXIT_INCOMPLETE))
        }
    }
}

fn print_result(ui: &Ui, layout: &DatabaseLayout, result: &CheckResult) {
    let summary = result.summary();
    ui.section(
        "Consistency check",
        [
            ("database", layout.dir().display().to_string()),
            ("errors", summary.total_errors.to_string()),
            ("warnings", summary.total_warnings.to_string()),
            ("report", result.report_path().display().to_string()),
        ],
    );
    let rows: Vec<(&str, String)> = InconsistencyCategory::ALL
        .iter()
        .filter(|category| summary.errors(**category) + summary.warnings(**category) > 0)
        .map(|category| {
            (
                category.as_str(),
                format!(
                    "{} errors, {} warnings",
                    summary.errors(*category),
                    summary.warnings(*category)
                ),
            )
        })
        .collect();
    ui.section("Findings", rows);
    if result.is_successful() {
        ui.success("Database is consistent");
    } else {
        ui.warn("Database is inconsistent");
    }
}

fn run_seed_demo(cmd: &SeedDemoCmd, ui: &Ui) -> Result<(), Box<dyn Error>> {
    let layout = DatabaseLayout::new(&cmd.db_dir);
    if layout.meta_store().exists() && !cmd.force {
        return Err(format!(
            "{} already holds a database; pass --force to overwrite it",
            cmd.db_dir.display()
        )
        .into());
    }
    let meta = demo_database()?.write(&layout)?;
    ui.section(
        "Seeded demo database",
        [
            ("database", cmd.db_dir.display().to_string()),
            ("nodes", meta.node_high_id.to_string()),
            ("edges", meta.edge_high_id.to_string()),
            ("last committed tx", meta.last_committed_tx.to_string()),
        ],
    );
    Ok(())
}

fn demo_database() -> Result<StoreBuilder, SombraError> {
    let mut builder = StoreBuilder::new();
    let user = builder.label("User");
    let company = builder.label("Company");
    let name = builder.property_key("name");
    let follows = builder.relationship_type("FOLLOWS");
    let works_at = builder.relationship_type("WORKS_AT");

    let acme = builder.dense_node(Some(company));
    let users: Vec<_> = (0..6)
        .map(|i| builder.node_with_property(Some(user), name, 100 + i))
        .collect();
    builder.deleted_node();
    for (i, member) in users.iter().enumerate() {
        builder.edge(*member, acme, works_at)?;
        builder.edge(*member, users[(i + 1) % users.len()], follows)?;
    }
    builder.property_index(user, name);
    builder.last_committed_tx(TxId(42));
    Ok(builder)
}
