mod commands;
mod config;
mod seed;
mod store;
mod telemetry;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Compact,
    Json,
}

/// Which extractor reads the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ExtractorKind {
    /// The document is already a structured JSON record
    Json,
    /// Ask a language model to read the document
    Llm,
}

/// Risk level threshold for `analyze --fail-on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum FailLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Procurement fraud-risk assessment.
#[derive(Parser)]
#[command(
    name = "spendshield",
    version,
    about = "Procurement fraud-risk assessment"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,

    /// Log format on stderr
    #[arg(long, global = true, default_value = "compact", value_enum)]
    log_format: LogFormat,

    /// Engine configuration file (TOML); defaults apply when it does not exist
    #[arg(
        long,
        global = true,
        env = "SPENDSHIELD_CONFIG",
        default_value = "spendshield.toml"
    )]
    config: PathBuf,

    /// Ledger file (JSON); created on first write. Only one spendshield
    /// process may use it at a time
    #[arg(
        long,
        global = true,
        env = "SPENDSHIELD_LEDGER",
        default_value = "spendshield-ledger.json"
    )]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a procurement document, or resume an interrupted analysis
    Analyze {
        /// Path to the document (.json, .txt, .pdf, .png, .jpg)
        document: PathBuf,
        /// Run under this thread id; resumes it if a checkpoint exists
        #[arg(long)]
        thread_id: Option<String>,
        /// Extractor to use (default: json for .json files, llm otherwise)
        #[arg(long, value_enum)]
        extractor: Option<ExtractorKind>,
        /// Reference date for pricing history and vendor age (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<String>,
        /// Exit with status 2 when the risk level is at least this
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,
    },

    /// Show the audit report and persisted flags for a thread
    Audit {
        /// Thread id printed by `analyze`
        thread_id: String,
    },

    /// List recent audits that raised flags
    Audits {
        /// Maximum number of audits to list (0 for all)
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Mark a persisted flag as reviewed
    Review {
        /// Flag id shown by `audit`
        flag_id: u64,
        /// Reviewer notes, replacing any existing notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Write a demonstration ledger (four vendors, five past expenditures)
    Seed {
        /// Where to write the ledger file
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Global options every command sees.
pub(crate) struct Context {
    pub output: OutputFormat,
    pub quiet: bool,
    pub config: PathBuf,
    pub ledger: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.quiet, cli.log_format);

    let ctx = Context {
        output: cli.output,
        quiet: cli.quiet,
        config: cli.config,
        ledger: cli.ledger,
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("error: failed to start runtime: {e}"),
                ctx.output,
                ctx.quiet,
            );
            process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Analyze {
                document,
                thread_id,
                extractor,
                as_of,
                fail_on,
            } => {
                commands::analyze::cmd_analyze(
                    &ctx,
                    commands::analyze::AnalyzeArgs {
                        document,
                        thread_id,
                        extractor,
                        as_of,
                        fail_on,
                    },
                )
                .await
            }
            Commands::Audit { thread_id } => commands::audit::cmd_audit(&ctx, &thread_id).await,
            Commands::Audits { limit } => commands::audits::cmd_audits(&ctx, limit).await,
            Commands::Review { flag_id, notes } => {
                commands::review::cmd_review(&ctx, flag_id, notes.as_deref()).await
            }
            Commands::Seed { path, force } => commands::seed::cmd_seed(&ctx, &path, force).await,
        }
    });

    match result {
        Ok(code) => process::exit(code),
        Err(msg) => {
            report_error(&format!("error: {msg}"), ctx.output, ctx.quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
