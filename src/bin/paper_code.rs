use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use paper_code_finder::abstracts::add_abstracts;
use paper_code_finder::batch::{BatchRunner, RunSummary};
use paper_code_finder::config::{ConfigLoader, RunOverrides};
use paper_code_finder::error::FinderError;
use paper_code_finder::http::{HttpFetcher, ReqwestFetcher};
use paper_code_finder::orchestrator::Resolver;
use paper_code_finder::output::{JsonOutput, OutputMode, progress_sink};
use paper_code_finder::providers::CrossrefClient;
use paper_code_finder::store::{ABSTRACTS_FILE_NAME, BibStore};

#[derive(Parser)]
#[command(name = "paper-code")]
#[command(about = "Find the open-source codebase behind every paper in a BibTeX file")]
#[command(version, author)]
struct Cli {
    /// Print a JSON summary instead of progress lines.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search every entry for a codebase and split the file into with_code.bib / without_code.bib")]
    Find(FindArgs),
    #[command(about = "Add missing abstracts from DOI metadata")]
    Abstracts(AbstractsArgs),
}

#[derive(Args)]
struct FindArgs {
    #[arg(long)]
    bib_file: Utf8PathBuf,

    #[arg(long)]
    output_dir: Utf8PathBuf,

    #[arg(long)]
    num_threads: Option<usize>,

    /// Skim the paper's PDF, located through its DOI, for repository links.
    #[arg(long)]
    check_paper: bool,

    #[arg(long)]
    search_web: bool,

    /// Require one of the paper's authors among the repository's contributors.
    #[arg(long)]
    check_author: bool,

    /// Log every repository validation decision.
    #[arg(long)]
    debug_valid_repo: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Accept repositories updated after the paper's publication year.
    #[arg(long)]
    no_recency_check: bool,
}

#[derive(Args)]
struct AbstractsArgs {
    #[arg(long)]
    bib_file: Utf8PathBuf,

    #[arg(long)]
    output_dir: Utf8PathBuf,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<FinderError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FinderError) -> u8 {
    match error {
        FinderError::BibliographyRead(_) | FinderError::BibliographyParse(_) => 2,
        FinderError::ConfigRead(_) | FinderError::ConfigParse(_) => 2,
        FinderError::NetworkTransient { .. }
        | FinderError::HttpStatus { .. }
        | FinderError::RateLimited { .. }
        | FinderError::AuthFailure { .. } => 3,
        FinderError::Filesystem(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Find(args) => run_find(args, output_mode),
        Commands::Abstracts(args) => {
            init_tracing(false)?;
            run_abstracts(args, output_mode)
        }
    }
}

fn init_tracing(debug: bool) -> miette::Result<()> {
    let mut filter = EnvFilter::from_default_env();
    if debug {
        filter = filter.add_directive("paper_code_finder=debug".parse().into_diagnostic()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn run_find(args: FindArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = RunOverrides {
        workers: args.num_threads,
        check_paper: args.check_paper,
        search_web: args.search_web,
        check_author: args.check_author,
        debug: args.debug_valid_repo,
        timeout_secs: args.timeout_secs,
        no_recency_check: args.no_recency_check,
    };
    let config = ConfigLoader::resolve(args.config.as_deref())?.apply(&overrides);
    init_tracing(config.debug)?;

    let records = BibStore::read_records(&args.bib_file)?;
    let store = BibStore::new(args.output_dir)?;
    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(config.timeout, &config.user_agent)?);
    let resolver = Resolver::from_config(&config, fetcher);

    let report = BatchRunner::new(&resolver, config.workers).run(
        records,
        &store,
        progress_sink(output_mode),
    )?;

    match output_mode {
        OutputMode::Interactive => print_run_summary(&report.summary, &store),
        OutputMode::NonInteractive => JsonOutput::print_run(&report.summary).into_diagnostic()?,
    }
    Ok(())
}

fn run_abstracts(args: AbstractsArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = RunOverrides {
        timeout_secs: args.timeout_secs,
        ..RunOverrides::default()
    };
    let config = ConfigLoader::resolve(args.config.as_deref())?.apply(&overrides);

    let mut records = BibStore::read_records(&args.bib_file)?;
    let store = BibStore::new(args.output_dir)?;
    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(config.timeout, &config.user_agent)?);
    let crossref = CrossrefClient::new(fetcher);

    let mut summary = add_abstracts(&mut records, &crossref, progress_sink(output_mode));
    let path = store.write_records(ABSTRACTS_FILE_NAME, &records)?;
    summary.output_path = Some(path.to_string());

    match output_mode {
        OutputMode::Interactive => println!("Output written to {path}"),
        OutputMode::NonInteractive => JsonOutput::print_abstracts(&summary).into_diagnostic()?,
    }
    Ok(())
}

fn print_run_summary(summary: &RunSummary, store: &BibStore) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}📚 paper-code summary ({} entries){reset}", summary.total);
    println!("{green}✅ With code: {}{reset}", summary.with_code);
    println!("{yellow}➖ Without code: {}{reset}", summary.without_code);
    if summary.failed > 0 {
        println!("{red}⚠️ Errors: {}{reset}", summary.failed);
    }

    for outcome in &summary.records {
        match (&outcome.url, outcome.failed) {
            (_, true) => println!("{red}✗ {} (error){reset}", outcome.key),
            (Some(url), false) => {
                let source = outcome.source.as_deref().unwrap_or("unknown");
                println!("{green}✓ {} → {url} ({source}){reset}", outcome.key);
            }
            (None, false) => println!("{yellow}• {} (no codebase found){reset}", outcome.key),
        }
    }

    println!("{cyan}📁 output: {}{reset}", store.root());
}
