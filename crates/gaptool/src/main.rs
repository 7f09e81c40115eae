use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use gaptool_core::analysis::{AnalysisOptions, AnalysisReport, analyze_pages};
use gaptool_core::analytics::{
    AnalyticsClient, Dimension, QueryFilter, ResultRow, ResultTable, fetch_all,
};
use gaptool_core::config::{
    AnalyticsClientConfig, GapToolConfig, OAuthConfig, SuggestConfig, load_config,
    render_default_config,
};
use gaptool_core::error::AuthError;
use gaptool_core::gaps::StopwordSet;
use gaptool_core::metadata::{MetadataProbe, MetadataSource};
use gaptool_core::runtime::{
    PathOverrides, ResolvedPaths, init_layout, normalize_for_display, resolve_paths,
};
use gaptool_core::session::{
    CredentialManager, OAuthClient, Session, SessionStore, authorize_url, now_unix_secs,
};
use gaptool_core::suggest::SuggestionClient;
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(
    name = "gaptool",
    version,
    about = "Pulls search-analytics rows and ranks the vocabulary missing from page copy"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    state_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    state_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            state_dir: cli.state_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Auth(AuthArgs),
    Fetch(FetchArgs),
    Analyze(AnalyzeArgs),
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct AuthArgs {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    #[command(about = "Show the persisted session state without refreshing")]
    Status,
    #[command(about = "Print the authorization URL for the out-of-band code exchange")]
    Url,
    #[command(about = "Exchange an authorization code for a session")]
    Login { code: String },
    #[command(about = "Drop the persisted session")]
    Logout,
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[arg(long, value_name = "YYYY-MM-DD")]
    start_date: NaiveDate,
    #[arg(long, value_name = "YYYY-MM-DD")]
    end_date: NaiveDate,
    #[arg(
        long = "dimension",
        value_name = "NAME",
        help = "Query dimension, repeatable (default: date page query)"
    )]
    dimensions: Vec<String>,
    #[arg(long, help = "Emit the full table as JSON")]
    json: bool,
    #[arg(long, default_value_t = 50, help = "Maximum rows printed in text mode")]
    limit: usize,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[arg(long, value_name = "YYYY-MM-DD")]
    start_date: NaiveDate,
    #[arg(long, value_name = "YYYY-MM-DD")]
    end_date: NaiveDate,
    #[arg(long, value_name = "SUBSTR", help = "URL pattern selecting pages to analyze")]
    pattern: String,
    #[arg(long, default_value_t = 10, help = "Number of gap terms per page")]
    count: usize,
    #[arg(long, help = "Request rewritten copy for each analyzed page")]
    suggest: bool,
    #[arg(long, value_name = "FILE", help = "Custom stopword dictionary, one token per line")]
    stopwords: Option<PathBuf>,
    #[arg(long, help = "Emit the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ProbeArgs {
    url: String,
    #[arg(long, help = "Emit the result as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Init(args) => run_init(&runtime, args),
        Commands::Auth(AuthArgs { command }) => match command {
            AuthSubcommand::Status => run_auth_status(&runtime),
            AuthSubcommand::Url => run_auth_url(&runtime),
            AuthSubcommand::Login { code } => run_auth_login(&runtime, &code),
            AuthSubcommand::Logout => run_auth_logout(&runtime),
        },
        Commands::Fetch(args) => run_fetch(&runtime, args),
        Commands::Analyze(args) => run_analyze(&runtime, args),
        Commands::Probe(args) => run_probe(args),
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    resolve_paths(&PathOverrides {
        state_dir: runtime.state_dir.clone(),
        config: runtime.config.clone(),
    })
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn credential_manager(
    config: &GapToolConfig,
    paths: &ResolvedPaths,
) -> Result<CredentialManager<OAuthClient>> {
    CredentialManager::from_oauth_config(
        OAuthConfig::from_config(config),
        paths.session_path.clone(),
    )
}

fn require_session<'a>(
    manager: &'a mut CredentialManager<OAuthClient>,
) -> Result<&'a Session> {
    match manager.get_session() {
        Ok(session) => Ok(session),
        Err(AuthError::AuthenticationRequired { authorize_url }) => {
            println!("authentication required");
            println!("authorize_url: {authorize_url}");
            println!("next: gaptool auth login <CODE>");
            bail!("no valid session")
        }
        Err(error) => Err(error.into()),
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &render_default_config(), args.force)?;

    println!("Initialized gaptool runtime layout");
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("session_path: {}", normalize_for_display(&paths.session_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_auth_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = SessionStore::new(paths.session_path.clone());

    println!("auth status");
    println!("session_path: {}", normalize_for_display(&paths.session_path));
    match store.load() {
        Ok(Some(session)) => {
            println!("session: {}", if session.is_valid() { "valid" } else { "expired" });
            println!("expires_at: {}", session.expires_at);
            println!("now: {}", now_unix_secs());
            println!(
                "refresh_token: {}",
                if session.refresh_token.is_some() {
                    "present"
                } else {
                    "<none>"
                }
            );
        }
        Ok(None) => println!("session: <none>"),
        Err(error) => println!("session: unreadable ({error:#})"),
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_auth_url(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let oauth = OAuthConfig::from_config(&config);
    oauth.ensure_complete()?;
    println!("{}", authorize_url(&oauth));
    Ok(())
}

fn run_auth_login(runtime: &RuntimeOptions, code: &str) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut manager = credential_manager(&config, &paths)?;

    let session = manager.exchange_code(code.trim())?;
    println!("authentication successful");
    println!("expires_at: {}", session.expires_at);
    println!(
        "refresh_token: {}",
        if session.refresh_token.is_some() {
            "present"
        } else {
            "<none>"
        }
    );
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_auth_logout(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    SessionStore::new(paths.session_path.clone()).clear()?;
    println!("session: cleared");
    print_diagnostics(runtime, &paths);
    Ok(())
}

#[derive(Debug, Serialize)]
struct FetchReport<'a> {
    start_date: NaiveDate,
    end_date: NaiveDate,
    dimensions: &'a [Dimension],
    row_count: usize,
    rows: &'a [ResultRow],
}

fn run_fetch(runtime: &RuntimeOptions, args: FetchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;

    let dimensions = parse_dimensions(&args.dimensions)?;
    let filter = QueryFilter::new(args.start_date, args.end_date, dimensions)?;

    let table = fetch_table(&config, &paths, &filter)?;

    if args.json {
        let report = FetchReport {
            start_date: args.start_date,
            end_date: args.end_date,
            dimensions: table.dimensions(),
            row_count: table.len(),
            rows: table.rows(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("rows: {}", table.len());
    println!(
        "dimensions: {}",
        table
            .dimensions()
            .iter()
            .map(|dimension| dimension.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if table.is_empty() {
        println!("note: the query returned no data for this range");
    } else {
        for row in table.rows().iter().take(args.limit) {
            println!(
                "{}\tclicks={} impressions={} ctr={:.4} position={:.1}",
                row.keys.join("\t"),
                row.clicks,
                row.impressions,
                row.ctr,
                row.position
            );
        }
        if table.len() > args.limit {
            println!("shown: {} of {} (use --json for the full table)", args.limit, table.len());
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_analyze(runtime: &RuntimeOptions, args: AnalyzeArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;

    let filter = QueryFilter::new(
        args.start_date,
        args.end_date,
        vec![Dimension::Date, Dimension::Page, Dimension::Query],
    )?;
    let table = fetch_table(&config, &paths, &filter)?;

    let stopwords = match &args.stopwords {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            StopwordSet::from_lines(&content)
        }
        None => StopwordSet::english(),
    };

    let mut probe = MetadataProbe::new();
    let mut suggestor = SuggestionClient::new(SuggestConfig::from_config(&config));
    let options = AnalysisOptions {
        gap_count: args.count,
        include_query_metrics: true,
        request_suggestions: args.suggest,
    };
    let report = analyze_pages(
        &table,
        &args.pattern,
        &stopwords,
        &options,
        &mut probe,
        &mut suggestor,
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_analysis_report(&report, args.suggest);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let mut probe = MetadataProbe::new();
    let metadata = probe.probe(&args.url);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("url: {}", args.url);
    println!("title: {}", metadata.title);
    println!("description: {}", metadata.description);
    Ok(())
}

fn fetch_table(
    config: &GapToolConfig,
    paths: &ResolvedPaths,
    filter: &QueryFilter,
) -> Result<ResultTable> {
    let mut manager = credential_manager(config, paths)?;
    let session = require_session(&mut manager)?;
    let mut client = AnalyticsClient::new(AnalyticsClientConfig::from_config(config), session)?;
    let table = fetch_all(&mut client, filter)?;
    Ok(table)
}

fn parse_dimensions(raw: &[String]) -> Result<Vec<Dimension>> {
    if raw.is_empty() {
        return Ok(vec![Dimension::Date, Dimension::Page, Dimension::Query]);
    }
    raw.iter()
        .map(|value| Dimension::parse(value))
        .collect::<Result<Vec<_>>>()
}

fn print_analysis_report(report: &AnalysisReport, suggestions_requested: bool) {
    println!("pattern: {}", report.pattern);
    println!("pages.matched: {}", report.pages.len());
    if report.pages.is_empty() {
        println!("pages: <none>");
        return;
    }

    for page in &report.pages {
        println!();
        println!("page: {}", page.page);
        println!("title: {}", page.metadata.title);
        println!("description: {}", page.metadata.description);
        if page.gap_terms.is_empty() {
            println!("gap_terms: <none>");
        } else {
            for term in &page.gap_terms {
                println!("gap_term: {} ({})", term.token, term.frequency);
            }
        }
        for metrics in page.query_metrics.iter().take(10) {
            println!(
                "query: {} clicks={} impressions={}",
                metrics.query, metrics.clicks, metrics.impressions
            );
        }
        if suggestions_requested {
            match &page.suggestion {
                Some(text) => {
                    println!("suggestion:");
                    for line in text.lines() {
                        println!("  {line}");
                    }
                }
                None => println!("suggestion: <unavailable>"),
            }
        }
    }
}
