//! Gauntlet - profile-driven web vulnerability scanner CLI

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gauntlet::config::{self, CliOverrides};
use gauntlet::context::ScanContext;
use gauntlet::entrypoint::default_finders;
use gauntlet::http::{HttpRequester, Request, Requester, RequesterFactory};
use gauntlet::models::{PayloadStrategy, ScanConfig, Template};
use gauntlet::oob::{BlindHostPoller, LocalInteractionSource};
use gauntlet::profile::{Profile, ProfileProvider, ProfileSet};
use gauntlet::scan::{JsonlFileSystem, Runner};

const DEFAULT_OUTPUT_DIR: &str = "gauntlet-out";

/// Gauntlet - profile-driven web vulnerability scanner
#[derive(Parser)]
#[command(name = "gauntlet", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan requests with a set of profiles
    Scan {
        /// Target URL to scan (repeatable)
        #[arg(short, long)]
        url: Vec<String>,

        /// Raw HTTP request file to scan (repeatable)
        #[arg(short, long)]
        request: Vec<PathBuf>,

        /// JSON file with the profiles to run
        #[arg(short, long)]
        profiles: PathBuf,

        /// Only run profiles carrying one of these tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory; an existing one resumes the scan
        #[arg(short, long)]
        output: Option<String>,

        /// Templates processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Maximum concurrent connections
        #[arg(long)]
        max_connections: Option<usize>,

        /// Max requests per second (0 = unlimited)
        #[arg(long)]
        rps: Option<u32>,

        /// Payload strategy (all or only_once)
        #[arg(long)]
        strategy: Option<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Public blind host domain; starts the embedded callback listener
        #[arg(long)]
        blind_host: Option<String>,

        /// Address substituted for the email marker
        #[arg(long)]
        email: Option<String>,

        /// Only run passive profiles
        #[arg(long)]
        passive_only: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the profiles in a profiles file
    Profiles {
        /// JSON file with profiles
        #[arg(short, long)]
        profiles: PathBuf,

        /// Only list profiles carrying one of these tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
}

fn parse_strategy(raw: &str) -> Result<PayloadStrategy, String> {
    match raw.to_ascii_lowercase().replace('-', "_").as_str() {
        "all" => Ok(PayloadStrategy::All),
        "only_once" => Ok(PayloadStrategy::OnlyOnce),
        other => Err(format!("unknown payload strategy: {other}")),
    }
}

fn load_templates(urls: &[String], requests: &[PathBuf]) -> gauntlet::error::Result<Vec<Template>> {
    let mut templates = Vec::new();
    for url in urls {
        let request = Request::get(url)?;
        templates.push(Template::new(templates.len(), request));
    }
    for path in requests {
        let raw = std::fs::read(path)?;
        let request = Request::from_raw(&raw, None)?;
        templates.push(Template::new(templates.len(), request));
    }
    Ok(templates)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "gauntlet=debug" } else { "gauntlet=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            url,
            request,
            profiles,
            tags,
            config: config_path,
            output,
            concurrency,
            max_connections,
            rps,
            strategy,
            timeout,
            blind_host,
            email,
            passive_only,
            verbose,
        } => {
            init_tracing(verbose);

            let mut scan_config = if let Some(ref path) = config_path {
                config::load_config(path)?
            } else {
                let default_path = Path::new("config/default.toml");
                if default_path.exists() {
                    config::load_config(default_path)?
                } else {
                    ScanConfig::default()
                }
            };

            config::merge_cli_args(
                &mut scan_config,
                CliOverrides {
                    concurrency,
                    max_connections,
                    rps,
                    payload_strategy: strategy.as_deref().map(parse_strategy).transpose()?,
                    timeout_secs: timeout,
                    blind_host,
                    email,
                    output_dir: output,
                    passive_only,
                },
            );

            let profile_set =
                ProfileSet::load(&profiles)?.filter_by_tags(&tags.unwrap_or_default());
            let templates = load_templates(&url, &request)?;
            if templates.is_empty() {
                return Err("nothing to scan: pass --url or --request".into());
            }

            let ctx = ScanContext::new();
            let interrupt = ctx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing in-flight templates");
                    interrupt.cancel();
                }
            });

            let output_dir = scan_config
                .output_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());
            let fs = Arc::new(JsonlFileSystem::open(&output_dir).await?);

            let requester_config = scan_config.clone();
            let factory: RequesterFactory = Arc::new(move || {
                let requester: Arc<dyn Requester> =
                    Arc::new(HttpRequester::from_config(&requester_config)?);
                Ok(requester)
            });

            let mut runner = Runner::new(scan_config.clone())
                .with_context(ctx.clone())
                .with_profiles(Arc::new(profile_set))
                .with_finders(default_finders())
                .with_requester_factory(factory)
                .with_file_system(fs)
                .on_discarded(|template| info!("Not scanned: {}", template.url));

            if let Some(blind) = &scan_config.blind_host {
                let source = LocalInteractionSource::start(&ctx, blind).await?;
                let poller = Arc::new(BlindHostPoller::new(Arc::new(source), blind));
                poller.spawn(ctx.clone());
                runner = runner.with_poller(poller);
            }

            let stats = runner.start(templates).await?;
            ctx.cancel();

            println!();
            println!("  Templates:  {}/{}", stats.templates_ended.len(), stats.total_templates);
            println!("  Entrypoints: {}", stats.entrypoints_found);
            println!(
                "  Requests:   {} sent, {} failed, {} skipped",
                stats.performed_requests, stats.failed_requests, stats.skipped_requests
            );
            println!("  Matches:    {}", stats.matches_found);
            println!("  Output:     {}", output_dir);
        }

        Commands::Profiles { profiles, tags } => {
            init_tracing(false);
            let set = ProfileSet::load(&profiles)?.filter_by_tags(&tags.unwrap_or_default());

            println!("\n  Profiles from {}:\n", set.from());
            for profile in set.profiles() {
                let kind = match profile {
                    Profile::Active(_) => "active",
                    Profile::PassiveRequest(_) => "passive request",
                    Profile::PassiveResponse(_) => "passive response",
                };
                println!(
                    "  {:<40} {:<18} {}{}",
                    profile.name(),
                    kind,
                    profile.tags().join(","),
                    if profile.enabled() { "" } else { " (disabled)" }
                );
            }
            println!("\n  Tags: {}", set.tags().join(", "));
            println!();
        }
    }

    Ok(())
}
