use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use upkeep::core::config_manager::{self, DataPaths};
use upkeep::core::updater::{
    GitHubReleaseFeed, HttpArtifactSource, ManifestFeed, ReleaseFeed, SettingsStore, SystemClock,
    UpdateChecker, UpdateDownloader, UpdateSettingsPatch, VersionManager, build_http_client,
    verify_sha256,
};
use upkeep::{
    ClickHandler, Config, DownloadResult, FeedFormat, LogAuditLog, LogRenderer, Notifier,
    ReleaseChannel, UpdateEvent,
};

const DEFAULT_KEEP: usize = 3;

#[derive(Parser)]
#[command(name = "upkeep", version, about = "Check for, download and verify application updates")]
struct Cli {
    /// Config file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding settings and downloads
    #[arg(long, global = true, env = "UPKEEP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the running version and updater state
    Version,
    /// Check the release feed once
    Check {
        /// Ignore the cached result
        #[arg(long)]
        force: bool,
    },
    /// Report whether this version is deprecated or below the supported minimum
    Support,
    /// Show or change update settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Download the available update
    Download {
        /// Downloads to keep afterwards
        #[arg(long, default_value_t = DEFAULT_KEEP)]
        keep: usize,
    },
    /// Remove old downloads
    Cleanup {
        #[arg(long, default_value_t = DEFAULT_KEEP)]
        keep: usize,
    },
    /// Compare a file's SHA-256 with the expected digest
    Verify { file: PathBuf, sha256: String },
    /// Run scheduled checks until interrupted
    Watch,
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set(SettingsArgs),
}

#[derive(Args)]
struct SettingsArgs {
    #[arg(long)]
    auto_check: Option<bool>,
    #[arg(long)]
    auto_download: Option<bool>,
    #[arg(long)]
    auto_install: Option<bool>,
    /// Hours between checks
    #[arg(long)]
    check_interval: Option<u32>,
    #[arg(long)]
    channel: Option<ReleaseChannel>,
    #[arg(long)]
    notify_on_update: Option<bool>,
    #[arg(long)]
    download_path: Option<PathBuf>,
}

impl From<SettingsArgs> for UpdateSettingsPatch {
    fn from(args: SettingsArgs) -> Self {
        Self {
            auto_check: args.auto_check,
            auto_download: args.auto_download,
            auto_install: args.auto_install,
            check_interval: args.check_interval,
            channel: args.channel,
            notify_on_update: args.notify_on_update,
            download_path: args.download_path,
            ..Default::default()
        }
    }
}

/// Prints notifications to the terminal.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show(&self, title: &str, body: &str, _on_click: ClickHandler) {
        println!("\n{}\n{}\n", title, body);
    }
}

struct Services {
    config: Config,
    manager: Arc<VersionManager>,
    checker: Arc<UpdateChecker>,
    downloader: Arc<UpdateDownloader>,
}

fn build_services(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Services> {
    let paths = match data_dir {
        Some(dir) => DataPaths::new(dir),
        None => DataPaths::user()?,
    };
    let config_path = config_path.unwrap_or_else(|| paths.config_file());
    let config = config_manager::load_config(&config_path)?;

    let proxy = config.proxy.to_proxy_url();
    let client = build_http_client(config.request_timeout(), proxy.as_deref())
        .context("Failed to build HTTP client")?;

    let feed: Arc<dyn ReleaseFeed> = match config.feed_format {
        FeedFormat::Github => Arc::new(
            GitHubReleaseFeed::new(client.clone(), &config.update_server)
                .with_policy(config.manifest_policy())
                .with_timeout(config.request_timeout()),
        ),
        FeedFormat::Manifest => Arc::new(
            ManifestFeed::new(client.clone(), &config.update_server)
                .with_timeout(config.request_timeout()),
        ),
    };

    let manager = Arc::new(
        VersionManager::new(
            env!("CARGO_PKG_VERSION"),
            SettingsStore::new(paths.settings_file()),
            feed,
            Arc::new(SystemClock),
        )
        .context("Invalid package version")?,
    );

    let checker = UpdateChecker::builder(manager.clone())
        .renderer(Arc::new(LogRenderer))
        .notifier(Arc::new(ConsoleNotifier))
        .app_name(&config.app_name)
        .startup_delay(config.startup_delay())
        .build();

    let download_dir = manager
        .get_update_settings()
        .download_path
        .unwrap_or_else(|| paths.updates_dir());
    let downloader = Arc::new(
        UpdateDownloader::new(
            download_dir,
            Arc::new(HttpArtifactSource::new(client)),
            Arc::new(LogAuditLog),
        )
        .with_app_name(&config.app_name)
        .with_progress_interval(config.progress_interval()),
    );

    Ok(Services {
        config,
        manager,
        checker,
        downloader,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let Cli {
        config,
        data_dir,
        command,
    } = Cli::parse();

    // needs no config or data directory
    if let Command::Verify { file, sha256 } = &command {
        verify_sha256(file, sha256)
            .await
            .with_context(|| format!("Verification failed for {}", file.display()))?;
        println!("OK {}", file.display());
        return Ok(());
    }

    let services = build_services(config, data_dir)?;

    match command {
        Command::Version => print_json(&services.manager.system_info())?,
        Command::Check { force } => {
            let result = services.checker.check_for_updates(force).await?;
            print_json(&result)?;
        }
        Command::Support => {
            let support = services.checker.check_version_support().await;
            print_json(&support)?;
        }
        Command::Settings(SettingsCommand::Show) => {
            print_json(&services.manager.get_update_settings())?;
        }
        Command::Settings(SettingsCommand::Set(args)) => {
            let patch = UpdateSettingsPatch::from(args);
            if patch.is_empty() {
                anyhow::bail!("No settings given");
            }
            print_json(&services.manager.update_settings(&patch))?;
        }
        Command::Download { keep } => {
            let result = services.checker.force_check().await?;
            if let Some(message) = &result.error {
                anyhow::bail!("{}", message);
            }
            let Some(update) = result.update_available else {
                println!("Already up to date ({})", result.current_version.version_string);
                return Ok(());
            };
            let outcome = download(&services, &update).await;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("Download failed");
            }
            services.downloader.cleanup_old_downloads(keep).await?;
        }
        Command::Cleanup { keep } => {
            let removed = services.downloader.cleanup_old_downloads(keep).await?;
            println!("Removed {} old download(s)", removed);
        }
        Command::Watch => watch(&services).await?,
        Command::Verify { .. } => {}
    }

    Ok(())
}

async fn download(services: &Services, update: &upkeep::VersionInfo) -> DownloadResult {
    let progress = services.downloader.bus().subscribe_progress(|_, progress| {
        eprint!(
            "\r{:5.1}%  {} / {}",
            progress.percent,
            progress.transferred_human(),
            progress.total_human()
        );
    });
    let interrupted = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = services
        .downloader
        .download_update_until(update, interrupted)
        .await;
    services.downloader.bus().unsubscribe(progress);
    eprintln!();
    result
}

/// Run the scheduler until Ctrl-C, downloading updates when `autoDownload` is on.
async fn watch(services: &Services) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    services
        .checker
        .bus()
        .subscribe_named("update-available", move |event| {
            if let UpdateEvent::UpdateAvailable(result) = event {
                let _ = tx.send(result.clone());
            }
        });

    services.checker.start();
    services.checker.check_version_support().await;
    log::info!(
        "Watching for updates from {} (Ctrl-C to stop)",
        services.config.update_server
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(result) = rx.recv() => {
                if !services.manager.get_update_settings().auto_download {
                    continue;
                }
                let Some(update) = result.update_available else {
                    continue;
                };

                let outcome = download(services, &update).await;
                if outcome.is_cancelled() {
                    log::info!("Cancelled download in progress");
                    break;
                }
                if outcome.success {
                    services.downloader.cleanup_old_downloads(DEFAULT_KEEP).await?;
                }
            }
        }
    }

    services.checker.stop();
    Ok(())
}
