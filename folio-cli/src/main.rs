use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use folio_core::{
    CallerContext, Direction, MemoryCatalog, MemoryRecordLockManager, NavigationState,
    ViewerConfig,
};
use folio_nav::PageUrlBuilder;
use folio_session::{Collaborators, Resolution, SessionRegistry};
use serde::Serialize;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Resolve records of a digital library and derive their navigation URLs"
)]
struct Args {
    /// Viewer configuration (TOML). Defaults to config.toml in the config dir.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Open a record in a fresh session and print its state as JSON
    Open {
        /// Catalog fixture (JSON)
        catalog: PathBuf,
        /// Persistent identifier of the record
        identifier: String,
        /// Page or page range, e.g. 5 or 5-6
        #[arg(short = 'p', long = "page")]
        page: Option<String>,
        /// LOGID of the structure element to open
        #[arg(short = 'l', long = "logid")]
        logid: Option<String>,
        /// Switch double page display on or off after opening
        #[arg(long = "double-page")]
        double_page: Option<bool>,
        /// View used for URLs without an explicit page type
        #[arg(long = "view")]
        view: Option<String>,
        /// Licenses held by the caller
        #[arg(long = "license")]
        licenses: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct OpenReport<'a> {
    state: &'a NavigationState,
    urls: NavigationUrls,
}

#[derive(Debug, Serialize)]
struct NavigationUrls {
    first: String,
    previous: String,
    next: String,
    last: String,
    image: String,
    fulltext: String,
    metadata: String,
    fullscreen: String,
    previous_docstruct: Option<String>,
    next_docstruct: Option<String>,
}

impl NavigationUrls {
    fn collect(urls: &PageUrlBuilder<'_>) -> Self {
        Self {
            first: urls.first_page_url(),
            previous: urls.previous_page_url(1),
            next: urls.next_page_url(1),
            last: urls.last_page_url(),
            image: urls.image_url(),
            fulltext: urls.fulltext_url(),
            metadata: urls.metadata_url(),
            fullscreen: urls.fullscreen_image_url(),
            previous_docstruct: urls.docstruct_url(Direction::Previous),
            next_docstruct: urls.docstruct_url(Direction::Next),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("org", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = load_config(args.config.as_deref(), &project_dirs)?;

    match args.command {
        CliCommand::Open {
            catalog,
            identifier,
            page,
            logid,
            double_page,
            view,
            licenses,
        } => {
            let caller = CallerContext::with_licenses(licenses);
            let request = OpenRequest {
                catalog: &catalog,
                identifier: &identifier,
                page: page.as_deref(),
                logid: logid.as_deref(),
                double_page,
                view: view.as_deref(),
            };
            let output = open_record(&config, &request, &caller)?;
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{output}")?;
        }
    }
    Ok(())
}

struct OpenRequest<'a> {
    catalog: &'a Path,
    identifier: &'a str,
    page: Option<&'a str>,
    logid: Option<&'a str>,
    double_page: Option<bool>,
    view: Option<&'a str>,
}

fn open_record(
    config: &ViewerConfig,
    request: &OpenRequest<'_>,
    caller: &CallerContext,
) -> Result<String> {
    let catalog = MemoryCatalog::load(request.catalog)?
        .with_toc_page_size(config.toc_elements_per_page);
    let locks = Arc::new(MemoryRecordLockManager::with_max_age(config.lock_max_age));
    let registry = SessionRegistry::new(
        Collaborators::from_catalog(Arc::new(catalog), locks),
        Arc::new(config.clone()),
    );

    let (session, document) = registry.open_session();
    document.set_identifier(request.identifier)?;
    if let Some(page) = request.page {
        document.set_page(page)?;
    }
    if let Some(logid) = request.logid {
        document.set_logid(logid)?;
    }

    let output = match document
        .open(caller)
        .with_context(|| format!("failed to open {}", request.identifier))?
    {
        Resolution::Redirect(url) => {
            info!(identifier = request.identifier, %url, "record redirects");
            serde_json::to_string_pretty(&serde_json::json!({ "redirect": url }))?
        }
        Resolution::Loaded(mut state) => {
            if let Some(enabled) = request.double_page {
                if let Some(updated) = document.set_double_page_mode(enabled) {
                    state = updated;
                }
            }
            let mut urls = PageUrlBuilder::new(&state, config);
            if let Some(view) = request.view {
                urls = urls.with_current_view(view);
            }
            let report = OpenReport {
                state: &state,
                urls: NavigationUrls::collect(&urls),
            };
            serde_json::to_string_pretty(&report)?
        }
    };

    registry.end_session(session);
    debug!(%session, "session closed");
    Ok(output)
}

fn load_config(path: Option<&Path>, project_dirs: &ProjectDirs) -> Result<ViewerConfig> {
    if let Some(path) = path {
        return ViewerConfig::load(path);
    }
    let default_path = project_dirs.config_dir().join("config.toml");
    if default_path.exists() {
        ViewerConfig::load(&default_path)
    } else {
        Ok(ViewerConfig::default())
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries the JSON output
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
