//! CLI command implementations

use crate::output::{print_listing, print_summary, ListedResource};
use crate::progress::{BarReporter, Reporter};
use crate::OutputFormat;
use anyhow::Result;
use mediafetch_core::lister::{extract_resource_urls, fetch_page, file_name_for};
use mediafetch_core::{
    build_client, BatchRunner, DownloadEngine, EngineOptions, HttpTransport, HttpTransportConfig,
    LineReporter, RouteProbe, SilentReporter,
};
use mediafetch_types::Settings;
use tracing::{info, warn};

// ============================================================================
// Download Commands
// ============================================================================

/// Scrape the configured page and download everything it links to
pub async fn run_page(settings: &Settings, format: OutputFormat, plain: bool) -> Result<()> {
    let urls = discover(settings).await?;
    info!("Found {} files to download", urls.len());
    download_all(settings, urls, format, plain).await
}

/// Download an explicit list of URLs
pub async fn get_urls(
    settings: &Settings,
    urls: Vec<String>,
    format: OutputFormat,
    plain: bool,
) -> Result<()> {
    download_all(settings, urls, format, plain).await
}

async fn download_all(
    settings: &Settings,
    urls: Vec<String>,
    format: OutputFormat,
    plain: bool,
) -> Result<()> {
    tokio::fs::create_dir_all(&settings.output_dir).await?;

    let reporter = match (format, plain) {
        (OutputFormat::Json, _) => Reporter::Silent(SilentReporter),
        (OutputFormat::Human, true) => Reporter::Line(LineReporter::stdout(settings.bar_width)),
        (OutputFormat::Human, false) => Reporter::Bar(BarReporter::new(settings.bar_width)),
    };

    let transport = HttpTransport::new(HttpTransportConfig::from(settings))?;
    let probe = RouteProbe::new(&settings.probe_targets);
    let engine = DownloadEngine::new(transport, probe, reporter, EngineOptions::from(settings));

    let cancel = engine.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after cleanup");
            cancel.cancel();
        }
    });

    let mut runner = BatchRunner::new(engine, &settings.output_dir);
    let summary = runner.run(&urls).await;
    ctrl_c.abort();

    print_summary(&summary, format)
}

// ============================================================================
// Listing
// ============================================================================

/// Print what a run would download, and what is already on disk
pub async fn list_page(settings: &Settings, format: OutputFormat) -> Result<()> {
    let urls = discover(settings).await?;

    let listing: Vec<ListedResource> = urls
        .into_iter()
        .map(|url| {
            let file_name = file_name_for(&url).ok();
            let exists = file_name
                .as_ref()
                .is_some_and(|name| settings.output_dir.join(name).exists());
            ListedResource {
                url,
                file_name,
                exists,
            }
        })
        .collect();

    print_listing(&listing, format)
}

/// Fetch the page and extract resource URLs; an unreachable page counts as empty
async fn discover(settings: &Settings) -> Result<Vec<String>> {
    let client = build_client(&HttpTransportConfig::from(settings))?;

    let html = match fetch_page(&client, &settings.page_url).await {
        Ok(html) => html,
        Err(e) => {
            warn!("Could not load {}: {}", settings.page_url, e);
            String::new()
        }
    };

    Ok(extract_resource_urls(&html, &settings.extensions))
}
