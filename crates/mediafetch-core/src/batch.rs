//! Batch runner - feeds a resource list to the engine, one file at a time

use crate::engine::{ConnectivityProbe, DownloadEngine, ProgressReporter, Transport};
use crate::error::FetchError;
use crate::lister::file_name_for;
use mediafetch_types::{BatchSummary, Placement};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sequential driver over a list of resource URLs
pub struct BatchRunner<T, P, R> {
    engine: DownloadEngine<T, P, R>,
    output_dir: PathBuf,
}

impl<T, P, R> BatchRunner<T, P, R>
where
    T: Transport,
    P: ConnectivityProbe,
    R: ProgressReporter,
{
    pub fn new(engine: DownloadEngine<T, P, R>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            output_dir: output_dir.into(),
        }
    }

    pub fn engine(&self) -> &DownloadEngine<T, P, R> {
        &self.engine
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download every URL whose destination does not exist yet
    ///
    /// Invalid URLs are skipped; only cancellation or an exhausted bound
    /// stops the run early.
    pub async fn run<I, S>(&mut self, urls: I) -> BatchSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = BatchSummary::default();

        for url in urls {
            let url = url.as_ref();

            let file_name = match file_name_for(url) {
                Ok(name) => name,
                Err(_) => {
                    warn!("<{}> is not a valid URL!", url);
                    summary.invalid += 1;
                    continue;
                }
            };

            let destination = self.output_dir.join(&file_name);
            if destination.exists() {
                info!("{}: already exists, nothing to do!", file_name);
                summary.skipped += 1;
                continue;
            }

            info!("Getting {} ({}):", file_name, url);
            match self.engine.download_file(url, &destination).await {
                Ok(report) => {
                    if matches!(report.placement, Placement::MoveFailed { .. }) {
                        summary.move_failures += 1;
                    } else {
                        summary.downloaded += 1;
                    }
                    summary.reports.push(report);
                }
                Err(FetchError::InvalidUrl(_)) => {
                    warn!("<{}> is not a valid URL!", url);
                    summary.invalid += 1;
                }
                Err(e) => {
                    warn!("Stopping after {}: {}", file_name, e);
                    summary.interrupted = Some(e.to_string());
                    break;
                }
            }
        }

        summary
    }
}
