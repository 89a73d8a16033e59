//! Download engine - drives one job through as many attempts as it takes
//!
//! Each call to [`DownloadEngine::download_file`] owns exactly one
//! [`DownloadJob`]. An attempt is submitted to the transport and the engine
//! awaits its terminal event; the outcome goes through [`apply_outcome`],
//! which is the only place job state changes. Any failure is treated as a
//! possible network outage: the engine waits for the connectivity probe,
//! rebuilds the transport session and tries again, resuming when the failed
//! attempt left a token.

use crate::engine::connectivity::{wait_until_reachable, ConnectivityProbe};
use crate::engine::job::{AttemptOutcome, DownloadJob};
use crate::engine::progress::ProgressReporter;
use crate::engine::transport::{AttemptRequest, TransferEvent, Transport};
use crate::error::FetchError;
use chrono::Utc;
use mediafetch_types::{JobReport, JobState, Placement, Settings, TransferProgress};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Knobs for the retry loop
///
/// The defaults retry forever; `max_attempts`, `max_duration` and `cancel`
/// let an embedder bound a job without touching resume logic.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Connectivity poll interval while the network is down
    pub poll_interval: Duration,
    /// Pause after a failed attempt, before the connectivity gate
    pub retry_delay: Duration,
    pub max_attempts: Option<u32>,
    /// Checked between attempts only; a running attempt is never cut short
    pub max_duration: Option<Duration>,
    pub cancel: CancellationToken,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            max_attempts: None,
            max_duration: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            retry_delay: settings.retry_delay(),
            max_attempts: settings.max_attempts,
            max_duration: settings.max_duration(),
            cancel: CancellationToken::new(),
        }
    }
}

/// What the engine does after an outcome has been applied
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum NextStep {
    Place { location: PathBuf, size: u64 },
    Retry,
}

/// Record an attempt's outcome on the job
pub(crate) fn apply_outcome(job: &mut DownloadJob, outcome: AttemptOutcome) -> NextStep {
    match outcome {
        AttemptOutcome::Success { location, size } => {
            job.state = JobState::Succeeded;
            job.resume_token = None;
            NextStep::Place { location, size }
        }
        AttemptOutcome::FailureResumable(token) => {
            job.state = JobState::FailedResumable;
            job.resume_token = Some(token);
            NextStep::Retry
        }
        AttemptOutcome::FailureNonResumable(error) => {
            debug!("Attempt left nothing to resume: {}", error);
            job.state = JobState::FailedTerminal;
            job.resume_token = None;
            NextStep::Retry
        }
    }
}

/// Pick the request for the next attempt, consuming the job's token
pub(crate) fn next_request(job: &mut DownloadJob) -> AttemptRequest {
    match job.resume_token.take() {
        Some(token) => {
            info!("Resuming file download...");
            job.resumes += 1;
            AttemptRequest::Resume { token }
        }
        None => {
            info!("Retrying file download...");
            job.restarts += 1;
            AttemptRequest::Fresh {
                url: job.source_url.clone(),
            }
        }
    }
}

/// Validate a resource URL: absolute, http(s), with a host
pub fn parse_resource_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

/// Resilient single-file download engine
pub struct DownloadEngine<T, P, R> {
    transport: T,
    probe: P,
    reporter: R,
    options: EngineOptions,
}

impl<T, P, R> DownloadEngine<T, P, R>
where
    T: Transport,
    P: ConnectivityProbe,
    R: ProgressReporter,
{
    pub fn new(transport: T, probe: P, reporter: R, options: EngineOptions) -> Self {
        Self {
            transport,
            probe,
            reporter,
            options,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Token that stops the engine at its next await point
    pub fn cancellation_token(&self) -> CancellationToken {
        self.options.cancel.clone()
    }

    /// Download `url` to `destination`, retrying until the file is in place
    ///
    /// Transport failures never escape: the only errors are an invalid URL,
    /// cancellation, or an exhausted attempt/time bound.
    pub async fn download_file(
        &mut self,
        url: &str,
        destination: &Path,
    ) -> Result<JobReport, FetchError> {
        let source_url = parse_resource_url(url)?;
        let mut job = DownloadJob::new(source_url, destination.to_path_buf());

        info!("Downloading {} to {:?}", job.source_url, job.destination);
        let result = self.drive(&mut job).await;

        // A job that stops early must not strand its partial data
        if result.is_err() {
            if let Some(token) = job.resume_token.take() {
                debug!("Discarding resume data for {}", job.source_url);
                self.transport.discard(&token);
            }
        }
        result
    }

    async fn drive(&mut self, job: &mut DownloadJob) -> Result<JobReport, FetchError> {
        let deadline = self.options.max_duration.map(|d| Instant::now() + d);
        let mut request = AttemptRequest::Fresh {
            url: job.source_url.clone(),
        };

        loop {
            if self.options.cancel.is_cancelled() {
                if let AttemptRequest::Resume { token } = request {
                    job.resume_token = Some(token);
                }
                return Err(FetchError::Cancelled);
            }

            let outcome = self.run_attempt(job, request).await?;
            match apply_outcome(job, outcome) {
                NextStep::Place { location, size } => {
                    return Ok(self.complete(job, &location, size).await);
                }
                NextStep::Retry => {}
            }

            if self.options.max_attempts.is_some_and(|max| job.attempts >= max) {
                warn!("Giving up on {} after {} attempts", job.source_url, job.attempts);
                return Err(FetchError::GaveUp {
                    attempts: job.attempts,
                });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Giving up on {}: time limit reached", job.source_url);
                return Err(FetchError::GaveUp {
                    attempts: job.attempts,
                });
            }

            self.pause_before_retry().await?;
            wait_until_reachable(&self.probe, self.options.poll_interval, &self.options.cancel)
                .await?;

            if let Err(e) = self.transport.reset_session() {
                warn!("Failed to rebuild transport session: {}", e);
            }
            request = next_request(job);
        }
    }

    /// Run one attempt to its terminal event
    async fn run_attempt(
        &mut self,
        job: &mut DownloadJob,
        request: AttemptRequest,
    ) -> Result<AttemptOutcome, FetchError> {
        job.state = JobState::Attempting;
        job.attempts += 1;
        debug!("Attempt {} for {}", job.attempts, job.source_url);

        let started = Instant::now();
        let mut last_percent: Option<u8> = None;
        let mut handle = self.transport.begin(request);

        let outcome = loop {
            let event = tokio::select! {
                _ = self.options.cancel.cancelled() => {
                    // Aborts the attempt and removes its partial file
                    drop(handle);
                    self.reporter.finish();
                    return Err(FetchError::Cancelled);
                }
                event = handle.next_event() => event,
            };

            match event {
                Some(TransferEvent::Progress {
                    written,
                    expected,
                    received,
                }) => {
                    let progress = TransferProgress {
                        bytes_written: written,
                        bytes_expected: expected,
                        bytes_this_attempt: received,
                        elapsed: started.elapsed(),
                    };
                    self.report_progress(&progress, &mut last_percent);
                }
                Some(TransferEvent::Finished { location, size }) => {
                    break AttemptOutcome::Success { location, size };
                }
                Some(TransferEvent::Failed { error, resume }) => {
                    self.log_failure(job, &error, resume.is_some());
                    break match resume {
                        Some(token) => AttemptOutcome::FailureResumable(token),
                        None => AttemptOutcome::FailureNonResumable(error),
                    };
                }
                None => {
                    let error = FetchError::Unknown("attempt ended without a result".into());
                    self.log_failure(job, &error, false);
                    break AttemptOutcome::FailureNonResumable(error);
                }
            }
        };

        self.reporter.finish();
        Ok(outcome)
    }

    /// Forward progress, keeping the percentage monotonic within an attempt
    fn report_progress(&self, progress: &TransferProgress, last_percent: &mut Option<u8>) {
        let Some(percent) = progress.percent() else {
            return;
        };
        let percent = last_percent.map_or(percent, |last| last.max(percent));
        *last_percent = Some(percent);
        self.reporter.report(percent, progress.rate_kbps());
    }

    fn log_failure(&self, job: &DownloadJob, error: &FetchError, resumable: bool) {
        if error.is_transient() {
            warn!(
                "Attempt {} for {} failed (resumable: {}): {}",
                job.attempts, job.source_url, resumable, error
            );
        } else {
            error!(
                "Attempt {} for {} failed (resumable: {}): {}",
                job.attempts, job.source_url, resumable, error
            );
        }
    }

    async fn pause_before_retry(&self) -> Result<(), FetchError> {
        if self.options.retry_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.options.cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(self.options.retry_delay) => Ok(()),
        }
    }

    /// Move the finished bytes into place and build the report
    ///
    /// A failed move is logged and reported but never retried: the transport
    /// has already delivered the whole resource.
    async fn complete(&self, job: &DownloadJob, location: &Path, size: u64) -> JobReport {
        info!("Moving {:?} to {:?}", location, job.destination);

        let placement = match place_file(location, &job.destination).await {
            Ok(()) => Placement::Moved,
            Err(e) => {
                error!("Could not move {:?} to {:?}: {}", location, job.destination, e);
                Placement::MoveFailed {
                    reason: e.to_string(),
                }
            }
        };

        info!(
            "Finished {} ({} bytes, {} attempts)",
            job.source_url, size, job.attempts
        );

        JobReport {
            url: job.source_url.to_string(),
            destination: job.destination.clone(),
            bytes: size,
            attempts: job.attempts,
            resumes: job.resumes,
            restarts: job.restarts,
            placement,
            started_at: job.started_at,
            completed_at: Utc::now(),
        }
    }
}

/// Move `from` to `to`, replacing whatever is at `to`
///
/// Falls back to copy-then-rename through a sibling staging file when a plain
/// rename is impossible (e.g. across filesystems), so `to` never holds a
/// partial file.
pub async fn place_file(from: &Path, to: &Path) -> Result<(), FetchError> {
    let rename_error = match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    debug!("Rename failed ({}), copying instead", rename_error);

    let file_name = to
        .file_name()
        .ok_or_else(|| FetchError::Move(rename_error))?
        .to_string_lossy()
        .into_owned();
    let staging = to.with_file_name(format!(".{}.staging", file_name));

    let copied = async {
        fs::copy(from, &staging).await?;
        fs::rename(&staging, to).await
    }
    .await;

    if let Err(e) = copied {
        let _ = fs::remove_file(&staging).await;
        return Err(FetchError::Move(e));
    }

    if let Err(e) = fs::remove_file(from).await {
        warn!("Failed to remove {:?} after copying: {}", from, e);
    }
    Ok(())
}
