//! HTTP transport - runs one attempt per spawned task, writing to a `.part` file
//!
//! The body of every attempt lands in `<temp_dir>/<uuid>.part`. Nothing is
//! written to the destination path here; the engine moves the part file once
//! an attempt reports `Finished`.
//!
//! A resume token is a JSON-encoded [`ResumeState`]. Resuming sends
//! `Range: bytes=<offset>-`, with `If-Range` when the first response carried a
//! strong validator.

use crate::engine::transport::{
    AttemptHandle, AttemptRequest, ScratchFile, TransferEvent, Transport,
};
use crate::error::FetchError;
use futures::StreamExt;
use mediafetch_types::{ResumeToken, Settings};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_RANGE, ETAG, IF_RANGE, LAST_MODIFIED, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Minimum spacing between progress events
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Settings for building the HTTP client
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub temp_dir: PathBuf,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl From<&Settings> for HttpTransportConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            temp_dir: settings.temp_dir.clone(),
            user_agent: settings.user_agent.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            read_timeout: Duration::from_secs(settings.read_timeout_secs),
        }
    }
}

/// What a resume token carries for this transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub url: Url,
    pub part_path: PathBuf,
    /// Bytes already in the part file
    pub offset: u64,
    /// Full size of the resource, if the server announced it
    pub expected: Option<u64>,
    /// Strong ETag or Last-Modified of the first response
    pub validator: Option<String>,
}

impl ResumeState {
    pub fn to_token(&self) -> Result<ResumeToken, FetchError> {
        Ok(ResumeToken::from_bytes(serde_json::to_vec(self)?))
    }

    pub fn from_token(token: &ResumeToken) -> Result<Self, FetchError> {
        serde_json::from_slice(token.as_bytes())
            .map_err(|e| FetchError::InvalidResumeToken(e.to_string()))
    }
}

/// HTTP(S) transport backed by reqwest
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(config: HttpTransportConfig) -> Result<Self, FetchError> {
        let client = build_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Build the HTTP client; no total timeout so slow transfers are never cut
pub fn build_client(config: &HttpTransportConfig) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .build()
        .map_err(FetchError::Network)
}

impl Transport for HttpTransport {
    fn begin(&mut self, request: AttemptRequest) -> AttemptHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let temp_dir = self.config.temp_dir.clone();

        // The scratch path is fixed before the task runs, so an abandoned
        // attempt can always be cleaned up
        let (task, scratch) = match request {
            AttemptRequest::Fresh { url } => {
                let part_path = temp_dir.join(format!("{}.part", Uuid::new_v4()));
                let scratch = ScratchFile::new(part_path.clone());
                let task = tokio::spawn(async move {
                    let terminal = fresh_attempt(&client, &temp_dir, part_path, url, &tx).await;
                    let _ = tx.send(terminal);
                });
                (task, scratch)
            }
            AttemptRequest::Resume { token } => {
                let scratch = ResumeState::from_token(&token)
                    .map(|state| ScratchFile::new(state.part_path))
                    .unwrap_or_default();
                let task = tokio::spawn(async move {
                    let terminal = resume_attempt(&client, token, &tx).await;
                    let _ = tx.send(terminal);
                });
                (task, scratch)
            }
        };

        AttemptHandle::new(rx, Some(task)).with_scratch(scratch)
    }

    fn reset_session(&mut self) -> Result<(), FetchError> {
        debug!("Rebuilding HTTP client");
        self.client = build_client(&self.config)?;
        Ok(())
    }

    fn discard(&mut self, token: &ResumeToken) {
        match ResumeState::from_token(token) {
            Ok(state) => match std::fs::remove_file(&state.part_path) {
                Ok(()) => debug!("Discarded partial file {:?}", state.part_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", state.part_path, e),
            },
            Err(e) => warn!("Cannot discard undecodable token: {}", e),
        }
    }
}

async fn fresh_attempt(
    client: &Client,
    temp_dir: &Path,
    part_path: PathBuf,
    url: Url,
    tx: &mpsc::UnboundedSender<TransferEvent>,
) -> TransferEvent {
    if let Err(e) = fs::create_dir_all(temp_dir).await {
        return failed(e.into(), None);
    }

    info!("Requesting {}", url);
    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) => return failed(e.into(), None),
    };

    let status = response.status();
    if !status.is_success() {
        return failed(
            FetchError::ServerError {
                status: status.as_u16(),
                message: format!("GET {} failed", url),
            },
            None,
        );
    }

    let file = match File::create(&part_path).await {
        Ok(file) => file,
        Err(e) => return failed(e.into(), None),
    };

    let ranges_ok = accepts_ranges(response.headers());
    let state = ResumeState {
        url,
        part_path,
        offset: 0,
        expected: response.content_length(),
        validator: validator_of(response.headers()),
    };
    debug!(
        "Fresh attempt: expected={:?} ranges={} validator={:?}",
        state.expected, ranges_ok, state.validator
    );

    stream_to_part(response, file, state, ranges_ok, tx).await
}

async fn resume_attempt(
    client: &Client,
    token: ResumeToken,
    tx: &mpsc::UnboundedSender<TransferEvent>,
) -> TransferEvent {
    let mut state = match ResumeState::from_token(&token) {
        Ok(state) => state,
        Err(e) => return failed(e, None),
    };

    // The part file is authoritative for how much we hold
    state.offset = match fs::metadata(&state.part_path).await {
        Ok(meta) => meta.len(),
        Err(_) => {
            return failed(
                FetchError::InvalidResumeToken(format!(
                    "partial file {:?} is missing",
                    state.part_path
                )),
                None,
            )
        }
    };

    if let Some(expected) = state.expected {
        if state.offset == expected {
            info!("Partial file already holds all {} bytes", expected);
            return TransferEvent::Finished {
                location: state.part_path,
                size: expected,
            };
        }
        if state.offset > expected {
            discard(&state.part_path).await;
            return failed(
                FetchError::InvalidResumeToken("partial file is larger than the resource".into()),
                None,
            );
        }
    }

    let range = format!("bytes={}-", state.offset);
    info!("Resuming {} with range {}", state.url, range);
    let mut request = client.get(state.url.clone()).header(RANGE, range);
    if let Some(validator) = &state.validator {
        request = request.header(IF_RANGE, validator.as_str());
    }

    let response = match request.send().await {
        Ok(response) => response,
        // Nothing was received, the partial file is still good
        Err(e) => return failed(e.into(), state.to_token().ok()),
    };

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let range = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range);

            match range {
                Some(ContentRange { start: Some(start), total }) if start == state.offset => {
                    if total.is_some() {
                        state.expected = total;
                    }
                }
                other => {
                    warn!("Unexpected Content-Range {:?} for offset {}", other, state.offset);
                    discard(&state.part_path).await;
                    return failed(
                        FetchError::ServerError {
                            status: 206,
                            message: "range response does not match the partial file".into(),
                        },
                        None,
                    );
                }
            }

            let file = match OpenOptions::new().append(true).open(&state.part_path).await {
                Ok(file) => file,
                Err(e) => {
                    discard(&state.part_path).await;
                    return failed(e.into(), None);
                }
            };
            stream_to_part(response, file, state, true, tx).await
        }
        StatusCode::OK => {
            info!("Server ignored the range request, restarting body from zero");
            let file = match File::create(&state.part_path).await {
                Ok(file) => file,
                Err(e) => return failed(e.into(), None),
            };
            let ranges_ok = accepts_ranges(response.headers());
            state.offset = 0;
            state.expected = response.content_length();
            state.validator = validator_of(response.headers());
            stream_to_part(response, file, state, ranges_ok, tx).await
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
                .and_then(|r| r.total);

            if total == Some(state.offset) {
                return TransferEvent::Finished {
                    location: state.part_path,
                    size: state.offset,
                };
            }
            discard(&state.part_path).await;
            failed(
                FetchError::ServerError {
                    status: 416,
                    message: format!("range starting at {} not satisfiable", state.offset),
                },
                None,
            )
        }
        status => {
            discard(&state.part_path).await;
            failed(
                FetchError::ServerError {
                    status: status.as_u16(),
                    message: format!("resume of {} failed", state.url),
                },
                None,
            )
        }
    }
}

/// Stream the response body into the part file, starting at `state.offset`
async fn stream_to_part(
    response: Response,
    mut file: File,
    mut state: ResumeState,
    ranges_ok: bool,
    tx: &mpsc::UnboundedSender<TransferEvent>,
) -> TransferEvent {
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();
    let mut last_emit: Option<Instant> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return interrupted(file, state, ranges_ok, e.into()).await,
        };

        if let Err(e) = file.write_all(&chunk).await {
            // Unknown on-disk state after a failed write; do not resume from it
            drop(file);
            discard(&state.part_path).await;
            return failed(e.into(), None);
        }

        received += chunk.len() as u64;
        state.offset += chunk.len() as u64;

        if last_emit.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
            let _ = tx.send(TransferEvent::Progress {
                written: state.offset,
                expected: state.expected,
                received,
            });
            last_emit = Some(Instant::now());
        }
    }

    if let Err(e) = flush(&mut file).await {
        drop(file);
        discard(&state.part_path).await;
        return failed(e.into(), None);
    }

    let _ = tx.send(TransferEvent::Progress {
        written: state.offset,
        expected: state.expected,
        received,
    });

    match state.expected {
        Some(expected) if state.offset < expected => {
            let error = FetchError::Truncated {
                expected,
                written: state.offset,
            };
            interrupted(file, state, ranges_ok, error).await
        }
        Some(expected) if state.offset > expected => {
            drop(file);
            discard(&state.part_path).await;
            failed(
                FetchError::Unknown(format!(
                    "received {} bytes but {} were announced",
                    state.offset, expected
                )),
                None,
            )
        }
        _ => {
            debug!("Attempt complete: {} bytes in {:?}", state.offset, state.part_path);
            TransferEvent::Finished {
                location: state.part_path,
                size: state.offset,
            }
        }
    }
}

/// Turn a mid-body failure into a terminal event, keeping the part file when
/// the server can continue it
async fn interrupted(
    mut file: File,
    state: ResumeState,
    ranges_ok: bool,
    error: FetchError,
) -> TransferEvent {
    let flushed = flush(&mut file).await.is_ok();
    drop(file);

    if flushed && is_resumable(ranges_ok, state.offset) {
        match state.to_token() {
            Ok(token) => {
                debug!("Keeping {} bytes in {:?} for resume", state.offset, state.part_path);
                return failed(error, Some(token));
            }
            Err(e) => warn!("Could not encode resume token: {}", e),
        }
    }

    discard(&state.part_path).await;
    failed(error, None)
}

/// A failed attempt can be continued only if the server honours byte ranges
/// and something was actually kept
pub(crate) fn is_resumable(ranges_ok: bool, written: u64) -> bool {
    ranges_ok && written > 0
}

async fn flush(file: &mut File) -> std::io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
}

fn failed(error: FetchError, resume: Option<ResumeToken>) -> TransferEvent {
    TransferEvent::Failed { error, resume }
}

fn accepts_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")))
        .unwrap_or(false)
}

/// Validator usable with `If-Range`: a strong ETag, else Last-Modified
fn validator_of(headers: &HeaderMap) -> Option<String> {
    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|tag| !tag.starts_with("W/"));

    etag.or_else(|| headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}

/// Parsed `Content-Range` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub start: Option<u64>,
    pub total: Option<u64>,
}

/// Parse `bytes 0-99/1234`, `bytes 0-99/*` or `bytes */1234`
pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;

    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    let start = match range.trim() {
        "*" => None,
        r => Some(r.split_once('-')?.0.trim().parse::<u64>().ok()?),
    };

    Some(ContentRange { start, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 400000-999999/1000000"),
            Some(ContentRange { start: Some(400_000), total: Some(1_000_000) })
        );
        assert_eq!(
            parse_content_range("bytes 0-9/*"),
            Some(ContentRange { start: Some(0), total: None })
        );
        assert_eq!(
            parse_content_range("bytes */1234"),
            Some(ContentRange { start: None, total: Some(1234) })
        );
        assert_eq!(parse_content_range("items 0-9/10"), None);
        assert_eq!(parse_content_range("bytes garbage"), None);
    }

    #[test]
    fn test_resumable_requires_ranges_and_data() {
        assert!(is_resumable(true, 400_000));
        assert!(!is_resumable(true, 0));
        assert!(!is_resumable(false, 400_000));
    }

    #[test]
    fn test_validator_prefers_strong_etag() {
        let mut headers = HeaderMap::new();
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        assert_eq!(validator_of(&headers).as_deref(), Some("\"abc\""));

        headers.insert(ETAG, HeaderValue::from_static("W/\"weak\""));
        assert_eq!(
            validator_of(&headers).as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn test_accepts_ranges() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_ranges(&headers));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!accepts_ranges(&headers));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        assert!(accepts_ranges(&headers));
    }

    #[test]
    fn test_resume_token_roundtrip_is_opaque() {
        let state = ResumeState {
            url: Url::parse("https://example.com/video1.m4v").unwrap(),
            part_path: PathBuf::from("/tmp/x.part"),
            offset: 400_000,
            expected: Some(1_000_000),
            validator: Some("\"v1\"".into()),
        };
        let token = state.to_token().unwrap();
        assert_eq!(ResumeState::from_token(&token).unwrap(), state);

        let garbage = ResumeToken::from_bytes(b"not json".to_vec());
        assert!(matches!(
            ResumeState::from_token(&garbage),
            Err(FetchError::InvalidResumeToken(_))
        ));
    }
}
