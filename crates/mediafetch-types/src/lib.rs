//! Shared types for mediafetch
//!
//! This crate contains the data structures shared between the core
//! download engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Job Types
// ============================================================================

/// Opaque data handed back by a failed transfer that lets a later request
/// continue from the point of interruption.
///
/// Only the transport that issued a token knows how to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// State of the job currently owned by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Attempting,
    Succeeded,
    FailedResumable,
    FailedTerminal,
}

/// Snapshot of an in-flight attempt, recomputed on every progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes on disk for this job, including any resumed prefix
    pub bytes_written: u64,
    /// Total size announced by the server, if any
    pub bytes_expected: Option<u64>,
    /// Bytes received since the current attempt started
    pub bytes_this_attempt: u64,
    /// Time since the current attempt started
    pub elapsed: Duration,
}

impl TransferProgress {
    /// Completion percentage, or `None` when the total size is unknown
    pub fn percent(&self) -> Option<u8> {
        match self.bytes_expected {
            Some(expected) if expected > 0 => {
                let pct = (self.bytes_written as u128 * 100) / expected as u128;
                Some(pct.min(100) as u8)
            }
            _ => None,
        }
    }

    /// Transfer rate of the current attempt in KB/s
    ///
    /// Computed from `bytes_this_attempt`, not `bytes_written`. A resumed
    /// attempt starts its clock at zero, so counting the prefix already on
    /// disk would report a rate far above what the link is delivering.
    pub fn rate_kbps(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.bytes_this_attempt as f64 / 1024.0 / secs).floor() as u64
    }
}

/// Where the finished bytes ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Placement {
    Moved,
    /// The transfer completed but the file could not be moved into place
    MoveFailed { reason: String },
}

/// Result of one completed job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub url: String,
    pub destination: PathBuf,
    pub bytes: u64,
    pub attempts: u32,
    pub resumes: u32,
    pub restarts: u32,
    pub placement: Placement,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Totals for one pass over a resource list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub move_failures: usize,
    /// Set when the run stopped before the end of the list
    pub interrupted: Option<String>,
    pub reports: Vec<JobReport>,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Page scraped when no URL is given
pub const DEFAULT_PAGE_URL: &str =
    "https://itunes.apple.com/cn/course/developing-ios-11-apps-with-swift/id1309275316";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTML page listing the resources
    pub page_url: String,
    /// Directory that receives finished files
    pub output_dir: PathBuf,
    /// Directory for in-progress `.part` files
    pub temp_dir: PathBuf,
    /// File extensions scraped from the page, in download order
    pub extensions: Vec<String>,
    /// Connectivity poll interval while waiting for the network
    pub poll_interval_ms: u64,
    /// Pause after a failed attempt before the connectivity gate
    pub retry_delay_ms: u64,
    /// Upper bound on attempts per job (None = retry forever)
    pub max_attempts: Option<u32>,
    /// Upper bound on wall-clock time per job (None = no bound)
    pub max_duration_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    /// Abort an attempt whose connection stalls for this long
    pub read_timeout_secs: u64,
    pub user_agent: String,
    /// Addresses whose route decides reachability, tried in order
    pub probe_targets: Vec<String>,
    /// Width of the plain progress bar in cells
    pub bar_width: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_url: DEFAULT_PAGE_URL.to_string(),
            output_dir: PathBuf::from("."),
            temp_dir: dirs::cache_dir()
                .map(|p| p.join("mediafetch").join("partial"))
                .unwrap_or_else(|| std::env::temp_dir().join("mediafetch")),
            extensions: vec!["m4v".to_string(), "mp4".to_string()],
            poll_interval_ms: 1000,
            retry_delay_ms: 1000,
            max_attempts: None,
            max_duration_secs: None,
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            user_agent: format!("mediafetch/{}", env!("CARGO_PKG_VERSION")),
            probe_targets: vec![
                "1.1.1.1:53".to_string(),
                "[2606:4700:4700::1111]:53".to_string(),
            ],
            bar_width: 70,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(written: u64, expected: Option<u64>) -> TransferProgress {
        TransferProgress {
            bytes_written: written,
            bytes_expected: expected,
            bytes_this_attempt: written,
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_percent_known_size() {
        assert_eq!(progress(400_000, Some(1_000_000)).percent(), Some(40));
        assert_eq!(progress(1_000_000, Some(1_000_000)).percent(), Some(100));
    }

    #[test]
    fn test_percent_unknown_or_zero_size() {
        assert_eq!(progress(10, None).percent(), None);
        assert_eq!(progress(10, Some(0)).percent(), None);
    }

    #[test]
    fn test_percent_caps_at_hundred() {
        assert_eq!(progress(1_500, Some(1_000)).percent(), Some(100));
    }

    #[test]
    fn test_rate_kbps() {
        // 200 KiB over 2 seconds
        assert_eq!(progress(204_800, None).rate_kbps(), 100);

        let instant = TransferProgress {
            elapsed: Duration::ZERO,
            ..progress(1024, None)
        };
        assert_eq!(instant.rate_kbps(), 0);
    }

    #[test]
    fn test_rate_kbps_ignores_resumed_prefix() {
        let resumed = TransferProgress {
            bytes_this_attempt: 204_800,
            ..progress(1_000_000, Some(2_000_000))
        };
        assert_eq!(resumed.rate_kbps(), 100);
        assert_eq!(resumed.percent(), Some(50));
    }

    #[test]
    fn test_settings_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "extensions": ["mov"], "max_attempts": 5 }"#).unwrap();
        assert_eq!(settings.extensions, vec!["mov".to_string()]);
        assert_eq!(settings.max_attempts, Some(5));
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.bar_width, 70);
    }
}
