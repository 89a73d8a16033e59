//! The unit of work owned by an engine: one resource to one path

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use mediafetch_types::{JobState, ResumeToken};
use std::path::PathBuf;
use url::Url;

/// One resource being downloaded to one destination, across all attempts
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub source_url: Url,
    pub destination: PathBuf,
    pub started_at: DateTime<Utc>,
    pub resume_token: Option<ResumeToken>,
    pub state: JobState,
    pub attempts: u32,
    pub resumes: u32,
    pub restarts: u32,
}

impl DownloadJob {
    pub fn new(source_url: Url, destination: PathBuf) -> Self {
        Self {
            source_url,
            destination,
            started_at: Utc::now(),
            resume_token: None,
            state: JobState::Idle,
            attempts: 0,
            resumes: 0,
            restarts: 0,
        }
    }
}

/// How a single attempt ended
#[derive(Debug)]
pub enum AttemptOutcome {
    Success { location: PathBuf, size: u64 },
    FailureResumable(ResumeToken),
    FailureNonResumable(FetchError),
}
