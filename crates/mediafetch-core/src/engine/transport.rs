//! Transport seam between the engine and the network
//!
//! A transport runs each attempt on its own task and reports back over a
//! channel. The engine only ever sees `TransferEvent`s; everything about
//! connections, temp files and resume data stays behind this trait.

use crate::error::FetchError;
use mediafetch_types::ResumeToken;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// What the next attempt should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptRequest {
    /// Start from byte zero
    Fresh { url: Url },
    /// Continue where a failed attempt stopped
    Resume { token: ResumeToken },
}

/// Events emitted by a running attempt
///
/// An attempt emits any number of `Progress` events followed by exactly one
/// `Finished` or `Failed`.
#[derive(Debug)]
pub enum TransferEvent {
    Progress {
        /// Bytes on disk, including a resumed prefix
        written: u64,
        expected: Option<u64>,
        /// Bytes received by this attempt
        received: u64,
    },
    Finished {
        /// Temp file holding the complete resource
        location: PathBuf,
        size: u64,
    },
    Failed {
        error: FetchError,
        resume: Option<ResumeToken>,
    },
}

/// Temp file an in-flight attempt is writing
///
/// The transport registers the path before the attempt task starts. If the
/// handle is dropped before a terminal event arrives, the file is removed.
#[derive(Debug, Clone, Default)]
pub struct ScratchFile(Arc<Mutex<Option<PathBuf>>>);

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self(Arc::new(Mutex::new(Some(path))))
    }

    fn take(&self) -> Option<PathBuf> {
        self.0.lock().take()
    }
}

/// Receiving end of one attempt
///
/// Dropping the handle aborts the attempt's task. An attempt abandoned
/// before its terminal event also loses its scratch file.
pub struct AttemptHandle {
    events: mpsc::UnboundedReceiver<TransferEvent>,
    task: Option<JoinHandle<()>>,
    scratch: ScratchFile,
    settled: bool,
}

impl AttemptHandle {
    pub fn new(events: mpsc::UnboundedReceiver<TransferEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            events,
            task,
            scratch: ScratchFile::default(),
            settled: false,
        }
    }

    /// Attach the temp file this attempt writes to
    pub fn with_scratch(mut self, scratch: ScratchFile) -> Self {
        self.scratch = scratch;
        self
    }

    /// Next event, or `None` once the attempt's sender is gone
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        let event = self.events.recv().await;
        if matches!(
            event,
            Some(TransferEvent::Finished { .. } | TransferEvent::Failed { .. })
        ) {
            // The terminal event now owns whatever is on disk
            self.settled = true;
        }
        event
    }
}

impl Drop for AttemptHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.settled {
            return;
        }
        if let Some(path) = self.scratch.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed abandoned partial file {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove abandoned partial file {:?}: {}", path, e),
            }
        }
    }
}

/// Network capability the engine drives
pub trait Transport: Send {
    /// Start one attempt in the background
    fn begin(&mut self, request: AttemptRequest) -> AttemptHandle;

    /// Tear down and rebuild connection state after a failure
    fn reset_session(&mut self) -> Result<(), FetchError>;

    /// Release whatever a token keeps alive; the token is not used again
    fn discard(&mut self, token: &ResumeToken);
}
