//! In-memory doubles for driving the engine in unit tests

use crate::engine::{AttemptHandle, AttemptRequest, ConnectivityProbe, ProgressReporter, TransferEvent, Transport};
use crate::error::FetchError;
use mediafetch_types::ResumeToken;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) fn progress(written: u64, expected: Option<u64>, received: u64) -> TransferEvent {
    TransferEvent::Progress {
        written,
        expected,
        received,
    }
}

pub(crate) fn finished(location: &Path, size: u64) -> TransferEvent {
    TransferEvent::Finished {
        location: location.to_path_buf(),
        size,
    }
}

pub(crate) fn fail(resume: Option<ResumeToken>) -> TransferEvent {
    TransferEvent::Failed {
        error: FetchError::Truncated {
            expected: 1,
            written: 0,
        },
        resume,
    }
}

/// Transport that replays one scripted event list per attempt
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    attempts: VecDeque<Vec<TransferEvent>>,
    requests: Vec<AttemptRequest>,
    resets: usize,
    discarded: Vec<ResumeToken>,
    probe_calls: Option<Arc<AtomicUsize>>,
    probe_calls_at_begin: Vec<usize>,
}

impl ScriptedTransport {
    pub(crate) fn new(attempts: Vec<Vec<TransferEvent>>) -> Self {
        Self {
            attempts: attempts.into(),
            ..Self::default()
        }
    }

    /// Snapshot the probe's call count every time an attempt begins
    pub(crate) fn watch_probe(&mut self, calls: Arc<AtomicUsize>) {
        self.probe_calls = Some(calls);
    }

    pub(crate) fn requests(&self) -> Vec<AttemptRequest> {
        self.requests.clone()
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets
    }

    /// Tokens the engine released without resuming
    pub(crate) fn discarded(&self) -> Vec<ResumeToken> {
        self.discarded.clone()
    }

    pub(crate) fn probe_calls_at_begin(&self) -> Vec<usize> {
        self.probe_calls_at_begin.clone()
    }
}

impl Transport for ScriptedTransport {
    fn begin(&mut self, request: AttemptRequest) -> AttemptHandle {
        self.requests.push(request);
        if let Some(calls) = &self.probe_calls {
            self.probe_calls_at_begin.push(calls.load(Ordering::SeqCst));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let events = self.attempts.pop_front().unwrap_or_else(|| {
            vec![TransferEvent::Failed {
                error: FetchError::Unknown("script exhausted".into()),
                resume: None,
            }]
        });
        for event in events {
            let _ = tx.send(event);
        }
        AttemptHandle::new(rx, None)
    }

    fn reset_session(&mut self) -> Result<(), FetchError> {
        self.resets += 1;
        Ok(())
    }

    fn discard(&mut self, token: &ResumeToken) {
        self.discarded.push(token.clone());
    }
}

/// Probe that answers from a script, repeating the last answer forever
pub(crate) struct ScriptedProbe {
    answers: Vec<bool>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub(crate) fn new(answers: Vec<bool>) -> Self {
        Self {
            answers,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn always(answer: bool) -> Self {
        Self::new(vec![answer])
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl ConnectivityProbe for ScriptedProbe {
    fn is_reachable(&self) -> bool {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(self.answers.len().saturating_sub(1));
        self.answers.get(idx).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reported {
    Percent(u8),
    Finish,
}

/// Reporter that remembers every call
#[derive(Default)]
pub(crate) struct RecordingReporter {
    calls: Mutex<Vec<Reported>>,
}

impl RecordingReporter {
    /// Reported percentages, split at each `finish`
    pub(crate) fn percents_by_attempt(&self) -> Vec<Vec<u8>> {
        let mut attempts = vec![Vec::new()];
        for call in self.calls.lock().iter() {
            match call {
                Reported::Percent(p) => {
                    if let Some(current) = attempts.last_mut() {
                        current.push(*p);
                    }
                }
                Reported::Finish => attempts.push(Vec::new()),
            }
        }
        attempts.pop();
        attempts
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, percent: u8, _rate_kbps: u64) {
        self.calls.lock().push(Reported::Percent(percent));
    }

    fn finish(&self) {
        self.calls.lock().push(Reported::Finish);
    }
}
