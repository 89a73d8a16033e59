//! Progress reporting for in-flight attempts

use parking_lot::Mutex;
use std::io::Write;

/// Default bar width in cells
pub const DEFAULT_BAR_WIDTH: usize = 70;

/// Sink for progress of the current attempt
///
/// Implementations must not block and must swallow their own I/O errors.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: u8, rate_kbps: u64);

    /// Called once when an attempt ends, to release the progress line
    fn finish(&self) {}
}

/// Render a single progress line: `[####    ] 45% 120KB/s`
pub fn render_bar(percent: u8, rate_kbps: u64, width: usize) -> String {
    let percent = percent.min(100);
    let filled = width * percent as usize / 100;

    let mut line = String::with_capacity(width + 24);
    line.push('[');
    line.extend(std::iter::repeat('#').take(filled));
    line.extend(std::iter::repeat(' ').take(width - filled));
    line.push_str(&format!("] {}% {}KB/s", percent, rate_kbps));
    line
}

/// Plain-text reporter that rewrites one line in place
pub struct LineReporter<W: Write + Send> {
    out: Mutex<W>,
    width: usize,
}

impl LineReporter<std::io::Stdout> {
    pub fn stdout(width: usize) -> Self {
        Self::new(std::io::stdout(), width)
    }
}

impl<W: Write + Send> LineReporter<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out: Mutex::new(out),
            width,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ProgressReporter for LineReporter<W> {
    fn report(&self, percent: u8, rate_kbps: u64) {
        let mut out = self.out.lock();
        let _ = write!(out, "\r{}", render_bar(percent, rate_kbps, self.width));
        let _ = out.flush();
    }

    fn finish(&self) {
        let mut out = self.out.lock();
        let _ = writeln!(out);
        let _ = out.flush();
    }
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _percent: u8, _rate_kbps: u64) {}
}
