//! Progress reporters for CLI downloads

use indicatif::{ProgressBar, ProgressStyle};
use mediafetch_core::{LineReporter, ProgressReporter, SilentReporter};
use parking_lot::Mutex;
use std::io::Stdout;

/// One indicatif bar per attempt, scaled to percent
pub struct BarReporter {
    bar: Mutex<Option<ProgressBar>>,
    width: usize,
}

impl BarReporter {
    pub fn new(width: usize) -> Self {
        Self {
            bar: Mutex::new(None),
            width,
        }
    }

    fn create_bar(&self) -> ProgressBar {
        let pb = ProgressBar::new(100);
        let template = format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:{}.cyan/blue}}] {{pos:>3}}% {{msg}}",
            self.width
        );
        match ProgressStyle::default_bar().template(&template) {
            Ok(style) => pb.set_style(style.progress_chars("█▓▒░  ")),
            Err(_) => pb.set_style(ProgressStyle::default_bar()),
        }
        pb
    }
}

impl ProgressReporter for BarReporter {
    fn report(&self, percent: u8, rate_kbps: u64) {
        let mut slot = self.bar.lock();
        let pb = slot.get_or_insert_with(|| self.create_bar());
        pb.set_position(u64::from(percent));
        pb.set_message(format!("{}KB/s", rate_kbps));
    }

    fn finish(&self) {
        if let Some(pb) = self.bar.lock().take() {
            pb.finish();
        }
    }
}

/// Reporter picked at runtime from the output flags
pub enum Reporter {
    Bar(BarReporter),
    Line(LineReporter<Stdout>),
    Silent(SilentReporter),
}

impl ProgressReporter for Reporter {
    fn report(&self, percent: u8, rate_kbps: u64) {
        match self {
            Reporter::Bar(r) => r.report(percent, rate_kbps),
            Reporter::Line(r) => r.report(percent, rate_kbps),
            Reporter::Silent(r) => r.report(percent, rate_kbps),
        }
    }

    fn finish(&self) {
        match self {
            Reporter::Bar(r) => r.finish(),
            Reporter::Line(r) => r.finish(),
            Reporter::Silent(r) => r.finish(),
        }
    }
}
