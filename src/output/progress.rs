use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};

use super::styling::{heading, job_name, muted, verdict};
use crate::error::RunJenkinsError;
use crate::monitor::{BuildHandle, BuildOutcome};
use crate::plan::{JobMarker, Parameters};

/// Poll markers kept visible on a job's spinner line.
const TRAIL_LENGTH: usize = 30;

/// Spinner container shared by every job of a run.
pub struct RunProgress {
    multi: MultiProgress,
}

impl RunProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    pub fn job(&self, marker: JobMarker, name: &str) -> JobProgress {
        let pb = self.multi.add(create_spinner());
        if !self.multi.is_hidden() {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        JobProgress::with_bar(pb, marker, name)
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress line of one job.
///
/// The trail after the job label shows one marker per status lookup:
/// `x` while the build is not visible yet, `.` for a normal poll and `!` when a
/// build that was already visible could not be looked up.
pub struct JobProgress {
    pb: ProgressBar,
    marker: JobMarker,
    name: String,
    trail: String,
    announcements: usize,
}

impl JobProgress {
    pub fn hidden(marker: JobMarker, name: &str) -> Self {
        Self::with_bar(ProgressBar::hidden(), marker, name)
    }

    fn with_bar(pb: ProgressBar, marker: JobMarker, name: &str) -> Self {
        let progress = Self {
            pb,
            marker,
            name: name.to_string(),
            trail: String::new(),
            announcements: 0,
        };
        progress
            .pb
            .set_message(format!("{} {}", progress.label(), muted("submitting")));
        progress
    }

    fn label(&self) -> String {
        format!("{} {}", muted(self.marker), job_name(&self.name))
    }

    fn tick(&mut self, symbol: char) {
        if self.trail.chars().count() >= TRAIL_LENGTH {
            self.trail.remove(0);
        }
        self.trail.push(symbol);
        self.pb
            .set_message(format!("{} {}", self.label(), muted(&self.trail)));
    }

    pub fn submitted(&mut self, handle: &BuildHandle) {
        debug!(
            "[{}] {} submitted, expecting build #{} ({})",
            self.marker, self.name, handle.build_number, handle.source
        );
        self.pb.set_message(format!(
            "{} {}",
            self.label(),
            muted(format!("waiting for build #{}", handle.build_number))
        ));
    }

    pub fn waiting(&mut self) {
        self.tick('x');
    }

    pub fn polled(&mut self) {
        self.tick('.');
    }

    pub fn anomaly(&mut self, error: &RunJenkinsError) {
        warn!(
            "[{}] {}: lookup failed after the build became visible: {}",
            self.marker, self.name, error
        );
        self.tick('!');
    }

    /// Announces the build once it is visible. Later calls are ignored.
    pub fn started(&mut self, parameters: &Parameters, url: &str) {
        self.announcements += 1;
        if self.announcements > 1 {
            return;
        }
        debug!("[{}] {} visible at {}", self.marker, self.name, url);
        self.pb.println(format!(
            "  {} Started build, job_name: {}, params: {:?}, url: {}",
            muted(self.marker),
            job_name(&self.name),
            parameters,
            url
        ));
    }

    pub fn finished(&self, outcome: &BuildOutcome) {
        info!(
            "[{}] {} complete, result: {}",
            self.marker,
            self.name,
            outcome.result()
        );
        self.pb
            .finish_with_message(format!("{} {}", heading(self.label()), verdict(outcome)));
    }
}

#[cfg(test)]
impl JobProgress {
    pub fn trail(&self) -> &str {
        &self.trail
    }

    pub fn announcements(&self) -> usize {
        self.announcements
    }
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} {msg}")
            .unwrap(),
    );
    pb
}
