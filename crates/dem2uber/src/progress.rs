//! Progress reporting and cooperative cancellation.
//!
//! Long-running operations take a `&dyn Progress`, open one step per phase
//! and poll `is_cancelled` at their batch/strip boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::{ConvertError, Result};

pub trait Progress {
    /// Starts a named step expected to take `units` calls to `advance`.
    /// `refined` marks a fine-grained sub-step rather than a coarse phase.
    fn begin_step(&self, name: &str, units: u32, refined: bool) -> Box<dyn ProgressStep + '_>;
}

pub trait ProgressStep {
    fn advance(&mut self);
    fn is_cancelled(&self) -> bool;
}

/// Fails with `Cancelled` if the step has been cancelled.
#[inline]
pub fn ensure_not_cancelled(step: &dyn ProgressStep) -> Result<()> {
    if step.is_cancelled() {
        Err(ConvertError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reports nothing and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

struct NullStep;

impl ProgressStep for NullStep {
    fn advance(&mut self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Progress for NullProgress {
    fn begin_step(&self, _name: &str, _units: u32, _refined: bool) -> Box<dyn ProgressStep + '_> {
        Box::new(NullStep)
    }
}

/// Logs step progress and exposes a shared cancel flag.
#[derive(Debug, Clone)]
pub struct LogProgress {
    cancel: Arc<AtomicBool>,
    interval: Duration,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LogProgress {
    pub fn new() -> Self {
        Self::with_cancel_flag(Arc::new(AtomicBool::new(false)))
    }

    pub fn with_cancel_flag(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            interval: Duration::from_secs(1),
        }
    }

    /// Minimum time between two progress lines of the same step.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Setting the returned flag cancels every step at its next poll.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

impl Progress for LogProgress {
    fn begin_step(&self, name: &str, units: u32, refined: bool) -> Box<dyn ProgressStep + '_> {
        if refined {
            debug!("{}: {} units", name, units);
        } else {
            info!("{}", name);
        }

        Box::new(LogStep {
            name: name.to_owned(),
            units,
            done: 0,
            refined,
            tick: Tick::new(self.interval),
            cancel: &self.cancel,
        })
    }
}

struct LogStep<'a> {
    name: String,
    units: u32,
    done: u32,
    refined: bool,
    tick: Tick,
    cancel: &'a AtomicBool,
}

impl ProgressStep for LogStep<'_> {
    fn advance(&mut self) {
        self.done = self.done.saturating_add(1);

        if self.done >= self.units {
            info!(
                "{}: done ({} units in {:.2}s)",
                self.name,
                self.done,
                self.tick.elapsed_secs()
            );
        } else if self.refined && self.tick.should() {
            info!(
                "{}: {:>6}/{} ({:5.1}%)",
                self.name,
                self.done,
                self.units,
                100.0 * self.done as f64 / self.units.max(1) as f64
            );
            self.tick.bump();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Helper that rate-limits progress lines.
#[derive(Debug, Clone, Copy)]
struct Tick {
    start: Instant,
    last: Instant,
    interval: Duration,
}

impl Tick {
    #[inline]
    fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            interval,
        }
    }

    #[inline]
    fn should(&self) -> bool {
        self.last.elapsed() >= self.interval
    }

    #[inline]
    fn bump(&mut self) {
        self.last = Instant::now();
    }

    #[inline]
    fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_progress_never_cancels() {
        let progress = NullProgress;
        let mut step = progress.begin_step("noop", 3, true);
        step.advance();
        assert!(ensure_not_cancelled(&*step).is_ok());
    }

    #[test]
    fn cancel_flag_reaches_open_steps() {
        let progress = LogProgress::new().interval(Duration::ZERO);
        let flag = progress.cancel_flag();
        let mut step = progress.begin_step("copy", 4, true);

        step.advance();
        assert!(!step.is_cancelled());

        flag.store(true, Ordering::Relaxed);
        assert!(matches!(
            ensure_not_cancelled(&*step),
            Err(ConvertError::Cancelled)
        ));
    }
}
