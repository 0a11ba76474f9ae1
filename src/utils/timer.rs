//! Case timing
//!
//! Wall-clock timing for a case and for one operation call. Result rows carry
//! elapsed seconds rounded to hundredths; reports carry milliseconds.

use std::time::{Duration, Instant};

/// Running clock for one case or operation call
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start timing; `label` names the case in the debug line `stop` writes
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed seconds, as stamped into `elapsed_secs` before rounding
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Finish the case and log how long it took
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{} took {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

/// Two-decimal seconds for result rows and log lines
pub fn round_secs(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_stop_reports_case_duration() {
        let timer = Timer::start("case_3");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_secs() >= 0.01);
        assert!(timer.stop() >= Duration::from_millis(10));
    }

    #[test]
    fn test_round_secs() {
        assert_eq!(round_secs(1.23456), 1.23);
        assert_eq!(round_secs(0.006), 0.01);
        assert_eq!(round_secs(2.0), 2.0);
        assert_eq!(round_secs(0.0), 0.0);
    }
}
