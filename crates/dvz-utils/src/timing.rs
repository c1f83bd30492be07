// Small timing helpers shared by the logging macros and frame pacing code
//
// Austin Shafer - 2020

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used to stamp log lines.
pub fn get_current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// A simple elapsed-time stopwatch for frame pacing and profiling prints.
pub struct StopWatch {
    sw_start: Instant,
}

impl StopWatch {
    pub fn new() -> Self {
        Self {
            sw_start: Instant::now(),
        }
    }

    /// Restart the stopwatch, returning the elapsed time since the last start.
    pub fn restart(&mut self) -> std::time::Duration {
        let elapsed = self.sw_start.elapsed();
        self.sw_start = Instant::now();
        elapsed
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.sw_start.elapsed().as_secs_f64() * 1000.0
    }
}
