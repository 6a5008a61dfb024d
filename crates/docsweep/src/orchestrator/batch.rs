use log::{debug, warn};

/// Usage must fall this many points below the pressure threshold before
/// the batch grows again.
const RECOVERY_MARGIN: f64 = 10.0;

/// Batch size that halves under memory pressure, down to a floor, and
/// creeps back toward the configured size once pressure eases.
#[derive(Debug, Clone)]
pub struct AdaptiveBatch {
    max: usize,
    min: usize,
    current: usize,
    pressure_percent: f64,
}

impl AdaptiveBatch {
    pub fn new(max: usize, min: usize, pressure_percent: f64) -> Self {
        let max = max.max(1);
        let min = min.clamp(1, max);
        Self {
            max,
            min,
            current: max,
            pressure_percent,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Applies one memory reading and returns the new size.
    pub fn adjust(&mut self, usage_percent: f64) -> usize {
        if usage_percent > self.pressure_percent {
            let shrunk = (self.current / 2).max(self.min);
            if shrunk < self.current {
                warn!(
                    "Memory usage at {:.1}%, reducing batch size {} -> {}",
                    usage_percent, self.current, shrunk
                );
                self.current = shrunk;
            }
        } else if usage_percent < self.pressure_percent - RECOVERY_MARGIN && self.current < self.max
        {
            self.current += 1;
            debug!("Memory usage at {:.1}%, batch size now {}", usage_percent, self.current);
        }
        self.current
    }
}
