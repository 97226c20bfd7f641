//! Sliding-window health monitor (spec.md §4.15)

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub window_size: usize,
    pub degraded_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self { window_size: 20, degraded_threshold: 2, unhealthy_threshold: 5 }
    }
}

/// Tracks consecutive failures over a bounded sliding window of outcomes.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    window: VecDeque<bool>,
    consecutive_failures: u32,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self { config, window: VecDeque::new(), consecutive_failures: 0 }
    }

    pub fn record(&mut self, success: bool) {
        self.window.push_back(success);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    pub fn status(&self) -> HealthStatus {
        if self.consecutive_failures >= self.config.unhealthy_threshold {
            HealthStatus::Unhealthy
        } else if self.consecutive_failures >= self.config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|&&ok| !ok).count();
        failures as f64 / self.window.len() as f64
    }
}
