// src/scheduler/clock.rs - Simulated time base
use std::time::Duration;

/// Time advanced in whole pulse-generator ticks.
#[derive(Debug, Clone)]
pub struct SimClock {
    pub current_time: Duration,
    ticks: u64,
    tick_period: Duration,
}

impl SimClock {
    pub fn new(tick_frequency_hz: f64) -> Self {
        Self {
            current_time: Duration::ZERO,
            ticks: 0,
            tick_period: Duration::from_secs_f64(1.0 / tick_frequency_hz),
        }
    }

    pub fn advance(&mut self) {
        self.ticks += 1;
        self.current_time += self.tick_period;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }
}
