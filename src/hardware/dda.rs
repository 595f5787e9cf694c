// src/hardware/dda.rs - Simulated DDA pulse generator
//! Bresenham-style accumulator per axis with a virtual encoder that counts
//! every emitted step.

use crate::hardware::PulseGenerator;
use crate::motion::{AXES, MotionError, Segment};

#[derive(Debug, Clone, Default)]
pub struct SimulatedDda {
    ticks_total: u32,
    ticks_left: u32,
    steps: [i64; AXES],
    emitted: [i64; AXES],
    accumulator: [u64; AXES],
    encoder: [i64; AXES],
    segments_run: u64,
}

impl SimulatedDda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments_run(&self) -> u64 {
        self.segments_run
    }
}

impl PulseGenerator for SimulatedDda {
    fn program_segment(&mut self, segment: &Segment) -> Result<(), MotionError> {
        if self.is_busy() {
            return Err(MotionError::RuntimeBusy);
        }
        let ticks = segment.ticks.max(1);
        self.ticks_total = ticks;
        self.ticks_left = ticks;
        self.steps = segment.steps;
        self.emitted = [0; AXES];
        // start half way so steps land in the middle of their interval
        self.accumulator = [u64::from(ticks) / 2; AXES];
        tracing::trace!("DDA segment {}: {} ticks, steps {:?}", segment.seq, ticks, segment.steps);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.ticks_left > 0
    }

    fn tick(&mut self) -> bool {
        if self.ticks_left == 0 {
            return false;
        }
        let period = u64::from(self.ticks_total);
        for axis in 0..AXES {
            let rate = self.steps[axis].unsigned_abs();
            if rate == 0 {
                continue;
            }
            self.accumulator[axis] += rate;
            let direction = self.steps[axis].signum();
            // one step per tick unless the axis step rate exceeds the DDA
            // frequency, which config validation rejects
            while self.accumulator[axis] >= period {
                self.accumulator[axis] -= period;
                self.emitted[axis] += direction;
                self.encoder[axis] += direction;
            }
        }
        self.ticks_left -= 1;
        if self.ticks_left == 0 {
            self.segments_run += 1;
            return true;
        }
        false
    }

    fn halt(&mut self) -> [i64; AXES] {
        let remaining = if self.is_busy() {
            std::array::from_fn(|axis| self.steps[axis] - self.emitted[axis])
        } else {
            [0; AXES]
        };
        self.ticks_left = 0;
        self.steps = [0; AXES];
        self.emitted = [0; AXES];
        remaining
    }

    fn encoder_position(&self) -> [i64; AXES] {
        self.encoder
    }
}
