// src/scheduler/mod.rs - Timer model for the execution pipeline
//! The three pipeline stages run as one-shot timers at fixed priorities.
//! A stage is armed by a request and fires at most once per tick; the
//! highest priority armed stage is serviced first and runs to completion.

pub mod clock;

pub use clock::SimClock;

/// Pipeline stages, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Exec,
    Load,
    Pulse,
}

impl Stage {
    /// Service order within a tick.
    pub const BY_PRIORITY: [Stage; 3] = [Stage::Pulse, Stage::Load, Stage::Exec];

    fn bit(self) -> u8 {
        match self {
            Stage::Exec => 0b001,
            Stage::Load => 0b010,
            Stage::Pulse => 0b100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerBank {
    armed: u8,
}

impl TimerBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, stage: Stage) {
        self.armed |= stage.bit();
    }

    pub fn disarm(&mut self, stage: Stage) {
        self.armed &= !stage.bit();
    }

    pub fn is_armed(&self, stage: Stage) -> bool {
        self.armed & stage.bit() != 0
    }

    /// Acknowledge a firing timer: true if it was armed, and it is now disarmed.
    pub fn acknowledge(&mut self, stage: Stage) -> bool {
        let armed = self.is_armed(stage);
        self.disarm(stage);
        armed
    }

    pub fn clear(&mut self) {
        self.armed = 0;
    }

    pub fn any_armed(&self) -> bool {
        self.armed != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert_eq!(Stage::BY_PRIORITY[0], Stage::Pulse);
        assert!(Stage::Exec < Stage::Load && Stage::Load < Stage::Pulse);
    }

    #[test]
    fn test_acknowledge_is_one_shot() {
        let mut timers = TimerBank::new();
        timers.arm(Stage::Load);
        assert!(timers.is_armed(Stage::Load));
        assert!(!timers.is_armed(Stage::Exec));
        assert!(timers.acknowledge(Stage::Load));
        assert!(!timers.acknowledge(Stage::Load));
    }

    #[test]
    fn test_clear_disarms_everything() {
        let mut timers = TimerBank::new();
        timers.arm(Stage::Exec);
        timers.arm(Stage::Pulse);
        timers.clear();
        assert!(!timers.any_armed());
    }
}
