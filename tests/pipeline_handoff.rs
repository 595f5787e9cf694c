// Exec/Load handoff under randomized stage interleavings, and command
// loop backpressure

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use cnc_motion::config::MachineConfig;
    use cnc_motion::controller::{Controller, ProgramState};
    use cnc_motion::hardware::PulseGenerator;
    use cnc_motion::machine::Status;
    use cnc_motion::machine::axis::AxisSettings;
    use cnc_motion::machine::gstate::{GState, MotionMode};
    use cnc_motion::motion::loader::SlotOwner;
    use cnc_motion::motion::{AXES, MotionController, MotionError, Segment};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Pulse generator that keeps every segment it was given.
    #[derive(Debug, Default)]
    struct RecordingGenerator {
        log: Arc<Mutex<Vec<Segment>>>,
        ticks_left: u32,
        pending: [i64; AXES],
        encoder: [i64; AXES],
    }

    impl PulseGenerator for RecordingGenerator {
        fn program_segment(&mut self, segment: &Segment) -> Result<(), MotionError> {
            if self.is_busy() {
                return Err(MotionError::RuntimeBusy);
            }
            self.log.lock().unwrap().push(*segment);
            self.ticks_left = segment.ticks.max(1);
            self.pending = segment.steps;
            Ok(())
        }

        fn is_busy(&self) -> bool {
            self.ticks_left > 0
        }

        fn tick(&mut self) -> bool {
            if self.ticks_left == 0 {
                return false;
            }
            self.ticks_left -= 1;
            if self.ticks_left > 0 {
                return false;
            }
            for axis in 0..AXES {
                self.encoder[axis] += self.pending[axis];
            }
            self.pending = [0; AXES];
            true
        }

        fn halt(&mut self) -> [i64; AXES] {
            let remaining = if self.is_busy() { self.pending } else { [0; AXES] };
            self.ticks_left = 0;
            self.pending = [0; AXES];
            remaining
        }

        fn encoder_position(&self) -> [i64; AXES] {
            self.encoder
        }
    }

    fn feed(target: [f64; AXES], linenum: u32) -> GState {
        GState {
            linenum,
            target,
            feedrate: 2500.0,
            motion_mode: MotionMode::StraightFeed,
            ..GState::default()
        }
    }

    #[test]
    fn test_randomized_stage_interleaving() {
        let config = MachineConfig::default();
        let axes = AxisSettings::from_axes(&config.axes);
        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let log = Arc::new(Mutex::new(Vec::new()));
            let generator = RecordingGenerator { log: Arc::clone(&log), ..Default::default() };
            let mut mc = MotionController::new(&config, [40.0; AXES], Box::new(generator));

            let targets = [
                [5.0, 0.0, 0.0, 0.0],
                [5.0, 4.0, 0.0, 0.0],
                [1.0, 4.0, 2.0, 0.0],
                [-3.0, -2.0, 2.0, 0.0],
                [0.0, 0.0, 0.0, 0.0],
                [12.5, 7.25, -1.0, 0.0],
            ];
            let mut next = 0;
            for _ in 0..40_000 {
                if next < targets.len() && rng.random_bool(0.001) {
                    mc.plan_line(feed(targets[next], next as u32), &axes).unwrap();
                    next += 1;
                }
                match rng.random_range(0..4) {
                    0 => {
                        let owner = mc.slot_owner();
                        let before = mc.handoff_stats();
                        let result = mc.fire_exec();
                        if owner == SlotOwner::Loader {
                            // never written while the loader holds it
                            assert_eq!(result, Err(MotionError::RuntimeBusy));
                            assert_eq!(mc.handoff_stats().staged, before.staged);
                            assert_eq!(mc.slot_owner(), SlotOwner::Loader);
                        }
                    }
                    1 => {
                        let owner = mc.slot_owner();
                        let before = mc.handoff_stats();
                        let result = mc.fire_load();
                        if owner == SlotOwner::Exec {
                            // never read while Exec holds it
                            assert!(matches!(result, Ok(false) | Err(MotionError::RuntimeBusy)));
                            assert_eq!(mc.handoff_stats().loaded, before.loaded);
                        }
                    }
                    2 => mc.fire_pulse(),
                    _ => mc.tick(),
                }
            }
            for target in targets.iter().enumerate().skip(next) {
                mc.plan_line(feed(*target.1, target.0 as u32), &axes).unwrap();
            }
            mc.request_exec();
            mc.request_load();
            assert!(mc.run_until_idle(10_000_000), "seed {seed} stalled");

            let segments = log.lock().unwrap();
            assert!(segments.windows(2).all(|w| w[1].seq > w[0].seq), "seed {seed}: segment reordered");
            let mut total = [0i64; AXES];
            for segment in segments.iter() {
                for axis in 0..AXES {
                    total[axis] += segment.steps[axis];
                }
            }
            assert_eq!(total, [500, 290, -40, 0], "seed {seed}");
            assert_eq!(mc.encoder_position(), total);
            let stats = mc.handoff_stats();
            assert_eq!(stats.staged, stats.loaded);
        }
    }

    #[test]
    fn test_backpressure_refuses_then_resumes() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        let program: String = (1..=80).map(|i| format!("G1 X{} F4000\n", (i % 2) * 10 + i)).collect();
        controller.load_program(&program);

        // without ticking, dispatch fills the pool down to the reserve and stops
        let mut status = Status::Ok;
        for _ in 0..200 {
            status = controller.step();
            if status == Status::Again {
                break;
            }
        }
        assert_eq!(status, Status::Again);
        let refused_at = controller.lines_dispatched();
        assert!(refused_at < 80);
        assert!(controller.machine().motion().get_available_buffer_count() < config.planner.reserve);

        // completions free slots and dispatch picks up again
        let mut passes = 0;
        while !controller.is_idle() {
            controller.service();
            passes += 1;
            assert!(passes < 2_000_000, "command loop deadlocked");
        }
        assert!(controller.lines_dispatched() > refused_at);
        assert_eq!(controller.lines_dispatched(), 80);
        assert_eq!(controller.program_state(), ProgramState::Finished);
    }
}
