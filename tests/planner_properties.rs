// Planner and pool properties checked over whole move streams

#[cfg(test)]
mod tests {
    use cnc_motion::config::{MachineConfig, PlannerConfig};
    use cnc_motion::hardware::SimulatedDda;
    use cnc_motion::machine::axis::AxisSettings;
    use cnc_motion::machine::gstate::{GState, MotionMode};
    use cnc_motion::motion::junction::{JUNCTION_UNCONSTRAINED, junction_vmax};
    use cnc_motion::motion::planner::Planner;
    use cnc_motion::motion::{
        AXES, AxisVector, JERK_MULTIPLIER, MotionController, MoveBufferPool, Planned, RuntimeEvent,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn axes() -> [AxisSettings; AXES] {
        AxisSettings::from_axes(&MachineConfig::default().axes)
    }

    fn feed(target: AxisVector, feedrate: f64, linenum: u32) -> GState {
        GState {
            linenum,
            target,
            feedrate,
            motion_mode: MotionMode::StraightFeed,
            ..GState::default()
        }
    }

    fn controller() -> MotionController {
        let config = MachineConfig::default();
        MotionController::new(&config, [40.0; AXES], Box::new(SimulatedDda::new()))
    }

    fn assert_capacity(pool: &MoveBufferPool) {
        let running = usize::from(pool.is_run_active());
        assert_eq!(
            pool.available_count() + pool.queued_count() + running,
            pool.capacity(),
            "available {} queued {} running {}",
            pool.available_count(),
            pool.queued_count(),
            running
        );
    }

    fn random_target(rng: &mut StdRng, from: &AxisVector) -> AxisVector {
        let mut target = *from;
        for value in target.iter_mut().take(3) {
            if rng.random_bool(0.6) {
                let step: f64 = rng.random_range(1.0..15.0);
                *value += if rng.random_bool(0.5) { step } else { -step };
            }
        }
        if target == *from {
            target[0] += 5.0;
        }
        target
    }

    /// L^(2/3) * J^(1/3) with J the tightest axis limit projected on the path.
    fn expected_delta_vmax(length: f64, unit: &AxisVector, axes: &[AxisSettings; AXES]) -> f64 {
        let jerk = unit
            .iter()
            .zip(axes.iter())
            .filter(|(u, _)| u.abs() > 1e-6)
            .map(|(u, axis)| axis.max_jerk * JERK_MULTIPLIER / u.abs())
            .fold(f64::INFINITY, f64::min);
        (length * length).cbrt() * jerk.cbrt()
    }

    #[test]
    fn test_capacity_invariant_under_random_stream() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut mc = controller();
        let axes = axes();
        let mut target = [0.0; AXES];
        let mut queued = 0;
        assert_capacity(mc.pool());
        while queued < 120 {
            if mc.get_available_buffer_count() > 4 && rng.random_bool(0.5) {
                target = random_target(&mut rng, &target);
                let feedrate = rng.random_range(500.0..4000.0);
                mc.plan_line(feed(target, feedrate, queued), &axes).unwrap();
                queued += 1;
            } else {
                for _ in 0..rng.random_range(1..2_000) {
                    mc.tick();
                }
            }
            assert_capacity(mc.pool());
        }
        assert!(mc.run_until_idle(50_000_000));
        assert_capacity(mc.pool());
        assert_eq!(mc.get_available_buffer_count(), mc.pool().capacity());
    }

    #[test]
    fn test_blocks_complete_in_submission_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut mc = controller();
        let axes = axes();
        let mut target = [0.0; AXES];
        let mut completed = Vec::new();
        for line in 1..=60 {
            while mc.get_available_buffer_count() <= 4 {
                mc.tick();
            }
            target = random_target(&mut rng, &target);
            mc.plan_line(feed(target, 3000.0, line), &axes).unwrap();
            for _ in 0..rng.random_range(0..500) {
                mc.tick();
            }
            completed.extend(mc.take_events());
        }
        assert!(mc.run_until_idle(50_000_000));
        completed.extend(mc.take_events());

        let lines: Vec<u32> = completed
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::BlockCompleted { line, .. } => Some(*line),
                _ => None,
            })
            .collect();
        assert_eq!(lines, (1..=60).collect::<Vec<_>>());
        let sequences: Vec<u64> = completed
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::BlockCompleted { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_entry_follows_released_predecessor() {
        let mut mc = controller();
        let axes = axes();
        let Planned::Queued(a) = mc.plan_line(feed([10.0, 0.0, 0.0, 0.0], 1500.0, 1), &axes).unwrap() else {
            panic!("first move not queued");
        };
        let Planned::Queued(b) = mc.plan_line(feed([20.0, 0.0, 0.0, 0.0], 1500.0, 2), &axes).unwrap() else {
            panic!("second move not queued");
        };
        let a_exit = mc.pool().get(a).exit_velocity;
        assert!(a_exit > 0.0);

        // run until the first block is released but the second is not picked up yet
        let mut started = false;
        let mut caught = false;
        for _ in 0..1_000_000 {
            mc.tick();
            started |= mc.pool().is_run_active();
            if started && !mc.pool().is_run_active() && mc.pool().queued_count() == 1 {
                caught = true;
                break;
            }
        }
        assert!(caught, "never saw the gap between blocks");
        assert!(mc.pool().get(b).replanned);

        mc.plan_line(feed([30.0, 0.0, 0.0, 0.0], 1500.0, 3), &axes).unwrap();
        let second = mc.pool().get(b);
        assert!(
            (second.entry_velocity - a_exit).abs() < 1e-9,
            "entry {} != previous exit {}",
            second.entry_velocity,
            a_exit
        );
        assert!(mc.run_until_idle(10_000_000));
    }

    #[test]
    fn test_velocity_continuous_across_executed_stream() {
        let mut rng = StdRng::seed_from_u64(0xc0ffee);
        let mut mc = controller();
        let axes = axes();
        let mut target = [0.0; AXES];
        let mut events = Vec::new();
        for line in 1..=150 {
            while mc.get_available_buffer_count() <= 4 {
                mc.tick();
            }
            target = random_target(&mut rng, &target);
            let feedrate = rng.random_range(500.0..4000.0);
            mc.plan_line(feed(target, feedrate, line), &axes).unwrap();
            for _ in 0..rng.random_range(0..3_000) {
                mc.tick();
            }
            events.extend(mc.take_events());
        }
        assert!(mc.run_until_idle(50_000_000));
        events.extend(mc.take_events());

        let executed: Vec<(u32, f64, f64)> = events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::BlockCompleted { line, entry_velocity, exit_velocity, .. } => {
                    Some((*line, *entry_velocity, *exit_velocity))
                }
                _ => None,
            })
            .collect();
        assert_eq!(executed.len(), 150);
        assert_eq!(executed[0].1, 0.0);
        assert_eq!(executed[149].2, 0.0);
        for pair in executed.windows(2) {
            let (prev_line, _, prev_exit) = pair[0];
            let (line, entry, _) = pair[1];
            assert!(
                (entry - prev_exit).abs() < 1e-6,
                "line {line} entered at {entry}, line {prev_line} left at {prev_exit}"
            );
        }
    }

    #[test]
    fn test_velocity_changes_respect_jerk_bound() {
        let mut rng = StdRng::seed_from_u64(42);
        let axes = axes();
        for _ in 0..20 {
            let mut planner = Planner::new(&PlannerConfig::default());
            let mut target = [0.0; AXES];
            for line in 0..20 {
                target = random_target(&mut rng, &target);
                let feedrate = rng.random_range(200.0..5000.0);
                planner.plan_line(feed(target, feedrate, line), &axes).unwrap();
            }
            for block in planner.pool().iter_live() {
                let delta = expected_delta_vmax(block.length, &block.unit, &axes);
                let tolerance = 1e-6 * delta.max(1.0);
                assert!((block.delta_vmax - delta).abs() < tolerance);
                assert!(
                    (block.exit_velocity - block.entry_velocity).abs() <= delta + tolerance,
                    "line {}: entry {} exit {} delta {}",
                    block.gm.linenum,
                    block.entry_velocity,
                    block.exit_velocity,
                    delta
                );
                assert!(block.entry_velocity <= block.entry_vmax + tolerance);
                assert!(block.exit_velocity <= block.exit_vmax + tolerance);
                assert!(block.cruise_velocity <= block.cruise_vmax + tolerance);
            }
        }
    }

    #[test]
    fn test_junction_limits() {
        let deviation = [0.05; AXES];
        let x = [1.0, 0.0, 0.0, 0.0];
        let minus_x = [-1.0, 0.0, 0.0, 0.0];
        let y = [0.0, 1.0, 0.0, 0.0];

        assert!(junction_vmax(&x, &x, &deviation, 20_000.0) >= JUNCTION_UNCONSTRAINED);
        assert_eq!(junction_vmax(&x, &minus_x, &deviation, 20_000.0), 0.0);

        // 90 degree corner: sin(theta/2) = sqrt(1/2)
        let s = 0.5_f64.sqrt();
        let radius = 0.05 * s / (1.0 - s);
        let expected = (radius * 20_000.0).sqrt();
        assert!((junction_vmax(&x, &y, &deviation, 20_000.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_length_move_leaves_queue_alone() {
        let mut mc = controller();
        let axes = axes();
        mc.plan_line(feed([10.0, 0.0, 0.0, 0.0], 1000.0, 1), &axes).unwrap();
        let available = mc.get_available_buffer_count();
        let queued = mc.pool().queued_count();
        let planned = mc.plan_line(feed([10.0, 0.0, 0.0, 0.0], 1000.0, 2), &axes);
        assert_eq!(planned, Ok(Planned::ZeroLengthMove));
        assert_eq!(mc.get_available_buffer_count(), available);
        assert_eq!(mc.pool().queued_count(), queued);
        assert_eq!(mc.planner_position()[0], 10.0);
    }

    #[test]
    fn test_three_colinear_moves_cruise_through() {
        let mut planner = Planner::new(&PlannerConfig::default());
        let axes = axes();
        for (line, x) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            planner.plan_line(feed([x, 0.0, 0.0, 0.0], 1000.0, line as u32), &axes).unwrap();
        }
        let blocks: Vec<_> = planner.pool().iter_live().collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].entry_velocity, 0.0);
        let middle = blocks[1];
        assert!((middle.entry_velocity - 1000.0).abs() < 1e-6);
        assert!((middle.cruise_velocity - 1000.0).abs() < 1e-6);
        assert!((middle.exit_velocity - 1000.0).abs() < 1e-6);
        assert!((middle.body_length - middle.length).abs() < 1e-6);
        assert_eq!(blocks[2].exit_velocity, 0.0);
    }
}
