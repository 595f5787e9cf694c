// src/motion/planner.rs - Lookahead velocity planner
//! Admits moves into the buffer pool and replans the run of blocks whose
//! exit velocity can still improve.
//!
//! Replanning is a single backward pass (propagating braking velocities
//! from the newest block) followed by a single forward pass (assigning
//! entry, cruise and exit velocities). There is no iteration to a fixed
//! point; a block whose exit ties one of its hard bounds is committed and
//! never visited again.

use crate::config::PlannerConfig;
use crate::machine::axis::{AxisSettings, junction_deviations};
use crate::machine::gstate::{FeedRateMode, GState, MotionMode, PathControl};
use crate::motion::buffer::{BlockId, BlockKind, MoveBufferPool, SyncCommand};
use crate::motion::jerk::{delta_vmax, motion_jerk};
use crate::motion::junction::{JUNCTION_UNCONSTRAINED, junction_vmax};
use crate::motion::profile::plan_profile;
use crate::motion::{
    AXES, AxisVector, MotionError, Planned, fp_eq, fp_zero, minutes_to_usec, usec_to_minutes,
};

#[derive(Debug)]
pub struct Planner {
    pool: MoveBufferPool,
    /// End point of the last queued move.
    position: AxisVector,
    junction_acceleration: f64,
    /// Minutes.
    min_block_time: f64,
}

impl Planner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            pool: MoveBufferPool::new(config.pool_size),
            position: [0.0; AXES],
            junction_acceleration: config.junction_acceleration,
            min_block_time: usec_to_minutes(config.min_block_time_us),
        }
    }

    pub fn pool(&self) -> &MoveBufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut MoveBufferPool {
        &mut self.pool
    }

    pub fn position(&self) -> &AxisVector {
        &self.position
    }

    pub fn set_position(&mut self, axis: usize, position: f64) {
        self.position[axis] = position;
    }

    /// Queue a straight line from the planner position to `gm.target`.
    pub fn plan_line(
        &mut self,
        mut gm: GState,
        axes: &[AxisSettings; AXES],
    ) -> Result<Planned, MotionError> {
        let mut axis_length = [0.0; AXES];
        for i in 0..AXES {
            axis_length[i] = gm.target[i] - self.position[i];
        }
        let length_square: f64 = axis_length.iter().map(|d| d * d).sum();
        let length = length_square.sqrt();
        if fp_zero(length) {
            tracing::debug!("Line {}: zero length move, nothing queued", gm.linenum);
            return Ok(Planned::ZeroLengthMove);
        }
        let length_sqr_cbrt = length_square.cbrt();
        let unit: AxisVector = std::array::from_fn(|i| axis_length[i] / length);

        let move_time = calc_move_time(&mut gm, length, &axis_length, axes);
        if !move_time.is_finite() || move_time <= 0.0 {
            return Err(MotionError::NonFiniteVelocity);
        }

        let jerk = motion_jerk(&unit, axes);
        let jerk_cbrt = jerk.cbrt();

        if move_time < self.min_block_time {
            // Best case: the move enters at whatever the newest block could still reach
            let delta_velocity = delta_vmax(length_sqr_cbrt, jerk_cbrt);
            let entry_velocity = match self.pool.latest_queued() {
                Some(id) => {
                    let latest = self.pool.get(id);
                    if latest.replanned {
                        latest.entry_velocity + latest.delta_vmax
                    } else {
                        latest.exit_velocity
                    }
                }
                None => 0.0,
            };
            let estimate = (2.0 * length) / (2.0 * entry_velocity + delta_velocity);
            if !estimate.is_finite() {
                return Err(MotionError::NonFiniteVelocity);
            }
            if estimate < self.min_block_time {
                tracing::debug!(
                    "Line {}: rejected, {:.1}us below block floor",
                    gm.linenum,
                    minutes_to_usec(estimate)
                );
                return Err(MotionError::MoveTooShort {
                    estimated_us: minutes_to_usec(estimate),
                    floor_us: minutes_to_usec(self.min_block_time),
                });
            }
        }

        let id = self.pool.allocate_write_buffer().ok_or(MotionError::BufferFull)?;
        let pv = self.pool.prev_of(id);
        let predecessor_unit = {
            let prev = self.pool.get(pv);
            (prev.is_live() && prev.is_line()).then_some(prev.unit)
        };

        let exact_stop = gm.path_control == PathControl::ExactStop;
        let junction_velocity = match predecessor_unit {
            Some(prev_unit) => junction_vmax(
                &prev_unit,
                &unit,
                &junction_deviations(axes),
                self.junction_acceleration,
            ),
            // nothing moving into this block, it starts from rest
            None => 0.0,
        };
        let stop_velocity = if exact_stop { 0.0 } else { JUNCTION_UNCONSTRAINED };

        {
            let bf = self.pool.get_mut(id);
            bf.kind = BlockKind::Line;
            bf.gm = gm;
            bf.move_time = move_time;
            bf.unit = unit;
            bf.length = length;
            bf.length_sqr_cbrt = length_sqr_cbrt;
            bf.jerk = jerk;
            bf.jerk_cbrt = jerk_cbrt;
            bf.exact_stop = exact_stop;
            bf.replanned = !exact_stop;

            bf.cruise_vmax = length / move_time;
            bf.entry_vmax = bf.cruise_vmax.min(stop_velocity).min(junction_velocity);
            bf.delta_vmax = delta_vmax(length_sqr_cbrt, jerk_cbrt);
            bf.exit_vmax = (bf.entry_vmax + bf.delta_vmax).min(stop_velocity).min(bf.cruise_vmax);
            bf.braking_velocity = bf.delta_vmax;
        }
        self.pool.commit(id);
        self.plan_block_list(id);
        self.position = gm.target;

        let bf = self.pool.get(id);
        tracing::debug!(
            "Line {}: queued {:.3}mm, entry_vmax {:.1} cruise_vmax {:.1} delta_vmax {:.1}",
            gm.linenum,
            length,
            bf.entry_vmax,
            bf.cruise_vmax,
            bf.delta_vmax
        );
        Ok(Planned::Queued(id))
    }

    /// Queue a pause of `seconds`. The machine comes to rest before it.
    pub fn queue_dwell(&mut self, seconds: f64, gm: GState) -> Result<BlockId, MotionError> {
        self.queue_stop_block(BlockKind::Dwell { minutes: seconds / 60.0 }, gm)
    }

    /// Queue a command that runs in order with motion.
    pub fn queue_command(&mut self, command: SyncCommand, gm: GState) -> Result<BlockId, MotionError> {
        self.queue_stop_block(BlockKind::Command(command), gm)
    }

    fn queue_stop_block(&mut self, kind: BlockKind, mut gm: GState) -> Result<BlockId, MotionError> {
        let id = self.pool.allocate_write_buffer().ok_or(MotionError::BufferFull)?;
        gm.target = self.position;
        let block = self.pool.get_mut(id);
        block.kind = kind;
        block.gm = gm;
        block.exact_stop = true;
        block.replanned = false;
        self.pool.commit(id);
        Ok(id)
    }

    /// Backward pass from `bf` over still-replannable blocks, then a forward
    /// pass back up to `bf`, which always ends at rest.
    fn plan_block_list(&mut self, bf: BlockId) {
        let mut bp = bf;
        loop {
            bp = self.pool.prev_of(bp);
            if bp == bf {
                break;
            }
            let block = self.pool.get(bp);
            if !block.replanned || !block.is_live() {
                break;
            }
            let delta = block.delta_vmax;
            let nx = self.pool.get(self.pool.next_of(bp));
            let braking = nx.braking_velocity.min(nx.entry_vmax) + delta;
            self.pool.get_mut(bp).braking_velocity = braking;
        }

        loop {
            bp = self.pool.next_of(bp);
            if bp == bf {
                break;
            }
            let (entry, pv_replanned) = self.predecessor_exit(bp);
            let nx = self.pool.get(self.pool.next_of(bp));
            let (nx_entry_vmax, nx_braking) = (nx.entry_vmax, nx.braking_velocity);

            let block = self.pool.get_mut(bp);
            block.entry_velocity = entry;
            block.cruise_velocity = block.cruise_vmax;
            block.exit_velocity = block
                .exit_vmax
                .min(entry + block.delta_vmax)
                .min(nx_entry_vmax)
                .min(nx_braking);
            apply_profile(block);

            if fp_eq(block.exit_velocity, block.exit_vmax)
                || fp_eq(block.exit_velocity, nx_entry_vmax)
                || (!pv_replanned && fp_eq(block.exit_velocity, entry + block.delta_vmax))
            {
                block.replanned = false;
            }
        }

        let (entry, _) = self.predecessor_exit(bf);
        let block = self.pool.get_mut(bf);
        block.entry_velocity = entry;
        block.cruise_velocity = block.cruise_vmax;
        block.exit_velocity = 0.0;
        apply_profile(block);
    }

    /// Exit velocity of the block before `id` and whether it is still
    /// replannable. A free slot means the predecessor was already released,
    /// so the block enters at whatever that block left with.
    fn predecessor_exit(&self, id: BlockId) -> (f64, bool) {
        let pv = self.pool.get(self.pool.prev_of(id));
        if pv.is_live() {
            (pv.exit_velocity, pv.replanned)
        } else {
            (self.pool.released_exit_velocity(), false)
        }
    }
}

fn apply_profile(block: &mut crate::motion::buffer::MoveBlock) {
    let profile = plan_profile(
        block.length,
        block.entry_velocity,
        block.cruise_velocity,
        block.exit_velocity,
        block.jerk,
    );
    block.head_length = profile.head_length;
    block.body_length = profile.body_length;
    block.tail_length = profile.tail_length;
    block.cruise_velocity = profile.cruise_velocity;
}

/// Time the move needs at the commanded (or traverse) rate, limited by the
/// slowest participating axis. Inverse-time feed is consumed here.
fn calc_move_time(
    gm: &mut GState,
    length: f64,
    axis_length: &AxisVector,
    axes: &[AxisSettings; AXES],
) -> f64 {
    let traverse = gm.motion_mode == MotionMode::StraightTraverse;
    let mut xyz_time = 0.0;
    if !traverse {
        if gm.feedrate_mode == FeedRateMode::InverseTime {
            xyz_time = gm.feedrate;
            gm.feedrate_mode = FeedRateMode::UnitsPerMinute;
        } else {
            xyz_time = length / gm.feedrate;
        }
    }
    let mut max_time: f64 = 0.0;
    for (delta, axis) in axis_length.iter().zip(axes.iter()) {
        let limit = if traverse { axis.max_velocity } else { axis.max_feedrate };
        max_time = max_time.max(delta.abs() / limit);
    }
    max_time.max(xyz_time)
}
