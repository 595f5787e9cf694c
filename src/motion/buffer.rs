// src/motion/buffer.rs - Move buffer pool
//! Fixed-capacity ring of move blocks.
//!
//! Slots live in an arena and are addressed by [`BlockId`]; ring links are
//! index arithmetic, so a released slot can be reused without leaving a
//! dangling reference behind. The pool always keeps one slot free so the
//! write cursor never lands on the run cursor.

use crate::machine::gstate::GState;
use crate::motion::{AXES, AxisVector};

/// Slots the pool itself refuses to hand out.
pub const POOL_GUARD_SLOTS: usize = 1;

/// Handle to a slot in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    #[default]
    Empty,
    /// Allocated, being filled by the planner.
    Loading,
    Queued,
    /// Owned by the execution pipeline.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    ProgramStop,
    ProgramEnd,
    /// Reports back when the runtime reaches this point of the queue.
    Marker(u32),
}

/// What the runtime does when the block reaches the run cursor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BlockKind {
    #[default]
    Line,
    Dwell { minutes: f64 },
    Command(SyncCommand),
}

#[derive(Debug, Clone, Default)]
pub struct MoveBlock {
    pub state: BufferState,
    pub kind: BlockKind,
    /// Submission order, monotonically increasing across the pool lifetime.
    pub sequence: u64,
    /// Machine model snapshot taken when the block was queued.
    pub gm: GState,
    pub move_time: f64,

    pub unit: AxisVector,
    pub length: f64,
    pub length_sqr_cbrt: f64,
    pub jerk: f64,
    pub jerk_cbrt: f64,

    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    pub delta_vmax: f64,
    pub braking_velocity: f64,

    /// True while lookahead may still raise this block's exit velocity.
    pub replanned: bool,
    pub exact_stop: bool,
}

impl MoveBlock {
    /// Queued or running; anything the planner may read as a neighbour.
    pub fn is_live(&self) -> bool {
        matches!(self.state, BufferState::Queued | BufferState::Running)
    }

    pub fn is_line(&self) -> bool {
        matches!(self.kind, BlockKind::Line)
    }

    pub fn target(&self) -> &[f64; AXES] {
        &self.gm.target
    }
}

#[derive(Debug)]
pub struct MoveBufferPool {
    slots: Vec<MoveBlock>,
    write: usize,
    run: usize,
    available: usize,
    next_sequence: u64,
    /// Exit velocity of the block most recently released from the run cursor.
    released_exit: f64,
}

impl MoveBufferPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(POOL_GUARD_SLOTS + 1);
        Self {
            slots: vec![MoveBlock::default(); capacity],
            write: 0,
            run: 0,
            available: capacity,
            next_sequence: 0,
            released_exit: 0.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available_count(&self) -> usize {
        self.available
    }

    /// Blocks committed or being filled that have not reached the run cursor.
    pub fn queued_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|b| matches!(b.state, BufferState::Queued | BufferState::Loading))
            .count()
    }

    pub fn is_run_active(&self) -> bool {
        self.slots[self.run].state == BufferState::Running
    }

    pub fn next_of(&self, id: BlockId) -> BlockId {
        BlockId((id.0 + 1) % self.slots.len())
    }

    pub fn prev_of(&self, id: BlockId) -> BlockId {
        BlockId((id.0 + self.slots.len() - 1) % self.slots.len())
    }

    pub fn get(&self, id: BlockId) -> &MoveBlock {
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut MoveBlock {
        &mut self.slots[id.0]
    }

    /// Claim the slot under the write cursor. The cursor itself only moves on
    /// [`commit`](Self::commit).
    pub fn allocate_write_buffer(&mut self) -> Option<BlockId> {
        if self.available <= POOL_GUARD_SLOTS {
            return None;
        }
        let slot = &mut self.slots[self.write];
        if slot.state != BufferState::Empty {
            return None;
        }
        *slot = MoveBlock {
            state: BufferState::Loading,
            ..MoveBlock::default()
        };
        self.available -= 1;
        Some(BlockId(self.write))
    }

    /// Publish the block under the write cursor and advance the cursor.
    pub fn commit(&mut self, id: BlockId) {
        debug_assert_eq!(id.0, self.write, "commit out of ring order");
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let block = &mut self.slots[id.0];
        block.state = BufferState::Queued;
        block.sequence = sequence;
        self.write = (self.write + 1) % self.slots.len();
    }

    /// Block under the run cursor, promoting it to `Running` if it was queued.
    pub fn run_buffer(&mut self) -> Option<BlockId> {
        let slot = &mut self.slots[self.run];
        match slot.state {
            BufferState::Queued => {
                slot.state = BufferState::Running;
                Some(BlockId(self.run))
            }
            BufferState::Running => Some(BlockId(self.run)),
            BufferState::Empty | BufferState::Loading => None,
        }
    }

    /// Velocity the machine carries into the block under the run cursor
    /// once its predecessor has been released.
    pub fn released_exit_velocity(&self) -> f64 {
        self.released_exit
    }

    /// Return the running block to the free pool and advance the run cursor.
    pub fn release_run_buffer(&mut self) -> Option<BlockId> {
        if self.slots[self.run].state != BufferState::Running {
            return None;
        }
        let released = BlockId(self.run);
        self.released_exit = self.slots[self.run].exit_velocity;
        self.slots[self.run] = MoveBlock::default();
        self.available += 1;
        self.run = (self.run + 1) % self.slots.len();
        Some(released)
    }

    /// Most recently committed block that is still live.
    pub fn latest_queued(&self) -> Option<BlockId> {
        let id = self.prev_of(BlockId(self.write));
        self.get(id).is_live().then_some(id)
    }

    /// Drop every queued block. Only valid while nothing is running.
    pub fn flush(&mut self) -> usize {
        let mut dropped = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot.state, BufferState::Queued | BufferState::Loading) {
                *slot = MoveBlock::default();
                dropped += 1;
            }
        }
        self.available += dropped;
        self.released_exit = 0.0;
        self.write = if self.is_run_active() {
            (self.run + 1) % self.slots.len()
        } else {
            self.run
        };
        dropped
    }

    /// Hard-stop path: every slot back to empty, no completion logic.
    pub fn release_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = MoveBlock::default();
        }
        self.write = 0;
        self.run = 0;
        self.available = self.slots.len();
        self.released_exit = 0.0;
    }

    /// Live blocks from the run cursor forward, in execution order.
    pub fn iter_live(&self) -> impl Iterator<Item = &MoveBlock> + '_ {
        let n = self.slots.len();
        (0..n)
            .map(move |i| &self.slots[(self.run + i) % n])
            .take_while(|b| b.is_live())
    }
}
