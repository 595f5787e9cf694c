// src/motion/loader.rs - Exec/Load staging slot
//! Single-slot handoff between the Exec and Load stages.
//!
//! The slot holds at most one prepared [`Segment`] and an ownership tag.
//! While the tag says `Exec`, only Exec may write the slot; while it says
//! `Loader`, only Load may read it. Each side writes the tag last, with
//! release ordering, so the other side never sees a half-written segment.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::motion::MotionError;
use crate::motion::runtime::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    Exec,
    Loader,
}

impl SlotOwner {
    fn from_tag(tag: u8) -> Self {
        if tag == LOADER_TAG { SlotOwner::Loader } else { SlotOwner::Exec }
    }
}

const EXEC_TAG: u8 = 0;
const LOADER_TAG: u8 = 1;

/// Counters for handoff activity, useful when chasing a stalled pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    pub staged: u64,
    pub loaded: u64,
    /// Exec fired while Load still owned the slot.
    pub exec_deferred: u64,
    /// Load fired with nothing staged or with the generator busy.
    pub load_deferred: u64,
}

#[derive(Debug)]
pub struct StagingSlot {
    owner: AtomicU8,
    segment: Option<Segment>,
    stats: HandoffStats,
}

impl Default for StagingSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingSlot {
    pub fn new() -> Self {
        Self {
            owner: AtomicU8::new(EXEC_TAG),
            segment: None,
            stats: HandoffStats::default(),
        }
    }

    pub fn owner(&self) -> SlotOwner {
        SlotOwner::from_tag(self.owner.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> HandoffStats {
        self.stats
    }

    /// Segment waiting for Load, if any.
    pub fn staged(&self) -> Option<&Segment> {
        match self.owner() {
            SlotOwner::Loader => self.segment.as_ref(),
            SlotOwner::Exec => None,
        }
    }

    /// Exec side: true if the slot may be written. Counts a deferral otherwise.
    pub fn claim_for_exec(&mut self) -> bool {
        if self.owner() == SlotOwner::Exec {
            return true;
        }
        self.stats.exec_deferred += 1;
        false
    }

    /// Load fired but could not proceed.
    pub fn defer_load(&mut self) {
        self.stats.load_deferred += 1;
    }

    /// Exec side: write a segment and pass the slot to Load.
    pub fn stage(&mut self, segment: Segment) -> Result<(), MotionError> {
        if !self.claim_for_exec() {
            return Err(MotionError::RuntimeBusy);
        }
        self.segment = Some(segment);
        self.stats.staged += 1;
        self.owner.store(LOADER_TAG, Ordering::Release);
        Ok(())
    }

    /// Load side: read the staged segment. The slot stays with Load until
    /// [`release_to_exec`](Self::release_to_exec).
    pub fn take(&mut self) -> Option<Segment> {
        if self.owner() != SlotOwner::Loader {
            self.defer_load();
            return None;
        }
        let segment = self.segment.take();
        if segment.is_some() {
            self.stats.loaded += 1;
        }
        segment
    }

    /// Put back a segment Load could not program (generator still busy).
    pub fn restore(&mut self, segment: Segment) {
        if self.owner() == SlotOwner::Loader && self.segment.is_none() {
            self.segment = Some(segment);
            self.stats.loaded -= 1;
        }
    }

    /// Load side: the segment is programmed, Exec may prepare the next one.
    pub fn release_to_exec(&mut self) {
        if self.owner() == SlotOwner::Loader {
            self.segment = None;
            self.owner.store(EXEC_TAG, Ordering::Release);
        }
    }

    /// Hard-stop path: drop whatever is staged and return the slot to Exec.
    pub fn reset(&mut self) -> Option<Segment> {
        let dropped = self.segment.take();
        self.owner.store(EXEC_TAG, Ordering::Release);
        dropped
    }
}
