//! # Static Control Block Pool
//!
//! A fixed set of control blocks reserved once, when the service is first
//! used, so creating a timer does not have to go through the allocator.
//! Exhaustion is not an error: `acquire` returns `None` and the caller falls
//! back to the heap.
//!
//! A slot only goes back to the pool with a [`Quiescent`] proof, which can
//! only be produced for a slot that is out of the registry and not being
//! dispatched. No work queue job can reach a released slot.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::block::{ControlBlock, TimerCallback};
use tempo_workqueue::JobHandle;

// =============================================================================
// Slots
// =============================================================================

/// Lifecycle of a control block slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Free
    Vacant,
    /// Lent out, block not registered yet
    Reserved,
    /// Registered, reachable through its handle and its job
    Linked,
    /// Removed from the registry while the dispatcher still runs it
    Detached,
}

/// Proof that nothing in flight references a slot
#[derive(Debug)]
pub(crate) struct Quiescent {
    _private: (),
}

/// One control block slot
#[derive(Debug)]
pub(crate) struct Slot {
    pub generation: u32,
    pub state: SlotState,
    /// The dispatcher is running this slot's timer
    pub firing: bool,
    pub block: Option<Box<ControlBlock>>,
}

impl Slot {
    pub const VACANT: Slot = Slot {
        generation: 0,
        state: SlotState::Vacant,
        firing: false,
        block: None,
    };

    pub fn block(&self) -> Option<&ControlBlock> {
        self.block.as_deref()
    }

    pub fn block_mut(&mut self) -> Option<&mut ControlBlock> {
        self.block.as_deref_mut()
    }

    pub fn is_linked(&self) -> bool {
        self.state == SlotState::Linked
    }

    /// Prove the slot can be reused
    pub fn quiesce(&self) -> Option<Quiescent> {
        match self.state {
            SlotState::Reserved => Some(Quiescent { _private: () }),
            SlotState::Detached if !self.firing => Some(Quiescent { _private: () }),
            _ => None,
        }
    }

    /// Mark the slot free, invalidating every handle to it
    pub fn retire(&mut self, _proof: Quiescent) {
        self.state = SlotState::Vacant;
        self.firing = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// What a released slot hands back, to be dropped outside the critical section
#[derive(Debug)]
pub(crate) struct Released {
    /// Job record to return to the engine, `None` if never registered
    pub job: Option<JobHandle>,
    pub callback: Option<TimerCallback>,
    /// Heap blocks go back to the allocator
    pub block: Option<Box<ControlBlock>>,
}

// =============================================================================
// Static Pool
// =============================================================================

/// Fixed-capacity pool of pre-allocated control blocks
#[derive(Debug)]
pub(crate) struct StaticPool {
    slots: Vec<Slot>,
}

impl StaticPool {
    /// Reserve `capacity` control blocks
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                block: Some(Box::new(ControlBlock::vacant())),
                ..Slot::VACANT
            })
            .collect();
        Self { slots }
    }

    /// Lend a free slot
    pub fn acquire(&mut self) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|s| s.state == SlotState::Vacant)?;
        self.slots[index].state = SlotState::Reserved;
        Some(index)
    }

    /// Return a slot, keeping its block reserved
    pub fn release(&mut self, index: usize, proof: Quiescent) -> Released {
        let slot = &mut self.slots[index];
        let registered = slot.state == SlotState::Detached;
        slot.retire(proof);

        let mut released = Released {
            job: None,
            callback: None,
            block: None,
        };
        if let Some(block) = slot.block_mut() {
            if registered {
                released.job = Some(block.job);
            }
            released.callback = block.callback.take();
            block.clear();
        }
        released
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    pub fn slots(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots.iter().enumerate()
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Vacant)
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
