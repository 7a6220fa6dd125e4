//! # Timer Registry
//!
//! Arena of control block slots addressed by generation-checked handles.
//! Slots `0..pool_capacity` are the static pool, the rest are heap blocks.
//! The registry's only query besides handle lookup is the reverse mapping
//! from a fired job back to the timer that armed it.
//!
//! Every method here runs inside the service's critical section and must
//! stay short: no engine calls, no blocking, and no allocation except the
//! occasional growth of the heap slot table on `reserve_heap`.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use tempo_workqueue::JobHandle;

use crate::block::{ControlBlock, TimerHandle};
use crate::pool::{Released, Slot, SlotState, StaticPool};

/// A lent control block not yet registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reservation {
    /// Pool slot index
    Pool(usize),
    /// One unit of the heap budget
    Heap,
}

/// Outcome of removing a timer from the registry
#[derive(Debug)]
pub(crate) enum Unlinked {
    /// Slot released, resources to drop outside the critical section
    Released(Released),
    /// The dispatcher still runs the timer and releases it when done
    Deferred,
}

/// Registry of live control blocks
#[derive(Debug)]
pub(crate) struct Registry {
    pool: StaticPool,
    heap: Vec<Slot>,
    heap_free: Vec<u32>,
    /// Heap blocks reserved or in use
    heap_live: usize,
    heap_limit: usize,
    linked: usize,
}

impl Registry {
    pub fn new(pool_capacity: usize, heap_limit: usize, heap_reserve: usize) -> Self {
        Self {
            pool: StaticPool::new(pool_capacity),
            heap: Vec::with_capacity(heap_reserve.min(heap_limit)),
            heap_free: Vec::new(),
            heap_live: 0,
            heap_limit,
            linked: 0,
        }
    }

    /// Registered timers
    pub fn len(&self) -> usize {
        self.linked
    }

    pub fn pool_available(&self) -> usize {
        self.pool.available()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn heap_live(&self) -> usize {
        self.heap_live
    }

    // =========================================================================
    // Slot Access
    // =========================================================================

    fn slot(&self, handle: TimerHandle) -> Option<&Slot> {
        let index = handle.index as usize;
        let slot = match index.checked_sub(self.pool.capacity()) {
            None => self.pool.slot(index)?,
            Some(heap_index) => self.heap.get(heap_index)?,
        };
        (slot.generation == handle.generation && slot.state != SlotState::Vacant).then_some(slot)
    }

    fn slot_mut(&mut self, handle: TimerHandle) -> Option<&mut Slot> {
        let index = handle.index as usize;
        let slot = match index.checked_sub(self.pool.capacity()) {
            None => self.pool.slot_mut(index)?,
            Some(heap_index) => self.heap.get_mut(heap_index)?,
        };
        (slot.generation == handle.generation && slot.state != SlotState::Vacant).then_some(slot)
    }

    /// Registered block behind `handle`
    pub fn get(&self, handle: TimerHandle) -> Option<&ControlBlock> {
        self.slot(handle)
            .filter(|s| s.is_linked())
            .and_then(Slot::block)
    }

    pub fn get_mut(&mut self, handle: TimerHandle) -> Option<&mut ControlBlock> {
        self.slot_mut(handle)
            .filter(|s| s.is_linked())
            .and_then(Slot::block_mut)
    }

    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Timer whose block owns `job`
    pub fn find_by_job(&self, job: JobHandle) -> Option<TimerHandle> {
        let owns = |slot: &Slot| slot.is_linked() && slot.block().is_some_and(|b| b.job == job);

        if let Some((index, slot)) = self.pool.slots().find(|(_, s)| owns(*s)) {
            return Some(TimerHandle::new(index as u32, slot.generation));
        }

        let base = self.pool.capacity();
        self.heap
            .iter()
            .enumerate()
            .find(|(_, s)| owns(*s))
            .map(|(i, s)| TimerHandle::new((base + i) as u32, s.generation))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Lend a pool slot
    pub fn acquire_pool(&mut self) -> Option<Reservation> {
        self.pool.acquire().map(Reservation::Pool)
    }

    /// Take one unit of the heap budget and make room for its slot
    pub fn reserve_heap(&mut self) -> Option<Reservation> {
        if self.heap_live >= self.heap_limit {
            return None;
        }
        self.heap_live += 1;

        let occupied = self.heap.len() - self.heap_free.len();
        let unlinked = self.heap_live - occupied;
        let extra = unlinked.saturating_sub(self.heap_free.len());
        if self.heap.try_reserve(extra).is_err() {
            self.heap_live -= 1;
            return None;
        }
        Some(Reservation::Heap)
    }

    /// Give back a reservation that was never linked
    pub fn abandon(&mut self, reservation: Reservation) {
        match reservation {
            Reservation::Pool(index) => {
                if let Some(proof) = self.pool.slot(index).and_then(Slot::quiesce) {
                    self.pool.release(index, proof);
                }
            },
            Reservation::Heap => self.heap_live -= 1,
        }
    }

    /// Register a block in a pool slot, reusing the slot's reserved storage
    pub fn link_pool(&mut self, index: usize, block: ControlBlock) -> TimerHandle {
        let slot = self
            .pool
            .slot_mut(index)
            .filter(|s| s.state == SlotState::Reserved)
            .expect("pool slot linked without a reservation");

        match slot.block.as_deref_mut() {
            Some(storage) => *storage = block,
            None => slot.block = Some(Box::new(block)),
        }
        slot.state = SlotState::Linked;
        self.linked += 1;
        TimerHandle::new(index as u32, slot.generation)
    }

    /// Register a heap block, consuming a `Reservation::Heap`
    pub fn link_heap(&mut self, block: Box<ControlBlock>) -> TimerHandle {
        let heap_index = match self.heap_free.pop() {
            Some(i) => i as usize,
            None => {
                self.heap.push(Slot::VACANT);
                self.heap.len() - 1
            },
        };

        let slot = &mut self.heap[heap_index];
        slot.block = Some(block);
        slot.state = SlotState::Linked;
        self.linked += 1;
        TimerHandle::new((self.pool.capacity() + heap_index) as u32, slot.generation)
    }

    // =========================================================================
    // Removal and Dispatch Bookkeeping
    // =========================================================================

    /// Remove a timer; no lookup observes it afterwards
    pub fn unlink(&mut self, handle: TimerHandle) -> Option<Unlinked> {
        let slot = self.slot_mut(handle).filter(|s| s.is_linked())?;
        slot.state = SlotState::Detached;
        self.linked -= 1;

        Some(match self.release(handle) {
            Some(released) => Unlinked::Released(released),
            None => Unlinked::Deferred,
        })
    }

    /// Mark a timer as being dispatched
    pub fn begin_dispatch(&mut self, handle: TimerHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.firing = true;
        }
    }

    /// Dispatch finished; releases the slot if it was deleted meanwhile
    pub fn end_dispatch(&mut self, handle: TimerHandle) -> Option<Released> {
        self.slot_mut(handle)?.firing = false;
        self.release(handle)
    }

    /// Whether the timer was deleted while being dispatched
    pub fn is_detached(&self, handle: TimerHandle) -> bool {
        self.slot(handle)
            .is_some_and(|s| s.state == SlotState::Detached)
    }

    /// Return a quiescent slot to its origin
    fn release(&mut self, handle: TimerHandle) -> Option<Released> {
        let proof = self.slot(handle)?.quiesce()?;
        let index = handle.index as usize;

        match index.checked_sub(self.pool.capacity()) {
            None => Some(self.pool.release(index, proof)),
            Some(heap_index) => {
                let slot = &mut self.heap[heap_index];
                slot.retire(proof);
                let mut block = slot.block.take();
                self.heap_free.push(heap_index as u32);
                self.heap_live -= 1;

                let mut released = Released {
                    job: None,
                    callback: None,
                    block: None,
                };
                if let Some(b) = block.as_deref_mut() {
                    released.job = Some(b.job);
                    released.callback = b.callback.take();
                    b.clear();
                }
                released.block = block;
                Some(released)
            },
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::TimerName;

    fn block(job: u32) -> ControlBlock {
        ControlBlock::new(
            TimerName::new("r"),
            job,
            10,
            false,
            None,
            JobHandle::new(job, 0),
        )
    }

    fn link_pool(reg: &mut Registry, job: u32) -> TimerHandle {
        let Some(Reservation::Pool(index)) = reg.acquire_pool() else {
            panic!("pool exhausted");
        };
        reg.link_pool(index, block(job))
    }

    fn link_heap(reg: &mut Registry, job: u32) -> TimerHandle {
        assert_eq!(reg.reserve_heap(), Some(Reservation::Heap));
        reg.link_heap(Box::new(block(job)))
    }

    #[test]
    fn test_link_and_lookup() {
        let mut reg = Registry::new(1, 4, 4);
        let pooled = link_pool(&mut reg, 1);
        let heaped = link_heap(&mut reg, 2);

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get(pooled).unwrap().id, 1);
        assert_eq!(reg.get(heaped).unwrap().id, 2);
        assert_eq!(reg.find_by_job(JobHandle::new(2, 0)), Some(heaped));
        assert_eq!(reg.find_by_job(JobHandle::new(1, 0)), Some(pooled));
        assert_eq!(reg.find_by_job(JobHandle::new(9, 0)), None);
    }

    #[test]
    fn test_unlink_invalidates_handle() {
        let mut reg = Registry::new(0, 4, 0);
        let handle = link_heap(&mut reg, 1);

        match reg.unlink(handle) {
            Some(Unlinked::Released(released)) => {
                assert_eq!(released.job, Some(JobHandle::new(1, 0)));
                assert!(released.block.is_some());
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(reg.get(handle).is_none());
        assert!(reg.unlink(handle).is_none());
        assert_eq!(reg.len(), 0);
        assert_eq!(reg.heap_live(), 0);

        // The slot is reused under a new generation
        let reused = link_heap(&mut reg, 2);
        assert_eq!(reused.index, handle.index);
        assert_ne!(reused, handle);
        assert!(reg.get(handle).is_none());
    }

    #[test]
    fn test_unlink_while_firing_defers_release() {
        let mut reg = Registry::new(1, 0, 0);
        let handle = link_pool(&mut reg, 1);

        reg.begin_dispatch(handle);
        assert!(matches!(reg.unlink(handle), Some(Unlinked::Deferred)));
        assert!(reg.find_by_job(JobHandle::new(1, 0)).is_none());
        assert!(reg.is_detached(handle));
        assert_eq!(reg.pool_available(), 0);

        let released = reg.end_dispatch(handle).unwrap();
        assert_eq!(released.job, Some(JobHandle::new(1, 0)));
        assert_eq!(reg.pool_available(), 1);
    }

    #[test]
    fn test_end_dispatch_of_linked_timer_keeps_it() {
        let mut reg = Registry::new(1, 0, 0);
        let handle = link_pool(&mut reg, 1);
        reg.begin_dispatch(handle);
        assert!(reg.end_dispatch(handle).is_none());
        assert!(reg.contains(handle));
    }

    #[test]
    fn test_heap_limit() {
        let mut reg = Registry::new(0, 1, 0);
        let reservation = reg.reserve_heap().unwrap();
        assert!(reg.reserve_heap().is_none());
        reg.abandon(reservation);
        assert!(reg.reserve_heap().is_some());
    }

    #[test]
    fn test_abandon_pool_reservation() {
        let mut reg = Registry::new(1, 0, 0);
        let reservation = reg.acquire_pool().unwrap();
        assert_eq!(reg.pool_available(), 0);
        reg.abandon(reservation);
        assert_eq!(reg.pool_available(), 1);
        assert_eq!(reg.len(), 0);
    }
}
