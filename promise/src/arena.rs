use std::any::Any;
use std::sync::Arc;

use crate::cancel::CancelationRegistration;
use crate::outcome::{ErasedOutcome, Outcome, Payload, PromiseState, Reason};
use crate::progress::Fixed;

/// Read capability into the arena: `(slot index, read generation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotKey {
    pub index: u32,
    pub read_id: u32,
}

/// Write capability into the arena: `(slot index, write generation)`.
///
/// The write generation advances when the slot settles, so a key can win
/// at most one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WriteKey {
    pub index: u32,
    pub write_id: u32,
}

/// Where a settled outcome is handed to a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// On the settling thread, synchronously.
    Inline,
    /// Posted to the runtime's foreground context.
    Foreground,
}

pub(crate) type Continuation = Box<dyn FnOnce(ErasedOutcome) + Send>;
pub(crate) type ProgressListener = Arc<dyn Fn(Fixed) + Send + Sync>;

/// Produces an independent copy of a resolved payload for duplicated readers.
pub(crate) type Cloner = fn(&(dyn Any + Send)) -> Payload;

/// A continuation waiting for a slot to settle. Each waiter owns one reader.
pub(crate) struct Waiter {
    pub dispatch: Dispatch,
    pub callback: Continuation,
}

/// State of one pooled promise.
pub(crate) struct PromiseSlot {
    pub read_id: u32,
    pub write_id: u32,
    pub live: bool,
    pub state: PromiseState,
    pub result: Option<ErasedOutcome>,
    pub waiters: Vec<Waiter>,
    /// Promise handles plus subscribed waiters.
    pub readers: u32,
    /// Live write capabilities minted for the current write generation.
    pub writers: u32,
    /// A reader took a rejected outcome.
    pub observed: bool,
    /// A combinator disposed this promise on purpose.
    pub suppressed: bool,
    pub progress: Fixed,
    pub progress_listeners: Vec<ProgressListener>,
    pub registration: Option<CancelationRegistration>,
    pub cloner: Option<Cloner>,
}

impl PromiseSlot {
    fn vacant() -> Self {
        Self {
            read_id: 0,
            write_id: 0,
            live: false,
            state: PromiseState::Pending,
            result: None,
            waiters: Vec::new(),
            readers: 0,
            writers: 0,
            observed: false,
            suppressed: false,
            progress: Fixed::ZERO,
            progress_listeners: Vec::new(),
            registration: None,
            cloner: None,
        }
    }

    pub fn read_key(&self, index: u32) -> SlotKey {
        SlotKey {
            index,
            read_id: self.read_id,
        }
    }

    /// Copies the settled outcome for one of several readers.
    pub fn clone_result(&self) -> Option<ErasedOutcome> {
        let result = self.result.as_ref()?;
        Some(match result {
            Outcome::Resolved(payload) => {
                let cloner = self
                    .cloner
                    .expect("Duplicated promise reader without a payload cloner");
                Outcome::Resolved(cloner(&**payload))
            }
            Outcome::Rejected(reason) => Outcome::Rejected(reason.clone()),
            Outcome::Canceled(reason) => Outcome::Canceled(reason.clone()),
        })
    }
}

/// What was left in a slot when it went back to the free list.
///
/// Dropped by the caller after the arena lock is released, since payloads
/// and listeners may own other promise handles.
pub(crate) struct Released {
    pub leftover: Option<ErasedOutcome>,
    /// Listeners of an abandoned pending slot.
    pub listeners: Vec<ProgressListener>,
    pub registration: Option<CancelationRegistration>,
    /// Set when the slot held a rejection nobody observed or suppressed.
    pub unhandled: Option<Reason>,
}

/// Generational arena of promise slots.
///
/// Slots are recycled through a LIFO free list. Releasing a slot advances
/// both generations, so every key minted for the previous tenant fails
/// its lookup.
pub(crate) struct StateArena {
    slots: Vec<PromiseSlot>,
    free_list: Vec<u32>,
    live: usize,
}

impl StateArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Allocates a pending slot with one reader (the returned promise).
    pub fn allocate(&mut self) -> (SlotKey, WriteKey) {
        self.live += 1;
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                self.slots.push(PromiseSlot::vacant());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.live = true;
        slot.state = PromiseState::Pending;
        slot.readers = 1;
        slot.writers = 1;
        slot.observed = false;
        slot.suppressed = false;
        slot.progress = Fixed::ZERO;
        slot.cloner = None;

        (
            slot.read_key(index),
            WriteKey {
                index,
                write_id: slot.write_id,
            },
        )
    }

    pub fn get(&self, key: SlotKey) -> Option<&PromiseSlot> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.live && slot.read_id == key.read_id)
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut PromiseSlot> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.live && slot.read_id == key.read_id)
    }

    /// The slot if `key` may still settle it.
    pub fn writable(&mut self, key: WriteKey) -> Option<&mut PromiseSlot> {
        self.slots.get_mut(key.index as usize).filter(|slot| {
            slot.live && slot.write_id == key.write_id && slot.state == PromiseState::Pending
        })
    }

    pub fn is_writable(&self, key: WriteKey) -> bool {
        self.slots.get(key.index as usize).is_some_and(|slot| {
            slot.live && slot.write_id == key.write_id && slot.state == PromiseState::Pending
        })
    }

    /// Returns a slot with no readers to the free list. The slot must be
    /// settled, or pending with no writers left.
    pub fn release(&mut self, index: u32) -> Released {
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.live && slot.readers == 0);
        debug_assert!(slot.state.is_settled() || slot.writers == 0);

        let leftover = slot.result.take();
        let unhandled = match &leftover {
            Some(Outcome::Rejected(reason)) if !slot.observed && !slot.suppressed => {
                Some(reason.clone())
            }
            _ => None,
        };

        let listeners = std::mem::take(&mut slot.progress_listeners);
        let registration = slot.registration.take();
        slot.live = false;
        slot.writers = 0;
        slot.read_id = slot.read_id.wrapping_add(1);
        slot.write_id = slot.write_id.wrapping_add(1);
        slot.state = PromiseState::Pending;
        slot.cloner = None;
        self.free_list.push(index);
        self.live -= 1;

        Released {
            leftover,
            listeners,
            registration,
            unhandled,
        }
    }

    /// Number of slots currently handed out.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Total slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
