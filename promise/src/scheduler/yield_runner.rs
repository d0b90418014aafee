use std::sync::Arc;

use parking_lot::Mutex;

use super::instruction::WaitInstruction;
use crate::cancel::CancelationRegistration;
use crate::deferred::RawDeferred;
use crate::outcome::{ErasedOutcome, Outcome, Payload, Reason};

struct RunnerEntry {
    /// Advances on every completion; stale requests carry an older epoch.
    epoch: u64,
    live: bool,
    deferred: Option<RawDeferred>,
    registration: Option<CancelationRegistration>,
    cancel_reason: Option<Reason>,
}

/// Pooled bookkeeping for every [`YieldInstructionRunner`] of a scheduler.
///
/// Touched only on the confined thread. The mutex exists so cancel requests
/// posted through the foreground context can reach it.
pub(crate) struct RunnerTable {
    entries: Vec<RunnerEntry>,
    free: Vec<usize>,
}

impl RunnerTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Claims an entry for `deferred`. Returns its `(slot, epoch)`.
    pub fn take(&mut self, deferred: RawDeferred) -> (usize, u64) {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.entries.push(RunnerEntry {
                    epoch: 0,
                    live: false,
                    deferred: None,
                    registration: None,
                    cancel_reason: None,
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[slot];
        entry.live = true;
        entry.deferred = Some(deferred);
        (slot, entry.epoch)
    }

    fn entry_mut(&mut self, slot: usize, epoch: u64) -> Option<&mut RunnerEntry> {
        self.entries
            .get_mut(slot)
            .filter(|entry| entry.live && entry.epoch == epoch)
    }

    /// Stores the token registration, unless the runner already completed.
    pub fn attach_registration(
        &mut self,
        slot: usize,
        epoch: u64,
        registration: CancelationRegistration,
    ) -> Option<CancelationRegistration> {
        match self.entry_mut(slot, epoch) {
            Some(entry) => {
                entry.registration = Some(registration);
                None
            }
            None => Some(registration),
        }
    }

    /// Records a cancel request for the runner's next evaluation. Returns
    /// `false` if the entry was recycled since the request was made.
    pub fn request_cancel(&mut self, slot: usize, epoch: u64, reason: Reason) -> bool {
        match self.entry_mut(slot, epoch) {
            Some(entry) => {
                entry.cancel_reason.get_or_insert(reason);
                true
            }
            None => {
                log::warn!(
                    "Ignoring cancel request for recycled runner slot {slot} (epoch {epoch})"
                );
                false
            }
        }
    }

    fn take_cancel(&mut self, slot: usize, epoch: u64) -> Option<Reason> {
        self.entry_mut(slot, epoch)?.cancel_reason.take()
    }

    /// Frees the entry and bumps its epoch. The deferred and registration
    /// are returned so the caller can settle and drop them unlocked.
    fn complete(
        &mut self,
        slot: usize,
        epoch: u64,
    ) -> (Option<RawDeferred>, Option<CancelationRegistration>) {
        let Some(entry) = self.entry_mut(slot, epoch) else {
            return (None, None);
        };
        entry.live = false;
        entry.epoch = entry.epoch.wrapping_add(1);
        entry.cancel_reason = None;
        let taken = (entry.deferred.take(), entry.registration.take());
        self.free.push(slot);
        taken
    }

    /// Runners currently waiting.
    pub fn live_count(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}

/// Wraps a wait primitive so its completion settles a promise.
///
/// Queued like any other instruction. Each evaluation first applies a
/// pending cancel request, in which case the primitive is not evaluated.
pub(crate) struct YieldInstructionRunner<W> {
    wait: W,
    slot: usize,
    epoch: u64,
    table: Arc<Mutex<RunnerTable>>,
}

impl<W: WaitInstruction> YieldInstructionRunner<W> {
    pub fn new(wait: W, slot: usize, epoch: u64, table: Arc<Mutex<RunnerTable>>) -> Self {
        Self {
            wait,
            slot,
            epoch,
            table,
        }
    }

    fn finish(&self, outcome: ErasedOutcome) {
        let (deferred, registration) = self.table.lock().complete(self.slot, self.epoch);
        drop(registration);
        if let Some(deferred) = deferred {
            deferred.try_settle(outcome);
        }
    }
}

impl<W: WaitInstruction> WaitInstruction for YieldInstructionRunner<W> {
    fn evaluate(&mut self) -> bool {
        let cancel = self.table.lock().take_cancel(self.slot, self.epoch);
        if let Some(reason) = cancel {
            self.finish(Outcome::Canceled(reason));
            return true;
        }
        if self.wait.evaluate() {
            self.finish(Outcome::Resolved(Box::new(()) as Payload));
            return true;
        }
        false
    }
}
