use std::cell::Cell;

use crate::error::PromiseError;

thread_local! {
    /// Set on every thread that owns a scheduler.
    static CONFINED: Cell<bool> = const { Cell::new(false) };
}

/// Records which thread may drive a scheduler.
///
/// Debug builds compare the caller's `ThreadId` against the owner. Release
/// builds only read a thread-local flag that says "this thread owns some
/// scheduler", which is cheaper but cannot tell two owner threads apart.
pub(crate) struct ConfinedThread {
    #[cfg(debug_assertions)]
    owner: std::thread::ThreadId,
}

impl ConfinedThread {
    /// Confines to the calling thread.
    pub fn current() -> Self {
        CONFINED.with(|flag| flag.set(true));
        Self {
            #[cfg(debug_assertions)]
            owner: std::thread::current().id(),
        }
    }

    pub fn check(&self, operation: &'static str) -> Result<(), PromiseError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(PromiseError::WrongThread { operation })
        }
    }

    #[cfg(debug_assertions)]
    fn is_current(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    #[cfg(not(debug_assertions))]
    fn is_current(&self) -> bool {
        CONFINED.with(Cell::get)
    }
}
