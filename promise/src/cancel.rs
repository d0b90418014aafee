//! One-shot cancellation: sources, tokens and registrations.
//!
//! A [`CancelationSource`] owns the right to cancel. It hands out
//! [`CancelationToken`]s that observers use to check the state or register
//! callbacks. Every registered callback runs at most once, outside of the
//! token's lock, on the thread that calls [`CancelationSource::cancel`].

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::outcome::Reason;

type CancelCallback = Box<dyn FnOnce(Reason) + Send>;

#[derive(Default)]
struct TokenState {
    reason: Option<Reason>,
    callbacks: Vec<(u64, CancelCallback)>,
    next_id: u64,
}

#[derive(Default)]
struct CancelationShared {
    state: Mutex<TokenState>,
}

impl CancelationShared {
    fn reason(&self) -> Option<Reason> {
        self.state.lock().reason.clone()
    }
}

/// The cancelling side of a cancellation pair.
///
/// Cloning a source shares the same underlying state.
///
/// # Example
///
/// ```
/// use redlilium_promise::{CancelationSource, Reason};
///
/// let source = CancelationSource::new();
/// let token = source.token();
/// assert!(!token.is_cancelation_requested());
///
/// assert!(source.cancel_with(Reason::from("shutdown")));
/// assert_eq!(token.reason().unwrap().message(), Some("shutdown"));
/// // Only the first request counts.
/// assert!(!source.cancel());
/// ```
#[derive(Clone, Default)]
pub struct CancelationSource {
    shared: Arc<CancelationShared>,
}

impl CancelationSource {
    /// Creates a source that has not been canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancelationToken {
        CancelationToken {
            shared: Some(self.shared.clone()),
        }
    }

    /// Cancels with the default reason. See [`cancel_with`](Self::cancel_with).
    pub fn cancel(&self) -> bool {
        self.cancel_with(Reason::canceled())
    }

    /// Requests cancellation and runs every registered callback.
    ///
    /// Returns `false` if cancellation was already requested; the original
    /// reason is kept and no callback runs again.
    pub fn cancel_with(&self, reason: impl Into<Reason>) -> bool {
        let reason = reason.into();
        let callbacks = {
            let mut state = self.shared.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            std::mem::take(&mut state.callbacks)
        };

        for (_, callback) in callbacks {
            callback(reason.clone());
        }
        true
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelation_requested(&self) -> bool {
        self.shared.state.lock().reason.is_some()
    }
}

impl fmt::Debug for CancelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationSource")
            .field("reason", &self.shared.reason())
            .finish()
    }
}

/// The observing side of a cancellation pair.
///
/// [`CancelationToken::none`] (also the `Default`) is a token that can
/// never be canceled.
#[derive(Clone, Default)]
pub struct CancelationToken {
    shared: Option<Arc<CancelationShared>>,
}

impl CancelationToken {
    /// A token that is never canceled.
    pub fn none() -> Self {
        Self { shared: None }
    }

    /// Returns `false` for [`none`](Self::none) tokens.
    pub fn can_be_canceled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn is_cancelation_requested(&self) -> bool {
        self.reason().is_some()
    }

    /// The reason passed to the source, once canceled.
    pub fn reason(&self) -> Option<Reason> {
        self.shared.as_ref().and_then(|shared| shared.reason())
    }

    /// Callbacks currently registered and not yet run or disposed.
    pub(crate) fn registered_count(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.state.lock().callbacks.len())
    }

    /// Registers `callback` to run when the token is canceled.
    ///
    /// Returns `None` without storing the callback if the token can never
    /// be canceled or was already canceled; callers check
    /// [`reason`](Self::reason) to tell the two apart.
    pub fn try_register(
        &self,
        callback: impl FnOnce(Reason) + Send + 'static,
    ) -> Option<CancelationRegistration> {
        let shared = self.shared.as_ref()?;
        let mut state = shared.state.lock();
        if state.reason.is_some() {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, Box::new(callback)));

        Some(CancelationRegistration {
            shared: Some(Arc::downgrade(shared)),
            id,
        })
    }
}

impl fmt::Debug for CancelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationToken")
            .field("can_be_canceled", &self.can_be_canceled())
            .field("reason", &self.reason())
            .field("registrations", &self.registered_count())
            .finish()
    }
}

/// A callback stored in a token.
///
/// Disposing the registration removes the callback. This happens exactly
/// once: either through [`unregister`](Self::unregister) or on drop.
pub struct CancelationRegistration {
    shared: Option<Weak<CancelationShared>>,
    id: u64,
}

impl CancelationRegistration {
    /// Removes the callback. Returns `true` if it had not run yet.
    pub fn unregister(mut self) -> bool {
        self.dispose()
    }

    /// Returns `true` while the callback is still waiting in the token.
    pub fn is_registered(&self) -> bool {
        let Some(shared) = self.shared.as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        let state = shared.state.lock();
        state.callbacks.iter().any(|(id, _)| *id == self.id)
    }

    fn dispose(&mut self) -> bool {
        let Some(shared) = self.shared.take().and_then(|weak| weak.upgrade()) else {
            return false;
        };
        let removed = {
            let mut state = shared.state.lock();
            let position = state.callbacks.iter().position(|(id, _)| *id == self.id);
            position.map(|position| state.callbacks.swap_remove(position))
        };
        // The callback may own promise handles; drop it unlocked.
        removed.is_some()
    }
}

impl Drop for CancelationRegistration {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for CancelationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationRegistration")
            .field("id", &self.id)
            .finish()
    }
}
