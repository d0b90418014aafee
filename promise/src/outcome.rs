use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

/// Type-erased resolved value stored in a promise slot.
pub(crate) type Payload = Box<dyn Any + Send>;

/// Outcome whose resolved value has not been downcast yet.
pub(crate) type ErasedOutcome = Outcome<Payload>;

/// Lifecycle state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with a rejection reason.
    Rejected,
    /// Settled by cancellation.
    Canceled,
}

impl PromiseState {
    /// Returns `true` for every state except [`Pending`](Self::Pending).
    pub fn is_settled(self) -> bool {
        self != Self::Pending
    }
}

/// Rejection or cancellation reason.
///
/// Any `Send + Sync` value can be used as a reason. Cloning is cheap
/// (reference counted), which lets duplicated readers and combinators
/// forward the same reason without copying it.
///
/// # Example
///
/// ```
/// use redlilium_promise::Reason;
///
/// let reason = Reason::from("disk full");
/// assert_eq!(reason.message(), Some("disk full"));
///
/// let code = Reason::new(404u16);
/// assert_eq!(code.downcast_ref::<u16>(), Some(&404));
/// ```
#[derive(Clone)]
pub struct Reason {
    inner: Arc<dyn Any + Send + Sync>,
}

/// Message used when something is canceled without an explicit reason.
const DEFAULT_CANCEL_MESSAGE: &str = "operation was canceled";

impl Reason {
    /// Wraps an arbitrary value as a reason.
    pub fn new<R: Any + Send + Sync>(value: R) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// The reason used by cancellations that do not supply one.
    pub fn canceled() -> Self {
        Self::new(DEFAULT_CANCEL_MESSAGE)
    }

    /// Returns a reference to the wrapped value if it is of type `R`.
    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.inner.downcast_ref::<R>()
    }

    /// Returns `true` if the wrapped value is of type `R`.
    pub fn is<R: Any>(&self) -> bool {
        self.inner.is::<R>()
    }

    /// Returns the wrapped text for `&'static str` and `String` reasons.
    pub fn message(&self) -> Option<&str> {
        if let Some(text) = self.inner.downcast_ref::<&'static str>() {
            return Some(text);
        }
        self.inner.downcast_ref::<String>().map(String::as_str)
    }

    /// Returns `true` if both reasons share the same allocation.
    pub fn ptr_eq(&self, other: &Reason) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(text) => write!(f, "Reason({text:?})"),
            None => f.write_str("Reason(<opaque>)"),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message().unwrap_or("<opaque reason>"))
    }
}

impl From<&'static str> for Reason {
    fn from(text: &'static str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Reason {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// The settled result of a promise.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The promise resolved with a value.
    Resolved(T),
    /// The promise was rejected.
    Rejected(Reason),
    /// The promise was canceled.
    Canceled(Reason),
}

impl<T> Outcome<T> {
    /// The state this outcome settles a promise into.
    pub fn state(&self) -> PromiseState {
        match self {
            Self::Resolved(_) => PromiseState::Resolved,
            Self::Rejected(_) => PromiseState::Rejected,
            Self::Canceled(_) => PromiseState::Canceled,
        }
    }

    /// Returns `true` for [`Outcome::Resolved`].
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Returns the resolved value, discarding failures.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the rejection or cancellation reason, if any.
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Self::Resolved(_) => None,
            Self::Rejected(reason) | Self::Canceled(reason) => Some(reason),
        }
    }

    /// Maps the resolved value, leaving failures untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Resolved(value) => Outcome::Resolved(f(value)),
            Self::Rejected(reason) => Outcome::Rejected(reason),
            Self::Canceled(reason) => Outcome::Canceled(reason),
        }
    }
}

impl<T: Send + 'static> Outcome<T> {
    /// Boxes the resolved value for storage in a slot.
    pub(crate) fn erase(self) -> ErasedOutcome {
        self.map(|value| Box::new(value) as Payload)
    }
}

impl ErasedOutcome {
    /// Recovers the typed outcome. The slot typing guarantees `T` matches.
    pub(crate) fn downcast<T: 'static>(self) -> Outcome<T> {
        self.map(downcast_payload::<T>)
    }
}

/// Unboxes a payload whose type is fixed by the handle that produced it.
pub(crate) fn downcast_payload<T: 'static>(payload: Payload) -> T {
    match payload.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => panic!("Promise payload is not a `{}`", type_name::<T>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_messages() {
        assert_eq!(Reason::from("e").message(), Some("e"));
        assert_eq!(Reason::from(String::from("owned")).message(), Some("owned"));
        assert_eq!(Reason::new(7u32).message(), None);
        assert_eq!(Reason::canceled().message(), Some(DEFAULT_CANCEL_MESSAGE));
    }

    #[test]
    fn reason_debug_format() {
        assert_eq!(format!("{:?}", Reason::from("boom")), "Reason(\"boom\")");
        assert_eq!(format!("{:?}", Reason::new(1u8)), "Reason(<opaque>)");
    }

    #[test]
    fn clone_shares_allocation() {
        let a = Reason::from("shared");
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Reason::from("shared")));
    }

    #[test]
    fn erase_and_downcast() {
        let outcome = Outcome::Resolved(41u64).erase();
        assert_eq!(outcome.state(), PromiseState::Resolved);
        assert_eq!(outcome.downcast::<u64>().value(), Some(41));

        let failed: Outcome<u64> = Outcome::Rejected(Reason::from("x"));
        let back = failed.erase().downcast::<u64>();
        assert_eq!(back.reason().and_then(Reason::message), Some("x"));
    }

    #[test]
    #[should_panic(expected = "Promise payload is not a")]
    fn downcast_mismatch_panics() {
        let outcome = Outcome::Resolved(1u8).erase();
        let _ = outcome.downcast::<String>();
    }
}
