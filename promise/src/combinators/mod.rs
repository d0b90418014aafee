//! Promise combinators: [`race`](PromiseRuntime::race),
//! [`first`](PromiseRuntime::first), [`all`](PromiseRuntime::all) /
//! `merge2..merge8` and [`sequence`](PromiseRuntime::sequence).
//!
//! Every combinator walks its inputs once. A pending input takes a
//! [`PassThrough`] from the runtime's pool; a settled input may end the walk
//! early ("short-circuit"). On that path the bridges already taken go back
//! to the pool, every other input is suppressed, and no combinator state is
//! allocated.

mod first;
mod merge;
mod race;
mod sequence;

use crate::cancel::CancelationToken;
use crate::error::PromiseError;
use crate::pass_through::PassThrough;
use crate::promise::{Promise, RawPromise};
use crate::runtime::PromiseRuntime;

/// Pending inputs collected before the combinator state exists.
type Bridges = Vec<(Box<PassThrough>, RawPromise)>;

/// Disposes everything a short-circuiting combinator still holds.
fn short_circuit(
    runtime: &PromiseRuntime,
    bridges: Bridges,
    rest: impl Iterator<Item = RawPromise>,
) {
    for (bridge, pending) in bridges {
        bridge.release(runtime);
        pending.suppress();
    }
    for input in rest {
        input.suppress();
    }
}

fn empty_argument(operation: &'static str) -> PromiseError {
    PromiseError::EmptyArgument { operation }
}

impl PromiseRuntime {
    /// Settles with the outcome of whichever input settles first.
    ///
    /// If an input is already settled, the first one in iteration order
    /// wins immediately. Rejections of the losing inputs are never reported
    /// as unhandled. Progress is the highest progress of any input.
    ///
    /// Returns [`PromiseError::EmptyArgument`] for an empty input.
    pub fn race<T: Send + 'static>(
        &self,
        promises: impl IntoIterator<Item = Promise<T>>,
    ) -> Result<Promise<T>, PromiseError> {
        race::race(self, promises.into_iter().map(Promise::into_raw)).map(Promise::from_raw)
    }

    /// Resolves with the first input to resolve.
    ///
    /// Fails only once every input has failed, with the outcome of the last
    /// failure. Progress is the highest progress of any input.
    ///
    /// Returns [`PromiseError::EmptyArgument`] for an empty input.
    pub fn first<T: Send + 'static>(
        &self,
        promises: impl IntoIterator<Item = Promise<T>>,
    ) -> Result<Promise<T>, PromiseError> {
        first::first(self, promises.into_iter().map(Promise::into_raw)).map(Promise::from_raw)
    }

    /// Resolves with every value, in input order, once all inputs resolve.
    ///
    /// The first failure settles the result; later outcomes are discarded.
    /// An empty input resolves with an empty vector.
    pub fn all<T: Send + 'static>(
        &self,
        promises: impl IntoIterator<Item = Promise<T>>,
    ) -> Promise<Vec<T>> {
        let inputs: Vec<RawPromise> = promises.into_iter().map(Promise::into_raw).collect();
        let slots = merge::VecSlots::<T>::new(inputs.len());
        Promise::from_raw(merge::merge(self, inputs, slots))
    }

    /// Runs `steps` one after another. Each step starts once the previous
    /// step's promise resolved; steps after the first continue on the
    /// foreground context.
    ///
    /// `token` aborts the chain before the next step starts and cancels the
    /// result with the token's reason. A failing step fails the result and
    /// skips the remaining steps. Progress is
    /// `(finished steps + current step progress) / steps`.
    pub fn sequence<T, F>(
        &self,
        token: &CancelationToken,
        steps: impl IntoIterator<Item = F>,
    ) -> Promise<()>
    where
        T: Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        Promise::from_raw(sequence::sequence(self, token, steps))
    }
}

macro_rules! merge_fn {
    ($(#[$doc:meta])* $name:ident => $($ty:ident / $arg:ident),+) => {
        impl PromiseRuntime {
            $(#[$doc])*
            #[allow(clippy::too_many_arguments)]
            pub fn $name<$($ty: Send + 'static),+>(
                &self,
                $($arg: Promise<$ty>),+
            ) -> Promise<($($ty,)+)> {
                let inputs = vec![$($arg.into_raw()),+];
                let slots: ($(Option<$ty>,)+) = Default::default();
                Promise::from_raw(merge::merge(self, inputs, slots))
            }
        }
    };
}

merge_fn!(
    /// Resolves with both values once both inputs resolve. See [`all`](Self::all).
    merge2 => A / a, B / b
);
merge_fn!(
    /// Three-input [`merge2`](Self::merge2).
    merge3 => A / a, B / b, C / c
);
merge_fn!(
    /// Four-input [`merge2`](Self::merge2).
    merge4 => A / a, B / b, C / c, D / d
);
merge_fn!(
    /// Five-input [`merge2`](Self::merge2).
    merge5 => A / a, B / b, C / c, D / d, E / e
);
merge_fn!(
    /// Six-input [`merge2`](Self::merge2).
    merge6 => A / a, B / b, C / c, D / d, E / e, F / f
);
merge_fn!(
    /// Seven-input [`merge2`](Self::merge2).
    merge7 => A / a, B / b, C / c, D / d, E / e, F / f, G / g
);
merge_fn!(
    /// Eight-input [`merge2`](Self::merge2).
    merge8 => A / a, B / b, C / c, D / d, E / e, F / f, G / g, H / h
);
