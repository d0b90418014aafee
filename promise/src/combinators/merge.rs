use std::sync::Arc;

use parking_lot::Mutex;

use super::{Bridges, short_circuit};
use crate::deferred::RawDeferred;
use crate::outcome::{downcast_payload, ErasedOutcome, Outcome, Payload};
use crate::pass_through::{PassThrough, PassThroughTarget};
use crate::progress::{Fixed, ProgressAccumulator};
use crate::promise::RawPromise;
use crate::runtime::PromiseRuntime;

/// Positional storage for the values of a merge.
pub(crate) trait MergeSlots: Send + 'static {
    type Output: Send + 'static;

    /// Stores the resolved value of input `index`.
    fn write(&mut self, index: usize, value: Payload);

    /// Takes the collected values. Called once, after every slot is written.
    fn finish(&mut self) -> Self::Output;
}

/// Slots for the N-ary `all`.
pub(crate) struct VecSlots<T> {
    values: Vec<Option<T>>,
}

impl<T> VecSlots<T> {
    pub fn new(len: usize) -> Self {
        let mut values = Vec::with_capacity(len);
        values.resize_with(len, || None);
        Self { values }
    }
}

impl<T: Send + 'static> MergeSlots for VecSlots<T> {
    type Output = Vec<T>;

    fn write(&mut self, index: usize, value: Payload) {
        self.values[index] = Some(downcast_payload::<T>(value));
    }

    fn finish(&mut self) -> Vec<T> {
        self.values
            .drain(..)
            .map(|value| value.expect("Merge finished with an empty slot"))
            .collect()
    }
}

/// Tuple slots write straight into the matching field.
macro_rules! tuple_slots {
    ($($idx:tt => $ty:ident),+) => {
        impl<$($ty: Send + 'static),+> MergeSlots for ($(Option<$ty>,)+) {
            type Output = ($($ty,)+);

            fn write(&mut self, index: usize, value: Payload) {
                match index {
                    $($idx => self.$idx = Some(downcast_payload::<$ty>(value)),)+
                    _ => unreachable!("Merge slot index {index} out of range"),
                }
            }

            fn finish(&mut self) -> Self::Output {
                ($(self.$idx.take().expect("Merge finished with an empty slot"),)+)
            }
        }
    };
}

tuple_slots!(0 => A, 1 => B);
tuple_slots!(0 => A, 1 => B, 2 => C);
tuple_slots!(0 => A, 1 => B, 2 => C, 3 => D);
tuple_slots!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
tuple_slots!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F);
tuple_slots!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => G);
tuple_slots!(0 => A, 1 => B, 2 => C, 3 => D, 4 => E, 5 => F, 6 => G, 7 => H);

struct MergeState<S> {
    slots: S,
    remaining: usize,
    accumulator: ProgressAccumulator,
}

struct MergeTarget<S> {
    deferred: RawDeferred,
    state: Mutex<MergeState<S>>,
}

impl<S: MergeSlots> PassThroughTarget for MergeTarget<S> {
    fn on_settled(&self, index: usize, outcome: ErasedOutcome) {
        let value = match outcome {
            Outcome::Resolved(value) => value,
            // First failure wins; later ones fail `try_settle`.
            failure => {
                self.deferred.try_settle(failure);
                return;
            }
        };

        let (finished, progress) = {
            let mut state = self.state.lock();
            if !self.deferred.is_valid_and_pending() {
                return;
            }
            state.slots.write(index, value);
            state.remaining -= 1;
            let progress = state.accumulator.complete(index);
            let finished = (state.remaining == 0).then(|| state.slots.finish());
            (finished, progress)
        };

        match finished {
            Some(output) => {
                self.deferred
                    .try_settle(Outcome::Resolved(Box::new(output) as Payload));
            }
            None => {
                if let Some(progress) = progress {
                    self.deferred.try_report(progress);
                }
            }
        }
    }

    fn on_progress(&self, index: usize, progress: Fixed) {
        let aggregate = self.state.lock().accumulator.update(index, progress);
        if let Some(aggregate) = aggregate {
            self.deferred.try_report(aggregate);
        }
    }
}

/// Shared body of `all` and `merge2..merge8`.
pub(super) fn merge<S: MergeSlots>(
    runtime: &PromiseRuntime,
    inputs: Vec<RawPromise>,
    mut slots: S,
) -> RawPromise {
    let total = inputs.len();
    let mut accumulator = ProgressAccumulator::new(total);
    let mut bridges: Bridges = Vec::new();

    let mut inputs = inputs.into_iter().enumerate();
    while let Some((index, input)) = inputs.next() {
        match input.poll() {
            Ok(Outcome::Resolved(value)) => {
                slots.write(index, value);
                accumulator.complete(index);
            }
            Ok(failure) => {
                short_circuit(runtime, bridges, inputs.map(|(_, input)| input));
                return RawPromise::settled(runtime, failure);
            }
            Err(pending) => bridges.push((PassThrough::take(runtime, index), pending)),
        }
    }

    if bridges.is_empty() {
        return RawPromise::inline(runtime.clone(), Box::new(slots.finish()));
    }

    let (deferred, promise) = runtime.raw_deferred();
    let already = accumulator.aggregate();
    if already > Fixed::ZERO {
        deferred.try_report(already);
    }
    let target = Arc::new(MergeTarget {
        deferred,
        state: Mutex::new(MergeState {
            slots,
            remaining: bridges.len(),
            accumulator,
        }),
    });
    for (bridge, input) in bridges {
        bridge.bind(input, target.clone());
    }
    promise
}

#[cfg(test)]
mod tests {
    use crate::outcome::{PromiseState, Reason};
    use crate::runtime::PromiseRuntime;

    #[test]
    fn all_preserves_input_order() {
        let runtime = PromiseRuntime::new();
        let (a, pa) = runtime.deferred::<u32>();
        let (b, pb) = runtime.deferred::<u32>();
        let all = runtime.all([pa, runtime.resolved(2), pb]);

        b.resolve(3).unwrap();
        assert_eq!(all.state(), PromiseState::Pending);
        a.resolve(1).unwrap();

        assert_eq!(all.into_outcome().ok().unwrap().value(), Some(vec![1, 2, 3]));
        assert_eq!(runtime.pass_through_pool_stats().outstanding(), 0);
        assert_eq!(runtime.live_promise_count(), 0);
    }

    #[test]
    fn first_failure_wins_over_later_outcomes() {
        let runtime = PromiseRuntime::new();
        let (a, pa) = runtime.deferred::<u32>();
        let (b, pb) = runtime.deferred::<u32>();
        let (c, pc) = runtime.deferred::<u32>();
        let all = runtime.all([pa, pb, pc]);

        b.reject("first").unwrap();
        c.cancel_with("second").unwrap();
        a.resolve(1).unwrap();

        let outcome = all.into_outcome().ok().unwrap();
        assert_eq!(outcome.state(), PromiseState::Rejected);
        assert_eq!(outcome.reason().and_then(Reason::message), Some("first"));
        assert_eq!(runtime.report_unhandled_rejections(), 0);
        assert_eq!(runtime.pass_through_pool_stats().outstanding(), 0);
    }

    #[test]
    fn empty_all_resolves_with_empty_vec() {
        let runtime = PromiseRuntime::new();
        let all = runtime.all(Vec::<crate::Promise<u8>>::new());
        assert_eq!(all.into_outcome().ok().unwrap().value(), Some(Vec::new()));
    }

    #[test]
    fn already_failed_input_short_circuits() {
        let runtime = PromiseRuntime::new();
        let (_pending, pending) = runtime.deferred::<u8>();
        let all = runtime.all([runtime.resolved(1), pending, runtime.rejected("bad")]);

        let outcome = all.into_outcome().ok().unwrap();
        assert_eq!(outcome.reason().and_then(Reason::message), Some("bad"));
        assert_eq!(runtime.pass_through_pool_stats().outstanding(), 0);
    }

    #[test]
    fn merge_tuple_of_mixed_types() {
        let runtime = PromiseRuntime::new();
        let (a, pa) = runtime.deferred::<u32>();
        let (b, pb) = runtime.deferred::<String>();
        let merged = runtime.merge3(pa, pb, runtime.resolved(true));

        b.resolve("two".to_string()).unwrap();
        a.resolve(1).unwrap();

        let value = merged.into_outcome().ok().unwrap().value().unwrap();
        assert_eq!(value, (1, "two".to_string(), true));
    }

    #[test]
    fn merge8_collects_every_field() {
        let runtime = PromiseRuntime::new();
        let r = |value: u8| runtime.resolved(value);
        let (d, pending) = runtime.deferred::<u8>();
        let merged = runtime.merge8(r(0), r(1), r(2), r(3), r(4), r(5), r(6), pending);
        d.resolve(7).unwrap();
        assert_eq!(
            merged.into_outcome().ok().unwrap().value(),
            Some((0, 1, 2, 3, 4, 5, 6, 7))
        );
    }

    #[test]
    fn progress_weights_inputs_equally() {
        let runtime = PromiseRuntime::new();
        let (a, pa) = runtime.deferred::<()>();
        let (b, pb) = runtime.deferred::<()>();
        let merged = runtime.merge3(pa, pb, runtime.resolved(()));

        // The resolved input already counts for a third.
        assert!((merged.progress() - 1.0 / 3.0).abs() < 1e-3);
        a.report_progress(0.5).unwrap();
        assert!((merged.progress() - 0.5).abs() < 1e-3);
        b.resolve(()).unwrap();
        a.resolve(()).unwrap();
        assert_eq!(merged.progress(), 1.0);
    }
}
