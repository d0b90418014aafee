use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{Bridges, empty_argument, short_circuit};
use crate::deferred::RawDeferred;
use crate::error::PromiseError;
use crate::outcome::ErasedOutcome;
use crate::pass_through::{PassThrough, PassThroughTarget};
use crate::progress::Fixed;
use crate::promise::RawPromise;
use crate::runtime::PromiseRuntime;

struct RaceTarget {
    deferred: RawDeferred,
    /// Highest raw progress seen on any input.
    progress: AtomicU32,
}

impl PassThroughTarget for RaceTarget {
    fn on_settled(&self, _index: usize, outcome: ErasedOutcome) {
        // Losers are dropped here; they were observed, so never unhandled.
        self.deferred.try_settle(outcome);
    }

    fn on_progress(&self, _index: usize, progress: Fixed) {
        let previous = self.progress.fetch_max(progress.raw(), Ordering::AcqRel);
        if progress.raw() > previous {
            self.deferred.try_report(progress);
        }
    }
}

pub(super) fn race(
    runtime: &PromiseRuntime,
    inputs: impl Iterator<Item = RawPromise>,
) -> Result<RawPromise, PromiseError> {
    let mut inputs = inputs.peekable();
    if inputs.peek().is_none() {
        return Err(empty_argument("race"));
    }

    let mut bridges: Bridges = Vec::new();
    let mut index = 0;
    while let Some(input) = inputs.next() {
        match input.poll() {
            Ok(outcome) => {
                short_circuit(runtime, bridges, inputs);
                return Ok(RawPromise::settled(runtime, outcome));
            }
            Err(pending) => bridges.push((PassThrough::take(runtime, index), pending)),
        }
        index += 1;
    }

    let (deferred, promise) = runtime.raw_deferred();
    let target = Arc::new(RaceTarget {
        deferred,
        progress: AtomicU32::new(0),
    });
    for (bridge, input) in bridges {
        bridge.bind(input, target.clone());
    }
    Ok(promise)
}
