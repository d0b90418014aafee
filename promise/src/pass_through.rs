use std::sync::Arc;

use crate::arena::Dispatch;
use crate::outcome::ErasedOutcome;
use crate::progress::Fixed;
use crate::promise::RawPromise;
use crate::runtime::PromiseRuntime;

/// Combinator state that receives the outcomes of its inputs.
pub(crate) trait PassThroughTarget: Send + Sync {
    fn on_settled(&self, index: usize, outcome: ErasedOutcome);
    fn on_progress(&self, index: usize, progress: Fixed);
}

/// Binds one input promise to one slot index of a combinator.
///
/// Taken from the runtime's pool when a combinator meets a pending input,
/// and returned exactly once: by [`release`](Self::release) when the
/// combinator short-circuits before binding, or by the input's
/// continuation after forwarding the outcome.
#[derive(Default)]
pub(crate) struct PassThrough {
    index: usize,
    target: Option<Arc<dyn PassThroughTarget>>,
}

impl PassThrough {
    pub fn take(runtime: &PromiseRuntime, index: usize) -> Box<Self> {
        let mut bridge = runtime.pass_throughs().take_or_create();
        bridge.index = index;
        bridge
    }

    pub fn release(mut self: Box<Self>, runtime: &PromiseRuntime) {
        self.target = None;
        runtime.pass_throughs().repool(self);
    }

    /// Forwards the progress and outcome of `input` to `target`.
    pub fn bind(mut self: Box<Self>, input: RawPromise, target: Arc<dyn PassThroughTarget>) {
        let runtime = input.runtime().clone();
        let index = self.index;

        let progress_target = target.clone();
        input.add_progress_listener(Arc::new(move |progress| {
            progress_target.on_progress(index, progress);
        }));

        self.target = Some(target);
        input.subscribe(
            Dispatch::Inline,
            Box::new(move |outcome| {
                if let Some(target) = self.target.take() {
                    target.on_settled(self.index, outcome);
                }
                self.release(&runtime);
            }),
        );
    }
}
