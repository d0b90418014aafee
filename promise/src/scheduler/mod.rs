//! Frame-synchronous instruction scheduler.
//!
//! The host loop calls [`FrameScheduler::on_update_tick`],
//! [`on_fixed_update_tick`](FrameScheduler::on_fixed_update_tick) and
//! [`on_end_of_frame_tick`](FrameScheduler::on_end_of_frame_tick) once per
//! matching phase of its own loop. Each call drains the runtime's foreground
//! queue and evaluates the [`WaitInstruction`]s queued for that phase.
//!
//! Every instruction type gets its own triple-buffered processor, created
//! the first time the type is queued in a phase. Processors of one phase
//! run in the order they were created; instructions of one type run in the
//! order they were queued.

mod instruction;
mod processor;
mod yield_runner;

pub use instruction::{WaitInstruction, WaitOneTick, WaitTicks, WaitUntil};

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::CancelationToken;
use crate::config::SchedulerConfig;
use crate::confined::ConfinedThread;
use crate::deferred::RawDeferred;
use crate::error::PromiseError;
use crate::outcome::Outcome;
use crate::promise::Promise;
use crate::runtime::PromiseRuntime;
use processor::{ErasedProcessor, InstructionProcessor, ProcessStats};
use yield_runner::{RunnerTable, YieldInstructionRunner};

/// The host loop phase an instruction is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    Update,
    FixedUpdate,
    EndOfFrame,
}

impl FramePhase {
    pub const ALL: [FramePhase; 3] = [Self::Update, Self::FixedUpdate, Self::EndOfFrame];

    fn index(self) -> usize {
        match self {
            Self::Update => 0,
            Self::FixedUpdate => 1,
            Self::EndOfFrame => 2,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub frame: u64,
    pub phase: FramePhase,
    /// Foreground closures run before the phase was processed.
    pub foreground_executed: usize,
    /// Instructions evaluated.
    pub evaluated: usize,
    /// Instructions that finished.
    pub completed: usize,
    /// Instructions still queued in this phase.
    pub pending: usize,
    /// Unhandled rejections reported (Update phase only).
    pub unhandled_rejections: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} {:?}: {} foreground, {}/{} completed, {} pending",
            self.frame,
            self.phase,
            self.foreground_executed,
            self.completed,
            self.evaluated,
            self.pending
        )?;
        if self.unhandled_rejections > 0 {
            write!(f, ", {} unhandled rejections", self.unhandled_rejections)?;
        }
        Ok(())
    }
}

/// Processors of one phase, in creation order.
#[derive(Default)]
struct PhaseProcessors {
    index: HashMap<TypeId, usize>,
    processors: Vec<Box<dyn ErasedProcessor>>,
    last_processed_frame: Option<u64>,
}

impl PhaseProcessors {
    fn process(&mut self, frame: u64) -> ProcessStats {
        self.last_processed_frame = Some(frame);
        let mut total = ProcessStats::default();
        for processor in &mut self.processors {
            let stats = processor.process(frame);
            total.evaluated += stats.evaluated;
            total.completed += stats.completed;
        }
        total
    }

    fn pending(&self) -> usize {
        self.processors.iter().map(|p| p.pending()).sum()
    }
}

type Registration = Box<dyn FnOnce(&mut FrameScheduler) + Send>;

/// Drives wait instructions from a host frame loop.
///
/// Confined to the thread that created it (see
/// [`bind_to_current_thread`](Self::bind_to_current_thread)). Other threads
/// and continuations queue work through a [`SchedulerHandle`].
///
/// # Example
///
/// ```
/// use redlilium_promise::{CancelationToken, FramePhase, FrameScheduler, PromiseRuntime, WaitTicks};
///
/// let runtime = PromiseRuntime::new();
/// let mut scheduler = FrameScheduler::new(runtime.clone());
///
/// let done = scheduler
///     .wait_for_promise(FramePhase::Update, WaitTicks(2), &CancelationToken::none())
///     .unwrap();
///
/// scheduler.on_update_tick().unwrap();
/// assert!(!done.is_settled());
/// scheduler.on_update_tick().unwrap();
/// assert!(done.is_settled());
/// ```
pub struct FrameScheduler {
    runtime: PromiseRuntime,
    config: SchedulerConfig,
    frame: u64,
    phases: [PhaseProcessors; 3],
    runners: Arc<Mutex<RunnerTable>>,
    inbox: Arc<Mutex<Vec<Registration>>>,
    thread: ConfinedThread,
}

impl FrameScheduler {
    pub fn new(runtime: PromiseRuntime) -> Self {
        Self::with_config(runtime, SchedulerConfig::default())
    }

    pub fn with_config(runtime: PromiseRuntime, config: SchedulerConfig) -> Self {
        Self {
            runtime,
            runners: Arc::new(Mutex::new(RunnerTable::with_capacity(
                config.runner_pool_capacity,
            ))),
            config,
            frame: 0,
            phases: Default::default(),
            inbox: Arc::new(Mutex::new(Vec::new())),
            thread: ConfinedThread::current(),
        }
    }

    /// Moves the confinement to the calling thread.
    pub fn bind_to_current_thread(&mut self) {
        self.thread = ConfinedThread::current();
    }

    pub fn runtime(&self) -> &PromiseRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Frames started so far by [`on_update_tick`](Self::on_update_tick).
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// A `Send` handle for queueing work from other threads or from inside
    /// continuations.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            runtime: self.runtime.clone(),
            inbox: self.inbox.clone(),
        }
    }

    /// Instructions queued in `phase`.
    pub fn pending(&self, phase: FramePhase) -> usize {
        self.phases[phase.index()].pending()
    }

    /// Yield-instruction runners that have not completed.
    pub fn pending_runners(&self) -> usize {
        self.runners.lock().live_count()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Queues `instruction` in `phase`.
    ///
    /// Queued before the phase is processed in the current frame, it is
    /// evaluated on that tick. Queued after, it skips one rotation.
    pub fn wait_for<I: WaitInstruction>(
        &mut self,
        phase: FramePhase,
        instruction: I,
    ) -> Result<(), PromiseError> {
        self.thread.check("wait_for")?;
        self.enqueue(phase, instruction);
        Ok(())
    }

    /// Queues `wait` and returns a promise resolved on the tick it finishes.
    ///
    /// If `token` fires first, the cancel request is posted to the foreground
    /// queue; the next tick applies it and the promise is canceled without
    /// evaluating `wait` again.
    pub fn wait_for_promise<W: WaitInstruction>(
        &mut self,
        phase: FramePhase,
        wait: W,
        token: &CancelationToken,
    ) -> Result<Promise<()>, PromiseError> {
        self.thread.check("wait_for_promise")?;
        let (deferred, promise) = self.runtime.raw_deferred();
        self.start_runner(phase, wait, token, deferred);
        Ok(Promise::from_raw(promise))
    }

    fn enqueue<I: WaitInstruction>(&mut self, phase: FramePhase, instruction: I) {
        let frame = self.frame;
        let capacity = self.config.initial_queue_capacity;
        let queues = &mut self.phases[phase.index()];

        let slot = match queues.index.get(&TypeId::of::<I>()) {
            Some(&slot) => slot,
            None => {
                let processor = InstructionProcessor::<I>::with_capacity(capacity)
                    .processed_in(queues.last_processed_frame);
                log::debug!(
                    "Registered {:?} processor for {}",
                    phase,
                    ErasedProcessor::instruction_type(&processor)
                );
                queues.processors.push(Box::new(processor));
                let slot = queues.processors.len() - 1;
                queues.index.insert(TypeId::of::<I>(), slot);
                slot
            }
        };

        queues.processors[slot]
            .as_any_mut()
            .downcast_mut::<InstructionProcessor<I>>()
            .expect("Processor registry entry has the wrong instruction type")
            .enqueue(frame, instruction);
    }

    fn start_runner<W: WaitInstruction>(
        &mut self,
        phase: FramePhase,
        wait: W,
        token: &CancelationToken,
        deferred: RawDeferred,
    ) {
        if let Some(reason) = token.reason() {
            deferred.try_settle(Outcome::Canceled(reason));
            return;
        }

        let (slot, epoch) = self.runners.lock().take(deferred);
        if token.can_be_canceled() {
            let table = Arc::downgrade(&self.runners);
            let foreground = self.runtime.foreground().clone();
            let registration = token.try_register(move |reason| {
                foreground.post(Box::new(move || {
                    if let Some(table) = table.upgrade() {
                        table.lock().request_cancel(slot, epoch, reason);
                    }
                }));
            });
            match registration {
                Some(registration) => {
                    let refused = self
                        .runners
                        .lock()
                        .attach_registration(slot, epoch, registration);
                    drop(refused);
                }
                None => {
                    if let Some(reason) = token.reason() {
                        self.runners.lock().request_cancel(slot, epoch, reason);
                    }
                }
            }
        }

        let runner = YieldInstructionRunner::new(wait, slot, epoch, self.runners.clone());
        self.enqueue(phase, runner);
    }

    fn apply_inbox(&mut self) {
        loop {
            let batch = std::mem::take(&mut *self.inbox.lock());
            if batch.is_empty() {
                return;
            }
            for registration in batch {
                registration(self);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Host drive points
    // -----------------------------------------------------------------------

    /// Starts a new frame and processes the [`FramePhase::Update`] queue.
    /// Also reports unhandled rejections.
    pub fn on_update_tick(&mut self) -> Result<TickReport, PromiseError> {
        self.thread.check("on_update_tick")?;
        self.frame += 1;
        let mut report = self.tick(FramePhase::Update);
        report.unhandled_rejections = self.runtime.report_unhandled_rejections();
        log::trace!("{report}");
        Ok(report)
    }

    pub fn on_fixed_update_tick(&mut self) -> Result<TickReport, PromiseError> {
        self.thread.check("on_fixed_update_tick")?;
        let report = self.tick(FramePhase::FixedUpdate);
        log::trace!("{report}");
        Ok(report)
    }

    pub fn on_end_of_frame_tick(&mut self) -> Result<TickReport, PromiseError> {
        self.thread.check("on_end_of_frame_tick")?;
        let report = self.tick(FramePhase::EndOfFrame);
        log::trace!("{report}");
        Ok(report)
    }

    fn tick(&mut self, phase: FramePhase) -> TickReport {
        let foreground_executed = self.runtime.execute_foreground();
        self.apply_inbox();
        let stats = self.phases[phase.index()].process(self.frame);
        // Registrations made during evaluation land after the rotation.
        self.apply_inbox();

        TickReport {
            frame: self.frame,
            phase,
            foreground_executed,
            evaluated: stats.evaluated,
            completed: stats.completed,
            pending: self.pending(phase),
            unhandled_rejections: 0,
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("frame", &self.frame)
            .field("update", &self.pending(FramePhase::Update))
            .field("fixed_update", &self.pending(FramePhase::FixedUpdate))
            .field("end_of_frame", &self.pending(FramePhase::EndOfFrame))
            .finish()
    }
}

/// Queues scheduler work from any thread.
///
/// Work is applied on the scheduler's thread at the next tick, before the
/// phase is processed, or right after it if it was queued while the phase
/// was evaluating.
#[derive(Clone)]
pub struct SchedulerHandle {
    runtime: PromiseRuntime,
    inbox: Arc<Mutex<Vec<Registration>>>,
}

impl SchedulerHandle {
    pub fn wait_for<I: WaitInstruction>(&self, phase: FramePhase, instruction: I) {
        self.inbox
            .lock()
            .push(Box::new(move |scheduler| scheduler.enqueue(phase, instruction)));
    }

    /// See [`FrameScheduler::wait_for_promise`].
    pub fn wait_for_promise<W: WaitInstruction>(
        &self,
        phase: FramePhase,
        wait: W,
        token: &CancelationToken,
    ) -> Promise<()> {
        let (deferred, promise) = self.runtime.raw_deferred();
        let token = token.clone();
        self.inbox.lock().push(Box::new(move |scheduler| {
            scheduler.start_runner(phase, wait, &token, deferred)
        }));
        Promise::from_raw(promise)
    }
}
