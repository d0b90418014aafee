use std::any::{Any, type_name};

use super::instruction::WaitInstruction;

/// Counts from one `process` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ProcessStats {
    pub evaluated: usize,
    pub completed: usize,
}

/// Triple-buffered queue for one instruction type.
///
/// `next` holds what the next `process` evaluates. Instructions added after
/// this frame's `process` already ran go to `following` and skip one
/// rotation, so nothing is evaluated twice in the same frame.
pub(crate) struct InstructionProcessor<I> {
    current: Vec<I>,
    next: Vec<I>,
    following: Vec<I>,
    last_processed_frame: Option<u64>,
}

impl<I: WaitInstruction> InstructionProcessor<I> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            current: Vec::with_capacity(capacity),
            next: Vec::with_capacity(capacity),
            following: Vec::with_capacity(capacity),
            last_processed_frame: None,
        }
    }

    /// Starts the marker at `frame`, as if this processor had already run
    /// in it. Used for processors created after their phase was processed.
    pub fn processed_in(mut self, frame: Option<u64>) -> Self {
        self.last_processed_frame = frame;
        self
    }

    pub fn enqueue(&mut self, frame: u64, instruction: I) {
        if self.last_processed_frame == Some(frame) {
            self.following.push(instruction);
        } else {
            self.next.push(instruction);
        }
    }

    pub fn process(&mut self, frame: u64) -> ProcessStats {
        self.last_processed_frame = Some(frame);

        // current <- next, next <- following, following <- drained buffer.
        std::mem::swap(&mut self.current, &mut self.next);
        std::mem::swap(&mut self.next, &mut self.following);
        debug_assert!(self.following.is_empty());

        let evaluated = self.current.len();
        let carried = self.next.len();
        self.next.reserve(evaluated);
        let reserved = self.next.capacity();

        for mut instruction in self.current.drain(..) {
            if !instruction.evaluate() {
                self.next.push(instruction);
            }
        }
        // Nothing may enqueue into this processor while it evaluates.
        debug_assert_eq!(self.next.capacity(), reserved);

        let requeued = self.next.len() - carried;
        ProcessStats {
            evaluated,
            completed: evaluated - requeued,
        }
    }

    pub fn pending(&self) -> usize {
        self.current.len() + self.next.len() + self.following.len()
    }
}

/// Object-safe view of an [`InstructionProcessor`], so processors of
/// different instruction types share one registry.
pub(crate) trait ErasedProcessor: Send {
    fn process(&mut self, frame: u64) -> ProcessStats;
    fn pending(&self) -> usize;
    fn instruction_type(&self) -> &'static str;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<I: WaitInstruction> ErasedProcessor for InstructionProcessor<I> {
    fn process(&mut self, frame: u64) -> ProcessStats {
        InstructionProcessor::process(self, frame)
    }

    fn pending(&self) -> usize {
        InstructionProcessor::pending(self)
    }

    fn instruction_type(&self) -> &'static str {
        type_name::<I>()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
