use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;

/// Work posted to the confined thread.
pub type ForegroundWork = Box<dyn FnOnce() + Send>;

/// Queue of closures that must run on the confined (foreground) thread.
///
/// Any thread may [`post`](Self::post); the owner of the frame loop drains
/// the queue with [`execute`](Self::execute), normally once per tick via
/// [`FrameScheduler`](crate::FrameScheduler). Panics raised by posted work
/// propagate out of `execute` to its caller.
#[derive(Clone)]
pub struct ForegroundContext {
    sender: mpsc::Sender<ForegroundWork>,
    receiver: Arc<Mutex<mpsc::Receiver<ForegroundWork>>>,
    pending: Arc<AtomicUsize>,
}

impl ForegroundContext {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueues `work` for the next drain.
    pub fn post(&self, work: ForegroundWork) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(work).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            log::error!("Foreground queue disconnected, dropping posted work");
        }
    }

    /// Runs queued work until the queue is empty, including work posted by
    /// the work being run. Returns the number of closures executed.
    pub fn execute(&self) -> usize {
        let mut executed = 0;
        loop {
            // Receiver lock is released before the work runs.
            let next = self.receiver.lock().try_recv();
            let Ok(work) = next else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::AcqRel);
            work();
            executed += 1;
        }
        executed
    }

    /// Number of closures waiting to run.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for ForegroundContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_runs_in_post_order() {
        let context = ForegroundContext::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            context.post(Box::new(move || log.lock().push(i)));
        }
        assert_eq!(context.pending_count(), 3);
        assert_eq!(context.execute(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(context.pending_count(), 0);
    }

    #[test]
    fn work_posted_during_execute_runs_in_same_drain() {
        let context = ForegroundContext::new();
        let inner = context.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_inner = hits.clone();
        context.post(Box::new(move || {
            let hits = hits_inner.clone();
            inner.post(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(context.execute(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_from_worker_thread() {
        let context = ForegroundContext::new();
        let (result_tx, result_rx) = mpsc::channel::<u32>();

        let poster = context.clone();
        std::thread::spawn(move || {
            poster.post(Box::new(move || {
                let _ = result_tx.send(42);
            }));
        })
        .join()
        .unwrap();

        assert_eq!(context.execute(), 1);
        assert_eq!(result_rx.recv().unwrap(), 42);
    }
}
