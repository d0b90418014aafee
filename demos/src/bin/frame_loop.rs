//! Simulated host loop driving promises from a frame scheduler.
//!
//! Worker threads "load" assets and report progress, each load races a
//! frame timeout, and every `--cancel-every`-th load is canceled through its
//! token. Run with `RUST_LOG=trace` to see every tick report.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use redlilium_promise::{
    CancelationSource, FramePhase, FrameScheduler, Outcome, Promise, PromiseRuntime,
    SchedulerConfig, WaitTicks,
};

/// Frame loop demo arguments.
#[derive(Parser, Debug)]
#[command(name = "frame_loop", about = "RedLilium promise scheduling demo")]
struct Args {
    /// Number of frames to run.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Number of simulated asset loads.
    #[arg(long, default_value_t = 64)]
    instructions: usize,

    /// Cancel every n-th load (0 disables cancellation).
    #[arg(long, default_value_t = 5)]
    cancel_every: usize,

    /// Frames a load may take before it times out.
    #[arg(long, default_value_t = 90)]
    timeout_frames: u32,

    /// Fixed update steps per frame.
    #[arg(long, default_value_t = 2)]
    fixed_steps: u32,
}

#[derive(Default)]
struct Tally {
    loaded: AtomicUsize,
    timed_out: AtomicUsize,
    canceled: AtomicUsize,
    failed: AtomicUsize,
}

/// Loads on a worker thread; larger ids take longer.
fn spawn_load(runtime: &PromiseRuntime, id: usize) -> Promise<usize> {
    let (deferred, promise) = runtime.deferred::<usize>();
    thread::spawn(move || {
        for chunk in 1..=4 {
            thread::sleep(Duration::from_millis((id % 7) as u64 + 1));
            if deferred.try_report_progress(chunk as f32 / 5.0) {
                continue;
            }
            return;
        }
        if id % 11 == 10 {
            deferred.try_reject(format!("asset {id} is corrupt"));
        } else {
            deferred.try_resolve(id * 1024);
        }
    });
    promise
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let runtime = PromiseRuntime::new();
    let mut scheduler = FrameScheduler::with_config(
        runtime.clone(),
        SchedulerConfig::default().with_initial_queue_capacity(args.instructions),
    );
    let tally = Arc::new(Tally::default());
    let mut sources = Vec::with_capacity(args.instructions);

    for id in 0..args.instructions {
        let source = CancelationSource::new();
        let timeout = scheduler
            .wait_for_promise(
                FramePhase::Update,
                WaitTicks(args.timeout_frames),
                &source.token(),
            )
            .expect("scheduler is used on its own thread")
            .then(|()| usize::MAX);

        let load = spawn_load(&runtime, id);
        let winner = runtime
            .race([load, timeout])
            .expect("race input is not empty");

        let tally = tally.clone();
        winner.on_settled_foreground(move |outcome| match outcome {
            Outcome::Resolved(usize::MAX) => {
                tally.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Resolved(bytes) => {
                log::debug!("Asset {id} loaded ({bytes} bytes)");
                tally.loaded.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Rejected(reason) => {
                log::warn!("Asset {id} failed: {reason}");
                tally.failed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Canceled(_) => {
                tally.canceled.fetch_add(1, Ordering::Relaxed);
            }
        });
        sources.push(source);
    }

    for frame in 1..=args.frames {
        if args.cancel_every > 0 && frame == 2 {
            for source in sources.iter().step_by(args.cancel_every) {
                source.cancel_with("load abandoned");
            }
        }

        let update = scheduler.on_update_tick().expect("host loop thread");
        for _ in 0..args.fixed_steps {
            scheduler
                .on_fixed_update_tick()
                .expect("host loop thread");
        }
        scheduler.on_end_of_frame_tick().expect("host loop thread");

        if frame % 30 == 0 {
            log::info!("{update}");
        }
        thread::sleep(Duration::from_millis(1));
    }

    // Settle stragglers posted by the workers after the last frame.
    runtime.execute_foreground();

    log::info!(
        "Done after {} frames: {} loaded, {} timed out, {} canceled, {} failed, {} live promises",
        scheduler.frame(),
        tally.loaded.load(Ordering::Relaxed),
        tally.timed_out.load(Ordering::Relaxed),
        tally.canceled.load(Ordering::Relaxed),
        tally.failed.load(Ordering::Relaxed),
        runtime.live_promise_count(),
    );
}
