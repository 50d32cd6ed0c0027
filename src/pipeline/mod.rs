//! Capture pipeline: per-interface workers feeding one persistence consumer
//! through a bounded queue, orchestrated by the capture manager.

pub mod consumer;
pub mod manager;
pub mod queue;
pub mod stats;
pub mod worker;

pub use consumer::PersistenceConsumer;
pub use manager::{
    CaptureHandle, CaptureManager, CaptureState, CaptureStatus, InterfaceStatus, StopReport,
};
pub use queue::PacketQueue;
pub use stats::{ConsumerSnapshot, PipelineStats, WorkerSnapshot};
pub use worker::{
    CaptureBackend, CaptureLimits, CaptureWorker, FrameSource, NextFrame, PcapBackend,
    SessionOptions,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Stop flag shared by every unit of a capture run; set once by the manager
#[derive(Clone, Default, Debug)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A unit of concurrency in the pipeline, run on its own OS thread
pub trait PipelineUnit: Send + 'static {
    fn name(&self) -> String;

    /// Run until `stop` is set or the unit has nothing left to do
    fn run(self: Box<Self>, stop: StopSignal);
}

/// How a unit ended when stop joined it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitExit {
    Finished,
    Panicked,
    /// Still running at the deadline; detached
    Abandoned,
}

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Running unit: a named thread plus the means to join it against a deadline
pub struct UnitHandle {
    name: String,
    thread: thread::JoinHandle<()>,
}

impl UnitHandle {
    pub fn spawn(unit: Box<dyn PipelineUnit>, stop: StopSignal) -> std::io::Result<Self> {
        let name = unit.name();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || unit.run(stop))?;
        Ok(Self { name, thread })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Join if the thread exits before `deadline`, otherwise detach it
    pub fn join_until(self, deadline: Instant) -> UnitExit {
        loop {
            if self.thread.is_finished() {
                return match self.thread.join() {
                    Ok(()) => UnitExit::Finished,
                    Err(_) => UnitExit::Panicked,
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return UnitExit::Abandoned;
            }
            thread::sleep(JOIN_POLL.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleeper {
        ignore_stop: bool,
    }

    impl PipelineUnit for Sleeper {
        fn name(&self) -> String {
            "sleeper".to_string()
        }

        fn run(self: Box<Self>, stop: StopSignal) {
            let started = Instant::now();
            while (self.ignore_stop || !stop.is_set()) && started.elapsed() < Duration::from_secs(2) {
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    struct Panicker;

    impl PipelineUnit for Panicker {
        fn name(&self) -> String {
            "panicker".to_string()
        }

        fn run(self: Box<Self>, _stop: StopSignal) {
            panic!("unit failed");
        }
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let stop = StopSignal::new();
        let clone = stop.clone();
        assert!(!clone.is_set());
        stop.trigger();
        assert!(clone.is_set());
    }

    #[test]
    fn test_cooperative_unit_finishes() {
        let stop = StopSignal::new();
        let handle = UnitHandle::spawn(Box::new(Sleeper { ignore_stop: false }), stop.clone()).unwrap();
        assert_eq!(handle.name(), "sleeper");

        stop.trigger();
        let exit = handle.join_until(Instant::now() + Duration::from_secs(1));
        assert_eq!(exit, UnitExit::Finished);
    }

    #[test]
    fn test_unresponsive_unit_is_abandoned() {
        let stop = StopSignal::new();
        let handle = UnitHandle::spawn(Box::new(Sleeper { ignore_stop: true }), stop.clone()).unwrap();

        stop.trigger();
        let started = Instant::now();
        let exit = handle.join_until(Instant::now() + Duration::from_millis(50));
        assert_eq!(exit, UnitExit::Abandoned);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_panicking_unit_is_reported() {
        let handle = UnitHandle::spawn(Box::new(Panicker), StopSignal::new()).unwrap();
        let exit = handle.join_until(Instant::now() + Duration::from_secs(1));
        assert_eq!(exit, UnitExit::Panicked);
    }
}
