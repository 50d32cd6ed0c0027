use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::consumer::PersistenceConsumer;
use super::queue::PacketQueue;
use super::stats::{ConsumerSnapshot, PipelineStats, WorkerSnapshot};
use super::worker::{CaptureBackend, CaptureLimits, CaptureWorker, SessionOptions};
use super::{StopSignal, UnitExit, UnitHandle};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::interfaces::resolve_interfaces;
use crate::storage::PacketStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Interfaces are being attached; the manager lock is not held
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Running => "running",
            CaptureState::Stopping => "stopping",
        })
    }
}

/// Identifies one capture run; stale handles are ignored by stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    session: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Nothing was running for this handle
    pub already_stopped: bool,
    pub finished: usize,
    pub panicked: usize,
    /// Units still alive at the end of the grace period
    pub abandoned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStatus {
    pub name: String,
    pub active: bool,
    pub stats: WorkerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub active_workers: usize,
    pub interfaces: Vec<InterfaceStatus>,
    /// Interfaces that could not be attached, with the reason
    pub failed_interfaces: Vec<(String, String)>,
    pub queued: usize,
    pub consumer: ConsumerSnapshot,
}

struct Session {
    id: u64,
    stop: StopSignal,
    queue: PacketQueue,
    workers: Vec<(String, UnitHandle)>,
    consumer: UnitHandle,
    stats: Arc<PipelineStats>,
    failed: Vec<(String, String)>,
    grace: Duration,
}

struct Inner {
    state: CaptureState,
    session: Option<Session>,
    next_session: u64,
    /// Counters of the most recent finished run
    last_run: Option<(Arc<PipelineStats>, Vec<(String, String)>)>,
}

/// Owns the capture pipeline's lifecycle: Idle → Starting → Running → Stopping → Idle
pub struct CaptureManager {
    backend: Arc<dyn CaptureBackend>,
    store: Arc<dyn PacketStore>,
    inner: Mutex<Inner>,
}

impl CaptureManager {
    pub fn new(backend: Arc<dyn CaptureBackend>, store: Arc<dyn PacketStore>) -> Self {
        Self {
            backend,
            store,
            inner: Mutex::new(Inner {
                state: CaptureState::Idle,
                session: None,
                next_session: 0,
                last_run: None,
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn PacketStore> {
        self.store.clone()
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Running
    }

    /// Start the consumer and one worker per attachable interface.
    ///
    /// Interfaces that fail to attach are logged and skipped; the run is
    /// Running even if none attached. The manager stays in Starting while
    /// sessions are opened, so `state()` and `status()` answer meanwhile.
    pub fn start_capture(&self, config: CaptureConfig) -> Result<CaptureHandle, CaptureError> {
        config.validate()?;

        {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::Idle => inner.state = CaptureState::Starting,
                CaptureState::Starting | CaptureState::Running => {
                    return Err(CaptureError::AlreadyRunning)
                }
                state => return Err(CaptureError::NotIdle(state)),
            }
        }

        let interfaces = if config.interfaces.is_empty() {
            resolve_interfaces()
        } else {
            config.interfaces.clone()
        };
        info!(
            "Starting capture on {:?} (queue {}, store cap {})",
            interfaces, config.max_queue_depth, config.max_stored_packets
        );

        let queue = PacketQueue::new(config.max_queue_depth);
        let stop = StopSignal::new();
        let stats = Arc::new(PipelineStats::new());

        let consumer = PersistenceConsumer::new(
            queue.clone(),
            self.store.clone(),
            config.max_stored_packets,
            config.poll_interval,
            stats.consumer.clone(),
        );
        let consumer = match UnitHandle::spawn(Box::new(consumer), stop.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.lock().state = CaptureState::Idle;
                return Err(CaptureError::Spawn(e.to_string()));
            }
        };

        let options = SessionOptions::from(&config);
        let limits = CaptureLimits::from(&config);
        let mut seen = HashSet::new();
        let mut workers = Vec::new();
        let mut failed = Vec::new();

        for interface in interfaces {
            if !seen.insert(interface.clone()) {
                debug!("Interface {} listed twice, ignoring duplicate", interface);
                continue;
            }

            let source = match self.backend.open(&interface, &options) {
                Ok(source) => source,
                Err(e) => {
                    warn!("Skipping interface {}: {:#}", interface, e);
                    failed.push((interface, format!("{:#}", e)));
                    continue;
                }
            };

            let worker = CaptureWorker::new(
                interface.clone(),
                source,
                queue.clone(),
                stats.worker(&interface),
                limits,
            );
            match UnitHandle::spawn(Box::new(worker), stop.clone()) {
                Ok(handle) => workers.push((interface, handle)),
                Err(e) => {
                    warn!("Failed to spawn capture worker for {}: {}", interface, e);
                    failed.push((interface, e.to_string()));
                }
            }
        }

        if workers.is_empty() {
            warn!("No capture worker could be started; running with the consumer only");
        }

        let mut inner = self.inner.lock();
        inner.next_session += 1;
        let id = inner.next_session;
        info!(
            "Capture session {} running with {} workers ({} interfaces failed)",
            id,
            workers.len(),
            failed.len()
        );

        inner.session = Some(Session {
            id,
            stop,
            queue,
            workers,
            consumer,
            stats,
            failed,
            grace: config.stop_grace,
        });
        inner.state = CaptureState::Running;
        Ok(CaptureHandle { session: id })
    }

    /// Signal stop and join every unit within the grace period.
    ///
    /// Safe to call repeatedly; only the first call for a running handle acts.
    pub fn stop_capture(&self, handle: &CaptureHandle) -> StopReport {
        let session = {
            let mut inner = self.inner.lock();
            let current = inner.state == CaptureState::Running
                && inner.session.as_ref().is_some_and(|s| s.id == handle.session);
            if !current {
                debug!("Stop requested for session {} which is not running", handle.session);
                return StopReport {
                    already_stopped: true,
                    ..StopReport::default()
                };
            }
            inner.state = CaptureState::Stopping;
            inner.session.take()
        };
        let Some(session) = session else {
            return StopReport {
                already_stopped: true,
                ..StopReport::default()
            };
        };

        info!("Stopping capture session {}", session.id);
        session.stop.trigger();

        let deadline = Instant::now() + session.grace;
        let mut report = StopReport::default();
        let units = session
            .workers
            .into_iter()
            .map(|(_, handle)| handle)
            .chain(std::iter::once(session.consumer));
        for unit in units {
            let name = unit.name().to_string();
            match unit.join_until(deadline) {
                UnitExit::Finished => report.finished += 1,
                UnitExit::Panicked => {
                    error!("Unit {} panicked", name);
                    report.panicked += 1;
                }
                UnitExit::Abandoned => {
                    error!(
                        "Unit {} did not stop within {:?}, abandoning it",
                        name, session.grace
                    );
                    report.abandoned.push(name);
                }
            }
        }

        let mut inner = self.inner.lock();
        inner.last_run = Some((session.stats, session.failed));
        inner.state = CaptureState::Idle;
        info!(
            "Capture session {} stopped ({} finished, {} panicked, {} abandoned)",
            session.id,
            report.finished,
            report.panicked,
            report.abandoned.len()
        );
        report
    }

    /// Handle of the run in progress, if any
    pub fn current_handle(&self) -> Option<CaptureHandle> {
        let inner = self.inner.lock();
        inner
            .session
            .as_ref()
            .map(|session| CaptureHandle { session: session.id })
    }

    pub fn status(&self) -> CaptureStatus {
        let inner = self.inner.lock();
        match &inner.session {
            Some(session) => {
                let interfaces: Vec<InterfaceStatus> = session
                    .workers
                    .iter()
                    .map(|(name, handle)| InterfaceStatus {
                        name: name.clone(),
                        active: !handle.is_finished(),
                        stats: session.stats.worker(name).snapshot(),
                    })
                    .collect();
                CaptureStatus {
                    state: inner.state,
                    active_workers: interfaces.iter().filter(|i| i.active).count(),
                    interfaces,
                    failed_interfaces: session.failed.clone(),
                    queued: session.queue.len(),
                    consumer: session.stats.consumer.snapshot(),
                }
            }
            None => {
                let (interfaces, failed, consumer) = match &inner.last_run {
                    Some((stats, failed)) => (
                        stats
                            .worker_snapshots()
                            .into_iter()
                            .map(|(name, stats)| InterfaceStatus {
                                name,
                                active: false,
                                stats,
                            })
                            .collect(),
                        failed.clone(),
                        stats.consumer.snapshot(),
                    ),
                    None => (Vec::new(), Vec::new(), ConsumerSnapshot::default()),
                };
                CaptureStatus {
                    state: inner.state,
                    active_workers: 0,
                    interfaces,
                    failed_interfaces: failed,
                    queued: 0,
                    consumer,
                }
            }
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        if let Some(session) = &self.inner.get_mut().session {
            session.stop.trigger();
        }
    }
}
