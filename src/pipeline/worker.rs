use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pcap::{Active, Capture};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::queue::PacketQueue;
use super::stats::WorkerStats;
use super::{PipelineUnit, StopSignal};
use crate::config::CaptureConfig;
use crate::packet::{parse_frame, Frame, LinkType};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Result of one bounded read from a capture session
#[derive(Debug)]
pub enum NextFrame {
    Frame(Frame),
    /// Nothing arrived within the read timeout
    Timeout,
    /// The session will not produce any more frames
    Exhausted,
}

/// A live (or scripted) stream of frames from one interface.
///
/// `next_frame` blocks for at most the session's read timeout so the
/// caller can re-check its stop signal between reads.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<NextFrame>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub filter: Option<String>,
    pub snaplen: i32,
    pub promiscuous: bool,
    pub read_timeout: Duration,
}

impl From<&CaptureConfig> for SessionOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            filter: config.filter.clone(),
            snaplen: config.snaplen,
            promiscuous: config.promiscuous,
            read_timeout: config.poll_interval,
        }
    }
}

/// Opens capture sessions on named interfaces
pub trait CaptureBackend: Send + Sync {
    fn open(&self, interface: &str, options: &SessionOptions) -> Result<Box<dyn FrameSource>>;
}

/// libpcap live capture
#[derive(Debug, Default, Clone, Copy)]
pub struct PcapBackend;

impl CaptureBackend for PcapBackend {
    fn open(&self, interface: &str, options: &SessionOptions) -> Result<Box<dyn FrameSource>> {
        debug!("Opening live capture on {} with {:?}", interface, options);

        let timeout_ms = options.read_timeout.as_millis().clamp(1, i32::MAX as u128) as i32;
        let mut capture = Capture::from_device(interface)
            .with_context(|| format!("Failed to create capture on {}", interface))?
            .promisc(options.promiscuous)
            .snaplen(options.snaplen)
            .timeout(timeout_ms)
            .immediate_mode(true)
            .open()
            .with_context(|| format!("Failed to activate capture on {}", interface))?;

        if let Some(filter) = &options.filter {
            capture
                .filter(filter, true)
                .with_context(|| format!("Invalid capture filter {:?} on {}", filter, interface))?;
        }

        let datalink = capture.get_datalink();
        let link = LinkType::from_dlt(datalink.0)
            .with_context(|| format!("Cannot decode frames from {}", interface))?;

        info!("Live capture attached to {} ({:?} framing)", interface, link);
        Ok(Box::new(PcapSource { capture, link }))
    }
}

struct PcapSource {
    capture: Capture<Active>,
    link: LinkType,
}

impl FrameSource for PcapSource {
    fn next_frame(&mut self) -> Result<NextFrame> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let secs = packet.header.ts.tv_sec as i64;
                let nanos = (packet.header.ts.tv_usec as u32).saturating_mul(1000);
                let timestamp = DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now);
                Ok(NextFrame::Frame(Frame {
                    link: self.link,
                    timestamp,
                    wire_len: packet.header.len as usize,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(NextFrame::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(NextFrame::Exhausted),
            Err(e) => Err(e).context("Failed to read from capture session"),
        }
    }
}

/// Optional bounds on a single worker's run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureLimits {
    /// Stop after this many packet records were built
    pub max_packets: Option<u64>,
    /// Stop after this much wall-clock time
    pub timeout: Option<Duration>,
}

impl From<&CaptureConfig> for CaptureLimits {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            max_packets: config.max_packets_per_worker,
            timeout: config.worker_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    LimitReached,
    TimedOut,
    Exhausted,
}

/// Producer bound to one interface: frames in, packet records onto the queue
pub struct CaptureWorker {
    interface: String,
    source: Box<dyn FrameSource>,
    queue: PacketQueue,
    stats: Arc<WorkerStats>,
    limits: CaptureLimits,
}

impl CaptureWorker {
    pub fn new(
        interface: impl Into<String>,
        source: Box<dyn FrameSource>,
        queue: PacketQueue,
        stats: Arc<WorkerStats>,
        limits: CaptureLimits,
    ) -> Self {
        Self {
            interface: interface.into(),
            source,
            queue,
            stats,
            limits,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Capture until stopped, a limit is hit, or the source runs dry
    pub fn capture(&mut self, stop: &StopSignal) -> WorkerExit {
        let started = Instant::now();
        let mut produced = 0u64;

        let exit = loop {
            if stop.is_set() {
                break WorkerExit::Stopped;
            }
            if matches!(self.limits.timeout, Some(limit) if started.elapsed() >= limit) {
                break WorkerExit::TimedOut;
            }
            if matches!(self.limits.max_packets, Some(max) if produced >= max) {
                break WorkerExit::LimitReached;
            }

            match self.source.next_frame() {
                Ok(NextFrame::Frame(frame)) => {
                    if stop.is_set() {
                        break WorkerExit::Stopped;
                    }
                    if self.handle_frame(&frame) {
                        produced += 1;
                    }
                }
                Ok(NextFrame::Timeout) => continue,
                Ok(NextFrame::Exhausted) => break WorkerExit::Exhausted,
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Capture read error on {}: {:#}", self.interface, e);
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        };

        info!(
            "Capture worker for {} finished ({:?}) after {} packets",
            self.interface, exit, produced
        );
        exit
    }

    /// Returns true when the frame produced a packet record (queued or dropped)
    fn handle_frame(&self, frame: &Frame) -> bool {
        self.stats.frames_seen.fetch_add(1, Ordering::Relaxed);

        let record = match parse_frame(frame) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.stats.skipped_non_ip.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping malformed frame on {}: {}", self.interface, e);
                return false;
            }
        };

        debug!("{} captured {}", self.interface, record.summary());
        if self.queue.try_push(record) {
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Packet queue full ({} slots), dropping packet from {}",
                self.queue.capacity(),
                self.interface
            );
        }
        true
    }
}

impl PipelineUnit for CaptureWorker {
    fn name(&self) -> String {
        format!("capture-{}", self.interface)
    }

    fn run(mut self: Box<Self>, stop: StopSignal) {
        self.capture(&stop);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packet::tests::{arp_frame, tcp_frame};
    use crate::packet::Protocol;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;

    /// Replays a fixed script, then idles (or ends) like a quiet interface
    pub(crate) struct ScriptedSource {
        script: VecDeque<Result<NextFrame>>,
        idle: Option<Duration>,
    }

    impl ScriptedSource {
        pub(crate) fn new(script: Vec<Result<NextFrame>>) -> Self {
            Self { script: script.into(), idle: None }
        }

        /// After the script, keep returning timeouts, sleeping `read_timeout` each
        pub(crate) fn idling(mut self, read_timeout: Duration) -> Self {
            self.idle = Some(read_timeout);
            self
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<NextFrame> {
            if let Some(next) = self.script.pop_front() {
                return next;
            }
            match self.idle {
                Some(timeout) => {
                    thread::sleep(timeout);
                    Ok(NextFrame::Timeout)
                }
                None => Ok(NextFrame::Exhausted),
            }
        }
    }

    struct LogWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a plain-text subscriber on this thread and return what it logged
    pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || LogWriter(writer.clone()))
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.lock().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub(crate) fn ethernet(data: Vec<u8>) -> Result<NextFrame> {
        Ok(NextFrame::Frame(Frame::new(LinkType::Ethernet, Utc::now(), data)))
    }

    fn worker(script: Vec<Result<NextFrame>>, queue: &PacketQueue) -> (CaptureWorker, Arc<WorkerStats>) {
        let stats = Arc::new(WorkerStats::default());
        let worker = CaptureWorker::new(
            "eth0",
            Box::new(ScriptedSource::new(script)),
            queue.clone(),
            stats.clone(),
            CaptureLimits::default(),
        );
        (worker, stats)
    }

    #[test]
    fn test_preset_stop_enqueues_nothing() {
        let queue = PacketQueue::new(8);
        let script = (0..5).map(|_| ethernet(tcp_frame(1000, 80))).collect();
        let (mut worker, stats) = worker(script, &queue);

        let stop = StopSignal::new();
        stop.trigger();
        let started = Instant::now();

        assert_eq!(worker.capture(&stop), WorkerExit::Stopped);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().frames_seen, 0);
    }

    #[test]
    fn test_frame_without_ip_is_skipped_silently() {
        let queue = PacketQueue::new(8);
        let (mut worker, stats) = worker(vec![ethernet(arp_frame())], &queue);

        assert_eq!(worker.capture(&StopSignal::new()), WorkerExit::Exhausted);
        assert!(queue.is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.skipped_non_ip, 1);
        assert_eq!(snapshot.malformed, 0);
    }

    #[test]
    fn test_malformed_frame_does_not_stop_worker() {
        let queue = PacketQueue::new(8);
        let script = vec![
            ethernet(vec![0u8; 5]),
            ethernet(tcp_frame(1000, 80)),
        ];
        let (mut worker, stats) = worker(script, &queue);

        let logs = capture_logs(|| {
            worker.capture(&StopSignal::new());
        });
        assert_eq!(queue.len(), 1);
        assert_eq!(stats.snapshot().malformed, 1);
        assert!(logs
            .lines()
            .any(|line| line.contains("WARN") && line.contains("malformed frame on eth0")));
    }

    #[test]
    fn test_full_queue_drops_and_continues() {
        let queue = PacketQueue::new(2);
        let script = (1..=3).map(|p| ethernet(tcp_frame(p, 80))).collect();
        let (mut worker, stats) = worker(script, &queue);

        let mut exit = None;
        let logs = capture_logs(|| exit = Some(worker.capture(&StopSignal::new())));
        assert_eq!(exit, Some(WorkerExit::Exhausted));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.enqueued, 2);
        assert_eq!(snapshot.dropped_queue_full, 1);

        let warnings: Vec<&str> = logs
            .lines()
            .filter(|line| line.contains("WARN") && line.contains("queue full"))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("dropping packet from eth0"));

        // The two oldest survive, in capture order
        let first = queue.pop(Duration::from_millis(5)).unwrap();
        let second = queue.pop(Duration::from_millis(5)).unwrap();
        assert_eq!(first.src_port(), Some(1));
        assert_eq!(second.src_port(), Some(2));
        assert_eq!(first.protocol(), Protocol::Tcp);
    }

    #[test]
    fn test_read_errors_are_survived() {
        let queue = PacketQueue::new(8);
        let script = vec![
            Err(anyhow::anyhow!("interface flapped")),
            ethernet(tcp_frame(1000, 80)),
        ];
        let (mut worker, stats) = worker(script, &queue);

        worker.capture(&StopSignal::new());
        assert_eq!(stats.snapshot().read_errors, 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_packet_limit() {
        let queue = PacketQueue::new(8);
        let script = (0..5).map(|_| ethernet(tcp_frame(1000, 80))).collect();
        let stats = Arc::new(WorkerStats::default());
        let mut worker = CaptureWorker::new(
            "eth0",
            Box::new(ScriptedSource::new(script)),
            queue.clone(),
            stats,
            CaptureLimits { max_packets: Some(3), timeout: None },
        );

        assert_eq!(worker.capture(&StopSignal::new()), WorkerExit::LimitReached);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_time_limit_on_quiet_interface() {
        let queue = PacketQueue::new(8);
        let stats = Arc::new(WorkerStats::default());
        let mut worker = CaptureWorker::new(
            "eth0",
            Box::new(ScriptedSource::new(Vec::new()).idling(Duration::from_millis(5))),
            queue,
            stats,
            CaptureLimits { max_packets: None, timeout: Some(Duration::from_millis(30)) },
        );

        assert_eq!(worker.capture(&StopSignal::new()), WorkerExit::TimedOut);
    }

    #[test]
    fn test_stop_observed_within_poll_interval() {
        let poll = Duration::from_millis(20);
        let queue = PacketQueue::new(8);
        let stats = Arc::new(WorkerStats::default());
        let worker = CaptureWorker::new(
            "eth0",
            Box::new(ScriptedSource::new(Vec::new()).idling(poll)),
            queue,
            stats,
            CaptureLimits::default(),
        );

        let stop = StopSignal::new();
        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                let mut worker = worker;
                worker.capture(&stop)
            })
        };
        thread::sleep(Duration::from_millis(50));

        let stopped_at = Instant::now();
        stop.trigger();
        assert_eq!(handle.join().unwrap(), WorkerExit::Stopped);
        assert!(stopped_at.elapsed() < poll * 5);
    }
}
