//! Live packet capture pipeline for the netcreep monitoring dashboard.
//!
//! Capture workers (one per interface) sniff traffic and push normalized
//! packet records into a bounded queue; a single persistence consumer
//! drains it into a packet store that never exceeds its row cap. The
//! `CaptureManager` starts and stops the whole thing.

pub mod analysis;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod packet;
pub mod pipeline;
pub mod storage;

pub use config::CaptureConfig;
pub use error::{CaptureError, FrameError};
pub use packet::{PacketRecord, Protocol};
pub use pipeline::{CaptureHandle, CaptureManager, CaptureState, CaptureStatus, StopReport};
pub use storage::{MemoryStore, PacketStore};
