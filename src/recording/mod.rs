// Recording modules

pub mod capture;
pub mod service;
pub mod shutdown;

pub use capture::{CaptureProcess, ProcessController};
pub use service::{RecordingService, ServiceOptions};
pub use shutdown::install_shutdown_flag;

use crate::error::RecorderResult;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// State of the recording service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    /// Waiting for the switch to turn ON
    #[default]
    Idle,
    /// A capture process is running
    Recording,
}

/// The capture in progress
#[derive(Debug)]
pub struct RecordingSession<H> {
    /// Elementary stream being written
    pub output_path: PathBuf,
    pub handle: H,
    pub started_at: DateTime<Local>,
}

/// Which shutdown tier ended the capture process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Process had already exited; nothing was sent
    AlreadyExited,
    /// Exited after SIGINT (stream trailer written)
    Interrupted,
    /// Needed SIGTERM
    Terminated,
    /// Had to be killed; the stream is likely truncated
    Killed,
}

/// Lifecycle of the external capture process
pub trait CaptureControl {
    type Handle;

    /// Launch an indefinite capture writing to `output`
    fn start(&mut self, output: &Path) -> RecorderResult<Self::Handle>;

    /// Stop a capture: interrupt, then terminate, then kill, waiting `timeout` per tier
    fn stop(&mut self, handle: &mut Self::Handle, timeout: Duration) -> RecorderResult<StopOutcome>;

    /// Remux the elementary stream at `source` into a playable container
    fn finalize(&mut self, source: &Path) -> RecorderResult<PathBuf>;
}

/// Status reports from the recording service
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Ready { output_dir: PathBuf },
    InitiallyPressed,
    Started { path: PathBuf },
    PressIgnored,
    ReleaseIgnored,
    Stopping { path: PathBuf, outcome: Option<StopOutcome> },
    Converted { path: PathBuf },
    Error(String),
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEvent::Ready { output_dir } => write!(
                f,
                "Ready. Latching switch: ON=start, OFF=stop+mp4. Output directory: {}",
                output_dir.display()
            ),
            ServiceEvent::InitiallyPressed => write!(f, "Button was ON at startup, recording started"),
            ServiceEvent::Started { path } => write!(f, "START -> {}", path.display()),
            ServiceEvent::PressIgnored => write!(f, "Already recording, ignoring press"),
            ServiceEvent::ReleaseIgnored => write!(f, "Not recording, ignoring release"),
            ServiceEvent::Stopping { path, outcome } => match outcome {
                Some(outcome) => write!(f, "STOP {} ({:?})", path.display(), outcome),
                None => write!(f, "STOP {}", path.display()),
            },
            ServiceEvent::Converted { path } => write!(f, "MP4 -> {}", path.display()),
            ServiceEvent::Error(msg) => write!(f, "ERROR {}", msg),
            ServiceEvent::ShuttingDown => write!(f, "Shutting down..."),
            ServiceEvent::Stopped => write!(f, "Service stopped."),
        }
    }
}
