// Recording service - the latching-switch state machine
//
// Switch ON starts a capture, switch OFF stops it and remuxes to mp4. Runs on
// one thread; the capture process is the only concurrent entity.

use super::{CaptureControl, RecordingSession, ServiceEvent, ServiceState};
use crate::button::{ButtonEdge, ButtonMonitor, InputLine};
use crate::config::Config;
use crate::error::RecorderResult;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Stem prefix of service recordings
pub const RECORDING_PREFIX: &str = "rec";

/// Elementary-stream extension written by the capture tool
pub const STREAM_EXTENSION: &str = "h264";

/// Timing knobs for the service loop
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub poll_interval: Duration,
    /// Grace period per stop tier
    pub stop_timeout: Duration,
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.button.poll_interval_ms),
            stop_timeout: Duration::from_millis(config.capture.stop_timeout_ms),
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

type Reporter = Box<dyn FnMut(&ServiceEvent) + Send>;

/// Owns the button, the capture controller and at most one live session
pub struct RecordingService<L: InputLine, C: CaptureControl> {
    output_dir: PathBuf,
    button: ButtonMonitor<L>,
    capture: C,
    options: ServiceOptions,
    state: ServiceState,
    session: Option<RecordingSession<C::Handle>>,
    level: bool,
    sessions_started: usize,
    reporter: Reporter,
}

impl<L: InputLine, C: CaptureControl> RecordingService<L, C> {
    /// Create the service, making sure `output_dir` exists
    pub fn new(
        output_dir: impl Into<PathBuf>,
        button: ButtonMonitor<L>,
        capture: C,
        options: ServiceOptions,
    ) -> RecorderResult<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            output_dir,
            button,
            capture,
            options,
            state: ServiceState::Idle,
            session: None,
            level: false,
            sessions_started: 0,
            reporter: Box::new(|event| log::debug!("{}", event)),
        })
    }

    /// Route status reports to `reporter` instead of the debug log
    pub fn with_reporter(mut self, reporter: impl FnMut(&ServiceEvent) + Send + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == ServiceState::Recording
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The live session, if recording
    pub fn session(&self) -> Option<&RecordingSession<C::Handle>> {
        self.session.as_ref()
    }

    /// Number of captures successfully started so far
    pub fn sessions_started(&self) -> usize {
        self.sessions_started
    }

    /// Take the baseline level; a switch already ON starts recording at once
    pub fn startup(&mut self) {
        let (level, initially_pressed) = self.button.check_initial_state();
        self.level = level;
        if initially_pressed {
            self.report(ServiceEvent::InitiallyPressed);
            self.start_session();
        }
    }

    /// One poll of the button, dispatching any edge
    pub fn tick(&mut self) {
        let (level, edge) = self.button.poll(self.level);
        self.level = level;
        self.handle_edge(edge);
    }

    pub fn handle_edge(&mut self, edge: ButtonEdge) {
        match (edge, self.state) {
            (ButtonEdge::None, _) => {}
            (ButtonEdge::Pressed, ServiceState::Idle) => self.start_session(),
            (ButtonEdge::Pressed, ServiceState::Recording) => self.report(ServiceEvent::PressIgnored),
            (ButtonEdge::Released, ServiceState::Recording) => self.stop_session(),
            (ButtonEdge::Released, ServiceState::Idle) => self.report(ServiceEvent::ReleaseIgnored),
        }
    }

    /// Poll until `shutdown` is raised, then tear down
    pub fn run(&mut self, shutdown: &AtomicBool) {
        self.report(ServiceEvent::Ready {
            output_dir: self.output_dir.clone(),
        });
        self.startup();

        while !shutdown.load(Ordering::SeqCst) {
            self.tick();
            std::thread::sleep(self.options.poll_interval);
        }

        self.report(ServiceEvent::ShuttingDown);
        self.shutdown();
        self.report(ServiceEvent::Stopped);
    }

    /// Stop any live capture and release the button
    pub fn shutdown(&mut self) {
        if self.session.is_some() {
            self.stop_session();
        }
        self.button.close();
    }

    fn start_session(&mut self) {
        let path = allocate_output_path(&self.output_dir, Local::now());

        match self.capture.start(&path) {
            Ok(handle) => {
                log::info!("Recording session started: {}", path.display());
                self.session = Some(RecordingSession {
                    output_path: path.clone(),
                    handle,
                    started_at: Local::now(),
                });
                self.state = ServiceState::Recording;
                self.sessions_started += 1;
                self.report(ServiceEvent::Started { path });
            }
            Err(e) => {
                log::error!("Failed to start capture: {}", e);
                self.report(ServiceEvent::Error(format!("start failed: {}", e)));
            }
        }
    }

    fn stop_session(&mut self) {
        // Cleared up front so no error path can leave a stale session behind
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.state = ServiceState::Idle;

        let outcome = match self.capture.stop(&mut session.handle, self.options.stop_timeout) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("Failed to stop capture: {}", e);
                self.report(ServiceEvent::Error(format!("stop failed: {}", e)));
                None
            }
        };

        let duration = Local::now().signed_duration_since(session.started_at);
        log::info!(
            "Recording session ended after {}s: {}",
            duration.num_seconds(),
            session.output_path.display()
        );
        self.report(ServiceEvent::Stopping {
            path: session.output_path.clone(),
            outcome,
        });

        if !session.output_path.exists() {
            self.report(ServiceEvent::Error(format!(
                "no capture output at {}",
                session.output_path.display()
            )));
            return;
        }

        match self.capture.finalize(&session.output_path) {
            Ok(path) => self.report(ServiceEvent::Converted { path }),
            Err(e) => {
                log::error!("Failed to convert {}: {}", session.output_path.display(), e);
                self.report(ServiceEvent::Error(format!("mp4 conversion failed: {}", e)));
            }
        }
    }

    fn report(&mut self, event: ServiceEvent) {
        (self.reporter)(&event);
    }
}

impl<L: InputLine, C: CaptureControl> Drop for RecordingService<L, C> {
    fn drop(&mut self) {
        if self.session.is_some() {
            log::warn!("Recording service dropped mid-session, stopping capture");
            self.shutdown();
        }
    }
}

/// `<dir>/rec_<YYYYMMDD_HHMMSS>.h264`, with `_<n>` appended to the stem if a
/// recording (or its mp4) with that stem already exists
pub fn allocate_output_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    unique_stream_path(dir, RECORDING_PREFIX, now)
}

pub(crate) fn unique_stream_path(dir: &Path, prefix: &str, now: DateTime<Local>) -> PathBuf {
    let stem = format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"));
    let taken = |stem: &str| {
        dir.join(format!("{}.{}", stem, STREAM_EXTENSION)).exists()
            || dir.join(format!("{}.mp4", stem)).exists()
    };

    if !taken(&stem) {
        return dir.join(format!("{}.{}", stem, STREAM_EXTENSION));
    }

    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", stem, n);
        if !taken(&candidate) {
            return dir.join(format!("{}.{}", candidate, STREAM_EXTENSION));
        }
        n += 1;
    }
}
