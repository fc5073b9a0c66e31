// External capture and remux processes (rpicam-vid / libcamera-vid, ffmpeg)

use super::{CaptureControl, StopOutcome};
use crate::config::CaptureConfig;
use crate::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Poll interval while waiting for a signalled process to exit
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A running capture process
#[derive(Debug)]
pub struct CaptureProcess {
    child: Child,
    tool: PathBuf,
    started_at: DateTime<Local>,
}

impl CaptureProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// True once the process has exited (it is reaped as a side effect)
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

/// Launches and stops the camera tool and runs the mp4 remux
#[derive(Debug, Clone)]
pub struct ProcessController {
    tools: Vec<String>,
    convert_tool: String,
    framerate: u32,
    extra_args: Vec<String>,
    delete_source: bool,
}

impl ProcessController {
    pub fn new(config: &CaptureConfig) -> Self {
        let extra_args = config
            .extra_args
            .as_deref()
            .map(split_extra_args)
            .unwrap_or_default();

        Self {
            tools: config.tools.clone(),
            convert_tool: config.convert_tool.clone(),
            framerate: config.framerate,
            extra_args,
            delete_source: config.delete_source_after_convert,
        }
    }

    /// First configured capture tool found on PATH
    pub fn resolve_tool(&self) -> RecorderResult<PathBuf> {
        self.tools
            .iter()
            .find_map(|name| find_executable(name))
            .ok_or_else(|| {
                RecorderError::capability(format!(
                    "No camera tool found (tried {}). Install via: sudo apt install rpicam-apps",
                    self.tools.join(", ")
                ))
            })
    }

    /// Arguments for an indefinite h264 capture into `output`
    pub fn capture_args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-t".into(),
            "0".into(),
            "--codec".into(),
            "h264".into(),
            "--framerate".into(),
            self.framerate.to_string().into(),
            "--inline".into(),
            "--nopreview".into(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Arguments for the lossless h264 -> mp4 remux
    pub fn convert_args(&self, source: &Path, target: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-fflags".into(),
            "+genpts".into(),
            "-r".into(),
            self.framerate.to_string().into(),
            "-i".into(),
        ];
        args.push(source.as_os_str().to_owned());
        args.push("-c".into());
        args.push("copy".into());
        args.push(target.as_os_str().to_owned());
        args
    }

    /// Fixed-length capture used by `record-test`; blocks until the tool exits
    pub fn record_timed(&self, output: &Path, duration: Duration) -> RecorderResult<()> {
        // `-t 0` means "record forever" to the camera tools
        if duration.as_millis() == 0 {
            return Err(RecorderError::precondition(
                "Test recording length must be greater than zero",
            ));
        }
        let tool = self.resolve_tool()?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut args: Vec<OsString> = vec![
            "-t".into(),
            duration.as_millis().to_string().into(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));

        log::info!("Running {} for {:?} -> {}", tool.display(), duration, output.display());
        let status = Command::new(&tool)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| {
                RecorderError::transient(format!("Failed to run {}: {}", tool.display(), e))
            })?;

        check_status(&tool, status)
    }
}

impl CaptureControl for ProcessController {
    type Handle = CaptureProcess;

    fn start(&mut self, output: &Path) -> RecorderResult<CaptureProcess> {
        let tool = self.resolve_tool()?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut command = Command::new(&tool);
        command
            .args(self.capture_args(output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group: a terminal Ctrl+C reaches only the service,
        // which then stops the camera itself.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| {
            RecorderError::transient(format!("Failed to start {}: {}", tool.display(), e))
        })?;

        log::info!(
            "Capture started: {} (pid {}) -> {}",
            tool.display(),
            child.id(),
            output.display()
        );

        Ok(CaptureProcess {
            child,
            tool,
            started_at: Local::now(),
        })
    }

    fn stop(&mut self, handle: &mut CaptureProcess, timeout: Duration) -> RecorderResult<StopOutcome> {
        let outcome = stop_process(&mut handle.child, timeout)?;
        let elapsed = Local::now().signed_duration_since(handle.started_at);
        log::info!(
            "{} (pid {}) stopped after {}s: {:?}",
            handle.tool.display(),
            handle.id(),
            elapsed.num_seconds(),
            outcome
        );
        Ok(outcome)
    }

    fn finalize(&mut self, source: &Path) -> RecorderResult<PathBuf> {
        let tool = find_executable(&self.convert_tool).ok_or_else(|| {
            RecorderError::transient(format!(
                "{} not found, cannot create mp4. Install via: sudo apt install ffmpeg",
                self.convert_tool
            ))
        })?;

        let target = source.with_extension("mp4");
        let status = Command::new(&tool)
            .args(self.convert_args(source, &target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                RecorderError::transient(format!("Failed to run {}: {}", tool.display(), e))
            })?;
        check_status(&tool, status)?;

        if !target.exists() {
            return Err(RecorderError::transient(format!(
                "{} reported success but {} is missing",
                tool.display(),
                target.display()
            )));
        }

        sync_filesystems();

        if self.delete_source {
            if let Err(e) = std::fs::remove_file(source) {
                log::warn!("Failed to delete {}: {}", source.display(), e);
            }
        }

        Ok(target)
    }
}

/// Stop `child` in three tiers: SIGINT, then SIGTERM, then SIGKILL.
/// Each signalled tier gets `timeout` to take effect.
pub fn stop_process(child: &mut Child, timeout: Duration) -> RecorderResult<StopOutcome> {
    if child.try_wait()?.is_some() {
        return Ok(StopOutcome::AlreadyExited);
    }

    let interrupted = send_signal(child, Signal::Interrupt).and_then(|_| wait_for_exit(child, timeout));
    if reap_on_error(child, interrupted)? {
        return Ok(StopOutcome::Interrupted);
    }

    log::warn!("pid {} ignored SIGINT, sending SIGTERM", child.id());
    let terminated = send_signal(child, Signal::Terminate).and_then(|_| wait_for_exit(child, timeout));
    if reap_on_error(child, terminated)? {
        return Ok(StopOutcome::Terminated);
    }

    log::warn!("pid {} ignored SIGTERM, killing", child.id());
    if let Err(e) = child.kill() {
        // Raced with a late exit
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(e.into());
        }
    }
    child.wait()?;
    Ok(StopOutcome::Killed)
}

/// On a failed tier, kill and reap the child before passing the error on
fn reap_on_error(child: &mut Child, result: RecorderResult<bool>) -> RecorderResult<bool> {
    if result.is_err() {
        log::warn!("Stopping pid {} failed, killing it", child.id());
        if let Err(e) = child.kill() {
            log::debug!("Kill of pid {} failed: {}", child.id(), e);
        }
        if let Err(e) = child.wait() {
            log::debug!("Reaping pid {} failed: {}", child.id(), e);
        }
    }
    result
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Interrupt,
    Terminate,
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: Signal) -> RecorderResult<()> {
    let signo = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Terminate => libc::SIGTERM,
    };
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, signo) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err.into());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(child: &Child, _signal: Signal) -> RecorderResult<()> {
    log::debug!("No signals on this platform; pid {} will be killed", child.id());
    Ok(())
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> RecorderResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        std::thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
    }
}

fn check_status(tool: &Path, status: ExitStatus) -> RecorderResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(RecorderError::transient(format!(
            "{} exited with {}",
            tool.display(),
            status
        )))
    }
}

/// Flush written data so the stick can be pulled once the mp4 is reported
#[cfg(unix)]
fn sync_filesystems() {
    unsafe { libc::sync() };
}

#[cfg(not(unix))]
fn sync_filesystems() {}

/// Split user-supplied camera arguments with shell quoting rules; unbalanced
/// quotes fall back to plain whitespace splitting
pub fn split_extra_args(raw: &str) -> Vec<String> {
    shlex::split(raw).unwrap_or_else(|| {
        log::warn!("Unbalanced quotes in camera args, splitting on whitespace: {}", raw);
        raw.split_whitespace().map(str::to_string).collect()
    })
}

/// Locate an executable: names containing a slash are checked as given,
/// bare names are searched on PATH
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
