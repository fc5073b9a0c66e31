// End-to-end: button press and release drive a real capture and remux
// through stand-in camera and ffmpeg scripts.
#![cfg(unix)]

use slitcam_lib::button::{ButtonMonitor, FakeLine};
use slitcam_lib::config::Config;
use slitcam_lib::recording::{ProcessController, RecordingService, ServiceEvent, ServiceOptions};
use slitcam_lib::storage::StorageResolver;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FAKE_CAMERA: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
trap 'exit 0' INT TERM
printf 'h264' > "$out"
while true; do sleep 0.05; done"#;

const FAKE_FFMPEG: &str = r#"for a in "$@"; do last="$a"; done
printf 'mp4' > "$last""#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == ext).unwrap_or(false))
        .collect();
    files.sort();
    files
}

#[test]
fn press_and_release_leave_one_stream_and_one_mp4() {
    let tools = tempfile::tempdir().unwrap();
    let usb = tempfile::tempdir().unwrap();
    let camera = script(tools.path(), "rpicam-vid", FAKE_CAMERA);
    let ffmpeg = script(tools.path(), "ffmpeg", FAKE_FFMPEG);

    let mut config = Config::default();
    config.apply_overrides_from(|key| match key {
        "SLITCAM_STORAGE_DIR" => Some(usb.path().display().to_string()),
        "SLITCAM_FAKE_GPIO" => Some("1".to_string()),
        _ => None,
    });
    config.capture.tools = vec![camera.display().to_string()];
    config.capture.convert_tool = ffmpeg.display().to_string();
    config.button.poll_interval_ms = 10;
    config.capture.stop_timeout_ms = 2000;

    let target = StorageResolver::new(&config.storage).choose_best().unwrap();
    assert_eq!(target.mountpoint, usb.path());

    let line = FakeLine::new();
    let switch = line.handle();
    let events = Arc::new(Mutex::new(Vec::<ServiceEvent>::new()));
    let sink = events.clone();

    let mut service = RecordingService::new(
        target.recordings_dir.clone(),
        ButtonMonitor::new(line),
        ProcessController::new(&config.capture),
        ServiceOptions::from_config(&config),
    )
    .unwrap()
    .with_reporter(move |event| sink.lock().unwrap().push(event.clone()));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let worker = std::thread::spawn(move || {
        service.run(&flag);
        service
    });

    switch.store(true, Ordering::SeqCst);
    let dir = target.recordings_dir.clone();
    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().iter().any(|e| matches!(e, ServiceEvent::Started { .. }))
    }));
    assert!(wait_until(Duration::from_secs(5), || files_with_extension(&dir, "h264").len() == 1));

    switch.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(10), || {
        events.lock().unwrap().iter().any(|e| matches!(e, ServiceEvent::Converted { .. }))
    }));

    shutdown.store(true, Ordering::SeqCst);
    let service = worker.join().unwrap();
    assert!(service.session().is_none());
    assert_eq!(service.sessions_started(), 1);

    let streams = files_with_extension(&dir, "h264");
    let mp4s = files_with_extension(&dir, "mp4");
    assert_eq!(streams.len(), 1);
    assert_eq!(mp4s.len(), 1);
    assert_eq!(streams[0].file_stem(), mp4s[0].file_stem());
    assert!(streams[0].file_name().unwrap().to_string_lossy().starts_with("rec_"));

    let events = events.lock().unwrap();
    assert!(!events.iter().any(|e| matches!(e, ServiceEvent::Error(_))));
    assert_eq!(events.last(), Some(&ServiceEvent::Stopped));
}

#[test]
fn shutdown_while_recording_stops_the_camera() {
    let tools = tempfile::tempdir().unwrap();
    let usb = tempfile::tempdir().unwrap();
    let camera = script(tools.path(), "rpicam-vid", FAKE_CAMERA);
    let ffmpeg = script(tools.path(), "ffmpeg", FAKE_FFMPEG);

    let mut config = Config::default();
    config.storage.storage_dir = Some(usb.path().to_path_buf());
    config.capture.tools = vec![camera.display().to_string()];
    config.capture.convert_tool = ffmpeg.display().to_string();
    config.button.poll_interval_ms = 10;

    let target = StorageResolver::new(&config.storage).choose_best().unwrap();
    let line = FakeLine::new();
    line.handle().store(true, Ordering::SeqCst);

    let mut service = RecordingService::new(
        target.recordings_dir.clone(),
        ButtonMonitor::new(line),
        ProcessController::new(&config.capture),
        ServiceOptions::from_config(&config),
    )
    .unwrap();

    // switch already ON: startup records immediately
    service.startup();
    assert!(service.is_recording());
    std::thread::sleep(Duration::from_millis(300));

    service.shutdown();
    assert!(!service.is_recording());
    assert_eq!(files_with_extension(&target.recordings_dir, "mp4").len(), 1);
}
