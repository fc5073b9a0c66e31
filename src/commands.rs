// CLI command handlers

use crate::button::{self, ButtonMonitor};
use crate::cli::CliCommand;
use crate::config::Config;
use crate::error::{RecorderError, RecorderResult};
use crate::recording::service::unique_stream_path;
use crate::recording::{install_shutdown_flag, ProcessController, RecordingService, ServiceOptions};
use crate::storage::{StorageResolver, StorageTarget};
use chrono::Local;
use std::time::Duration;

/// Stem prefix of `record-test` clips
const TEST_CLIP_PREFIX: &str = "test";

/// Fold command-line flags into the loaded config
pub fn apply_cli_overrides(config: &mut Config, command: &CliCommand) {
    match command {
        CliCommand::GpioCheck { pin, pull_down, .. } => {
            if let Some(pin) = pin {
                config.button.pin = *pin;
            }
            if *pull_down {
                config.button.pull_up = false;
            }
        }
        CliCommand::RecordService { pin: Some(pin) } => config.button.pin = *pin,
        _ => {}
    }
}

pub fn dispatch(config: &Config, command: &CliCommand) -> RecorderResult<()> {
    match command {
        CliCommand::UsbStatus => usb_status(config),
        CliCommand::CameraCheck => camera_check(config),
        CliCommand::GpioCheck { seconds, .. } => gpio_check(config, Duration::from_secs(*seconds)),
        CliCommand::RecordTest { seconds } => record_test(config, Duration::from_secs(*seconds)),
        CliCommand::RecordService { .. } => record_service(config),
    }
}

/// Process exit code for a command result
pub fn exit_code(result: &RecorderResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.exit_code(),
    }
}

pub fn usb_status(config: &Config) -> RecorderResult<()> {
    let targets = StorageResolver::new(&config.storage).enumerate();
    if targets.is_empty() {
        return Err(RecorderError::capability("No writable USB mount targets found."));
    }

    println!("Writable USB targets:");
    for target in &targets {
        println!("{}", target.describe());
    }
    Ok(())
}

pub fn camera_check(config: &Config) -> RecorderResult<()> {
    let tool = ProcessController::new(&config.capture).resolve_tool()?;
    println!("{} is available.", tool.display());
    Ok(())
}

pub fn gpio_check(config: &Config, window: Duration) -> RecorderResult<()> {
    let line = button::open_line(&config.button)?;
    let mut monitor = ButtonMonitor::new(line);

    println!(
        "Listening on GPIO{} for {}s ({})...",
        config.button.pin,
        window.as_secs(),
        if config.button.pull_up { "pull-up" } else { "pull-down" }
    );
    let presses = button::count_presses(
        &mut monitor,
        window,
        Duration::from_millis(config.button.poll_interval_ms),
    );
    monitor.close();

    println!(
        "Observed {} button press(es) in {}s on GPIO{}.",
        presses,
        window.as_secs(),
        config.button.pin
    );
    Ok(())
}

pub fn record_test(config: &Config, duration: Duration) -> RecorderResult<()> {
    let target = require_target(config, "Recording is disabled until a USB drive is mounted.")?;
    let controller = ProcessController::new(&config.capture);
    controller.resolve_tool()?;

    let output = unique_stream_path(&target.recordings_dir, TEST_CLIP_PREFIX, Local::now());
    println!("Recording {}s to: {}", duration.as_secs(), output.display());
    controller.record_timed(&output, duration)?;
    println!("Done.");
    Ok(())
}

pub fn record_service(config: &Config) -> RecorderResult<()> {
    let target = require_target(config, "Recording service requires a USB drive.")?;
    let controller = ProcessController::new(&config.capture);
    let tool = controller.resolve_tool()?;
    let line = button::open_line(&config.button)?;
    let shutdown = install_shutdown_flag()?;

    println!("[Slitcam] Starting recording service...");
    println!("[Slitcam]   Camera: {}", tool.display());
    println!("[Slitcam]   GPIO pin: {}", config.button.pin);
    println!("[Slitcam]   Output: {}", target.recordings_dir.display());
    println!("[Slitcam]   Press Ctrl+C to stop");

    let mut service = RecordingService::new(
        target.recordings_dir,
        ButtonMonitor::new(line),
        controller,
        ServiceOptions::from_config(config),
    )?
    .with_reporter(|event| println!("[Slitcam] {}", event));

    service.run(&shutdown);
    Ok(())
}

fn require_target(config: &Config, consequence: &str) -> RecorderResult<StorageTarget> {
    let target = StorageResolver::new(&config.storage).choose_best().ok_or_else(|| {
        RecorderError::precondition(format!("No writable USB drive mounted. {}", consequence))
    })?;
    log::info!("Using storage target {}", target.describe());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_storage(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.storage_dir = Some(dir.to_path_buf());
        config
    }

    #[test]
    fn cli_flags_override_button_config() {
        let mut config = Config::default();
        apply_cli_overrides(
            &mut config,
            &CliCommand::GpioCheck { pin: Some(22), seconds: 3, pull_down: true },
        );
        assert_eq!(config.button.pin, 22);
        assert!(!config.button.pull_up);

        let mut config = Config::default();
        apply_cli_overrides(&mut config, &CliCommand::RecordService { pin: None });
        assert_eq!(config.button.pin, 17);
        assert!(config.button.pull_up);
    }

    #[test]
    fn exit_codes_follow_error_category() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(exit_code(&Err(RecorderError::precondition("no usb"))), 2);
        assert_eq!(exit_code(&Err(RecorderError::capability("no camera"))), 1);
        assert_eq!(exit_code(&Err(RecorderError::transient("ffmpeg"))), 1);
    }

    #[test]
    fn usb_status_lists_override_target() {
        let dir = tempfile::tempdir().unwrap();
        assert!(usb_status(&config_with_storage(dir.path())).is_ok());
    }

    #[test]
    fn record_test_without_camera_is_capability_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_storage(dir.path());
        config.capture.tools = vec!["no-such-camera-tool-xyz".into()];

        let result = record_test(&config, Duration::from_secs(1));
        assert!(matches!(result, Err(RecorderError::CapabilityUnavailable(_))));
        assert_eq!(exit_code(&result), 1);
    }

    #[test]
    fn gpio_check_with_fake_line_sees_no_presses() {
        let mut config = Config::default();
        config.button.fake = true;
        assert!(gpio_check(&config, Duration::from_millis(100)).is_ok());
    }
}
