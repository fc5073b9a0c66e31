// GPIO input through the sysfs interface (/sys/class/gpio)
//
// sysfs cannot configure pull resistors; the board's pull-up (or an external
// resistor) is assumed. With pull-up wiring the switch reads low when ON.

use super::InputLine;
use crate::error::{RecorderError, RecorderResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// How long to wait for udev to expose a freshly exported pin
const EXPORT_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);
const EXPORT_SETTLE_POLL: Duration = Duration::from_millis(50);

/// Accepts a level change only after it has been stable for the bounce window
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    stable: bool,
    candidate: Option<(bool, Instant)>,
}

impl Debouncer {
    pub fn new(initial: bool, window: Duration) -> Self {
        Self {
            window,
            stable: initial,
            candidate: None,
        }
    }

    /// Feed one raw sample taken at `now`; returns the debounced level
    pub fn update(&mut self, raw: bool, now: Instant) -> bool {
        if raw == self.stable {
            self.candidate = None;
            return self.stable;
        }

        match self.candidate {
            Some((level, since)) if level == raw => {
                if now.saturating_duration_since(since) >= self.window {
                    self.stable = raw;
                    self.candidate = None;
                }
            }
            _ => {
                if self.window.is_zero() {
                    self.stable = raw;
                } else {
                    self.candidate = Some((raw, now));
                }
            }
        }

        self.stable
    }

    pub fn level(&self) -> bool {
        self.stable
    }
}

/// A GPIO pin read through sysfs
pub struct SysfsLine {
    root: PathBuf,
    bcm_pin: u32,
    number: u32,
    active_low: bool,
    exported_by_us: bool,
    debouncer: Debouncer,
    read_failed: bool,
}

impl SysfsLine {
    /// Open BCM pin `bcm_pin` as an input
    pub fn open(
        bcm_pin: u32,
        gpio_base: Option<u32>,
        pull_up: bool,
        bounce: Duration,
    ) -> RecorderResult<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), bcm_pin, gpio_base, pull_up, bounce)
    }

    pub fn open_at(
        root: &Path,
        bcm_pin: u32,
        gpio_base: Option<u32>,
        pull_up: bool,
        bounce: Duration,
    ) -> RecorderResult<Self> {
        let unavailable = |e: std::io::Error| {
            RecorderError::capability(format!(
                "GPIO{} is not available through {}: {}",
                bcm_pin,
                root.display(),
                e
            ))
        };

        if !root.is_dir() {
            return Err(RecorderError::capability(format!(
                "No GPIO backend: {} does not exist",
                root.display()
            )));
        }

        let base = gpio_base.unwrap_or_else(|| detect_gpio_base(root));
        let number = base + bcm_pin;
        let pin_dir = root.join(format!("gpio{}", number));

        let mut exported_by_us = false;
        if !pin_dir.exists() {
            std::fs::write(root.join("export"), number.to_string()).map_err(unavailable)?;
            exported_by_us = true;
            wait_for_dir(&pin_dir).map_err(unavailable)?;
        }

        // Kernel may reject the write on pins it already owns as inputs
        if let Err(e) = std::fs::write(pin_dir.join("direction"), "in") {
            log::debug!("Could not set gpio{} direction: {}", number, e);
        }

        let raw = read_value(&pin_dir.join("value")).map_err(unavailable)?;
        let pressed = raw == pull_up_pressed_level(pull_up);

        log::info!(
            "GPIO{} opened as sysfs gpio{} ({}), initial level {}",
            bcm_pin,
            number,
            if pull_up { "pull-up" } else { "pull-down" },
            if pressed { "ON" } else { "OFF" }
        );

        Ok(Self {
            root: root.to_path_buf(),
            bcm_pin,
            number,
            active_low: pull_up,
            exported_by_us,
            debouncer: Debouncer::new(pressed, bounce),
            read_failed: false,
        })
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.number)).join("value")
    }
}

impl InputLine for SysfsLine {
    fn is_pressed(&mut self) -> bool {
        match read_value(&self.value_path()) {
            Ok(raw) => {
                self.read_failed = false;
                let pressed = raw == pull_up_pressed_level(self.active_low);
                self.debouncer.update(pressed, Instant::now())
            }
            Err(e) => {
                if !self.read_failed {
                    log::warn!("Failed to read GPIO{}: {}", self.bcm_pin, e);
                    self.read_failed = true;
                }
                self.debouncer.level()
            }
        }
    }

    fn close(&mut self) {
        if self.exported_by_us {
            if let Err(e) = std::fs::write(self.root.join("unexport"), self.number.to_string()) {
                log::debug!("Failed to unexport gpio{}: {}", self.number, e);
            }
            self.exported_by_us = false;
        }
    }
}

/// Raw pin value meaning "pressed": low with pull-up wiring, high with pull-down
fn pull_up_pressed_level(pull_up: bool) -> bool {
    !pull_up
}

fn read_value(path: &Path) -> std::io::Result<bool> {
    let contents = std::fs::read_to_string(path)?;
    match contents.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected GPIO value {:?}", other),
        )),
    }
}

fn wait_for_dir(dir: &Path) -> std::io::Result<()> {
    let deadline = Instant::now() + EXPORT_SETTLE_TIMEOUT;
    while !dir.join("value").exists() {
        if Instant::now() >= deadline {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("{} did not appear after export", dir.display()),
            ));
        }
        std::thread::sleep(EXPORT_SETTLE_POLL);
    }
    Ok(())
}

/// sysfs number of BCM GPIO 0.
///
/// Newer kernels number the SoC header from 512 (or 571 on the Pi 5), so the
/// base is read from the pinctrl gpiochip instead of assuming 0.
pub fn detect_gpio_base(root: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };

    let mut chips: Vec<(bool, u32)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("gpiochip") {
            continue;
        }
        let base = std::fs::read_to_string(entry.path().join("base"))
            .ok()
            .and_then(|b| b.trim().parse::<u32>().ok());
        let Some(base) = base else { continue };
        let is_pinctrl = std::fs::read_to_string(entry.path().join("label"))
            .map(|l| l.trim().starts_with("pinctrl-"))
            .unwrap_or(false);
        chips.push((is_pinctrl, base));
    }

    // pinctrl chips first, then lowest base
    chips.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    chips.first().map(|c| c.1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(chips: &[(&str, u32, &str)], pin_number: u32, value: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for (name, base, label) in chips {
            let chip = root.path().join(name);
            std::fs::create_dir_all(&chip).unwrap();
            std::fs::write(chip.join("base"), format!("{}\n", base)).unwrap();
            std::fs::write(chip.join("label"), format!("{}\n", label)).unwrap();
        }
        let pin = root.path().join(format!("gpio{}", pin_number));
        std::fs::create_dir_all(&pin).unwrap();
        std::fs::write(pin.join("value"), value).unwrap();
        std::fs::write(pin.join("direction"), "out").unwrap();
        root
    }

    #[test]
    fn debouncer_requires_stable_window() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut d = Debouncer::new(false, ms(50));

        assert!(!d.update(true, t0));
        assert!(!d.update(true, t0 + ms(20)));
        // bounce back resets the candidate
        assert!(!d.update(false, t0 + ms(30)));
        assert!(!d.update(true, t0 + ms(40)));
        assert!(!d.update(true, t0 + ms(80)));
        assert!(d.update(true, t0 + ms(90)));
        assert!(d.level());
    }

    #[test]
    fn zero_window_passes_through() {
        let mut d = Debouncer::new(true, Duration::ZERO);
        assert!(!d.update(false, Instant::now()));
        assert!(d.update(true, Instant::now()));
    }

    #[test]
    fn detects_pinctrl_base() {
        let root = fake_sysfs(
            &[("gpiochip0", 0, "raspberrypi-exp-gpio"), ("gpiochip512", 512, "pinctrl-bcm2711")],
            529,
            "1",
        );
        assert_eq!(detect_gpio_base(root.path()), 512);

        let plain = fake_sysfs(&[("gpiochip504", 504, "brcmvirt"), ("gpiochip0", 0, "other")], 17, "1");
        assert_eq!(detect_gpio_base(plain.path()), 0);
    }

    #[test]
    fn pull_up_line_reads_low_as_pressed() {
        let root = fake_sysfs(&[("gpiochip512", 512, "pinctrl-bcm2711")], 529, "1\n");
        let mut line = SysfsLine::open_at(root.path(), 17, None, true, Duration::ZERO).unwrap();
        assert!(!line.is_pressed());
        assert_eq!(std::fs::read_to_string(root.path().join("gpio529/direction")).unwrap(), "in");

        std::fs::write(root.path().join("gpio529/value"), "0\n").unwrap();
        assert!(line.is_pressed());
    }

    #[test]
    fn pull_down_line_reads_high_as_pressed() {
        let root = fake_sysfs(&[], 17, "1");
        let mut line = SysfsLine::open_at(root.path(), 17, Some(0), false, Duration::ZERO).unwrap();
        assert!(line.is_pressed());
    }

    #[test]
    fn read_errors_hold_last_level() {
        let root = fake_sysfs(&[], 22, "0");
        let mut line = SysfsLine::open_at(root.path(), 22, Some(0), true, Duration::ZERO).unwrap();
        assert!(line.is_pressed());
        std::fs::write(root.path().join("gpio22/value"), "garbage").unwrap();
        assert!(line.is_pressed());
    }

    #[test]
    fn missing_backend_is_capability_error() {
        let err = SysfsLine::open_at(Path::new("/nonexistent/gpio"), 17, None, true, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, RecorderError::CapabilityUnavailable(_)));
    }

    #[test]
    fn preexisting_pin_is_not_unexported() {
        let root = fake_sysfs(&[], 5, "1");
        let mut line = SysfsLine::open_at(root.path(), 5, Some(0), true, Duration::ZERO).unwrap();
        line.close();
        assert!(!root.path().join("unexport").exists());
    }
}
