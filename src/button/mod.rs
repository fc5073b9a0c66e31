// Latching button input - level reads and edge detection

pub mod sysfs;

pub use sysfs::{Debouncer, SysfsLine};

use crate::config::ButtonConfig;
use crate::error::RecorderResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of comparing two consecutive level reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    None,
    Pressed,
    Released,
}

/// Edge between the previous and the current pressed level
pub fn edge_between(previous: bool, current: bool) -> ButtonEdge {
    match (previous, current) {
        (false, true) => ButtonEdge::Pressed,
        (true, false) => ButtonEdge::Released,
        _ => ButtonEdge::None,
    }
}

/// A debounced digital input reporting whether the switch is ON.
/// Polarity (pull-up vs pull-down wiring) is resolved by the implementation.
pub trait InputLine {
    fn is_pressed(&mut self) -> bool;

    /// Release the underlying resource
    fn close(&mut self) {}
}

impl InputLine for Box<dyn InputLine> {
    fn is_pressed(&mut self) -> bool {
        (**self).is_pressed()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Software line for desktop development; OFF unless flipped through its handle
#[derive(Debug, Clone, Default)]
pub struct FakeLine {
    level: Arc<AtomicBool>,
}

impl FakeLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared switch state; storing `true` turns the fake button ON
    pub fn handle(&self) -> Arc<AtomicBool> {
        self.level.clone()
    }
}

impl InputLine for FakeLine {
    fn is_pressed(&mut self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

/// Open the configured button line: fake when requested, sysfs GPIO otherwise
pub fn open_line(config: &ButtonConfig) -> RecorderResult<Box<dyn InputLine>> {
    if config.fake {
        log::info!("Fake GPIO mode: button will never be pressed");
        return Ok(Box::new(FakeLine::new()));
    }

    let line = SysfsLine::open(
        config.pin,
        config.gpio_base,
        config.pull_up,
        Duration::from_millis(config.bounce_ms),
    )?;
    Ok(Box::new(line))
}

/// Latching switch on top of an input line
pub struct ButtonMonitor<L: InputLine> {
    line: L,
    closed: bool,
}

impl<L: InputLine> ButtonMonitor<L> {
    pub fn new(line: L) -> Self {
        Self { line, closed: false }
    }

    /// Current pressed level (false once closed)
    pub fn level(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.line.is_pressed()
    }

    /// Read the level and compare it with `previous_level`
    pub fn poll(&mut self, previous_level: bool) -> (bool, ButtonEdge) {
        let level = self.level();
        (level, edge_between(previous_level, level))
    }

    /// Baseline read before the poll loop starts. No edge is derived from it;
    /// the caller decides what an already-ON switch means.
    pub fn check_initial_state(&mut self) -> (bool, bool) {
        let level = self.level();
        (level, level)
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.line.close();
            self.closed = true;
        }
    }
}

impl<L: InputLine> Drop for ButtonMonitor<L> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Count presses seen over `window`, polling every `interval`
pub fn count_presses<L: InputLine>(
    monitor: &mut ButtonMonitor<L>,
    window: Duration,
    interval: Duration,
) -> usize {
    let deadline = Instant::now() + window;
    let (mut level, _) = monitor.check_initial_state();
    let mut presses = 0;

    while Instant::now() < deadline {
        let (new_level, edge) = monitor.poll(level);
        level = new_level;
        match edge {
            ButtonEdge::Pressed => {
                presses += 1;
                log::debug!("Button press #{}", presses);
            }
            ButtonEdge::Released => log::debug!("Button released"),
            ButtonEdge::None => {}
        }
        std::thread::sleep(interval);
    }

    presses
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::cell::Cell;

    struct Scripted {
        levels: VecDeque<bool>,
        last: bool,
        closes: Rc<Cell<usize>>,
    }

    impl InputLine for Scripted {
        fn is_pressed(&mut self) -> bool {
            if let Some(level) = self.levels.pop_front() {
                self.last = level;
            }
            self.last
        }

        fn close(&mut self) {
            self.closes.set(self.closes.get() + 1);
        }
    }

    fn scripted(levels: &[bool]) -> (ButtonMonitor<Scripted>, Rc<Cell<usize>>) {
        let closes = Rc::new(Cell::new(0));
        let line = Scripted {
            levels: levels.iter().copied().collect(),
            last: false,
            closes: closes.clone(),
        };
        (ButtonMonitor::new(line), closes)
    }

    #[test]
    fn edge_truth_table() {
        assert_eq!(edge_between(false, false), ButtonEdge::None);
        assert_eq!(edge_between(false, true), ButtonEdge::Pressed);
        assert_eq!(edge_between(true, true), ButtonEdge::None);
        assert_eq!(edge_between(true, false), ButtonEdge::Released);
    }

    #[test]
    fn poll_tracks_level_changes() {
        let (mut monitor, _) = scripted(&[false, true, true, false]);
        let (baseline, pressed) = monitor.check_initial_state();
        assert!(!baseline && !pressed);

        let (level, edge) = monitor.poll(baseline);
        assert_eq!(edge, ButtonEdge::Pressed);
        let (level, edge) = monitor.poll(level);
        assert_eq!(edge, ButtonEdge::None);
        let (_, edge) = monitor.poll(level);
        assert_eq!(edge, ButtonEdge::Released);
    }

    #[test]
    fn initially_pressed_is_reported_without_edge() {
        let (mut monitor, _) = scripted(&[true, true]);
        assert_eq!(monitor.check_initial_state(), (true, true));
        assert_eq!(monitor.poll(true), (true, ButtonEdge::None));
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let (mut monitor, closes) = scripted(&[true]);
        monitor.close();
        monitor.close();
        assert!(!monitor.level());
        drop(monitor);
        assert_eq!(closes.get(), 1);

        let (monitor, closes) = scripted(&[]);
        drop(monitor);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn fake_line_follows_handle() {
        let line = FakeLine::new();
        let switch = line.handle();
        let mut monitor = ButtonMonitor::new(line);
        assert!(!monitor.level());
        switch.store(true, Ordering::SeqCst);
        assert_eq!(monitor.poll(false), (true, ButtonEdge::Pressed));
    }

    #[test]
    fn fake_config_opens_fake_line() {
        let config = ButtonConfig { fake: true, ..ButtonConfig::default() };
        let mut line = open_line(&config).unwrap();
        assert!(!line.is_pressed());
    }

    #[test]
    fn counts_presses_in_window() {
        let (mut monitor, _) = scripted(&[false, true, false, true, true, false]);
        let presses = count_presses(&mut monitor, Duration::from_millis(200), Duration::from_millis(5));
        assert_eq!(presses, 2);
    }
}
