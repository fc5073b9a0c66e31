// Removable storage discovery - picks the USB drive recordings are written to

pub mod lsblk;

pub use lsblk::{BlockDeviceSource, DeviceNode, Lsblk};

use crate::config::StorageConfig;
use std::path::{Path, PathBuf};

/// Marker written (and removed) to prove a candidate directory is writable
const WRITE_PROBE_FILE: &str = ".slitcam_write_test";

/// Transport of external USB drives
const USB_TRANSPORT: &str = "usb";

/// Transport of SD cards; never written to since the Pi boots from one
const MMC_TRANSPORT: &str = "mmc";

/// A writable place to put recordings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    /// Where the filesystem is mounted
    pub mountpoint: PathBuf,
    /// `mountpoint` joined with the recordings subdirectory
    pub recordings_dir: PathBuf,
    pub device: Option<String>,
    pub fstype: Option<String>,
    pub label: Option<String>,
}

impl StorageTarget {
    /// One-line summary for `usb-status`
    pub fn describe(&self) -> String {
        let mut meta = Vec::new();
        if let Some(label) = &self.label {
            meta.push(format!("label={}", label));
        }
        if let Some(fstype) = &self.fstype {
            meta.push(format!("fstype={}", fstype));
        }
        if let Some(device) = &self.device {
            meta.push(format!("dev={}", device));
        }

        if meta.is_empty() {
            format!("- {}", self.recordings_dir.display())
        } else {
            format!("- {} ({})", self.recordings_dir.display(), meta.join(", "))
        }
    }
}

/// Finds writable removable storage
pub struct StorageResolver {
    recordings_subdir: String,
    preferred_prefixes: Vec<String>,
    override_dir: Option<PathBuf>,
    source: Box<dyn BlockDeviceSource>,
}

impl StorageResolver {
    /// Resolver backed by `lsblk`
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_source(config, Box::new(Lsblk))
    }

    pub fn with_source(config: &StorageConfig, source: Box<dyn BlockDeviceSource>) -> Self {
        Self {
            recordings_subdir: config.recordings_subdir.clone(),
            preferred_prefixes: config
                .preferred_label_prefixes
                .iter()
                .map(|p| p.to_uppercase())
                .collect(),
            override_dir: config.storage_dir.clone(),
            source,
        }
    }

    /// All writable targets, best first. Never fails: a broken inventory yields no targets.
    pub fn enumerate(&self) -> Vec<StorageTarget> {
        if let Some(dir) = &self.override_dir {
            log::debug!("Storage override in effect: {}", dir.display());
            return vec![StorageTarget {
                mountpoint: dir.clone(),
                recordings_dir: dir.join(&self.recordings_subdir),
                device: None,
                fstype: None,
                label: None,
            }];
        }

        let tree = match self.source.block_devices() {
            Ok(tree) => tree,
            Err(e) => {
                log::warn!("Block device enumeration failed: {:#}", e);
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for node in lsblk::flatten(&tree) {
            let Some(mountpoint) = node.mountpoint.as_deref() else {
                continue;
            };

            if is_system_mount(mountpoint) {
                log::debug!("Ignoring system mount {} ({})", mountpoint, node.name);
                continue;
            }

            if !is_removable_candidate(node) {
                continue;
            }

            let mountpoint = PathBuf::from(mountpoint);
            let recordings_dir = mountpoint.join(&self.recordings_subdir);
            if !probe_writable(&recordings_dir) {
                log::warn!("Skipping {}: not writable (stale mount?)", recordings_dir.display());
                continue;
            }

            candidates.push(StorageTarget {
                mountpoint,
                recordings_dir,
                device: node.device_id().map(str::to_string),
                fstype: node.fstype.clone(),
                label: node.label.clone(),
            });
        }

        // No mount time in the inventory; the label/path tuple keeps the order stable
        candidates.sort_by(|a, b| {
            score(b, &self.preferred_prefixes).cmp(&score(a, &self.preferred_prefixes))
        });
        candidates
    }

    /// The best target, if any
    pub fn choose_best(&self) -> Option<StorageTarget> {
        self.enumerate().into_iter().next()
    }
}

/// Root filesystem and boot partitions are never written to
pub fn is_system_mount(mountpoint: &str) -> bool {
    Path::new(mountpoint) == Path::new("/") || mountpoint.starts_with("/boot")
}

/// USB transport, or removable media that is not an SD card
pub fn is_removable_candidate(node: &DeviceNode) -> bool {
    let transport = node.transport();
    transport == USB_TRANSPORT || (node.removable && transport != MMC_TRANSPORT)
}

/// Create `dir` if needed and round-trip a marker file through it
pub fn probe_writable(dir: &Path) -> bool {
    let probe = || -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let marker = dir.join(WRITE_PROBE_FILE);
        std::fs::write(&marker, b"ok")?;
        std::fs::remove_file(&marker)?;
        Ok(())
    };

    match probe() {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Write probe failed for {}: {}", dir.display(), e);
            false
        }
    }
}

fn score(target: &StorageTarget, prefixes: &[String]) -> (bool, String, String) {
    let label = target.label.as_deref().unwrap_or("").to_uppercase();
    let preferred = prefixes.iter().any(|p| label.starts_with(p.as_str()));
    (preferred, label, target.mountpoint.to_string_lossy().into_owned())
}
