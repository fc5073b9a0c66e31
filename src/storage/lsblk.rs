// Block device inventory from `lsblk -J`

use anyhow::Context;
use serde_json::Value;
use std::process::Command;

/// Columns requested from lsblk
pub const LSBLK_COLUMNS: &str = "NAME,KNAME,PATH,TRAN,RM,HOTPLUG,MOUNTPOINT,FSTYPE,LABEL,SIZE";

/// One block device or partition as reported by lsblk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceNode {
    pub name: String,
    pub kname: Option<String>,
    pub path: Option<String>,
    /// Bus class, lower-cased ("usb", "mmc", "sata", ...)
    pub transport: Option<String>,
    pub removable: bool,
    pub hotplug: bool,
    pub mountpoint: Option<String>,
    pub fstype: Option<String>,
    pub label: Option<String>,
    pub size: Option<String>,
    /// Partitions (or holders) of this device
    pub children: Vec<DeviceNode>,
}

impl DeviceNode {
    /// Device identifier to show the user: the /dev path, falling back to the kernel name
    pub fn device_id(&self) -> Option<&str> {
        self.path.as_deref().or(self.kname.as_deref())
    }

    pub fn transport(&self) -> &str {
        self.transport.as_deref().unwrap_or("")
    }
}

/// Source of the block device tree
pub trait BlockDeviceSource {
    fn block_devices(&self) -> anyhow::Result<Vec<DeviceNode>>;
}

/// Reads the device tree by running `lsblk`
pub struct Lsblk;

impl BlockDeviceSource for Lsblk {
    fn block_devices(&self) -> anyhow::Result<Vec<DeviceNode>> {
        let output = Command::new("lsblk")
            .args(["-J", "-o", LSBLK_COLUMNS])
            .output()
            .context("Failed to run lsblk")?;

        if !output.status.success() {
            anyhow::bail!(
                "lsblk exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_lsblk_json(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse lsblk JSON output into a device tree.
///
/// Entries that are not objects or have no `name` are dropped, but their
/// children are kept in place so one odd record does not hide a whole disk.
pub fn parse_lsblk_json(json: &str) -> anyhow::Result<Vec<DeviceNode>> {
    let tree: Value = serde_json::from_str(json).context("Invalid lsblk JSON")?;
    let devices = tree
        .get("blockdevices")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    Ok(parse_nodes(devices))
}

fn parse_nodes(values: &[Value]) -> Vec<DeviceNode> {
    let mut nodes = Vec::with_capacity(values.len());

    for value in values {
        let children = value
            .get("children")
            .and_then(Value::as_array)
            .map(|c| parse_nodes(c))
            .unwrap_or_default();

        match value.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => nodes.push(DeviceNode {
                name: name.to_string(),
                kname: string_field(value, "kname"),
                path: string_field(value, "path"),
                transport: string_field(value, "tran").map(|t| t.to_lowercase()),
                removable: flag_field(value, "rm"),
                hotplug: flag_field(value, "hotplug"),
                mountpoint: string_field(value, "mountpoint"),
                fstype: string_field(value, "fstype"),
                label: string_field(value, "label"),
                size: string_field(value, "size"),
                children,
            }),
            _ => {
                log::debug!("Skipping lsblk entry without a name: {}", value);
                nodes.extend(children);
            }
        }
    }

    nodes
}

/// Non-empty string field; numbers (e.g. `size` with `-b`) are stringified
fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// lsblk reports flags as booleans on recent versions and as 0/1 or "0"/"1" on older ones
fn flag_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "1" | "true"),
        _ => false,
    }
}

/// Depth-first flatten: each device is followed by its children, sibling order kept
pub fn flatten(nodes: &[DeviceNode]) -> Vec<&DeviceNode> {
    let mut out = Vec::new();
    for node in nodes {
        walk(node, &mut out);
    }
    out
}

fn walk<'a>(node: &'a DeviceNode, out: &mut Vec<&'a DeviceNode>) {
    out.push(node);
    for child in &node.children {
        walk(child, out);
    }
}
