// Serial device discovery
//
// Lists candidate tty devices from the kernel's tty class directory and, for
// USB adapters, looks up the stable id from the by-id symlink directory.
//
// Both scans are read-only and stateless; every call re-reads the filesystem.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

pub const SYS_CLASS_TTY: &str = "/sys/class/tty";
pub const SERIAL_BY_ID: &str = "/dev/serial/by-id";
pub const DEV_DIR: &str = "/dev";

/// Driver behind the legacy on-board UART slots. The kernel registers a tty
/// for every slot whether or not a UART sits behind it.
const GENERIC_UART_DRIVER: &str = "serial8250";

// ============================================================================
// Types
// ============================================================================

/// A candidate device and, when USB-backed, its stable id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SerialDeviceInfo {
    pub path: String,
    pub usb_id: Option<String>,
}

/// Filesystem roots used by the scan. `Default` points at the live system.
#[derive(Clone, Debug)]
pub struct DeviceScanner {
    tty_class_dir: PathBuf,
    by_id_dir: PathBuf,
    dev_dir: PathBuf,
}

impl Default for DeviceScanner {
    fn default() -> Self {
        Self::new(SYS_CLASS_TTY, SERIAL_BY_ID, DEV_DIR)
    }
}

impl DeviceScanner {
    pub fn new(tty_class_dir: impl Into<PathBuf>, by_id_dir: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            tty_class_dir: tty_class_dir.into(),
            by_id_dir: by_id_dir.into(),
            dev_dir: dev_dir.into(),
        }
    }

    /// Device paths of every tty with a bound driver, minus generic UART
    /// slots with no hardware behind them. Sorted; empty if the class
    /// directory can't be read.
    pub fn list_serial_devices(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.tty_class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tlog!("[device_scan] Cannot open {}: {}", self.tty_class_dir.display(), e);
                return Vec::new();
            }
        };

        let mut devices: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || !name.starts_with("tty") {
                    return None;
                }
                if !is_attached(&entry.path()) {
                    return None;
                }
                Some(self.dev_dir.join(&name).to_string_lossy().into_owned())
            })
            .collect();

        devices.sort();
        devices
    }

    /// Stable USB id for `device_path`, e.g. `/dev/ttyUSB0` -> `FTDI_FT232R_A50285BI`.
    ///
    /// Only paths naming a USB tty are looked up. The id is the part of the
    /// by-id link name between its first and second hyphen.
    pub fn resolve_usb_id(&self, device_path: &str) -> Option<String> {
        if !device_path.contains("USB") {
            return None;
        }

        let entries = match fs::read_dir(&self.by_id_dir) {
            Ok(entries) => entries,
            Err(_) => {
                tlog!("[device_scan] No USB serial devices detected");
                return None;
            }
        };

        let wanted = fs::canonicalize(device_path).unwrap_or_else(|_| PathBuf::from(device_path));

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            let link_path = entry.path();
            match fs::symlink_metadata(&link_path) {
                Ok(meta) if meta.file_type().is_symlink() => {}
                Ok(_) => continue,
                Err(e) => {
                    tlog!("[device_scan] lstat {} failed: {}", link_path.display(), e);
                    continue;
                }
            }

            let target = match fs::canonicalize(&link_path) {
                Ok(target) => target,
                Err(e) => {
                    tlog!("[device_scan] Cannot resolve {}: {}", link_path.display(), e);
                    continue;
                }
            };

            if target == wanted {
                return usb_id_from_link_name(&name);
            }
        }

        None
    }

    /// Every candidate device with its USB id, if it has one.
    pub fn describe_devices(&self) -> Vec<SerialDeviceInfo> {
        self.list_serial_devices()
            .into_iter()
            .map(|path| {
                let usb_id = self.resolve_usb_id(&path);
                SerialDeviceInfo { path, usb_id }
            })
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// True when the tty at `entry` has a bound driver, and, for generic UART
/// slots, the kernel detected a UART (non-zero `type`).
fn is_attached(entry: &Path) -> bool {
    let driver = entry.join("device").join("driver");
    if !driver.exists() {
        return false;
    }
    if !driver.join(GENERIC_UART_DRIVER).exists() {
        return true;
    }
    fs::read_to_string(entry.join("type"))
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .is_some_and(|uart_type| uart_type != 0)
}

/// `usb-VendorX_SerialY-if00-port0` -> `VendorX_SerialY`
pub fn usb_id_from_link_name(name: &str) -> Option<String> {
    let mut parts = name.splitn(3, '-');
    parts.next()?;
    let id = parts.next()?;
    // Require the closing hyphen.
    parts.next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// `\n`-joined device list, no trailing newline.
pub fn format_device_list(devices: &[String]) -> String {
    devices.join("\n")
}

/// `DeviceScanner::list_serial_devices` on the live system.
pub fn list_serial_devices() -> Vec<String> {
    DeviceScanner::default().list_serial_devices()
}

/// `DeviceScanner::resolve_usb_id` on the live system.
pub fn resolve_usb_id(device_path: &str) -> Option<String> {
    DeviceScanner::default().resolve_usb_id(device_path)
}

/// `DeviceScanner::describe_devices` on the live system.
pub fn describe_devices() -> Vec<SerialDeviceInfo> {
    DeviceScanner::default().describe_devices()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// sysfs-like tree: `<root>/class/tty/<name>/device/driver[/serial8250]`
    fn add_tty(root: &Path, name: &str, generic_uart: Option<u32>) {
        let entry = root.join("class/tty").join(name);
        let driver = entry.join("device/driver");
        fs::create_dir_all(&driver).unwrap();
        if let Some(uart_type) = generic_uart {
            fs::create_dir_all(driver.join(GENERIC_UART_DRIVER)).unwrap();
            fs::write(entry.join("type"), format!("{}\n", uart_type)).unwrap();
        }
    }

    fn scanner(root: &Path) -> DeviceScanner {
        DeviceScanner::new(root.join("class/tty"), root.join("by-id"), root.join("dev"))
    }

    #[test]
    fn test_list_skips_unpopulated_generic_uart() {
        let tmp = TempDir::new().unwrap();
        add_tty(tmp.path(), "ttyUSB0", None);
        add_tty(tmp.path(), "ttyS0", Some(0));

        let devices = scanner(tmp.path()).list_serial_devices();
        let expected = tmp.path().join("dev/ttyUSB0").to_string_lossy().into_owned();
        assert_eq!(devices, vec![expected]);
    }

    #[test]
    fn test_list_keeps_detected_generic_uart() {
        let tmp = TempDir::new().unwrap();
        add_tty(tmp.path(), "ttyUSB0", None);
        add_tty(tmp.path(), "ttyS1", Some(4));
        add_tty(tmp.path(), "ttyS2", Some(0));

        let names: Vec<String> = scanner(tmp.path())
            .list_serial_devices()
            .iter()
            .map(|p| Path::new(p).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ttyS1", "ttyUSB0"]);
    }

    #[test]
    fn test_list_ignores_driverless_and_non_tty_entries() {
        let tmp = TempDir::new().unwrap();
        add_tty(tmp.path(), "ttyAMA0", None);
        fs::create_dir_all(tmp.path().join("class/tty/tty0")).unwrap();
        fs::create_dir_all(tmp.path().join("class/tty/console/device/driver")).unwrap();

        let devices = scanner(tmp.path()).list_serial_devices();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].ends_with("ttyAMA0"));
    }

    #[test]
    fn test_list_missing_class_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(scanner(tmp.path()).list_serial_devices().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_usb_id() {
        let tmp = TempDir::new().unwrap();
        let dev = tmp.path().join("dev");
        let by_id = tmp.path().join("by-id");
        fs::create_dir_all(&dev).unwrap();
        fs::create_dir_all(&by_id).unwrap();
        fs::write(dev.join("ttyUSB0"), b"").unwrap();
        fs::write(dev.join("ttyUSB1"), b"").unwrap();
        std::os::unix::fs::symlink("../dev/ttyUSB1", by_id.join("usb-Other_Adapter-if00")).unwrap();
        std::os::unix::fs::symlink("../dev/ttyUSB0", by_id.join("usb-VendorX_SerialY-if00")).unwrap();

        let scanner = scanner(tmp.path());
        let usb0 = dev.join("ttyUSB0").to_string_lossy().into_owned();
        assert_eq!(scanner.resolve_usb_id(&usb0).as_deref(), Some("VendorX_SerialY"));

        let usb1 = dev.join("ttyUSB1").to_string_lossy().into_owned();
        assert_eq!(scanner.resolve_usb_id(&usb1).as_deref(), Some("Other_Adapter"));

        let usb7 = dev.join("ttyUSB7").to_string_lossy().into_owned();
        assert_eq!(scanner.resolve_usb_id(&usb7), None);
    }

    #[test]
    fn test_resolve_usb_id_non_usb_path() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(scanner(tmp.path()).resolve_usb_id("/dev/ttyS0"), None);
        assert_eq!(scanner(tmp.path()).resolve_usb_id("/dev/ttyUSB0"), None);
    }

    #[test]
    fn test_usb_id_from_link_name() {
        assert_eq!(usb_id_from_link_name("usb-VendorX_SerialY-if00").as_deref(), Some("VendorX_SerialY"));
        assert_eq!(
            usb_id_from_link_name("usb-FTDI_FT232R_USB_UART_A50285BI-if00-port0").as_deref(),
            Some("FTDI_FT232R_USB_UART_A50285BI")
        );
        assert_eq!(usb_id_from_link_name("usb-NoSuffix"), None);
        assert_eq!(usb_id_from_link_name("usb--if00"), None);
        assert_eq!(usb_id_from_link_name("plain"), None);
    }

    #[test]
    fn test_format_device_list() {
        let devices = vec!["/dev/ttyS1".to_string(), "/dev/ttyUSB0".to_string()];
        assert_eq!(format_device_list(&devices), "/dev/ttyS1\n/dev/ttyUSB0");
        assert_eq!(format_device_list(&[]), "");
    }
}
