//! Host-side device policy: autosuspend opt-in and wakeup capability.
//!
//! Only a small allowlist of devices is ever put into runtime suspend.
//! Everything here is best effort; a device that disappears mid-probe is
//! simply skipped.

use camino::Utf8Path;
use tracing::{debug, info};

use crate::sysfs::{list_dir, read_attr, write_attr};
use crate::Result;

/// Vendor/product pairs allowed to autosuspend when enumerated.
const AUTOSUSPEND_IDS: &[(&str, &str)] = &[("18d1", "5029")];

/// Interface classes allowed to autosuspend.
const CLASS_AUDIO: u8 = 0x01;
const CLASS_HUB: u8 = 0x09;

/// Reading `bInterfaceClass` can race enumeration and come back empty.
const INTERFACE_CLASS_RETRIES: u32 = 3;

fn can_autosuspend_device(vendor: &str, product: &str) -> bool {
    AUTOSUSPEND_IDS
        .iter()
        .any(|&(vid, pid)| vid == vendor && pid == product)
}

fn can_autosuspend_class(class: u8) -> bool {
    class == CLASS_AUDIO || class == CLASS_HUB
}

fn enable_autosuspend(device_dir: &Utf8Path) {
    if let Err(err) = write_attr(&device_dir.join("power/control"), "auto") {
        debug!("cannot enable autosuspend under {device_dir}: {err}");
    }
    if let Err(err) = write_attr(&device_dir.join("power/wakeup"), "enabled") {
        debug!("cannot enable remote wakeup under {device_dir}: {err}");
    }
}

/// Enables autosuspend for an enumerated device if its vendor/product pair
/// is on the allowlist. Returns whether it matched.
pub fn check_device_autosuspend(device_dir: &Utf8Path) -> Result<bool> {
    let vendor = read_attr(&device_dir.join("idVendor"))?;
    let product = read_attr(&device_dir.join("idProduct"))?;
    if !can_autosuspend_device(&vendor, &product) {
        return Ok(false);
    }
    info!("enabling autosuspend for {vendor}:{product} at {device_dir}");
    enable_autosuspend(device_dir);
    Ok(true)
}

/// Enables autosuspend on the parent device of a bound interface when the
/// interface class is on the allowlist. Returns whether it matched.
pub fn check_interface_autosuspend(
    device_dir: &Utf8Path,
    interface_dir: &Utf8Path,
) -> Result<bool> {
    let node = interface_dir.join("bInterfaceClass");
    let mut raw = read_attr(&node)?;
    for _ in 1..INTERFACE_CLASS_RETRIES {
        if !raw.is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
        raw = read_attr(&node)?;
    }
    let class = u8::from_str_radix(&raw, 16)?;
    if !can_autosuspend_class(class) {
        return Ok(false);
    }
    info!("enabling autosuspend for class {class:#04x} interface at {interface_dir}");
    enable_autosuspend(device_dir);
    Ok(true)
}

/// Reads the moisture detection node. The kernel reports "1" when liquid
/// is present.
pub fn read_contaminant(path: &Utf8Path) -> Result<bool> {
    Ok(read_attr(path)?.starts_with('1'))
}

/// Detects whether the platform USB controller can wake the system, by
/// probing the SuperSpeed platform device for a `power/wakeup` node. When
/// wakeup is supported, the interface autosuspend policy is applied once
/// to every interface that enumerated before the monitor started.
pub fn check_wakeup_support(platform_devices: &Utf8Path, usb_devices: &Utf8Path) -> bool {
    let supported = match list_dir(platform_devices) {
        Ok(names) => names.iter().any(|name| {
            name.contains("susb") && platform_devices.join(name).join("power/wakeup").exists()
        }),
        Err(err) => {
            debug!("cannot scan {platform_devices}: {err}");
            false
        }
    };
    info!("controller wakeup supported: {supported}");
    if !supported {
        return false;
    }

    let Ok(names) = list_dir(usb_devices) else {
        return true;
    };
    for name in names.iter().filter(|name| name.contains(':')) {
        let Some((device, _)) = name.split_once(':') else {
            continue;
        };
        if let Err(err) =
            check_interface_autosuspend(&usb_devices.join(device), &usb_devices.join(name))
        {
            debug!("autosuspend sweep skipped {name}: {err}");
        }
    }
    true
}
