//! Accessing the sysfs.
//!
//! Pure I/O wrappers: attribute reads/writes, role node resolution, and
//! Type-C class directory enumeration. No concurrency logic lives here.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
};

use camino::{Utf8Path, Utf8PathBuf};
use rustix::{
    fs::{access, openat, Access, Dir, Mode, OFlags, CWD},
    path::Arg,
};

use crate::{types::RoleAxis, Error, Result};

/// Reads a sysfs attribute, trimmed of trailing whitespace.
pub fn read_attr(path: &Utf8Path) -> Result<String> {
    let fd = openat(
        CWD,
        path.as_str(),
        OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )?;
    let mut file = File::from(fd);
    let mut s = String::new();
    file.read_to_string(&mut s)?;
    s.truncate(s.trim_end().len());
    Ok(s)
}

/// Writes a sysfs attribute. The node must already exist; sysfs attributes
/// are never created from userspace.
pub fn write_attr(path: &Utf8Path, value: &str) -> Result<()> {
    let fd = openat(
        CWD,
        path.as_str(),
        OFlags::WRONLY | OFlags::TRUNC | OFlags::CLOEXEC,
        Mode::empty(),
    )?;
    File::from(fd).write_all(value.as_bytes())?;
    Ok(())
}

/// Extracts the currently-active token from a bracket-annotated role value,
/// e.g. `"[source] sink"` -> `"source"`. A value without brackets is
/// returned whole, trimmed.
pub fn extract_active(s: &str) -> &str {
    if let (Some(first), Some(last)) = (s.find('['), s.find(']')) {
        if first < last {
            return &s[first + 1..last];
        }
    }
    s.trim()
}

/// Reads a role node and resolves the active token.
pub fn read_role_node(path: &Utf8Path) -> Result<String> {
    Ok(extract_active(&read_attr(path)?).to_owned())
}

/// Lists the entry names of a directory, excluding `.` and `..`.
pub fn list_dir(path: &Utf8Path) -> Result<Vec<String>> {
    let dfd = openat(
        CWD,
        path.as_str(),
        OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
        Mode::empty(),
    )?;
    let mut names = Vec::new();
    for entry in Dir::read_from(&dfd)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.as_str().map_err(Error::from)?;
        if name == "." || name == ".." {
            continue;
        }
        names.push(name.to_owned());
    }
    Ok(names)
}

/// The Type-C class directory and the per-port control nodes beneath it.
#[derive(Debug, Clone)]
pub struct PortClass {
    root: Utf8PathBuf,
}

impl PortClass {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Validates a port name and returns its directory.
    ///
    /// `..` and names containing `/` are rejected before any I/O; everything
    /// downstream builds on this check.
    fn port_dir(&self, port: &str) -> Result<Utf8PathBuf> {
        if port.is_empty() || port == ".." || port.contains('/') {
            return Err(Error::InvalidArgument);
        }
        Ok(self.root.join(port))
    }

    /// Resolves the control node for one role axis of a port.
    ///
    /// The Mode axis prefers `port_type`; UCSI ports don't expose it, so it
    /// falls back to `data_role` there.
    pub fn role_node(&self, port: &str, axis: RoleAxis) -> Result<Utf8PathBuf> {
        let dir = self.port_dir(port)?;
        Ok(match axis {
            RoleAxis::Power => dir.join("power_role"),
            RoleAxis::Data => dir.join("data_role"),
            RoleAxis::Mode => {
                let port_type = dir.join("port_type");
                if access(port_type.as_str(), Access::EXISTS).is_ok() {
                    port_type
                } else {
                    dir.join("data_role")
                }
            }
        })
    }

    fn partner_dir(&self, port: &str) -> Result<Utf8PathBuf> {
        let dir = self.port_dir(port)?;
        Ok(Utf8PathBuf::from(format!("{dir}-partner")))
    }

    /// Reads the partner's accessory mode (`none`, `analog_audio`, `debug`).
    /// Only meaningful while a partner is attached.
    pub fn accessory_mode(&self, port: &str) -> Result<String> {
        read_attr(&self.partner_dir(port)?.join("accessory_mode"))
    }

    /// Whether the attached partner declares USB Power Delivery support.
    /// Unreadable or absent means no.
    pub fn partner_supports_pd(&self, port: &str) -> bool {
        let Ok(dir) = self.partner_dir(port) else {
            return false;
        };
        read_attr(&dir.join("supports_usb_power_delivery"))
            .map(|s| s.starts_with('y'))
            .unwrap_or(false)
    }

    /// Enumerates port names with their connected state.
    ///
    /// A `NAME-partner` entry marks `NAME` as connected and is excluded from
    /// the name set itself. Ordered by name.
    pub fn enumerate(&self) -> Result<BTreeMap<String, bool>> {
        let mut names = BTreeMap::new();
        for entry in list_dir(&self.root)? {
            match entry.strip_suffix("-partner") {
                Some(base) => {
                    names.insert(base.to_owned(), true);
                }
                None => {
                    names.entry(entry).or_insert(false);
                }
            }
        }
        Ok(names)
    }
}
