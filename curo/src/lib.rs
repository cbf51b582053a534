//! Manage USB Type-C port roles on Linux.
//!
//! The kernel exposes Type-C port control as sysfs attribute files
//! (`power_role`, `data_role`, `port_type`, ...) and confirms role changes
//! asynchronously through netlink uevents. This crate mediates between the
//! two: [`service::RoleService`] writes role requests and blocks, with a
//! bounded timeout, until the confirming event arrives, while a single
//! background monitor thread consumes uevents and drives the side effects
//! (status pushes, contaminant re-evaluation, autosuspend policy, gadget
//! power renegotiation).
//!
//! Subscribers implement [`notify::Notifier`]; the monitor thread exists
//! exactly while a notifier is registered.

pub mod config;
pub mod notify;
pub mod policy;
pub mod service;
pub mod status;
pub mod sysfs;
pub mod types;

mod gadget;
mod monitor;
mod switch;
mod uevent;

use std::num::ParseIntError;

use rustix::io::Errno;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(std::io::ErrorKind),
    #[error("parse error")]
    Parse,
    /// A bad port name or an unsupported role for the requested axis.
    /// Rejected before any I/O is performed.
    #[error("invalid port name or role")]
    InvalidArgument,
    /// A role node held a value outside the known vocabulary; surfaced
    /// distinctly so callers can detect kernel/driver drift.
    #[error("unrecognized role value")]
    UnrecognizedRole,
    /// No confirming partner event arrived before the deadline.
    #[error("timed out waiting for role confirmation")]
    Timeout,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value.kind())
    }
}

impl From<Errno> for Error {
    fn from(value: Errno) -> Self {
        std::io::Error::from(value).into()
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(value: nix::errno::Errno) -> Self {
        Errno::from_raw_os_error(value as i32).into()
    }
}

impl From<strum::ParseError> for Error {
    fn from(_: strum::ParseError) -> Self {
        Error::Parse
    }
}

impl From<ParseIntError> for Error {
    fn from(_: ParseIntError) -> Self {
        Error::Parse
    }
}

pub type Result<T> = std::result::Result<T, Error>;
