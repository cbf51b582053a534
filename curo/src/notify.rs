//! Client notification surface.
//!
//! A single notifier can be registered at a time. The capability it is
//! registered with decides how much of the port status it understands;
//! pre-contaminant clients never see moisture fields.

use crate::types::{PortStatus, Role, Status};

/// How much of the status surface a registered notifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifierCapability {
    /// Role and connection state only.
    Basic,
    /// Adds power operation mode awareness.
    Extended,
    /// Full surface including contaminant detection.
    #[default]
    ContaminantAware,
}

impl NotifierCapability {
    pub fn contaminant_aware(self) -> bool {
        self == NotifierCapability::ContaminantAware
    }

    /// Whether snapshots should report accessory modes; basic clients
    /// predate them.
    pub fn accessory_aware(self) -> bool {
        self != NotifierCapability::Basic
    }
}

/// Receiver for service callbacks. Callbacks are invoked from the caller's
/// thread for direct operations and from the monitor thread for
/// event-driven pushes, so implementations must be thread safe.
pub trait Notifier: Send {
    /// Delivered whenever port state may have changed, with a snapshot of
    /// every port. `status` reports whether the snapshot itself succeeded.
    fn on_status_changed(&self, ports: &[PortStatus], status: Status);

    /// Outcome of an explicitly requested role switch.
    fn on_role_switch_result(&self, port: &str, role: Role, success: bool);
}

pub(crate) struct Registration {
    pub(crate) notifier: Box<dyn Notifier>,
    pub(crate) capability: NotifierCapability,
}

impl Registration {
    pub(crate) fn new(notifier: Box<dyn Notifier>, capability: NotifierCapability) -> Self {
        Self {
            notifier,
            capability,
        }
    }
}
