//! Role switch execution.
//!
//! Writing a role node detaches the partner; the kernel re-enumerates it
//! and the uevent monitor reports the new partner device. A switch is only
//! considered successful once that re-attach arrives, so the writer parks
//! on a condvar until the monitor thread signals it or the deadline passes.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::sysfs::{write_attr, PortClass};
use crate::types::{PortMode, Role, RoleAxis};
use crate::{Error, Result};

/// Rendezvous between a blocked role switch and the monitor thread.
#[derive(Debug, Default)]
pub(crate) struct PartnerSignal {
    attached: Mutex<bool>,
    cond: Condvar,
}

impl PartnerSignal {
    /// Called from the monitor thread when a partner device appears.
    pub(crate) fn notify_attached(&self) {
        let mut attached = self.attached.lock().unwrap();
        *attached = true;
        self.cond.notify_all();
    }

    fn clear(&self) -> std::sync::MutexGuard<'_, bool> {
        let mut attached = self.attached.lock().unwrap();
        *attached = false;
        attached
    }

    /// Waits for an attach notification, absorbing spurious wakeups. The
    /// deadline is absolute so a spurious wakeup never extends the wait.
    fn wait_attached(
        &self,
        mut guard: std::sync::MutexGuard<'_, bool>,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if *guard {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            guard = self.cond.wait_timeout(guard, remaining).unwrap().0;
        }
    }
}

/// Writes `value` to the port's role node and blocks until the partner
/// reattaches or `timeout` elapses.
///
/// A failed or timed-out switch on the mode axis falls back to `dual` so
/// the port is never left stuck in a single-role mode; power and data
/// writes have no such fallback because the kernel rejects them without
/// side effects.
pub(crate) fn perform_switch(
    class: &PortClass,
    signal: &PartnerSignal,
    port: &str,
    role: Role,
    timeout: Duration,
) -> Result<()> {
    let node = class.role_node(port, role.axis())?;
    let value = role.sysfs_value()?;

    let guard = signal.clear();
    debug!("writing {value} to {node}");
    if let Err(err) = write_attr(&node, value) {
        drop(guard);
        warn!("role write to {node} failed: {err}");
        fall_back_to_drp(class, port, role.axis());
        return Err(err);
    }

    if signal.wait_attached(guard, timeout) {
        return Ok(());
    }
    warn!("timed out waiting for partner after writing {value} to {node}");
    fall_back_to_drp(class, port, role.axis());
    Err(Error::Timeout)
}

fn fall_back_to_drp(class: &PortClass, port: &str, axis: RoleAxis) {
    if axis != RoleAxis::Mode {
        return;
    }
    let fallback = match class.role_node(port, RoleAxis::Mode) {
        Ok(node) => write_attr(&node, "dual"),
        Err(err) => Err(err),
    };
    match fallback {
        Ok(()) => debug!("port {port} restored to {}", PortMode::Drp),
        Err(err) => warn!("cannot restore port {port} to {}: {err}", PortMode::Drp),
    }
}
