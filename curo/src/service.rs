//! The role service: ties the switch coordinator, status aggregator,
//! monitor thread and policies together behind one object.
//!
//! Lock order, where multiple are held: switch lock, then the monitor
//! handle, then the registration lock. The monitor thread itself only
//! ever takes the registration lock (and `try_lock`s the switch lock),
//! so stopping it is safe from any path that has released those.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gadget::{self, GadgetPowerOverride};
use crate::monitor::{Monitor, MonitorHandle};
use crate::notify::{Notifier, NotifierCapability, Registration};
use crate::policy;
use crate::status::snapshot;
use crate::switch::{perform_switch, PartnerSignal};
use crate::sysfs::{list_dir, read_attr, write_attr, PortClass};
use crate::types::{PortStatus, PowerOperationMode, Role, RoleAxis, Status};
use crate::Result;

/// How long the controller is given to settle between `none` and `host`
/// during offline recovery.
const OFFLINE_RECOVERY_SETTLE: Duration = Duration::from_secs(1);

/// Blocking USB Type-C role service.
///
/// Role switches are serialized and block the calling thread until the
/// partner reattaches or the configured timeout passes. Registering a
/// notifier starts the uevent monitor thread; clearing it stops the
/// thread again.
pub struct RoleService {
    inner: Arc<ServiceInner>,
    monitor: Mutex<Option<MonitorHandle>>,
}

pub(crate) struct ServiceInner {
    pub(crate) config: Config,
    class: PortClass,
    /// Serializes role switches. Also held across notifier changes so a
    /// registration never changes mid-switch.
    switch_lock: Mutex<()>,
    partner: PartnerSignal,
    registration: Mutex<Option<Registration>>,
    contaminant_path: Mutex<Option<Utf8PathBuf>>,
    contaminant_present: Mutex<bool>,
    power_mode: Mutex<Option<PowerOperationMode>>,
    gadget: Mutex<GadgetPowerOverride>,
    wakeup_supported: AtomicBool,
    /// Set while the controller is known to be in host mode or lost its
    /// UDC; the next UDC arrival clears it.
    gadget_inhibited: AtomicBool,
}

impl RoleService {
    pub fn new(config: Config) -> Self {
        let class = PortClass::new(config.typec_class.clone());
        Self {
            inner: Arc::new(ServiceInner {
                config,
                class,
                switch_lock: Mutex::new(()),
                partner: PartnerSignal::default(),
                registration: Mutex::new(None),
                contaminant_path: Mutex::new(None),
                contaminant_present: Mutex::new(false),
                power_mode: Mutex::new(None),
                gadget: Mutex::new(GadgetPowerOverride::default()),
                wakeup_supported: AtomicBool::new(false),
                gadget_inhibited: AtomicBool::new(false),
            }),
            monitor: Mutex::new(None),
        }
    }

    /// Installs the notifier, runs the startup probes and starts the
    /// monitor thread if it is not already running. A second registration
    /// replaces the notifier without restarting the thread.
    pub fn register_notifier(
        &self,
        notifier: Box<dyn Notifier>,
        capability: NotifierCapability,
    ) -> Result<()> {
        let _switching = self.inner.switch_lock.lock().unwrap();
        let mut monitor = self.monitor.lock().unwrap();
        *self.inner.registration.lock().unwrap() = Some(Registration::new(notifier, capability));
        if monitor.is_none() {
            self.inner.startup_probes();
            match Monitor::spawn(Arc::clone(&self.inner)) {
                Ok(handle) => *monitor = Some(handle),
                Err(err) => {
                    *self.inner.registration.lock().unwrap() = None;
                    warn!("cannot start uevent monitor: {err}");
                    return Err(err);
                }
            }
        }
        info!("notifier registered ({capability:?})");
        Ok(())
    }

    /// Drops the notifier and stops the monitor thread.
    pub fn clear_notifier(&self) {
        let handle = {
            let _switching = self.inner.switch_lock.lock().unwrap();
            let mut monitor = self.monitor.lock().unwrap();
            *self.inner.registration.lock().unwrap() = None;
            monitor.take()
        };
        if let Some(handle) = handle {
            handle.stop();
            info!("notifier cleared, monitor stopped");
        }
    }

    /// Requests a role switch and blocks until it is confirmed or fails.
    /// The registered notifier learns the outcome either way.
    pub fn switch_role(&self, port: &str, role: Role) -> Result<()> {
        let result = self.inner.do_switch(port, role);
        match &result {
            Ok(()) => info!("switched {port} to {role}"),
            Err(err) => warn!("switching {port} to {role} failed: {err}"),
        }
        self.inner.notify_switch_result(port, role, result.is_ok());
        result
    }

    /// Recomputes the port status and delivers it to the registered
    /// notifier. No-op without a registration.
    pub fn query_port_status(&self) {
        self.inner.push_status();
    }

    /// Direct snapshot for in-process callers, with the full surface.
    pub fn port_statuses(&self) -> Result<Vec<PortStatus>> {
        let path = self.inner.contaminant_path.lock().unwrap().clone();
        snapshot(
            &self.inner.class,
            NotifierCapability::ContaminantAware,
            path.as_deref(),
        )
    }
}

impl Drop for RoleService {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.lock().unwrap().take() {
            handle.stop();
        }
    }
}

impl ServiceInner {
    fn do_switch(&self, port: &str, role: Role) -> Result<()> {
        // Validate the request before queueing on the lock.
        self.class.role_node(port, role.axis())?;
        role.sysfs_value()?;
        let _guard = self.switch_lock.lock().unwrap();
        perform_switch(
            &self.class,
            &self.partner,
            port,
            role,
            self.config.switch_timeout(),
        )
    }

    fn notify_switch_result(&self, port: &str, role: Role, success: bool) {
        if let Some(registration) = self.registration.lock().unwrap().as_ref() {
            registration.notifier.on_role_switch_result(port, role, success);
        }
    }

    fn push_status(&self) {
        let registration = self.registration.lock().unwrap();
        let Some(registration) = registration.as_ref() else {
            return;
        };
        let path = self.contaminant_path.lock().unwrap().clone();
        match snapshot(&self.class, registration.capability, path.as_deref()) {
            Ok(ports) => registration.notifier.on_status_changed(&ports, Status::Success),
            Err(err) => {
                warn!("status snapshot failed: {err}");
                registration
                    .notifier
                    .on_status_changed(&[], Status::from_error(&err));
            }
        }
    }

    /// One-time probes on first registration: contaminant node, wakeup
    /// support (with its autosuspend sweep) and the host-mode check.
    fn startup_probes(&self) {
        let path = self.config.probe_contaminant_path();
        match &path {
            Some(path) => info!("contaminant status from {path}"),
            None => info!("no contaminant status node, reporting unsupported"),
        }
        *self.contaminant_path.lock().unwrap() = path;

        let wakeup =
            policy::check_wakeup_support(&self.config.platform_devices, &self.config.usb_devices);
        self.wakeup_supported.store(wakeup, Ordering::Relaxed);

        if self.host_mode_active() {
            info!("controller already in host mode, inhibiting gadget rebind");
            self.gadget_inhibited.store(true, Ordering::Relaxed);
        }
    }

    /// Host mode shows up as an xhci child under the controller's
    /// platform device.
    fn host_mode_active(&self) -> bool {
        if self.config.controller.is_empty() {
            return false;
        }
        let dir = self.config.platform_devices.join(&self.config.controller);
        match list_dir(&dir) {
            Ok(names) => names.iter().any(|name| name.contains("xhci-hcd")),
            Err(_) => false,
        }
    }

    pub(crate) fn handle_typec_event(&self, partner_added: bool) {
        if partner_added {
            self.partner.notify_attached();
        }
        self.refresh_power_operation_mode();
        self.push_status();
    }

    /// Re-reads port0's negotiated power level and drives the gadget
    /// power override across PD entry and exit. Unchanged values are
    /// ignored, so a burst of port events acts once.
    fn refresh_power_operation_mode(&self) {
        let node = self.class.root().join("port0/power_operation_mode");
        let mode = match read_attr(&node).map(|raw| raw.parse::<PowerOperationMode>()) {
            Ok(Ok(mode)) => mode,
            Ok(Err(_)) => {
                debug!("unrecognized power operation mode on port0");
                return;
            }
            Err(_) => return,
        };

        {
            let mut current = self.power_mode.lock().unwrap();
            if *current == Some(mode) {
                return;
            }
            *current = Some(mode);
        }

        let mut gadget = self.gadget.lock().unwrap();
        let result = if mode == PowerOperationMode::PowerDelivery {
            gadget.enter_pd(&self.config.gadget_config)
        } else {
            gadget.leave_pd(&self.config.gadget_config)
        };
        if let Err(err) = result {
            warn!("gadget power override failed: {err}");
        }
    }

    pub(crate) fn handle_power_supply_event(&self) {
        let aware = self
            .registration
            .lock()
            .unwrap()
            .as_ref()
            .map(|registration| registration.capability.contaminant_aware())
            .unwrap_or(false);
        if !aware {
            return;
        }
        // The push is debounced on the contaminant value; the DRP recovery
        // runs on every report so a port missed once is retried.
        if let Some(present) = self.reevaluate_contaminant() {
            info!("contaminant state changed: present={present}");
            self.push_status();
        }
        self.recover_disconnected_ports();
    }

    /// Returns the new state only when it changed; repeated reports of
    /// the same state are debounced away.
    fn reevaluate_contaminant(&self) -> Option<bool> {
        let path = self.contaminant_path.lock().unwrap().clone()?;
        let present = match policy::read_contaminant(&path) {
            Ok(present) => present,
            Err(err) => {
                debug!("cannot read contaminant node: {err}");
                return None;
            }
        };
        let mut current = self.contaminant_present.lock().unwrap();
        if *current == present {
            return None;
        }
        *current = present;
        Some(present)
    }

    /// Puts every disconnected port back to DRP so a partner can attach
    /// in either orientation. Skipped entirely while a switch is in
    /// flight; the switch path owns the role nodes then.
    fn recover_disconnected_ports(&self) {
        let Ok(_guard) = self.switch_lock.try_lock() else {
            debug!("switch in flight, skipping port recovery");
            return;
        };
        let Ok(ports) = self.class.enumerate() else {
            return;
        };
        for (name, connected) in ports {
            if connected {
                continue;
            }
            let Ok(node) = self.class.role_node(&name, RoleAxis::Mode) else {
                continue;
            };
            if let Err(err) = write_attr(&node, "dual") {
                debug!("cannot restore {name} to dual: {err}");
            }
        }
    }

    pub(crate) fn handle_device_added(&self, devpath: &str) {
        let device = self.sysfs_dir(devpath);
        if let Err(err) = policy::check_device_autosuspend(&device) {
            debug!("autosuspend check failed for {device}: {err}");
        }
    }

    pub(crate) fn handle_interface_bound(&self, devpath: &str, interface: &str) {
        if !self.wakeup_supported.load(Ordering::Relaxed) {
            return;
        }
        let device = self.sysfs_dir(devpath);
        let iface = device.join(interface);
        if let Err(err) = policy::check_interface_autosuspend(&device, &iface) {
            debug!("autosuspend check failed for {iface}: {err}");
        }
    }

    pub(crate) fn handle_udc_event(&self, added: bool) {
        if !added {
            debug!("UDC gone, inhibiting gadget rebind");
            self.gadget_inhibited.store(true, Ordering::Relaxed);
            return;
        }
        if self.gadget_inhibited.swap(false, Ordering::Relaxed) {
            debug!("UDC back, gadget rebind no longer inhibited");
        }
        if let Some(pidfile) = &self.config.client_pidfile {
            if gadget::client_running(pidfile) {
                debug!("gadget client alive, leaving UDC binding to it");
                return;
            }
        }
        if let Err(err) = gadget::bind_udc(&self.config.gadget_udc, &self.config.controller) {
            warn!("UDC rebind failed: {err}");
        }
    }

    pub(crate) fn handle_controller_offline(&self) {
        let node = self
            .config
            .platform_devices
            .join(&self.config.controller)
            .join("mode");
        if let Err(err) = gadget::recover_host_mode(&node, OFFLINE_RECOVERY_SETTLE) {
            warn!("host mode recovery failed: {err}");
        }
    }

    fn sysfs_dir(&self, devpath: &str) -> Utf8PathBuf {
        // Devpaths are absolute; joining one verbatim would discard the
        // configured root.
        self.config.sysfs_root.join(devpath.trim_start_matches('/'))
    }
}
