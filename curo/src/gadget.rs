//! Gadget-side configfs handling.
//!
//! When the charger negotiates Power Delivery the gadget must stop
//! advertising bus power draw, so the configured `MaxPower` and
//! `bmAttributes` are parked and restored when PD goes away again. The
//! module also covers rebinding the UDC after a controller bounce and
//! recovering a stuck host mode.

use std::time::Duration;

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::sysfs::{read_attr, write_attr};
use crate::Result;

/// `bmAttributes` for a self-powered configuration with remote wakeup.
const SELF_POWERED_ATTRIBUTES: &str = "0xc0";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedPower {
    max_power: String,
    attributes: String,
}

/// Parks the gadget's advertised power draw while a PD contract is active.
#[derive(Debug, Default)]
pub(crate) struct GadgetPowerOverride {
    saved: Option<SavedPower>,
}

impl GadgetPowerOverride {
    /// Saves the configured values and advertises a self-powered, zero
    /// draw configuration. Idempotent while a contract stays active.
    pub(crate) fn enter_pd(&mut self, config_dir: &Utf8Path) -> Result<()> {
        if self.saved.is_some() {
            return Ok(());
        }
        let saved = SavedPower {
            max_power: read_attr(&config_dir.join("MaxPower"))?,
            attributes: read_attr(&config_dir.join("bmAttributes"))?,
        };
        write_attr(&config_dir.join("MaxPower"), "0")?;
        write_attr(&config_dir.join("bmAttributes"), SELF_POWERED_ATTRIBUTES)?;
        info!("power delivery active, gadget power draw parked");
        self.saved = Some(saved);
        Ok(())
    }

    /// Restores the parked values once the PD contract is gone.
    pub(crate) fn leave_pd(&mut self, config_dir: &Utf8Path) -> Result<()> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        write_attr(&config_dir.join("MaxPower"), &saved.max_power)?;
        write_attr(&config_dir.join("bmAttributes"), &saved.attributes)?;
        info!("power delivery gone, gadget power draw restored");
        Ok(())
    }
}

/// Binds the gadget to the named UDC.
pub(crate) fn bind_udc(udc_node: &Utf8Path, controller: &str) -> Result<()> {
    debug!("binding gadget to {controller}");
    write_attr(udc_node, controller)
}

/// Whether the gadget userspace client recorded in the pidfile is alive.
/// When it is, UDC binding is left to it.
pub(crate) fn client_running(pidfile: &Utf8Path) -> bool {
    let pid = match read_attr(pidfile).map(|raw| raw.parse::<u32>()) {
        Ok(Ok(pid)) => pid,
        Ok(Err(err)) => {
            warn!("unparseable pid in {pidfile}: {err}");
            return false;
        }
        Err(_) => return false,
    };
    Utf8Path::new("/proc").join(pid.to_string()).exists()
}

/// Kicks a port out of a wedged host mode by cycling it through `none`.
pub(crate) fn recover_host_mode(mode_node: &Utf8Path, settle: Duration) -> Result<()> {
    warn!("controller offline, cycling {mode_node} back to host");
    write_attr(mode_node, "none")?;
    std::thread::sleep(settle);
    write_attr(mode_node, "host")
}

#[cfg(test)]
mod tests {
    use super::*;

    use camino::Utf8PathBuf;
    use googletest::prelude::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn config_dir() -> (TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("MaxPower"), "500\n").unwrap();
        std::fs::write(root.join("bmAttributes"), "0x80\n").unwrap();
        (dir, root)
    }

    fn read(path: &Utf8Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[rstest]
    fn pd_round_trip_restores_configured_values(config_dir: (TempDir, Utf8PathBuf)) {
        let (_dir, root) = config_dir;
        let mut gadget = GadgetPowerOverride::default();

        gadget.enter_pd(&root).unwrap();
        assert_that!(read(&root.join("MaxPower")), eq("0"));
        assert_that!(read(&root.join("bmAttributes")), eq("0xc0"));

        gadget.leave_pd(&root).unwrap();
        assert_that!(read(&root.join("MaxPower")), eq("500"));
        assert_that!(read(&root.join("bmAttributes")), eq("0x80"));
    }

    #[rstest]
    fn repeated_pd_does_not_clobber_saved_values(config_dir: (TempDir, Utf8PathBuf)) {
        let (_dir, root) = config_dir;
        let mut gadget = GadgetPowerOverride::default();

        gadget.enter_pd(&root).unwrap();
        gadget.enter_pd(&root).unwrap();
        gadget.leave_pd(&root).unwrap();
        assert_that!(read(&root.join("MaxPower")), eq("500"));
    }

    #[rstest]
    fn leave_without_enter_is_a_no_op(config_dir: (TempDir, Utf8PathBuf)) {
        let (_dir, root) = config_dir;
        let mut gadget = GadgetPowerOverride::default();

        assert_that!(gadget.leave_pd(&root), ok(anything()));
        assert_that!(read(&root.join("MaxPower")), eq("500\n"));
    }

    #[test]
    fn client_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let pidfile = root.join("client.pid");

        assert_that!(client_running(&pidfile), eq(false));

        std::fs::write(&pidfile, "not a pid\n").unwrap();
        assert_that!(client_running(&pidfile), eq(false));

        // Our own pid is certainly alive.
        std::fs::write(&pidfile, format!("{}\n", std::process::id())).unwrap();
        assert_that!(client_running(&pidfile), eq(true));
    }

    #[test]
    fn host_mode_recovery_cycles_through_none() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let node = root.join("mode");
        std::fs::write(&node, "host\n").unwrap();

        recover_host_mode(&node, Duration::from_millis(1)).unwrap();
        assert_that!(read(&node), eq("host"));
    }
}
