//! Service configuration.
//!
//! Every sysfs location the service touches is configurable so deployments
//! can point at vendor-specific paths, and so tests can run against a
//! scratch directory instead of a live `/sys`. Values are loaded from a
//! TOML file; missing keys fall back to the defaults below.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the Type-C class hierarchy.
    pub typec_class: Utf8PathBuf,
    /// Name of the platform USB controller device. Empty disables
    /// controller-specific handling (UDC tracking, offline recovery).
    pub controller: String,
    /// Gadget configfs configuration directory holding `MaxPower` and
    /// `bmAttributes`.
    pub gadget_config: Utf8PathBuf,
    /// Gadget `UDC` bind node.
    pub gadget_udc: Utf8PathBuf,
    /// Platform bus device directory, searched for wakeup-capable
    /// controllers and for the offline-recovery mode node.
    pub platform_devices: Utf8PathBuf,
    /// USB bus device directory, swept for autosuspend candidates.
    pub usb_devices: Utf8PathBuf,
    /// Prefix prepended to uevent devpaths to obtain a filesystem path.
    pub sysfs_root: Utf8PathBuf,
    /// Moisture-detection nodes, probed in order; the first one present
    /// is used for the lifetime of the service.
    pub contaminant_candidates: Vec<Utf8PathBuf>,
    /// Pidfile of the gadget userspace client. When the recorded process
    /// is alive the service leaves UDC binding to it.
    pub client_pidfile: Option<Utf8PathBuf>,
    /// How long a role switch waits for partner re-enumeration before
    /// giving up.
    pub switch_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            typec_class: Utf8PathBuf::from("/sys/class/typec"),
            controller: String::new(),
            gadget_config: Utf8PathBuf::from("/config/usb_gadget/g1/configs/b.1"),
            gadget_udc: Utf8PathBuf::from("/config/usb_gadget/g1/UDC"),
            platform_devices: Utf8PathBuf::from("/sys/bus/platform/devices"),
            usb_devices: Utf8PathBuf::from("/sys/bus/usb/devices"),
            sysfs_root: Utf8PathBuf::from("/sys"),
            contaminant_candidates: vec![
                Utf8PathBuf::from("/sys/class/power_supply/usb/moisture_detected"),
                Utf8PathBuf::from("/sys/class/qcom-battery/moisture_detection_status"),
                Utf8PathBuf::from(
                    "/sys/bus/iio/devices/iio:device4/in_index_usb_moisture_detected_input",
                ),
            ],
            client_pidfile: None,
            switch_timeout_ms: 6000,
        }
    }
}

impl Config {
    /// Parses a configuration file. Unknown keys are rejected so typos
    /// surface at startup instead of silently using a default.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text).map_err(|err| {
            tracing::error!("failed to parse {path}: {err}");
            Error::Parse
        })?;
        tracing::info!("loaded configuration from {path}");
        Ok(config)
    }

    pub fn switch_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_timeout_ms)
    }

    /// Returns the first contaminant candidate node that exists, if any.
    pub fn probe_contaminant_path(&self) -> Option<Utf8PathBuf> {
        self.contaminant_candidates
            .iter()
            .find(|path| path.exists())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_that!(config.typec_class.as_str(), eq("/sys/class/typec"));
        assert_that!(config.controller, eq(""));
        assert_that!(config.switch_timeout(), eq(Duration::from_secs(6)));
        assert_that!(config.client_pidfile, none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("curo.toml")).unwrap();
        std::fs::write(
            &path,
            "typec_class = \"/tmp/typec\"\ncontroller = \"a600000.dwc3\"\nswitch_timeout_ms = 250\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_that!(config.typec_class.as_str(), eq("/tmp/typec"));
        assert_that!(config.controller, eq("a600000.dwc3"));
        assert_that!(config.switch_timeout(), eq(Duration::from_millis(250)));
        assert_that!(config.usb_devices.as_str(), eq("/sys/bus/usb/devices"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("curo.toml")).unwrap();
        std::fs::write(&path, "typec_clas = \"/tmp/typec\"\n").unwrap();

        assert_that!(Config::load(&path), err(eq(&Error::Parse)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert_that!(
            Config::load(Utf8Path::new("/nonexistent/curo.toml")),
            err(eq(&Error::Io(std::io::ErrorKind::NotFound)))
        );
    }

    #[test]
    fn contaminant_probe_picks_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("second"), "0\n").unwrap();

        let config = Config {
            contaminant_candidates: vec![root.join("first"), root.join("second")],
            ..Config::default()
        };
        assert_that!(config.probe_contaminant_path(), some(eq(&root.join("second"))));

        std::fs::write(root.join("first"), "0\n").unwrap();
        assert_that!(config.probe_contaminant_path(), some(eq(&root.join("first"))));
    }
}
