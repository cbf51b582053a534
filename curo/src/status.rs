//! Port status snapshots.
//!
//! A snapshot is recomputed from sysfs on every request; there is no
//! cached copy to go stale. Any read or parse failure on a connected
//! port aborts the whole snapshot, so a delivered snapshot is always
//! internally consistent.

use camino::Utf8Path;

use crate::notify::NotifierCapability;
use crate::policy::read_contaminant;
use crate::sysfs::{read_role_node, PortClass};
use crate::types::{ContaminantStatus, DataRole, PortMode, PortStatus, PowerRole, RoleAxis};
use crate::{Error, Result};

/// Builds a status entry for every port, ordered by name.
///
/// Contaminant state is only attached to `port0`, the only port the
/// detection hardware covers, and only for contaminant-aware clients.
pub fn snapshot(
    class: &PortClass,
    capability: NotifierCapability,
    contaminant_path: Option<&Utf8Path>,
) -> Result<Vec<PortStatus>> {
    let mut ports = Vec::new();
    for (name, connected) in class.enumerate()? {
        let contaminant = (capability.contaminant_aware() && name == "port0")
            .then(|| contaminant_status(contaminant_path));
        let partner_pd = connected && class.partner_supports_pd(&name);
        ports.push(PortStatus {
            power_role: read_power_role(class, &name, connected)?,
            data_role: read_data_role(class, &name, connected)?,
            mode: read_mode(class, &name, connected, capability.accessory_aware())?,
            // The driver accepts mode writes regardless of partner state.
            can_change_mode: true,
            can_change_data_role: partner_pd,
            can_change_power_role: partner_pd,
            contaminant,
            name,
            connected,
        });
    }
    Ok(ports)
}

fn read_power_role(class: &PortClass, port: &str, connected: bool) -> Result<PowerRole> {
    if !connected {
        return Ok(PowerRole::None);
    }
    let node = class.role_node(port, RoleAxis::Power)?;
    read_role_node(&node)?
        .parse()
        .map_err(|_| Error::UnrecognizedRole)
}

fn read_data_role(class: &PortClass, port: &str, connected: bool) -> Result<DataRole> {
    if !connected {
        return Ok(DataRole::None);
    }
    let node = class.role_node(port, RoleAxis::Data)?;
    read_role_node(&node)?
        .parse()
        .map_err(|_| Error::UnrecognizedRole)
}

/// The partner's accessory mode overrides the role node: an accessory
/// keeps the port in a mode no role node value describes. Clients that
/// predate accessory reporting never see it.
fn read_mode(class: &PortClass, port: &str, connected: bool, accessory: bool) -> Result<PortMode> {
    if !connected {
        return Ok(PortMode::None);
    }
    if accessory {
        match class.accessory_mode(port) {
            Ok(mode) if mode == "analog_audio" => return Ok(PortMode::AudioAccessory),
            Ok(mode) if mode == "debug" => return Ok(PortMode::DebugAccessory),
            Ok(_) | Err(Error::Io(std::io::ErrorKind::NotFound)) => (),
            Err(err) => return Err(err),
        }
    }
    let node = class.role_node(port, RoleAxis::Mode)?;
    PortMode::from_role_node(&read_role_node(&node)?)
}

fn contaminant_status(path: Option<&Utf8Path>) -> ContaminantStatus {
    let Some(path) = path else {
        return ContaminantStatus::Unsupported;
    };
    match read_contaminant(path) {
        Ok(true) => ContaminantStatus::Detected,
        Ok(false) => ContaminantStatus::NotDetected,
        Err(_) => ContaminantStatus::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use camino::Utf8PathBuf;
    use googletest::prelude::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: Utf8PathBuf,
        class: PortClass,
    }

    #[fixture]
    fn typec() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().join("typec")).unwrap();

        std::fs::create_dir_all(root.join("port0")).unwrap();
        std::fs::write(root.join("port0/power_role"), "source [sink]\n").unwrap();
        std::fs::write(root.join("port0/data_role"), "host [device]\n").unwrap();
        std::fs::write(root.join("port0/port_type"), "[dual] source sink\n").unwrap();
        std::fs::create_dir_all(root.join("port0-partner")).unwrap();
        std::fs::write(root.join("port0-partner/accessory_mode"), "none\n").unwrap();
        std::fs::write(
            root.join("port0-partner/supports_usb_power_delivery"),
            "yes\n",
        )
        .unwrap();

        std::fs::create_dir_all(root.join("port1")).unwrap();
        std::fs::write(root.join("port1/power_role"), "[source] sink\n").unwrap();
        std::fs::write(root.join("port1/data_role"), "[host] device\n").unwrap();

        let class = PortClass::new(root.clone());
        Fixture {
            _dir: dir,
            root,
            class,
        }
    }

    #[rstest]
    fn connected_and_disconnected_ports(typec: Fixture) {
        let ports = snapshot(&typec.class, NotifierCapability::Basic, None).unwrap();

        assert_that!(ports.len(), eq(2usize));
        assert_that!(
            ports[0],
            eq(&PortStatus {
                name: "port0".into(),
                connected: true,
                power_role: PowerRole::Sink,
                data_role: DataRole::Device,
                mode: PortMode::Drp,
                can_change_mode: true,
                can_change_data_role: true,
                can_change_power_role: true,
                contaminant: None,
            })
        );
        assert_that!(
            ports[1],
            eq(&PortStatus {
                name: "port1".into(),
                connected: false,
                power_role: PowerRole::None,
                data_role: DataRole::None,
                mode: PortMode::None,
                can_change_mode: true,
                can_change_data_role: false,
                can_change_power_role: false,
                contaminant: None,
            })
        );
    }

    #[rstest]
    fn partner_without_pd_blocks_role_changes(typec: Fixture) {
        std::fs::write(
            typec.root.join("port0-partner/supports_usb_power_delivery"),
            "no\n",
        )
        .unwrap();

        let ports = snapshot(&typec.class, NotifierCapability::Basic, None).unwrap();
        assert_that!(ports[0].can_change_power_role, eq(false));
        assert_that!(ports[0].can_change_data_role, eq(false));
        assert_that!(ports[0].can_change_mode, eq(true));
    }

    #[rstest]
    fn accessory_mode_wins_over_role_node(typec: Fixture) {
        std::fs::write(
            typec.root.join("port0-partner/accessory_mode"),
            "analog_audio\n",
        )
        .unwrap();

        let ports = snapshot(&typec.class, NotifierCapability::Extended, None).unwrap();
        assert_that!(ports[0].mode, eq(PortMode::AudioAccessory));

        // Basic clients predate accessory reporting and keep the role node.
        let ports = snapshot(&typec.class, NotifierCapability::Basic, None).unwrap();
        assert_that!(ports[0].mode, eq(PortMode::Drp));
    }

    #[rstest]
    fn missing_accessory_node_falls_back_to_role_node(typec: Fixture) {
        std::fs::remove_file(typec.root.join("port0-partner/accessory_mode")).unwrap();

        let ports = snapshot(&typec.class, NotifierCapability::Extended, None).unwrap();
        assert_that!(ports[0].mode, eq(PortMode::Drp));
    }

    #[rstest]
    fn garbage_role_value_aborts_the_snapshot(typec: Fixture) {
        std::fs::write(typec.root.join("port0/power_role"), "[wat]\n").unwrap();

        assert_that!(
            snapshot(&typec.class, NotifierCapability::Basic, None),
            err(eq(&Error::UnrecognizedRole))
        );
    }

    #[rstest]
    fn contaminant_is_gated_on_capability(typec: Fixture) {
        // Outside the class root; anything inside would enumerate as a port.
        let node = typec.root.parent().unwrap().join("moisture_detected");
        std::fs::write(&node, "1\n").unwrap();

        let ports = snapshot(
            &typec.class,
            NotifierCapability::ContaminantAware,
            Some(&node),
        )
        .unwrap();
        assert_that!(ports[0].name, eq("port0"));
        assert_that!(ports[0].contaminant, some(eq(ContaminantStatus::Detected)));
        assert_that!(ports[1].contaminant, none());

        let ports = snapshot(&typec.class, NotifierCapability::Extended, Some(&node)).unwrap();
        assert_that!(ports[0].contaminant, none());
    }

    #[rstest]
    fn contaminant_without_a_node_is_unsupported(typec: Fixture) {
        let ports = snapshot(&typec.class, NotifierCapability::ContaminantAware, None).unwrap();
        assert_that!(
            ports[0].contaminant,
            some(eq(ContaminantStatus::Unsupported))
        );
    }
}
