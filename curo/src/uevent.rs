//! Kernel uevent parsing and classification.
//!
//! Raw messages arrive as `action@devpath` followed by NUL-separated
//! `KEY=value` pairs. Parsing extracts the fields the service routes on;
//! classification turns a parsed event into one of the handful of
//! situations the service reacts to. Everything else is dropped.

use std::str::FromStr;

use strum::EnumString;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Action {
    Add,
    Bind,
    Change,
    Remove,
    Unbind,
    Offline,
    Online,
}

#[derive(Debug, Clone)]
pub(crate) struct Uevent<'a> {
    pub(crate) action: Action,
    pub(crate) devpath: &'a str,
    pub(crate) devtype: Option<&'a str>,
    pub(crate) subsystem: &'a str,
    raw: &'a str,
}

impl<'a> Uevent<'a> {
    pub(crate) fn parse(s: &'a str) -> Result<Self> {
        let mut action = None;
        let mut devpath = None;
        let mut devtype = None;
        let mut subsystem = None;

        for line in s
            .split_terminator('\0')
            // First line is just "action@devpath", so ignore it.
            .skip(1)
        {
            let (k, v) = line.split_once('=').ok_or(Error::Parse)?;
            match k {
                "ACTION" => action = Some(Action::from_str(v)?),
                "DEVPATH" => devpath = Some(v),
                "DEVTYPE" => devtype = Some(v),
                "SUBSYSTEM" => subsystem = Some(v),
                _ => (),
            }
        }

        let (Some(action), Some(devpath), Some(subsystem)) = (action, devpath, subsystem) else {
            return Err(Error::Parse);
        };

        Ok(Uevent {
            action,
            devpath,
            devtype,
            subsystem,
            raw: s,
        })
    }

    /// Looks up an arbitrary `KEY=value` pair from the message.
    pub(crate) fn env(&self, key: &str) -> Option<&'a str> {
        self.raw.split_terminator('\0').skip(1).find_map(|line| {
            line.split_once('=')
                .and_then(|(k, v)| (k == key).then_some(v))
        })
    }
}

/// A uevent the service cares about, with the routing already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorEvent<'a> {
    /// Anything under a Type-C port changed. `partner_added` is set when
    /// the event is the arrival of a partner device.
    TypecPort { partner_added: bool },
    /// The USB power supply reported a change (contaminant source).
    UsbPowerSupply,
    /// A USB device finished enumerating on the host controller.
    DeviceAdded { devpath: &'a str },
    /// A driver bound to a USB interface.
    InterfaceBound {
        devpath: &'a str,
        interface: &'a str,
    },
    /// The gadget UDC device appeared or disappeared.
    GadgetUdc { added: bool },
    /// The host controller went offline and needs mode recovery.
    ControllerOffline,
}

/// Decides whether a uevent is one the service reacts to. `controller` is
/// the configured platform controller name; when empty, controller-bound
/// events never match.
pub(crate) fn classify<'a>(uevent: &Uevent<'a>, controller: &str) -> Option<MonitorEvent<'a>> {
    if !controller.is_empty() {
        let udc_suffix = format!("/{controller}/udc/{controller}");
        if matches!(uevent.action, Action::Add | Action::Remove)
            && uevent.devpath.ends_with(&udc_suffix)
        {
            return Some(MonitorEvent::GadgetUdc {
                added: uevent.action == Action::Add,
            });
        }
        if uevent.action == Action::Offline && uevent.devpath.contains(controller) {
            return Some(MonitorEvent::ControllerOffline);
        }
    }

    if uevent.subsystem == "typec" || uevent.devpath.contains("/typec/port") {
        return Some(MonitorEvent::TypecPort {
            partner_added: uevent.action == Action::Add && uevent.devpath.ends_with("-partner"),
        });
    }

    if uevent.subsystem == "power_supply"
        && uevent.action == Action::Change
        && uevent.env("POWER_SUPPLY_NAME") == Some("usb")
    {
        return Some(MonitorEvent::UsbPowerSupply);
    }

    if uevent.subsystem == "usb" {
        match (uevent.action, uevent.devtype) {
            (Action::Add, Some("usb_device")) => {
                let name = uevent.devpath.rsplit_once('/')?.1;
                if name.contains('-') && !name.contains(':') {
                    return Some(MonitorEvent::DeviceAdded {
                        devpath: uevent.devpath,
                    });
                }
            }
            (Action::Bind, Some("usb_interface")) => {
                let (parent, interface) = uevent.devpath.rsplit_once('/')?;
                if interface.contains(':') {
                    return Some(MonitorEvent::InterfaceBound {
                        devpath: parent,
                        interface,
                    });
                }
            }
            _ => (),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    fn parse(s: &str) -> Uevent<'_> {
        Uevent::parse(s).unwrap()
    }

    #[test]
    fn uevent_parse() {
        assert_that!(
            Uevent::parse(concat!(
                "add@path\0",
                "ACTION=add\0",
                "DEVPATH=/devices/abc\0",
                "DEVTYPE=typec_port\0",
                "SUBSYSTEM=typec\0"
            )),
            ok(pat!(&Uevent {
                action: eq(Action::Add),
                devpath: eq("/devices/abc"),
                devtype: some(eq("typec_port")),
                subsystem: eq("typec"),
                raw: anything()
            }))
        );

        assert_that!(
            Uevent::parse(concat!(
                "add@path\0",
                "ACTION=add\0",
                // missing DEVPATH
                "SUBSYSTEM=typec\0"
            )),
            err(pat!(Error::Parse))
        );
    }

    #[test]
    fn env_lookup() {
        let uevent = parse(concat!(
            "change@path\0",
            "ACTION=change\0",
            "DEVPATH=/devices/abc\0",
            "SUBSYSTEM=power_supply\0",
            "POWER_SUPPLY_NAME=usb\0"
        ));
        assert_that!(uevent.env("POWER_SUPPLY_NAME"), some(eq("usb")));
        assert_that!(uevent.env("POWER_SUPPLY_TYPE"), none());
    }

    #[test]
    fn partner_arrival() {
        let uevent = parse(concat!(
            "add@path\0",
            "ACTION=add\0",
            "DEVPATH=/devices/platform/soc/usb/typec/port0/port0-partner\0",
            "DEVTYPE=typec_partner\0",
            "SUBSYSTEM=typec\0"
        ));
        assert_that!(
            classify(&uevent, ""),
            some(eq(MonitorEvent::TypecPort { partner_added: true }))
        );
    }

    #[test]
    fn partner_removal_is_still_a_port_event() {
        let uevent = parse(concat!(
            "remove@path\0",
            "ACTION=remove\0",
            "DEVPATH=/devices/platform/soc/usb/typec/port0/port0-partner\0",
            "DEVTYPE=typec_partner\0",
            "SUBSYSTEM=typec\0"
        ));
        assert_that!(
            classify(&uevent, ""),
            some(eq(MonitorEvent::TypecPort {
                partner_added: false
            }))
        );
    }

    #[test]
    fn usb_power_supply_change() {
        let uevent = parse(concat!(
            "change@path\0",
            "ACTION=change\0",
            "DEVPATH=/devices/platform/soc/power_supply/usb\0",
            "SUBSYSTEM=power_supply\0",
            "POWER_SUPPLY_NAME=usb\0"
        ));
        assert_that!(classify(&uevent, ""), some(eq(MonitorEvent::UsbPowerSupply)));

        let battery = parse(concat!(
            "change@path\0",
            "ACTION=change\0",
            "DEVPATH=/devices/platform/soc/power_supply/battery\0",
            "SUBSYSTEM=power_supply\0",
            "POWER_SUPPLY_NAME=battery\0"
        ));
        assert_that!(classify(&battery, ""), none());
    }

    #[test]
    fn udc_lifecycle_requires_configured_controller() {
        let raw = concat!(
            "add@path\0",
            "ACTION=add\0",
            "DEVPATH=/devices/platform/soc/a600000.ssusb/a600000.dwc3/udc/a600000.dwc3\0",
            "SUBSYSTEM=udc\0"
        );
        let uevent = parse(raw);
        assert_that!(
            classify(&uevent, "a600000.dwc3"),
            some(eq(MonitorEvent::GadgetUdc { added: true }))
        );
        assert_that!(classify(&uevent, ""), none());
        assert_that!(classify(&uevent, "b200000.dwc3"), none());
    }

    #[test]
    fn controller_offline() {
        let uevent = parse(concat!(
            "offline@path\0",
            "ACTION=offline\0",
            "DEVPATH=/devices/platform/soc/a600000.ssusb/a600000.dwc3/xhci-hcd.0.auto/usb2\0",
            "SUBSYSTEM=usb\0"
        ));
        assert_that!(
            classify(&uevent, "a600000.dwc3"),
            some(eq(MonitorEvent::ControllerOffline))
        );
        assert_that!(classify(&uevent, ""), none());
    }

    #[test]
    fn device_enumeration() {
        let uevent = parse(concat!(
            "add@path\0",
            "ACTION=add\0",
            "DEVPATH=/devices/platform/soc/a600000.ssusb/a600000.dwc3/xhci-hcd.0.auto/usb2/2-1\0",
            "DEVTYPE=usb_device\0",
            "SUBSYSTEM=usb\0"
        ));
        assert_that!(
            classify(&uevent, ""),
            some(eq(MonitorEvent::DeviceAdded {
                devpath: "/devices/platform/soc/a600000.ssusb/a600000.dwc3/xhci-hcd.0.auto/usb2/2-1"
            }))
        );

        // Root hubs ("usb2") never match.
        let hub = parse(concat!(
            "add@path\0",
            "ACTION=add\0",
            "DEVPATH=/devices/platform/soc/a600000.ssusb/a600000.dwc3/xhci-hcd.0.auto/usb2\0",
            "DEVTYPE=usb_device\0",
            "SUBSYSTEM=usb\0"
        ));
        assert_that!(classify(&hub, ""), none());
    }

    #[test]
    fn interface_bind() {
        let uevent = parse(concat!(
            "bind@path\0",
            "ACTION=bind\0",
            "DEVPATH=/devices/platform/soc/usb/usb2/2-1/2-1:1.0\0",
            "DEVTYPE=usb_interface\0",
            "SUBSYSTEM=usb\0"
        ));
        assert_that!(
            classify(&uevent, ""),
            some(eq(MonitorEvent::InterfaceBound {
                devpath: "/devices/platform/soc/usb/usb2/2-1",
                interface: "2-1:1.0"
            }))
        );
    }

    #[test]
    fn unrelated_events_are_dropped() {
        let uevent = parse(concat!(
            "change@path\0",
            "ACTION=change\0",
            "DEVPATH=/devices/virtual/block/loop0\0",
            "SUBSYSTEM=block\0"
        ));
        assert_that!(classify(&uevent, "a600000.dwc3"), none());
    }
}
