//! The role vocabulary and port status model.

use std::fmt;

use strum::{Display, EnumString};

use crate::{Error, Result};

/// The port's role in power transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PowerRole {
    None,
    Source,
    Sink,
}

/// The port's role in data transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DataRole {
    None,
    Host,
    Device,
}

/// The port's overall mode, including the accessory modes a partner can
/// place it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PortMode {
    None,
    Ufp,
    Dfp,
    AudioAccessory,
    DebugAccessory,
    Drp,
}

impl PortMode {
    /// Parses a mode role node value. The node is `port_type` where it
    /// exists, otherwise `data_role`, so both vocabularies are accepted.
    pub fn from_role_node(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(PortMode::None),
            "device" | "sink" | "ufp" => Ok(PortMode::Ufp),
            "host" | "source" | "dfp" => Ok(PortMode::Dfp),
            "dual" | "drp" => Ok(PortMode::Drp),
            _ => Err(Error::UnrecognizedRole),
        }
    }
}

/// The three independent role axes of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleAxis {
    Power,
    Data,
    Mode,
}

/// A requested role, tagged with its axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Power(PowerRole),
    Data(DataRole),
    Mode(PortMode),
}

impl Role {
    pub fn axis(&self) -> RoleAxis {
        match self {
            Role::Power(_) => RoleAxis::Power,
            Role::Data(_) => RoleAxis::Data,
            Role::Mode(_) => RoleAxis::Mode,
        }
    }

    /// The string the kernel accepts for this role on its control node.
    ///
    /// Mode requests reuse the power vocabulary (`sink`/`source`/`dual`),
    /// matching what `port_type` accepts. Roles that cannot be requested
    /// (`none`, the accessory modes) are invalid arguments.
    pub fn sysfs_value(&self) -> Result<&'static str> {
        match self {
            Role::Power(PowerRole::Source) => Ok("source"),
            Role::Power(PowerRole::Sink) => Ok("sink"),
            Role::Data(DataRole::Host) => Ok("host"),
            Role::Data(DataRole::Device) => Ok("device"),
            Role::Mode(PortMode::Ufp) => Ok("sink"),
            Role::Mode(PortMode::Dfp) => Ok("source"),
            Role::Mode(PortMode::Drp) => Ok("dual"),
            _ => Err(Error::InvalidArgument),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Power(role) => write!(f, "power:{role}"),
            Role::Data(role) => write!(f, "data:{role}"),
            Role::Mode(mode) => write!(f, "mode:{mode}"),
        }
    }
}

/// Result code delivered alongside status pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    UnrecognizedRole,
}

impl Status {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::UnrecognizedRole => Status::UnrecognizedRole,
            _ => Status::Error,
        }
    }
}

/// Moisture detection state for a port, where reported at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContaminantStatus {
    /// The platform has no readable contaminant status node.
    Unsupported,
    NotDetected,
    Detected,
}

/// Negotiated power level of a port, from `power_operation_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PowerOperationMode {
    Default,
    #[strum(serialize = "1.5A")]
    TypeC1_5A,
    #[strum(serialize = "3A")]
    TypeC3_0A,
    #[strum(serialize = "usb_power_delivery")]
    PowerDelivery,
}

/// One port's entry in a status snapshot.
///
/// Snapshots are always recomputed from sysfs; nothing here is cached
/// between queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub name: String,
    /// Derived from the existence of the port's `-partner` node.
    pub connected: bool,
    pub power_role: PowerRole,
    pub data_role: DataRole,
    pub mode: PortMode,
    pub can_change_mode: bool,
    pub can_change_data_role: bool,
    pub can_change_power_role: bool,
    /// Populated only for port0 and only for contaminant-aware subscribers.
    pub contaminant: Option<ContaminantStatus>,
}
