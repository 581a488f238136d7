//! Administrative, operational and connection state enums.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative state of a device or port.
///
/// Devices move `Preprovisioned → Enabled → Disabled → Deleted`, with
/// `Disabled → Enabled` allowed for re-enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminState {
    /// State not set.
    #[default]
    Unknown,
    /// Known to the core but not yet adopted by an adapter.
    Preprovisioned,
    /// Adopted and administratively up.
    Enabled,
    /// Administratively down.
    Disabled,
    /// Marked for removal; cleanup in progress.
    Deleted,
}

impl AdminState {
    /// Returns the protobuf-style name of the state.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdminState::Unknown => "UNKNOWN",
            AdminState::Preprovisioned => "PREPROVISIONED",
            AdminState::Enabled => "ENABLED",
            AdminState::Disabled => "DISABLED",
            AdminState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Ok(AdminState::Unknown),
            "PREPROVISIONED" => Ok(AdminState::Preprovisioned),
            "ENABLED" => Ok(AdminState::Enabled),
            "DISABLED" => Ok(AdminState::Disabled),
            "DELETED" => Ok(AdminState::Deleted),
            _ => Err(ParseError::InvalidAdminState(s.to_string())),
        }
    }
}

/// Operational status, reported by adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperStatus {
    #[default]
    Unknown,
    Discovered,
    Activating,
    Testing,
    Active,
    Failed,
}

impl OperStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperStatus::Unknown => "UNKNOWN",
            OperStatus::Discovered => "DISCOVERED",
            OperStatus::Activating => "ACTIVATING",
            OperStatus::Testing => "TESTING",
            OperStatus::Active => "ACTIVE",
            OperStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Ok(OperStatus::Unknown),
            "DISCOVERED" => Ok(OperStatus::Discovered),
            "ACTIVATING" => Ok(OperStatus::Activating),
            "TESTING" => Ok(OperStatus::Testing),
            "ACTIVE" => Ok(OperStatus::Active),
            "FAILED" => Ok(OperStatus::Failed),
            _ => Err(ParseError::InvalidOperStatus(s.to_string())),
        }
    }
}

/// Reachability of a device from its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectStatus {
    #[default]
    Unknown,
    Unreachable,
    Reachable,
}

impl ConnectStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectStatus::Unknown => "UNKNOWN",
            ConnectStatus::Unreachable => "UNREACHABLE",
            ConnectStatus::Reachable => "REACHABLE",
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Ok(ConnectStatus::Unknown),
            "UNREACHABLE" => Ok(ConnectStatus::Unreachable),
            "REACHABLE" => Ok(ConnectStatus::Reachable),
            _ => Err(ParseError::InvalidConnectStatus(s.to_string())),
        }
    }
}
