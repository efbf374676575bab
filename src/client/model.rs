use semver::Version;
use serde::Serialize;
use tracing::warn;

use crate::utils::filter_version;

/// Hard current limits reported by chargers that predate the
/// `min_current_hard`/`max_current_hard` config fields.
pub(crate) const MIN_AMPS: i64 = 6;
pub(crate) const MAX_AMPS: i64 = 48;

/// Default claim client id, matching the EVSE manager slot the firmware
/// reserves for external API clients.
pub(crate) const CLAIM_CLIENT_ID: u32 = 20;

/// Human-readable name for the charger's numeric `state` field.
pub fn charger_state_name(state: i64) -> &'static str {
    match state {
        1 => "not connected",
        2 => "connected",
        3 => "charging",
        4 => "vent required",
        5 => "diode check failed",
        6 => "gfci fault",
        7 => "no ground",
        8 => "stuck relay",
        9 => "gfci self-test failure",
        10 => "over temperature",
        254 => "sleeping",
        255 => "disabled",
        _ => "unknown",
    }
}

/// Charging behavior selector shared by the `charge_mode` config field and
/// the legacy divert endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeMode {
    /// Charge at the configured current regardless of generation.
    Fast,
    /// Follow available solar/grid excess.
    Eco,
}

impl ChargeMode {
    /// Wire value for the `charge_mode` config field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeMode::Fast => "fast",
            ChargeMode::Eco => "eco",
        }
    }

    /// Numeric code used by the legacy `/divertmode` endpoint.
    pub fn divert_code(&self) -> u8 {
        match self {
            ChargeMode::Fast => 1,
            ChargeMode::Eco => 2,
        }
    }
}

/// Requested state of an override or claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideState {
    /// Force charging on.
    Active,
    /// Force charging off.
    Disabled,
}

impl OverrideState {
    /// Wire value for override/claim bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideState::Active => "active",
            OverrideState::Disabled => "disabled",
        }
    }
}

/// Parameters for a manual override or a claim. Unset fields keep the
/// value the charger currently reports.
#[derive(Debug, Clone)]
pub struct Override {
    /// Requested charging state.
    pub state: Option<OverrideState>,
    /// Requested charge current in amps.
    pub charge_current: Option<i64>,
    /// Ceiling for the charge current in amps.
    pub max_current: Option<i64>,
    /// Session energy limit in Wh.
    pub energy_limit: Option<i64>,
    /// Session time limit in seconds.
    pub time_limit: Option<i64>,
    /// Whether the override releases itself when the vehicle disconnects.
    pub auto_release: bool,
}

impl Default for Override {
    fn default() -> Self {
        Self {
            state: None,
            charge_current: None,
            max_current: None,
            energy_limit: None,
            time_limit: None,
            auto_release: true,
        }
    }
}

/// Parameters for an EVSE manager claim. Unset fields are left out of the
/// request body.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Requested charging state.
    pub state: Option<OverrideState>,
    /// Requested charge current in amps.
    pub charge_current: Option<i64>,
    /// Ceiling for the charge current in amps.
    pub max_current: Option<i64>,
    /// Whether the claim releases itself when the vehicle disconnects.
    pub auto_release: bool,
}

impl Default for Claim {
    fn default() -> Self {
        Self {
            state: None,
            charge_current: None,
            max_current: None,
            auto_release: true,
        }
    }
}

/// Kind of charge limit understood by the `/limit` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    /// Stop after a number of seconds.
    Time,
    /// Stop after a number of Wh.
    Energy,
    /// Stop at a vehicle state of charge.
    Soc,
    /// Stop at a vehicle range.
    Range,
}

impl LimitType {
    /// Wire value for the limit `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Time => "time",
            LimitType::Energy => "energy",
            LimitType::Soc => "soc",
            LimitType::Range => "range",
        }
    }
}

/// Parsed reply of the legacy RAPI command channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RapiResponse {
    /// The echoed command.
    pub command: String,
    /// The charger's response string.
    pub response: String,
}

/// Serial number and model detected by `test_and_get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// WiFi module serial number.
    pub serial: String,
    /// Build environment / model identifier, `unknown` when not reported.
    pub model: String,
}

/// Latest published firmware, from the best-effort GitHub lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareRelease {
    /// Tag of the latest release.
    pub latest_version: String,
    /// Release notes, truncated to 255 characters.
    pub release_summary: String,
    /// Link to the release page.
    pub release_url: String,
}

/// Safety trip counters, present together on recent firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetyCounts {
    /// GFCI trips.
    pub gfci: i64,
    /// Missing-ground trips.
    pub no_ground: i64,
    /// Stuck-relay trips.
    pub stuck_relay: i64,
}

/// Parses the firmware string the charger reports into a comparable
/// version. `master` builds and vendor strings without a numeric triple
/// are not comparable and yield `None`, which makes every gate fail
/// closed.
pub(crate) fn parse_firmware(raw: &str) -> Option<Version> {
    if raw.contains("master") {
        return None;
    }
    let filtered = filter_version(raw)?;
    Version::parse(filtered).ok()
}

/// Range test backing every version-gated endpoint. A missing or
/// non-comparable firmware version fails the gate.
pub(crate) fn version_gate(current: Option<&Version>, min: &str, max: Option<&str>) -> bool {
    let Some(current) = current else {
        warn!("unable to find firmware version");
        return false;
    };
    let Ok(cutoff) = Version::parse(min) else {
        return false;
    };
    match max {
        Some(max) => match Version::parse(max) {
            Ok(limit) => cutoff <= *current && *current <= limit,
            Err(_) => false,
        },
        None => *current >= cutoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table() {
        assert_eq!(charger_state_name(3), "charging");
        assert_eq!(charger_state_name(254), "sleeping");
        assert_eq!(charger_state_name(255), "disabled");
        assert_eq!(charger_state_name(0), "unknown");
        assert_eq!(charger_state_name(99), "unknown");
    }

    #[test]
    fn test_divert_codes() {
        assert_eq!(ChargeMode::Fast.divert_code(), 1);
        assert_eq!(ChargeMode::Eco.divert_code(), 2);
        assert_eq!(ChargeMode::Eco.as_str(), "eco");
    }

    #[test]
    fn test_parse_firmware_release_and_dev() {
        assert_eq!(parse_firmware("4.1.2"), Some(Version::new(4, 1, 2)));
        assert_eq!(parse_firmware("4.1.2.dev3"), Some(Version::new(4, 1, 2)));
        assert_eq!(parse_firmware("master"), None);
        assert_eq!(parse_firmware("banana"), None);
    }

    #[test]
    fn test_version_gate_minimum_only() {
        let current = Version::new(4, 1, 2);
        assert!(version_gate(Some(&current), "4.0.1", None));
        assert!(version_gate(Some(&current), "4.1.2", None));
        assert!(!version_gate(Some(&current), "5.0.0", None));
        assert!(!version_gate(None, "4.0.1", None));
    }

    #[test]
    fn test_version_gate_with_upper_bound() {
        let current = Version::new(4, 1, 2);
        assert!(version_gate(Some(&current), "4.0.0", Some("4.2.0")));
        assert!(!version_gate(Some(&current), "4.0.0", Some("4.1.0")));
    }

    #[test]
    fn test_default_override_auto_releases() {
        let settings = Override::default();
        assert!(settings.auto_release);
        assert!(settings.state.is_none());
    }
}
