//! Shared types for the step companion

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::domain::error::{AuthenticationError, IdentificationError};

/// One step position on the car. A beacon's numeric "major" value maps to
/// one of the concrete variants; `Unknown` means no step is resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStepId {
    #[default]
    Unknown,
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl CarStepId {
    /// Beacon major value broadcast for this step. `Unknown` has none.
    pub fn major(self) -> Option<u16> {
        match self {
            CarStepId::Unknown => None,
            CarStepId::FrontLeft => Some(1),
            CarStepId::FrontRight => Some(2),
            CarStepId::RearLeft => Some(3),
            CarStepId::RearRight => Some(4),
        }
    }

    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            1 => Some(CarStepId::FrontLeft),
            2 => Some(CarStepId::FrontRight),
            3 => Some(CarStepId::RearLeft),
            4 => Some(CarStepId::RearRight),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CarStepId::Unknown => "unknown",
            CarStepId::FrontLeft => "front_left",
            CarStepId::FrontRight => "front_right",
            CarStepId::RearLeft => "rear_left",
            CarStepId::RearRight => "rear_right",
        }
    }
}

impl std::fmt::Display for CarStepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ranged proximity class, ordered from least to most certain.
///
/// The ordering matters: hysteresis groups `{Near, Immediate}` against
/// `{Far, Unknown}` when deciding whether a sample continues a streak.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    #[default]
    Unknown,
    Far,
    Near,
    Immediate,
}

impl Proximity {
    /// True for the `{Near, Immediate}` hysteresis bucket.
    #[inline]
    pub fn is_close(self) -> bool {
        matches!(self, Proximity::Near | Proximity::Immediate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::Unknown => "unknown",
            Proximity::Far => "far",
            Proximity::Near => "near",
            Proximity::Immediate => "immediate",
        }
    }
}

/// Immutable car identity loaded from configuration.
#[derive(Debug, Clone)]
pub struct CarIdentification {
    /// Stable car id, used to scope reader lookups.
    pub id: String,
    /// Display name for the presentation layer.
    pub name: String,
    /// Beacon namespace the car's step beacons broadcast under.
    pub beacon_uuid: Option<Uuid>,
    /// Steps actually installed on this car, in configuration order.
    pub steps: Vec<CarStepId>,
}

impl CarIdentification {
    /// Map a ranged beacon to a recognized step. Returns `None` when the
    /// namespace does not match or the major is not an installed step.
    pub fn step_for(&self, uuid: Uuid, major: u16) -> Option<CarStepId> {
        if self.beacon_uuid != Some(uuid) {
            return None;
        }
        CarStepId::from_major(major).filter(|step| self.steps.contains(step))
    }

    /// Beacon regions to monitor: one per installed step.
    pub fn regions(&self) -> Vec<RegionKey> {
        let Some(uuid) = self.beacon_uuid else {
            return Vec::new();
        };
        self.steps
            .iter()
            .filter_map(|step| step.major().map(|major| RegionKey { uuid, major }))
            .collect()
    }
}

/// Identity of one monitored beacon region (namespace + step major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionKey {
    pub uuid: Uuid,
    pub major: u16,
}

impl std::fmt::Display for RegionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.uuid, self.major)
    }
}

/// One ranged beacon inside a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconObservation {
    pub uuid: Uuid,
    pub major: u16,
    pub proximity: Proximity,
    /// Estimated distance in meters as reported by the scanner. Values
    /// `<= 0.0` mean the scanner could not estimate a distance.
    pub accuracy_m: f64,
}

/// Per-cycle beacon lists are tiny; four slots cover a fully equipped car.
pub type BeaconList = SmallVec<[BeaconObservation; 4]>;

/// The latest beacon list ranged for one region, as published by the
/// scanner sidecar once per ranging cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingUpdate {
    pub region: RegionKey,
    pub beacons: BeaconList,
}

/// Smoothed distance estimate maintained by the beacon filter.
///
/// `stable_count` counts consecutive samples whose proximity fell in the
/// same hysteresis bucket; it resets whenever the bucket flips.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistanceObservation {
    pub proximity: Proximity,
    pub meters: Option<f64>,
    pub stable_count: u32,
}

/// The step the device is currently resolved against.
///
/// `force_located == true` means a short-range identification pinned the
/// step; beacon-driven updates are ignored until it is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SelectedStep {
    pub step: CarStepId,
    pub force_located: bool,
}

/// Motion/position telemetry reported by the step engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarStepStatus {
    pub step: CarStepId,
    /// Extension progress, 0.0 retracted to 1.0 fully extended.
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub moving: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Location permission as reported by the scanner sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Granted,
    Denied,
    NotDetermined,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Granted => "granted",
            Permission::Denied => "denied",
            Permission::NotDetermined => "not_determined",
        }
    }
}

/// Connectivity and telemetry events from the step engine client.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Broker session established; carries the session token.
    Connected { session: String },
    ConnectFailed(AuthenticationError),
    Disconnected,
    Status(CarStepStatus),
}

/// Requests arriving from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// The context-dependent main action (connect or identify).
    Act,
    Extend,
    Shrink,
    /// View (re)appeared; re-check permission and services.
    Refresh,
    /// Drop a force-located pin and resume beacon-driven selection.
    ClearPinnedStep,
}

/// Every event the aggregator can ingest, from all sources.
///
/// All state mutation goes through exactly one consumer of this enum; the
/// producing tasks never touch `CarStatus` directly.
#[derive(Debug)]
pub enum CarEvent {
    Ranging(RangingUpdate),
    RangingFailed(String),
    Permission(Permission),
    Engine(EngineEvent),
    /// Short-range identification resolved a step.
    Located(CarStepId),
    ReaderFailed(IdentificationError),
    Action(UserAction),
}

/// Commands accepted by the step engine client task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCmd {
    Connect,
    Extend(CarStepId),
    Shrink(CarStepId),
}

/// Control messages for the ranging client task.
#[derive(Debug, Clone, PartialEq)]
pub enum RangingCtl {
    StartMonitoring(Vec<RegionKey>),
    StopMonitoring,
    RequestAuthorization,
}

/// Control messages for the short-range reader task.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderCmd {
    Start { car_id: String },
}
