//! Car status aggregate and the values derived from it
//!
//! `CarStatus` is the single authoritative fusion of connectivity, beacon
//! localization and step telemetry. It is owned and mutated exclusively by
//! the aggregator task; everything the presentation layer renders is derived
//! from it on demand and never stored back.

use serde::Serialize;

use crate::domain::types::{
    CarIdentification, CarStepId, CarStepStatus, DistanceObservation, SelectedStep,
};

/// Coarse session state, derived purely from connectivity and selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarState {
    NotConnected,
    InLocalization,
    ReadyToUnlock,
}

impl CarState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarState::NotConnected => "not_connected",
            CarState::InLocalization => "in_localization",
            CarState::ReadyToUnlock => "ready_to_unlock",
        }
    }
}

/// Aggregate root for one companion session.
#[derive(Debug, Clone)]
pub struct CarStatus {
    pub car: CarIdentification,
    pub connected: bool,
    pub distance: DistanceObservation,
    pub selected_step: SelectedStep,
    /// Latest engine telemetry, if any arrived this session.
    pub step_status: Option<CarStepStatus>,
}

impl CarStatus {
    pub fn new(car: CarIdentification) -> Self {
        Self {
            car,
            connected: false,
            distance: DistanceObservation::default(),
            selected_step: SelectedStep::default(),
            step_status: None,
        }
    }

    /// Derive the coarse state. Never stored: this is always computed from
    /// the current connectivity and selection so no stale combination can
    /// be published.
    pub fn current_state(&self) -> CarState {
        if !self.connected {
            CarState::NotConnected
        } else if self.selected_step.step == CarStepId::Unknown {
            CarState::InLocalization
        } else {
            CarState::ReadyToUnlock
        }
    }

    /// Forget all beacon-derived localization. Used when ranging reports
    /// sustained loss or fails.
    pub fn reset_localization(&mut self) {
        self.distance = DistanceObservation::default();
        self.selected_step = SelectedStep::default();
    }

    /// Build the full view snapshot for the presentation layer.
    pub fn view_state(&self) -> ViewState {
        let state = self.current_state();
        ViewState {
            car_name: self.car.name.clone(),
            car_id: self.car.id.clone(),
            state,
            show_reconnect: state == CarState::NotConnected,
            proximity: self.distance.proximity.as_str(),
            meters: self.distance.meters,
            step: self.selected_step.step,
            pinned: self.selected_step.force_located,
            step_status: self.step_status.clone(),
            action: match state {
                CarState::NotConnected => ViewAction::Connect,
                CarState::InLocalization | CarState::ReadyToUnlock => ViewAction::Identify,
            },
        }
    }
}

/// What the main action button should do in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewAction {
    Connect,
    Identify,
}

/// Complete derived view snapshot, republished after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub car_name: String,
    pub car_id: String,
    pub state: CarState,
    pub show_reconnect: bool,
    pub proximity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meters: Option<f64>,
    pub step: CarStepId,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_status: Option<CarStepStatus>,
    pub action: ViewAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Proximity;

    fn status() -> CarStatus {
        CarStatus::new(CarIdentification {
            id: "car-1".to_string(),
            name: "Test Car".to_string(),
            beacon_uuid: None,
            steps: vec![CarStepId::RearLeft],
        })
    }

    #[test]
    fn test_state_not_connected_wins() {
        let mut s = status();
        assert_eq!(s.current_state(), CarState::NotConnected);

        // Disconnected stays NotConnected regardless of selection
        s.selected_step = SelectedStep { step: CarStepId::RearLeft, force_located: false };
        assert_eq!(s.current_state(), CarState::NotConnected);
    }

    #[test]
    fn test_state_localization_vs_ready() {
        let mut s = status();
        s.connected = true;
        assert_eq!(s.current_state(), CarState::InLocalization);

        s.selected_step.step = CarStepId::RearLeft;
        assert_eq!(s.current_state(), CarState::ReadyToUnlock);

        s.selected_step.step = CarStepId::Unknown;
        assert_eq!(s.current_state(), CarState::InLocalization);
    }

    #[test]
    fn test_reset_localization() {
        let mut s = status();
        s.distance = DistanceObservation {
            proximity: Proximity::Immediate,
            meters: Some(0.4),
            stable_count: 5,
        };
        s.selected_step = SelectedStep { step: CarStepId::RearLeft, force_located: false };

        s.reset_localization();
        assert_eq!(s.distance, DistanceObservation::default());
        assert_eq!(s.selected_step, SelectedStep::default());
    }

    #[test]
    fn test_view_action_follows_state() {
        let mut s = status();
        assert_eq!(s.view_state().action, ViewAction::Connect);
        assert!(s.view_state().show_reconnect);

        s.connected = true;
        assert_eq!(s.view_state().action, ViewAction::Identify);
        assert!(!s.view_state().show_reconnect);
    }

    #[test]
    fn test_view_state_carries_telemetry() {
        let mut s = status();
        s.connected = true;
        s.step_status = Some(CarStepStatus {
            step: CarStepId::RearLeft,
            progress: 0.6,
            moving: true,
            fault: None,
        });

        let view = s.view_state();
        let telemetry = view.step_status.unwrap();
        assert_eq!(telemetry.progress, 0.6);
        assert!(telemetry.moving);
    }
}
