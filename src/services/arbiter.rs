//! Action arbitration for the user's main action
//!
//! The presentation layer has one context-dependent action button. What it
//! means depends entirely on the current aggregated state: without a
//! connection it asks the engine client to connect; with one it starts the
//! short-range identification flow scoped to this car.

use crate::domain::car_status::CarState;

/// Resolved meaning of a user "act" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDecision {
    /// Establish the step engine session.
    Connect,
    /// Start short-range identification against the given car.
    Identify { car_id: String },
}

/// Decide what an "act" request means in the given state.
pub fn decide(state: CarState, car_id: &str) -> ActionDecision {
    match state {
        CarState::NotConnected => ActionDecision::Connect,
        CarState::InLocalization | CarState::ReadyToUnlock => {
            ActionDecision::Identify { car_id: car_id.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_requests_connect() {
        assert_eq!(decide(CarState::NotConnected, "car-1"), ActionDecision::Connect);
    }

    #[test]
    fn test_connected_states_request_identification() {
        for state in [CarState::InLocalization, CarState::ReadyToUnlock] {
            assert_eq!(
                decide(state, "car-1"),
                ActionDecision::Identify { car_id: "car-1".to_string() }
            );
        }
    }
}
