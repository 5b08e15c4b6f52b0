//! Event handlers for the status aggregator
//!
//! Each handler mutates `CarStatus`, pushes side effects onto the
//! collaborator command channels, and republishes the derived view
//! snapshot. The snapshot is recomputed on every transition so no stale
//! combination of connectivity, selection and telemetry can be published.

use tracing::{debug, info, warn};

use super::StatusAggregator;
use crate::domain::error::{AuthenticationError, CompanionError, IdentificationError};
use crate::domain::types::{
    CarStepId, CarStepStatus, DistanceObservation, EngineCmd, Permission, RangingCtl, RangingUpdate,
    ReaderCmd, SelectedStep,
};
use crate::services::arbiter::{self, ActionDecision};
use crate::services::beacon_filter::{CycleOutcome, RangedEffect};
use crate::services::permission_gate::GateEffect;

impl StatusAggregator {
    /// Fold one per-region ranging update into the car status.
    pub(crate) fn handle_ranging(&mut self, update: RangingUpdate) {
        self.metrics.record_ranging_cycle();
        let previous_state = self.status.current_state();

        match self.filter.ingest(update) {
            CycleOutcome::Ranged(ranged) => {
                debug!(
                    step = %ranged.step,
                    proximity = %ranged.proximity.as_str(),
                    meters = %ranged.meters,
                    "ranged_car"
                );

                match self.filter.apply(&mut self.status, &ranged) {
                    // Short-range pin active: the sample changed nothing.
                    RangedEffect::Pinned => {}
                    RangedEffect::StepChanged(step) => {
                        info!(step = %step, "step_selected");
                        self.publish(true);
                    }
                    RangedEffect::StepCleared => {
                        info!("step_deselected");
                        self.publish(true);
                    }
                    RangedEffect::Updated => {
                        let animated = self.status.current_state() != previous_state;
                        self.publish(animated);
                    }
                }
            }
            CycleOutcome::Lost => {
                self.metrics.record_empty_cycle();
                if self.status.selected_step.force_located {
                    return;
                }
                info!("localization_lost");
                self.status.reset_localization();
                self.publish(false);
            }
            CycleOutcome::Empty => {
                self.metrics.record_empty_cycle();
            }
        }
    }

    /// Ranging transport failure: distance becomes unknown, the selected
    /// step survives until the loss rule clears it.
    pub(crate) fn handle_ranging_failed(&mut self, reason: &str) {
        warn!(reason = %reason, "ranging_failed");
        self.status.distance = DistanceObservation::default();
        self.publish(false);
    }

    pub(crate) fn handle_permission(&mut self, permission: Permission) {
        debug!(permission = %permission.as_str(), "permission_changed");
        let effect = self.gate.on_permission(permission);
        self.apply_gate_effect(effect);
    }

    pub(crate) fn handle_connected(&mut self, session: &str) {
        info!(session = %session, "engine_connected");
        let previous_state = self.status.current_state();
        self.status.connected = true;
        self.publish(self.status.current_state() != previous_state);
    }

    /// Connection failures surface to the user without touching the
    /// aggregated state.
    pub(crate) fn handle_connect_failed(&mut self, error: AuthenticationError) {
        let error = CompanionError::from(error);
        warn!(error = %error, recoverable = %error.is_recoverable(), "engine_connect_failed");
        self.view.send_alert("Connection failed", error.to_string());
    }

    pub(crate) fn handle_disconnected(&mut self) {
        info!("engine_disconnected");
        self.metrics.record_engine_disconnect();
        let previous_state = self.status.current_state();
        self.status.connected = false;
        self.publish(self.status.current_state() != previous_state);
    }

    /// Telemetry update; the coarse state only moves if connectivity does.
    pub(crate) fn handle_step_status(&mut self, step_status: CarStepStatus) {
        debug!(
            step = %step_status.step,
            progress = %step_status.progress,
            moving = %step_status.moving,
            "step_status"
        );
        self.status.step_status = Some(step_status);
        self.publish(false);
    }

    /// A short-range identification pinned the step. Beacon monitoring is
    /// no longer needed and stops until the pin is cleared.
    pub(crate) fn handle_located(&mut self, step: CarStepId) {
        info!(step = %step, "short_range_located");
        let previous_state = self.status.current_state();
        self.status.selected_step = SelectedStep { step, force_located: true };

        self.send_ranging(RangingCtl::StopMonitoring);
        self.gate.suspend();
        self.filter.reset();

        self.publish(self.status.current_state() != previous_state);
    }

    pub(crate) fn handle_reader_failed(&mut self, error: &IdentificationError) {
        let error = CompanionError::from(error.clone());
        warn!(error = %error, recoverable = %error.is_recoverable(), "reader_failed");
        self.view.send_alert("Identification failed", error.to_string());
    }

    /// Resolve the context-dependent main action.
    pub(crate) fn handle_act(&mut self) {
        match arbiter::decide(self.status.current_state(), &self.status.car.id) {
            ActionDecision::Connect => {
                info!("action_connect");
                self.send_engine(EngineCmd::Connect);
            }
            ActionDecision::Identify { car_id } => {
                if !self.config.reader_enabled() {
                    self.handle_reader_failed(&IdentificationError::Unavailable);
                    return;
                }
                info!(car_id = %car_id, "action_identify");
                self.send_reader(ReaderCmd::Start { car_id });
            }
        }
    }

    pub(crate) fn handle_extend(&mut self) {
        let step = self.status.selected_step.step;
        if step == CarStepId::Unknown {
            warn!("extend_ignored: no step selected");
            return;
        }
        self.send_engine(EngineCmd::Extend(step));
    }

    pub(crate) fn handle_shrink(&mut self) {
        let step = self.status.selected_step.step;
        if step == CarStepId::Unknown {
            warn!("shrink_ignored: no step selected");
            return;
        }
        self.send_engine(EngineCmd::Shrink(step));
    }

    /// View (re)appeared: re-check permission, make sure the services this
    /// state needs are running, and republish the snapshot.
    pub(crate) fn handle_refresh(&mut self) {
        let effect = self.gate.refresh();
        let started = matches!(effect, GateEffect::StartMonitoring);
        self.apply_gate_effect(effect);

        // Starting monitoring already requests a connection; cover the
        // monitoring-already-running case here.
        if !started && self.gate.permission() == Permission::Granted && !self.status.connected {
            self.send_engine(EngineCmd::Connect);
        }

        self.publish(false);
    }

    /// Drop a short-range pin and hand selection back to the beacons,
    /// starting from a fresh stability streak.
    pub(crate) fn handle_clear_pinned(&mut self) {
        if !self.status.selected_step.force_located {
            return;
        }
        info!("pinned_step_cleared");
        let previous_state = self.status.current_state();
        self.status.selected_step = SelectedStep::default();
        self.status.distance = DistanceObservation::default();

        let effect = self.gate.refresh();
        self.apply_gate_effect(effect);

        self.publish(self.status.current_state() != previous_state);
    }

    fn apply_gate_effect(&mut self, effect: GateEffect) {
        match effect {
            GateEffect::StartMonitoring => {
                let regions = self.status.car.regions();
                info!(regions = %regions.len(), "monitoring_started");
                self.send_ranging(RangingCtl::StartMonitoring(regions));
                if !self.status.connected {
                    self.send_engine(EngineCmd::Connect);
                }
            }
            GateEffect::StopAndReprompt => {
                info!("monitoring_stopped: permission lost");
                self.send_ranging(RangingCtl::StopMonitoring);
                self.filter.reset();
                self.view.send_permission_required();
            }
            GateEffect::Reprompt => {
                self.send_ranging(RangingCtl::RequestAuthorization);
                self.view.send_permission_required();
            }
            GateEffect::None => {}
        }
    }

    /// Recompute and republish the full derived snapshot.
    fn publish(&self, animated: bool) {
        self.view.send_refresh(self.status.view_state(), animated);
    }
}
