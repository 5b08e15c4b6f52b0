//! Car status aggregation and event orchestration
//!
//! The aggregator is the single writer of `CarStatus`. It coordinates:
//! - Beacon filtering (step selection with hysteresis)
//! - Engine connectivity and step telemetry
//! - Permission gating of beacon monitoring
//! - Short-range identification results
//! - User actions arriving from the presentation layer
//!
//! Ranging, engine and reader tasks each feed the same `CarEvent` channel;
//! mutation happens only inside this task, so a proximity update can never
//! interleave with a connectivity update. Side effects go out through the
//! per-collaborator command channels and the view notifier.

mod handlers;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::car_status::CarStatus;
use crate::domain::types::{CarEvent, EngineCmd, EngineEvent, RangingCtl, ReaderCmd, UserAction};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::notifier::ViewSender;
use crate::services::beacon_filter::BeaconSignalFilter;
use crate::services::permission_gate::PermissionGate;

/// Single-writer owner of the fused car state.
pub struct StatusAggregator {
    /// The authoritative car/step state for this session
    pub(crate) status: CarStatus,
    /// Beacon smoothing and step selection hysteresis
    pub(crate) filter: BeaconSignalFilter,
    /// Permission tracking for beacon monitoring
    pub(crate) gate: PermissionGate,
    /// Application configuration
    pub(crate) config: Config,
    /// Ordered presentation notifications
    pub(crate) view: ViewSender,
    /// Commands to the step engine client
    pub(crate) engine_tx: mpsc::Sender<EngineCmd>,
    /// Control messages to the ranging client
    pub(crate) ranging_tx: mpsc::Sender<RangingCtl>,
    /// Control messages to the short-range reader
    pub(crate) reader_tx: mpsc::Sender<ReaderCmd>,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
}

impl StatusAggregator {
    pub fn new(
        config: Config,
        view: ViewSender,
        engine_tx: mpsc::Sender<EngineCmd>,
        ranging_tx: mpsc::Sender<RangingCtl>,
        reader_tx: mpsc::Sender<ReaderCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let status = CarStatus::new(config.car_identification());
        let filter = BeaconSignalFilter::new(&config);
        Self {
            status,
            filter,
            gate: PermissionGate::new(),
            config,
            view,
            engine_tx,
            ranging_tx,
            reader_tx,
            metrics,
        }
    }

    /// Consume events until the channel closes.
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<CarEvent>) {
        while let Some(event) = event_rx.recv().await {
            self.process_event(event);
        }
    }

    /// Process a single event, dispatching to the appropriate handler.
    ///
    /// This is the only place `CarStatus` is ever mutated.
    pub fn process_event(&mut self, event: CarEvent) {
        self.metrics.record_event_ingested();

        match event {
            CarEvent::Ranging(update) => self.handle_ranging(update),
            CarEvent::RangingFailed(reason) => self.handle_ranging_failed(&reason),
            CarEvent::Permission(permission) => self.handle_permission(permission),
            CarEvent::Engine(EngineEvent::Connected { session }) => self.handle_connected(&session),
            CarEvent::Engine(EngineEvent::ConnectFailed(error)) => self.handle_connect_failed(error),
            CarEvent::Engine(EngineEvent::Disconnected) => self.handle_disconnected(),
            CarEvent::Engine(EngineEvent::Status(status)) => self.handle_step_status(status),
            CarEvent::Located(step) => self.handle_located(step),
            CarEvent::ReaderFailed(error) => self.handle_reader_failed(&error),
            CarEvent::Action(UserAction::Act) => self.handle_act(),
            CarEvent::Action(UserAction::Extend) => self.handle_extend(),
            CarEvent::Action(UserAction::Shrink) => self.handle_shrink(),
            CarEvent::Action(UserAction::Refresh) => self.handle_refresh(),
            CarEvent::Action(UserAction::ClearPinnedStep) => self.handle_clear_pinned(),
        }
    }

    /// Current derived state, exposed for tests and diagnostics.
    pub fn status(&self) -> &CarStatus {
        &self.status
    }

    pub(crate) fn send_engine(&self, cmd: EngineCmd) {
        if self.engine_tx.try_send(cmd).is_err() {
            warn!("engine_cmd_dropped: channel full or closed");
        }
    }

    pub(crate) fn send_ranging(&self, ctl: RangingCtl) {
        if self.ranging_tx.try_send(ctl).is_err() {
            warn!("ranging_ctl_dropped: channel full or closed");
        }
    }

    pub(crate) fn send_reader(&self, cmd: ReaderCmd) {
        if self.reader_tx.try_send(cmd).is_err() {
            warn!("reader_cmd_dropped: channel full or closed");
        }
    }
}
