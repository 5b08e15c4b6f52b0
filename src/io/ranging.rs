//! MQTT ingest for BLE ranging frames and scanner state
//!
//! A scanner sidecar owns the radio and the platform location permission.
//! It publishes one frame per region per ranging cycle on the ranging topic
//! and authorization/fault reports on the state topic. This client holds
//! the registered-region set: frames are only forwarded while monitoring is
//! active and only for registered regions, and stopping clears the set
//! synchronously so no frame can slip through after a stop.

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::types::{
    BeaconList, BeaconObservation, CarEvent, Permission, Proximity, RangingCtl, RangingUpdate,
    RegionKey,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::beacon_filter::RegionRegistry;

/// One per-region frame as published by the scanner.
#[derive(Debug, Deserialize)]
struct RangingFrame {
    uuid: Uuid,
    major: u16,
    #[serde(default)]
    beacons: Vec<FrameBeacon>,
}

#[derive(Debug, Deserialize)]
struct FrameBeacon {
    /// Beacons may carry their own identity; defaults to the frame region.
    #[serde(default)]
    uuid: Option<Uuid>,
    #[serde(default)]
    major: Option<u16>,
    proximity: Proximity,
    #[serde(default = "default_accuracy")]
    accuracy_m: f64,
}

fn default_accuracy() -> f64 {
    -1.0
}

/// Authorization / fault report from the scanner.
#[derive(Debug, Deserialize)]
struct ScannerState {
    #[serde(default)]
    authorization: Option<Permission>,
    #[serde(default)]
    error: Option<String>,
}

/// Ranging client actor.
pub struct RangingClient {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    ranging_topic: String,
    scanner_state_topic: String,
    ctl_rx: mpsc::Receiver<RangingCtl>,
    event_tx: mpsc::Sender<CarEvent>,
    metrics: Arc<Metrics>,
    registry: RegionRegistry,
}

impl RangingClient {
    pub fn new(
        config: &Config,
        ctl_rx: mpsc::Receiver<RangingCtl>,
        event_tx: mpsc::Sender<CarEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            mqtt_host: config.mqtt_host().to_string(),
            mqtt_port: config.mqtt_port(),
            mqtt_username: config.mqtt_username().map(str::to_string),
            mqtt_password: config.mqtt_password().map(str::to_string),
            ranging_topic: config.ranging_topic().to_string(),
            scanner_state_topic: config.scanner_state_topic().to_string(),
            ctl_rx,
            event_tx,
            metrics,
            registry: RegionRegistry::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let client_id = format!("step-ranging-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, self.mqtt_host.as_str(), self.mqtt_port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.mqtt_username, &self.mqtt_password) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        for topic in [self.ranging_topic.as_str(), self.scanner_state_topic.as_str()] {
            if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
                error!(topic = %topic, error = %e, "ranging_subscribe_failed");
            }
        }

        info!(
            ranging_topic = %self.ranging_topic,
            state_topic = %self.scanner_state_topic,
            "ranging_client_started"
        );

        // Authorization requests go out on a sibling topic so they do not
        // echo back through the state subscription.
        let request_topic = format!("{}/request", self.scanner_state_topic);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ranging_client_shutdown");
                        return;
                    }
                }
                ctl = self.ctl_rx.recv() => {
                    match ctl {
                        Some(RangingCtl::StartMonitoring(regions)) => {
                            let added = self.registry.register(&regions);
                            info!(
                                regions = %regions.len(),
                                added = %added,
                                "monitoring_regions_registered"
                            );
                        }
                        Some(RangingCtl::StopMonitoring) => {
                            // Synchronous and idempotent: after this returns
                            // no further frame is forwarded.
                            self.registry.clear();
                            info!("monitoring_regions_cleared");
                        }
                        Some(RangingCtl::RequestAuthorization) => {
                            if let Err(e) = client
                                .publish(
                                    request_topic.as_str(),
                                    QoS::AtMostOnce,
                                    false,
                                    b"authorization".as_slice(),
                                )
                                .await
                            {
                                warn!(error = %e, "authorization_request_failed");
                            }
                        }
                        None => return,
                    }
                }
                result = eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if publish.topic == self.ranging_topic {
                                self.handle_frame(&publish.payload);
                            } else if publish.topic == self.scanner_state_topic {
                                self.handle_scanner_state(&publish.payload);
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("ranging_mqtt_connected");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "ranging_mqtt_error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, payload: &[u8]) {
        if self.registry.is_empty() {
            // Not monitoring; the scanner may still be publishing
            return;
        }
        let Some(update) = parse_ranging_frame(payload) else {
            warn!("ranging_frame_unparseable");
            return;
        };
        if !self.registry.contains(&update.region) {
            debug!(region = %update.region, "ranging_frame_unregistered_region");
            return;
        }
        self.emit(CarEvent::Ranging(update));
    }

    fn handle_scanner_state(&mut self, payload: &[u8]) {
        let state: ScannerState = match serde_json::from_slice(payload) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "scanner_state_unparseable");
                return;
            }
        };
        if let Some(permission) = state.authorization {
            self.emit(CarEvent::Permission(permission));
        }
        if let Some(reason) = state.error {
            self.emit(CarEvent::RangingFailed(reason));
        }
    }

    fn emit(&self, event: CarEvent) {
        if self.event_tx.try_send(event).is_err() {
            self.metrics.record_event_dropped();
            warn!("ranging_event_dropped: channel full or closed");
        }
    }
}

/// Parse one scanner frame into a ranging update.
pub fn parse_ranging_frame(payload: &[u8]) -> Option<RangingUpdate> {
    let frame: RangingFrame = match serde_json::from_slice(payload) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ranging_frame_parse_failed");
            return None;
        }
    };

    let region = RegionKey { uuid: frame.uuid, major: frame.major };
    let beacons: BeaconList = frame
        .beacons
        .into_iter()
        .map(|beacon| BeaconObservation {
            uuid: beacon.uuid.unwrap_or(frame.uuid),
            major: beacon.major.unwrap_or(frame.major),
            proximity: beacon.proximity,
            accuracy_m: beacon.accuracy_m,
        })
        .collect();

    Some(RangingUpdate { region, beacons })
}
