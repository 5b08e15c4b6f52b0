//! Short-range identification reader
//!
//! A tap terminal near each step publishes tap reports over MQTT. A read is
//! started on demand, scoped to one car id, and either resolves a definite
//! step within the timeout or fails without touching any state. When no
//! reader is configured the flow fails fast with `Unavailable`.

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::error::IdentificationError;
use crate::domain::types::{CarEvent, CarStepId, ReaderCmd};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;

/// Tap report published by a reader terminal.
#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct TapReport {
    pub car_id: String,
    pub step: CarStepId,
}

struct ActiveRead {
    car_id: String,
    deadline: Instant,
}

/// Short-range reader actor.
pub struct ReaderClient {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    reader_topic: String,
    enabled: bool,
    timeout: Duration,
    cmd_rx: mpsc::Receiver<ReaderCmd>,
    event_tx: mpsc::Sender<CarEvent>,
    metrics: Arc<Metrics>,
}

impl ReaderClient {
    pub fn new(
        config: &Config,
        cmd_rx: mpsc::Receiver<ReaderCmd>,
        event_tx: mpsc::Sender<CarEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            mqtt_host: config.mqtt_host().to_string(),
            mqtt_port: config.mqtt_port(),
            mqtt_username: config.mqtt_username().map(str::to_string),
            mqtt_password: config.mqtt_password().map(str::to_string),
            reader_topic: config.reader_topic().to_string(),
            enabled: config.reader_enabled(),
            timeout: Duration::from_millis(config.reader_timeout_ms()),
            cmd_rx,
            event_tx,
            metrics,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let client_id = format!("step-reader-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, self.mqtt_host.as_str(), self.mqtt_port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.mqtt_username, &self.mqtt_password) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 16);
        let mut active: Option<ActiveRead> = None;

        info!(topic = %self.reader_topic, enabled = %self.enabled, "reader_client_started");

        loop {
            // Idle reads sleep far in the future so the select arm stays quiet
            let deadline = active
                .as_ref()
                .map(|read| read.deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reader_client_shutdown");
                        return;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(ReaderCmd::Start { car_id }) => {
                            if !self.enabled {
                                self.emit(CarEvent::ReaderFailed(IdentificationError::Unavailable));
                                continue;
                            }
                            if active.is_some() {
                                debug!("reader_already_active");
                                continue;
                            }
                            if let Err(e) =
                                client.subscribe(self.reader_topic.as_str(), QoS::AtMostOnce).await
                            {
                                error!(error = %e, "reader_subscribe_failed");
                                self.emit(CarEvent::ReaderFailed(IdentificationError::Failed(
                                    e.to_string(),
                                )));
                                continue;
                            }
                            info!(car_id = %car_id, "reader_started");
                            active = Some(ActiveRead {
                                car_id,
                                deadline: Instant::now() + self.timeout,
                            });
                        }
                        None => return,
                    }
                }
                result = eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if publish.topic != self.reader_topic {
                                continue;
                            }
                            let Some(read) = active.as_ref() else { continue };
                            match parse_tap_report(&publish.payload) {
                                Some(tap) if tap.car_id == read.car_id
                                    && tap.step != CarStepId::Unknown =>
                                {
                                    info!(step = %tap.step, "reader_located");
                                    self.emit(CarEvent::Located(tap.step));
                                    self.finish_read(&client, &mut active).await;
                                }
                                Some(tap) => {
                                    debug!(car_id = %tap.car_id, "reader_foreign_tap");
                                }
                                None => {
                                    warn!("reader_tap_unparseable");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if active.is_some() {
                                warn!(error = %e, "reader_transport_failed");
                                self.emit(CarEvent::ReaderFailed(IdentificationError::Failed(
                                    e.to_string(),
                                )));
                                active = None;
                            }
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if active.is_some() => {
                    info!("reader_timeout");
                    self.emit(CarEvent::ReaderFailed(IdentificationError::Failed(
                        "no tap within the read window".to_string(),
                    )));
                    self.finish_read(&client, &mut active).await;
                }
            }
        }
    }

    async fn finish_read(&self, client: &AsyncClient, active: &mut Option<ActiveRead>) {
        *active = None;
        if let Err(e) = client.unsubscribe(self.reader_topic.as_str()).await {
            debug!(error = %e, "reader_unsubscribe_failed");
        }
    }

    fn emit(&self, event: CarEvent) {
        if self.event_tx.try_send(event).is_err() {
            self.metrics.record_event_dropped();
            warn!("reader_event_dropped: channel full or closed");
        }
    }
}

/// Parse a tap report payload.
pub fn parse_tap_report(payload: &[u8]) -> Option<TapReport> {
    match serde_json::from_slice::<TapReport>(payload) {
        Ok(report) => Some(report),
        Err(e) => {
            debug!(error = %e, "tap_report_parse_failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tap_report() {
        let tap =
            parse_tap_report(br#"{"car_id":"demo-car","step":"front_left"}"#).unwrap();
        assert_eq!(tap.car_id, "demo-car");
        assert_eq!(tap.step, CarStepId::FrontLeft);
    }

    #[test]
    fn test_parse_tap_report_invalid() {
        assert!(parse_tap_report(b"nope").is_none());
        assert!(parse_tap_report(br#"{"car_id":"demo-car"}"#).is_none());
    }
}
