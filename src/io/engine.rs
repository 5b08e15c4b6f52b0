//! MQTT client for the step engine endpoint
//!
//! The car hosts the broker; the engine controller subscribes to the
//! command topic and reports motion on the status topic. This client stays
//! off the network until the first `Connect` command arrives, then owns the
//! session: it maps connection failures to the authentication taxonomy,
//! publishes extend/shrink commands, and feeds status and connectivity
//! events into the aggregator channel.

use rumqttc::mqttbytes::v4::ConnectReturnCode;
use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::error::AuthenticationError;
use crate::domain::types::{CarEvent, CarStepId, CarStepStatus, EngineCmd, EngineEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;

/// Wire format for extend/shrink commands on the command topic.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EngineCommand {
    pub command: EngineVerb,
    pub step: CarStepId,
    /// Session token of the companion issuing the command.
    pub session: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineVerb {
    Extend,
    Shrink,
}

/// Step engine client actor.
pub struct EngineClient {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    command_topic: String,
    status_topic: String,
    car_id: String,
    cmd_rx: mpsc::Receiver<EngineCmd>,
    event_tx: mpsc::Sender<CarEvent>,
    metrics: Arc<Metrics>,
}

impl EngineClient {
    pub fn new(
        config: &Config,
        cmd_rx: mpsc::Receiver<EngineCmd>,
        event_tx: mpsc::Sender<CarEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            mqtt_host: config.mqtt_host().to_string(),
            mqtt_port: config.mqtt_port(),
            mqtt_username: config.mqtt_username().map(str::to_string),
            mqtt_password: config.mqtt_password().map(str::to_string),
            command_topic: config.engine_command_topic().to_string(),
            status_topic: config.engine_status_topic().to_string(),
            car_id: config.car_id().to_string(),
            cmd_rx,
            event_tx,
            metrics,
        }
    }

    /// Run the client until shutdown. The network session is only opened
    /// once the aggregator asks for it.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        // Idle phase: no session until the first Connect
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCmd::Connect) => break,
                        Some(other) => {
                            warn!(cmd = ?other, "engine_cmd_before_connect_ignored");
                        }
                        None => return,
                    }
                }
            }
        }

        let client_id = format!("step-companion-{}", self.car_id);
        let mut mqttoptions = MqttOptions::new(client_id, self.mqtt_host.as_str(), self.mqtt_port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.mqtt_username, &self.mqtt_password) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        if let Err(e) = client.subscribe(self.status_topic.as_str(), QoS::AtMostOnce).await {
            error!(error = %e, "engine_status_subscribe_failed");
        }

        info!(
            host = %self.mqtt_host,
            port = %self.mqtt_port,
            command_topic = %self.command_topic,
            status_topic = %self.status_topic,
            "engine_client_connecting"
        );

        let mut connected = false;
        let mut connect_pending = true;
        // Commands carry the session token of the current connection
        let mut session = String::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("engine_client_shutdown");
                        let _ = client.disconnect().await;
                        return;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCmd::Connect) => {
                            // Session already owned by the eventloop; a new
                            // request just re-arms the failure report.
                            connect_pending = !connected;
                        }
                        Some(EngineCmd::Extend(step)) => {
                            self.publish_command(&client, EngineVerb::Extend, step, &session).await;
                        }
                        Some(EngineCmd::Shrink(step)) => {
                            self.publish_command(&client, EngineVerb::Shrink, step, &session).await;
                        }
                        None => return,
                    }
                }
                result = eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            connected = true;
                            connect_pending = false;
                            session = Uuid::now_v7().to_string();
                            info!(session = %session, "engine_connected");
                            self.emit(CarEvent::Engine(EngineEvent::Connected {
                                session: session.clone(),
                            }));
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if publish.topic == self.status_topic {
                                match parse_step_status(&publish.payload) {
                                    Some(status) => {
                                        self.emit(CarEvent::Engine(EngineEvent::Status(status)));
                                    }
                                    None => {
                                        warn!(topic = %publish.topic, "engine_status_unparseable");
                                    }
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if connected {
                                connected = false;
                                self.metrics.record_engine_disconnect();
                                warn!(error = %e, "engine_connection_lost");
                                self.emit(CarEvent::Engine(EngineEvent::Disconnected));
                            } else if connect_pending {
                                let auth_error = map_connection_error(&e);
                                warn!(error = %e, mapped = %auth_error, "engine_connect_failed");
                                self.emit(CarEvent::Engine(EngineEvent::ConnectFailed(auth_error)));
                                connect_pending = false;
                            } else {
                                debug!(error = %e, "engine_reconnect_failed");
                            }
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    async fn publish_command(
        &self,
        client: &AsyncClient,
        verb: EngineVerb,
        step: CarStepId,
        session: &str,
    ) {
        let command = EngineCommand { command: verb, step, session: session.to_string() };
        let payload = match serde_json::to_vec(&command) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "engine_command_serialize_failed");
                return;
            }
        };

        self.metrics.record_engine_command();
        info!(command = ?verb, step = %step, "engine_command");
        if let Err(e) =
            client.publish(self.command_topic.as_str(), QoS::AtLeastOnce, false, payload).await
        {
            error!(error = %e, "engine_command_publish_failed");
        }
    }

    fn emit(&self, event: CarEvent) {
        if self.event_tx.try_send(event).is_err() {
            self.metrics.record_event_dropped();
            warn!("engine_event_dropped: channel full or closed");
        }
    }
}

/// Map a connection failure onto the authentication taxonomy.
fn map_connection_error(error: &ConnectionError) -> AuthenticationError {
    match error {
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                AuthenticationError::InvalidCredentials
            }
            ConnectReturnCode::ServiceUnavailable => AuthenticationError::ServerError,
            _ => AuthenticationError::InternalError,
        },
        ConnectionError::Io(_)
        | ConnectionError::NetworkTimeout
        | ConnectionError::FlushTimeout => AuthenticationError::NoNetwork,
        _ => AuthenticationError::InternalError,
    }
}

/// Parse a status payload from the engine controller.
pub fn parse_step_status(payload: &[u8]) -> Option<CarStepStatus> {
    match serde_json::from_slice::<CarStepStatus>(payload) {
        Ok(status) => Some(status),
        Err(e) => {
            debug!(error = %e, "step_status_parse_failed");
            None
        }
    }
}
