//! Scenario simulator - publishes scanner and engine traffic
//!
//! Drives a running step-companion end to end against a local broker by
//! publishing what the scanner sidecar, reader terminal and engine
//! controller would: ranging frames, authorization state, tap reports and
//! step telemetry.
//!
//! Scenarios:
//! - walkup: grant permission, approach the rear-left step, then extend
//! - loss:   grant permission, then publish empty cycles until lost
//! - tap:    publish a short-range tap report for the front-left step
//!
//! Usage:
//!   cargo run --bin step-sim -- --scenario walkup --beacon-uuid <uuid>

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(name = "step-sim")]
#[command(about = "Scenario simulator for local step-companion testing")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Beacon namespace UUID the companion is configured with
    #[arg(long)]
    beacon_uuid: String,

    /// Car id the companion is configured with
    #[arg(long, default_value = "demo-car")]
    car_id: String,

    /// Ranging frames topic
    #[arg(long, default_value = "scanner/ranging")]
    ranging_topic: String,

    /// Scanner state topic
    #[arg(long, default_value = "scanner/state")]
    state_topic: String,

    /// Reader tap topic
    #[arg(long, default_value = "reader/taps")]
    reader_topic: String,

    /// Engine status topic
    #[arg(long, default_value = "engine_status")]
    status_topic: String,

    /// Scenario to run: walkup, loss, tap
    #[arg(long, default_value = "walkup")]
    scenario: String,

    /// Milliseconds between ranging cycles
    #[arg(long, default_value = "300")]
    cycle_ms: u64,
}

struct Sim {
    client: AsyncClient,
    args: Args,
}

impl Sim {
    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        let body = payload.to_string();
        println!("-> {topic}: {body}");
        if let Err(e) = self.client.publish(topic, QoS::AtLeastOnce, false, body).await {
            eprintln!("publish failed: {e}");
        }
    }

    async fn grant_permission(&self) {
        self.publish(&self.args.state_topic, json!({ "authorization": "granted" })).await;
    }

    async fn ranging_cycle(&self, major: u16, proximity: &str, accuracy_m: f64) {
        self.publish(
            &self.args.ranging_topic,
            json!({
                "uuid": self.args.beacon_uuid,
                "major": major,
                "beacons": [{ "proximity": proximity, "accuracy_m": accuracy_m }],
            }),
        )
        .await;
        sleep(Duration::from_millis(self.args.cycle_ms)).await;
    }

    async fn empty_cycle(&self, major: u16) {
        self.publish(
            &self.args.ranging_topic,
            json!({ "uuid": self.args.beacon_uuid, "major": major, "beacons": [] }),
        )
        .await;
        sleep(Duration::from_millis(self.args.cycle_ms)).await;
    }

    async fn step_status(&self, step: &str, progress: f64, moving: bool) {
        self.publish(
            &self.args.status_topic,
            json!({ "step": step, "progress": progress, "moving": moving }),
        )
        .await;
    }

    /// Approach the rear-left step and watch it extend.
    async fn walkup(&self) {
        self.grant_permission().await;
        sleep(Duration::from_millis(500)).await;

        // Approach: far readings first
        for _ in 0..3 {
            self.ranging_cycle(3, "far", 6.5).await;
        }
        for _ in 0..2 {
            self.ranging_cycle(3, "near", 1.8).await;
        }
        // Close enough to promote after a stable streak
        for _ in 0..5 {
            self.ranging_cycle(3, "immediate", 0.5).await;
        }

        // Engine extends the step and reports progress
        for progress in [0.0, 0.33, 0.66, 1.0] {
            self.step_status("rear_left", progress, progress < 1.0).await;
            sleep(Duration::from_millis(400)).await;
        }
    }

    /// Walk away until localization is declared lost.
    async fn loss(&self) {
        self.grant_permission().await;
        sleep(Duration::from_millis(500)).await;

        for _ in 0..4 {
            self.ranging_cycle(3, "immediate", 0.5).await;
        }
        // 12 empty cycles: the companion resets on the 11th
        for _ in 0..12 {
            self.empty_cycle(3).await;
        }
    }

    /// Short-range tap pinning the front-left step.
    async fn tap(&self) {
        self.publish(
            &self.args.reader_topic,
            json!({ "car_id": self.args.car_id, "step": "front_left" }),
        )
        .await;
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let client_id = format!("step-sim-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, args.mqtt_host.as_str(), args.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);

    // Keep the eventloop alive for the duration of the run
    tokio::spawn(async move {
        loop {
            if eventloop.poll().await.is_err() {
                sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let scenario = args.scenario.clone();
    let sim = Sim { client, args };

    match scenario.as_str() {
        "walkup" => sim.walkup().await,
        "loss" => sim.loss().await,
        "tap" => sim.tap().await,
        other => {
            eprintln!("unknown scenario: {other} (expected walkup, loss or tap)");
            std::process::exit(2);
        }
    }

    // Give the last publishes time to flush
    sleep(Duration::from_millis(500)).await;
    println!("scenario {scenario} complete");
}
