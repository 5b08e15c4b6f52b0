//! Typed channel for presentation notifications
//!
//! The aggregator publishes every derived view change here. A single
//! bounded mpsc channel keeps notifications in event-arrival order; the
//! presentation layer is expected to drain it on its own serialization
//! context. Sends never block the aggregator: a full channel drops the
//! notification and counts it.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::car_status::ViewState;
use crate::infra::metrics::Metrics;

/// A user-facing alert, rendered by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAlert {
    pub title: String,
    pub message: String,
}

/// Notifications delivered to the presentation layer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// Full derived snapshot; `animated` marks step-change transitions.
    Refresh { view: ViewState, animated: bool },
    /// Location permission must be (re-)requested from the user.
    PermissionRequired,
    Alert(UserAlert),
}

/// Sender half handed to the aggregator.
#[derive(Clone)]
pub struct ViewSender {
    tx: mpsc::Sender<ViewEvent>,
    metrics: Arc<Metrics>,
}

impl ViewSender {
    pub fn send_refresh(&self, view: ViewState, animated: bool) {
        self.send(ViewEvent::Refresh { view, animated });
    }

    pub fn send_permission_required(&self) {
        self.send(ViewEvent::PermissionRequired);
    }

    pub fn send_alert(&self, title: impl Into<String>, message: impl Into<String>) {
        self.send(ViewEvent::Alert(UserAlert { title: title.into(), message: message.into() }));
    }

    fn send(&self, event: ViewEvent) {
        if self.tx.try_send(event).is_err() {
            self.metrics.record_view_dropped();
            warn!("view_event_dropped: channel full or closed");
        }
    }
}

/// Create the view notification channel.
pub fn create_view_channel(
    capacity: usize,
    metrics: Arc<Metrics>,
) -> (ViewSender, mpsc::Receiver<ViewEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ViewSender { tx, metrics }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::car_status::CarStatus;
    use crate::domain::types::{CarIdentification, CarStepId};

    fn view() -> ViewState {
        CarStatus::new(CarIdentification {
            id: "car-1".to_string(),
            name: "Test Car".to_string(),
            beacon_uuid: None,
            steps: vec![CarStepId::RearLeft],
        })
        .view_state()
    }

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let (sender, mut rx) = create_view_channel(8, Arc::new(Metrics::new()));

        sender.send_permission_required();
        sender.send_refresh(view(), false);
        sender.send_alert("Reader", "tap failed");

        assert!(matches!(rx.recv().await.unwrap(), ViewEvent::PermissionRequired));
        assert!(matches!(rx.recv().await.unwrap(), ViewEvent::Refresh { animated: false, .. }));
        assert!(matches!(rx.recv().await.unwrap(), ViewEvent::Alert(_)));
    }

    #[tokio::test]
    async fn test_full_channel_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (sender, _rx) = create_view_channel(1, metrics.clone());

        sender.send_permission_required();
        sender.send_permission_required();

        assert_eq!(metrics.report().view_dropped, 1);
    }
}
