//! Lifecycle events and the notification boundary
//!
//! The scheduler and content service emit every terminal transition exactly
//! once on an in-process broadcast bus. Subscribers (the daemon's notification
//! forwarder, tests) consume events without ever blocking the emitter; with no
//! subscribers an event is dropped on the floor, which is fine because durable
//! state already lives in the store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::types::Platform;

pub type EventReceiver = broadcast::Receiver<Event>;

/// In-process event bus backed by `tokio::sync::broadcast`
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Non-blocking emit; an Err from send just means nobody is listening.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Events emitted on distribution and content lifecycle transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A distribution was created and enqueued
    DistributionScheduled {
        distribution_id: String,
        content_id: String,
        team_id: String,
        platform: Platform,
        publish_at: i64,
    },

    /// A publish attempt succeeded
    DistributionPublished {
        distribution_id: String,
        content_id: String,
        team_id: String,
        platform: Platform,
        external_post_id: String,
        attempt_count: u32,
    },

    /// A distribution is terminally failed
    DistributionFailed {
        distribution_id: String,
        content_id: String,
        team_id: String,
        platform: Platform,
        reason: String,
        /// True when sibling distributions of the same content succeeded
        partial_failure: bool,
    },

    /// A pending distribution was cancelled before firing
    DistributionCancelled {
        distribution_id: String,
        content_id: String,
        team_id: String,
        platform: Platform,
    },

    /// Every distribution of the content reached Published
    ContentPublished { content_id: String, team_id: String },
}

impl Event {
    pub fn team_id(&self) -> &str {
        match self {
            Event::DistributionScheduled { team_id, .. }
            | Event::DistributionPublished { team_id, .. }
            | Event::DistributionFailed { team_id, .. }
            | Event::DistributionCancelled { team_id, .. }
            | Event::ContentPublished { team_id, .. } => team_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::DistributionScheduled { .. } => "distribution_scheduled",
            Event::DistributionPublished { .. } => "distribution_published",
            Event::DistributionFailed { .. } => "distribution_failed",
            Event::DistributionCancelled { .. } => "distribution_cancelled",
            Event::ContentPublished { .. } => "content_published",
        }
    }

    /// Human-readable one-liner for notification sinks
    pub fn message(&self) -> String {
        match self {
            Event::DistributionScheduled {
                content_id,
                platform,
                publish_at,
                ..
            } => format!(
                "content {} scheduled for {} at {}",
                content_id, platform, publish_at
            ),
            Event::DistributionPublished {
                content_id,
                platform,
                external_post_id,
                attempt_count,
                ..
            } => format!(
                "content {} published to {} as {} (attempt {})",
                content_id, platform, external_post_id, attempt_count
            ),
            Event::DistributionFailed {
                content_id,
                platform,
                reason,
                partial_failure,
                ..
            } => {
                if *partial_failure {
                    format!(
                        "content {} partially failed: {} release did not go out: {}",
                        content_id, platform, reason
                    )
                } else {
                    format!("content {} failed on {}: {}", content_id, platform, reason)
                }
            }
            Event::DistributionCancelled {
                content_id,
                platform,
                ..
            } => format!("release of content {} to {} was cancelled", content_id, platform),
            Event::ContentPublished { content_id, .. } => {
                format!("content {} is live on every scheduled platform", content_id)
            }
        }
    }
}

/// External notification collaborator. Fire-and-forget from the core's
/// perspective; delivery guarantees belong to the implementation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, recipient_id: &str, event_type: &str, message: &str);
}

/// Sink that just logs dispatches, used by the daemon when no external
/// notifier is wired up
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn dispatch(&self, recipient_id: &str, event_type: &str, message: &str) {
        info!(recipient = recipient_id, kind = event_type, "{}", message);
    }
}

/// Bridge the bus to a notification sink on a background task.
///
/// Runs until the bus is dropped. Lagged receivers skip ahead rather than
/// stalling the emitters.
pub fn spawn_notification_forwarder(
    bus: &EventBus,
    sink: std::sync::Arc<dyn NotificationSink>,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    sink.dispatch(event.team_id(), event.kind(), &event.message())
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("notification forwarder lagged, skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
