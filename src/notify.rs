use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::observability;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    Holder(Ulid),
    /// Everyone who manages the inventory.
    Managers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Recipient,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub asset_id: Option<Ulid>,
}

impl Notification {
    pub fn new(
        recipient: Recipient,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient,
            title: title.into(),
            message: message.into(),
            severity,
            asset_id: None,
        }
    }

    pub fn about(mut self, asset_id: Ulid) -> Self {
        self.asset_id = Some(asset_id);
        self
    }
}

/// Where the engine reports state transitions. Fire-and-forget: `deliver`
/// cannot fail, and a sink that drops a message never affects the transition.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification);
}

/// Broadcast hub with one channel per recipient.
pub struct NotifyHub {
    channels: DashMap<Recipient, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a recipient's notifications. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Recipient) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl NotificationSink for NotifyHub {
    /// No-op if nobody is listening for this recipient.
    fn deliver(&self, notification: Notification) {
        let recipient = notification.recipient;
        let delivered = self
            .channels
            .get(&recipient)
            .is_some_and(|sender| sender.send(notification).is_ok());
        let outcome = if delivered { "delivered" } else { "dropped" };
        metrics::counter!(observability::NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_only_its_own() {
        let hub = NotifyHub::new();
        let alice = Ulid::new();
        let bob = Ulid::new();
        let mut rx_alice = hub.subscribe(Recipient::Holder(alice));
        let mut rx_managers = hub.subscribe(Recipient::Managers);

        hub.deliver(Notification::new(
            Recipient::Holder(bob),
            Severity::Info,
            "Asset allocated",
            "for bob",
        ));
        let for_alice = Notification::new(
            Recipient::Holder(alice),
            Severity::Warning,
            "Return requested",
            "please return LAPTOP-07",
        );
        hub.deliver(for_alice.clone());

        assert_eq!(rx_alice.recv().await.unwrap(), for_alice);
        assert!(rx_alice.try_recv().is_err());
        assert!(rx_managers.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.deliver(Notification::new(Recipient::Managers, Severity::Info, "t", "m"));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_fail_delivery() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe(Recipient::Managers);
        drop(rx);
        hub.deliver(Notification::new(Recipient::Managers, Severity::Error, "t", "m"));
    }
}
