use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed changes, one channel per professor or resource.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a professor's or resource's changes. Creates the channel if needed.
    pub fn subscribe(&self, channel: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, channel: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&channel) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let professor_id = Ulid::new();
        let mut rx = hub.subscribe(professor_id);

        let event = Event::TutoringStatusChanged {
            id: Ulid::new(),
            professor_id,
            status: BookingStatus::Confirmed,
        };
        hub.send(professor_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn other_channels_stay_quiet() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let other = Ulid::new();
        let mut rx = hub.subscribe(watched);

        hub.send(
            other,
            &Event::ResourceBookingDeleted {
                id: Ulid::new(),
                resource_id: other,
            },
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        hub.send(
            rid,
            &Event::AvailabilityDeactivated {
                id: Ulid::new(),
                professor_id: rid,
            },
        );
    }
}
