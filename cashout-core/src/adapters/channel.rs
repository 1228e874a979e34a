//! In-process event publisher on a tokio broadcast channel
//!
//! Every subscriber sees every event published after it subscribed.
//! Publishing with no subscribers is not an error.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::result::Result;
use crate::domain::CashOutEvent;
use crate::ports::EventPublisher;

const DEFAULT_CAPACITY: usize = 1024;

pub struct ChannelEventPublisher {
    sender: broadcast::Sender<CashOutEvent>,
}

impl ChannelEventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CashOutEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: &CashOutEvent) -> Result<()> {
        // send() only fails when nobody is listening
        if self.sender.send(event.clone()).is_err() {
            debug!(event = event.name(), cash_out_id = %event.cash_out_id, "No subscribers for event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CashOutRecord, NewCashOut, Provider};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn completed_event() -> CashOutEvent {
        let mut record = CashOutRecord::new(NewCashOut {
            user_id: "u".to_string(),
            wallet_id: "w".to_string(),
            amount: Decimal::new(100, 0),
            currency: "UGX".to_string(),
            fee: Decimal::ZERO,
            provider: Provider::MtnMomo,
            provider_account_id: "256700000000".to_string(),
            provider_account_name: None,
        });
        record.begin_processing(Utc::now()).unwrap();
        record.complete(None, Utc::now()).unwrap();
        CashOutEvent::for_record(&record).unwrap()
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publisher = ChannelEventPublisher::new();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(&completed_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let publisher = ChannelEventPublisher::new();
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        let event = completed_event();

        publisher.publish(&event).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap().cash_out_id, event.cash_out_id);
    }
}
