//! Outbound lifecycle notifications.
//!
//! Collaborators either poll the entity or subscribe here. Events are
//! published after the owning transaction commits and are lossy by design
//! (polling is the fallback); publishing never blocks the transaction path.

use tokio::sync::broadcast;

use crate::types::{EscrowId, PayoutId, RefundId, WalletId};

/// Entity lifecycle transitions observable by collaborators
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    DepositCredited { wallet_id: WalletId, amount: u64 },
    EscrowAuthorized { escrow_id: EscrowId },
    EscrowCaptured { escrow_id: EscrowId, amount: u64 },
    EscrowCancelled { escrow_id: EscrowId },
    EscrowRefunded { escrow_id: EscrowId },
    RefundProcessed { refund_id: RefundId, escrow_id: EscrowId, amount: u64 },
    PayoutInitiated { payout_id: PayoutId },
    PayoutCompleted { payout_id: PayoutId },
    PayoutFailed { payout_id: PayoutId, code: String },
}

/// Broadcast fan-out for `LedgerEvent`
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget. A send error just means nobody is subscribed.
    pub fn publish(&self, event: LedgerEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("No event subscribers: {}", e);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let escrow_id = EscrowId::new();
        bus.publish(LedgerEvent::EscrowCaptured {
            escrow_id,
            amount: 100,
        });

        match rx.recv().await.unwrap() {
            LedgerEvent::EscrowCaptured {
                escrow_id: id,
                amount,
            } => {
                assert_eq!(id, escrow_id);
                assert_eq!(amount, 100);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(LedgerEvent::EscrowCancelled {
            escrow_id: EscrowId::new(),
        });
    }
}
