use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::domain::LedgerEvent;

/// Outbound seam for completed mutations. Implementations must not block:
/// the ledger has already committed by the time `dispatch` is called and
/// never waits on delivery.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, event: LedgerEvent);
}

/// Logs every event. Used when no other collaborator is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationDispatcher for TracingNotifier {
    fn dispatch(&self, event: LedgerEvent) {
        info!(
            kind = ?event.kind,
            correlation_id = %event.correlation_id,
            actor = %event.actor_id,
            amount = event.amounts.amount,
            currency = %event.amounts.currency,
            recipients = ?event.recipients,
            "ledger event"
        );
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: UnboundedSender<LedgerEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, UnboundedReceiver<LedgerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationDispatcher for ChannelNotifier {
    fn dispatch(&self, event: LedgerEvent) {
        if let Err(err) = self.sender.send(event) {
            warn!(correlation_id = %err.0.correlation_id, "notification receiver dropped");
        }
    }
}
