//! Log-backed ticketing and notification collaborators.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fileferry_core::{
    CollaboratorResult, NotificationEvent, Notifier, Priority, TicketStatus, TicketingSystem,
    TransferOutcome,
};
use tracing::info;

/// Ticketing system that records tickets in the log.
#[derive(Debug)]
pub struct TracingTicketing {
    next_id: AtomicU64,
}

impl TracingTicketing {
    /// Ticketing starting at `FF-1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for TracingTicketing {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketingSystem for TracingTicketing {
    async fn open(
        &self,
        summary: &str,
        detail: &str,
        priority: Priority,
    ) -> CollaboratorResult<String> {
        let ticket_id = format!("FF-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(ticket_id, priority = priority.as_str(), summary, detail, "ticket opened");
        Ok(ticket_id)
    }

    async fn update(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        detail: &str,
    ) -> CollaboratorResult<()> {
        info!(ticket_id, status = status.as_str(), detail, "ticket updated");
        Ok(())
    }
}

/// Notification channel that writes each delivery to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        recipient: &str,
        event: NotificationEvent,
        payload: &TransferOutcome,
    ) -> CollaboratorResult<()> {
        info!(
            recipient,
            event = event.as_str(),
            run_id = %payload.run_id,
            bytes_transferred = payload.bytes_transferred,
            error_kind = payload.error.as_ref().map(|error| error.kind.as_str()),
            "notification delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticket_ids_increase() -> anyhow::Result<()> {
        let ticketing = TracingTicketing::new();
        let first = ticketing.open("a", "b", Priority::Normal).await?;
        let second = ticketing.open("c", "d", Priority::High).await?;
        assert_eq!(first, "FF-1");
        assert_eq!(second, "FF-2");
        ticketing
            .update(&second, TicketStatus::Resolved, "done")
            .await?;
        Ok(())
    }
}
