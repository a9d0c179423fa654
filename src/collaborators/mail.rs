//! Mailer that only logs
//!
//! Default for the binary until a real transport is plugged in.

use crate::collaborators::{DeliveryError, Mailer};
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, recipient: &str, subject: &str, content: &str) -> Result<(), DeliveryError> {
        if recipient.trim().is_empty() {
            return Err(DeliveryError("empty recipient".to_string()));
        }
        tracing::info!(recipient, subject, bytes = content.len(), "📧 Email delivered (log transport)");
        Ok(())
    }
}
