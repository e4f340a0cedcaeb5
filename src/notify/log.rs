// ABOUTME: Notifier that writes the summary to the log.

use async_trait::async_trait;

use super::{Message, Notifier, NotifyError};

#[derive(Debug, Clone)]
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, message: &Message) -> Result<(), NotifyError> {
        tracing::info!(
            notifier = %self.name,
            title = %message.title,
            "{}",
            message.body.trim_end()
        );
        Ok(())
    }
}
