use super::Notifier;
use anyhow::Result;

/// Writes notifications to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify_success(&self, message: &str) -> Result<()> {
        println!("{}", message);
        Ok(())
    }

    async fn notify_warning(&self, message: &str) -> Result<()> {
        println!("{}", message);
        Ok(())
    }

    async fn notify_failure(&self, message: &str) -> Result<()> {
        println!("{}", message);
        Ok(())
    }
}
