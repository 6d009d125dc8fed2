use async_trait::async_trait;

use crate::context::ContextMessage;
use crate::core::error::ClientError;

pub mod http;

/// Remote completion service boundary.
///
/// Returns an ordered list of reply option strings for the given message, or
/// a typed failure. The scheduler trusts [`ClientError::is_throttled`] to
/// distinguish retryable throttling from terminal failure; implementations
/// must enforce their own call timeout and surface it as a non-throttling
/// error.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn call(
        &self,
        content: &str,
        context: &[ContextMessage],
    ) -> Result<Vec<String>, ClientError>;
}
