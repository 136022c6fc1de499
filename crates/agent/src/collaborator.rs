use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use negotiator_core::compose::{CollaboratorRequest, CollaboratorTask};
use negotiator_core::config::LlmConfig;
use negotiator_core::errors::CollaboratorError;
use tracing::warn;

use crate::llm::{LlmClient, LlmError, LlmRequest};

const CLASSIFY_MAX_TOKENS: u32 = 512;
const COMPOSE_MAX_TOKENS: u32 = 256;
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Timeout and retry discipline around one [`LlmClient`].
#[derive(Clone)]
pub struct Collaborator {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Collaborator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        timeout: Duration,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self { client, timeout, max_retries, retry_backoff }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self::new(
            client,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// One round trip. Timeouts and transport failures surface as the
    /// retryable error for the task: unavailable for classification,
    /// degenerate for composition.
    pub async fn request(
        &self,
        request: &CollaboratorRequest,
        temperature: f32,
    ) -> Result<String, CollaboratorError> {
        let max_tokens = match request.task {
            CollaboratorTask::Classify => CLASSIFY_MAX_TOKENS,
            CollaboratorTask::Compose => COMPOSE_MAX_TOKENS,
        };
        let llm_request =
            LlmRequest::new(request.system_prompt(), request.user_prompt(), temperature, max_tokens);

        match tokio::time::timeout(self.timeout, self.client.complete(&llm_request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(error)) => Err(map_llm_error(request.task, error)),
            Err(_) => Err(map_llm_error(request.task, LlmError::Timeout(self.timeout))),
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. Backoff doubles per attempt.
    pub async fn with_retry<T, F, Fut>(
        &self,
        task: CollaboratorTask,
        mut operation: F,
    ) -> Result<T, CollaboratorError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_retries && error.is_retryable() => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        event_name = "collaborator.retry",
                        task = task.as_str(),
                        attempt = attempt + 1,
                        error_class = error.error_class(),
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "collaborator call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(1 << attempt.min(MAX_BACKOFF_DOUBLINGS))
    }
}

fn map_llm_error(task: CollaboratorTask, error: LlmError) -> CollaboratorError {
    match error {
        LlmError::EmptyResponse => CollaboratorError::degenerate(error.to_string()),
        LlmError::Decode(_) => CollaboratorError::malformed(error.to_string()),
        other => match task {
            CollaboratorTask::Classify => CollaboratorError::unavailable(other.to_string()),
            CollaboratorTask::Compose => CollaboratorError::degenerate(other.to_string()),
        },
    }
}
