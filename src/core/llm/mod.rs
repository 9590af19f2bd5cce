pub mod prompts;
pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Text-generation capability. Nondeterministic and untrusted; callers
/// clean the output before using it as a query.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// Provider plus model selection and a hard timeout. An elapsed timeout is
/// reported as a transport failure, the same class as an unreachable
/// endpoint.
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String, timeout: Duration) -> Self {
        Self {
            provider,
            model,
            timeout,
        }
    }

    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(
            provider = self.provider.name(),
            model = %self.model,
            messages = messages.len(),
            "requesting generation"
        );
        tokio::time::timeout(self.timeout, self.provider.generate(&self.model, messages))
            .await
            .map_err(|_| {
                anyhow!(
                    "{} request timed out after {}s",
                    self.provider.name(),
                    self.timeout.as_secs()
                )
            })?
    }

    /// Draft a SQL query for `question` given the serialized schema context
    /// and prior turns. The returned text is already cleaned of formatting
    /// markers.
    pub async fn draft_query(
        &self,
        schema_summary: &str,
        statistics: &str,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<String> {
        let mut messages = vec![ChatMessage::system(prompts::sql_system_prompt(
            schema_summary,
            statistics,
        ))];
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(question));
        let raw = self.generate(&messages).await?;
        Ok(prompts::clean_generated_sql(&raw))
    }

    /// Turn an executed query and its digest into a prose answer.
    pub async fn compose_answer(&self, question: &str, sql: &str, digest: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::system(prompts::answer_system_prompt()),
            ChatMessage::user(question),
            ChatMessage::system(format!("SQL Query: {}", sql)),
            ChatMessage::system(format!("Query Results:\n{}", digest)),
        ];
        self.generate(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StallingProvider;

    #[async_trait]
    impl LlmProvider for StallingProvider {
        fn name(&self) -> &'static str {
            "stall"
        }

        async fn generate(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn generate(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timeout_is_a_transport_failure() {
        let client = LlmClient::new(
            Arc::new(StallingProvider),
            "m".to_string(),
            Duration::from_millis(50),
        );
        let err = client
            .generate(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn draft_query_sends_history_and_cleans_output() {
        let client = LlmClient::new(
            Arc::new(EchoProvider),
            "m".to_string(),
            Duration::from_secs(5),
        );
        let history = vec![ChatMessage::user("earlier question")];
        let sql = client
            .draft_query("schema", "stats", &history, "```sql\nSELECT 1\n```")
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 1");
    }
}
