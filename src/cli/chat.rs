use anyhow::Result;
use console::style;

use crate::core::session::{ConversationState, Orchestrator, TurnReport, TurnState};
use crate::core::terminal;

const EXAMPLES: &[&str] = &[
    "What are the top 5 most rented films?",
    "Which films have never been rented?",
    "Who are our most active customers?",
    "How many films do we have in each category?",
];

/// Interactive loop: one conversation, many turns, history carried across
/// them. `quit`/`exit` or a cancelled prompt ends the session.
pub async fn run_chat(orchestrator: &Orchestrator) -> Result<()> {
    terminal::print_banner();
    println!("Type {} or {} to end the session.\n", style("quit").bold(), style("exit").bold());
    println!("Example questions:");
    for (i, example) in EXAMPLES.iter().enumerate() {
        println!("  {}. {}", i + 1, example);
    }
    println!();

    let mut convo = ConversationState::default();
    loop {
        let question = match inquire::Text::new("Your question:").prompt() {
            Ok(text) => text,
            Err(inquire::InquireError::OperationCanceled)
            | Err(inquire::InquireError::OperationInterrupted) => break,
            Err(e) => return Err(e.into()),
        };
        let question = question.trim().to_string();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        println!("\n{}\n", style("Thinking...").dim());
        run_turn(orchestrator, &mut convo, &question).await;
    }
    Ok(())
}

/// One question, one answer, exit code follows the turn outcome.
pub async fn run_single(orchestrator: &Orchestrator, question: &str) -> Result<()> {
    let mut convo = ConversationState::default();
    let report = run_turn(orchestrator, &mut convo, question).await;
    if report.state == TurnState::Failed {
        // The failure was already printed; the caller only needs the code.
        std::process::exit(1);
    }
    Ok(())
}

async fn run_turn(
    orchestrator: &Orchestrator,
    convo: &mut ConversationState,
    question: &str,
) -> TurnReport {
    let report = orchestrator.run_turn(convo, question).await;
    if let Some(sql) = &report.sql {
        terminal::print_status("SQL", sql);
    }
    match report.state {
        TurnState::Done => {
            if report.attempts > 0 {
                terminal::print_info(&format!(
                    "Recovered query after {} fuzzy-match attempt(s)",
                    report.attempts
                ));
            }
            println!("\n{}\n", report.response);
        }
        _ => {
            terminal::print_error(&report.response);
            println!();
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use crate::core::executor::{QueryExecutor, QueryOutcome};
    use crate::core::llm::{ChatMessage, LlmClient, LlmProvider};
    use crate::core::recovery::RecoveryEngine;
    use crate::core::schema::{Catalog, SchemaCache, SchemaContext};

    struct DownProvider;

    #[async_trait]
    impl LlmProvider for DownProvider {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn generate(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String> {
            bail!("provider unreachable")
        }
    }

    struct EmptyCatalog;

    #[async_trait]
    impl Catalog for EmptyCatalog {
        async fn load_schema(&self) -> Result<SchemaContext> {
            Ok(SchemaContext::default())
        }

        async fn load_column_values(
            &self,
            _table: &str,
            _column: &str,
            _limit: usize,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NullExecutor;

    #[async_trait]
    impl QueryExecutor for NullExecutor {
        async fn execute(&self, _sql: &str) -> QueryOutcome {
            QueryOutcome::Empty
        }
    }

    // `run_single` turns this state into a non-zero exit code.
    #[tokio::test]
    async fn failed_turns_surface_the_failed_state() {
        let cache = Arc::new(SchemaCache::new(Arc::new(EmptyCatalog), 10));
        let orch = Orchestrator::new(
            Arc::new(LlmClient::new(
                Arc::new(DownProvider),
                "test-model".to_string(),
                Duration::from_secs(1),
            )),
            Arc::new(NullExecutor),
            RecoveryEngine::new(cache.clone(), 50),
            cache,
            3,
        );

        let mut convo = ConversationState::default();
        let report = run_turn(&orch, &mut convo, "anything").await;
        assert_eq!(report.state, TurnState::Failed);
    }
}
