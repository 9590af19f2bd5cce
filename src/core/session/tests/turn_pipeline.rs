use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;

use crate::core::db::SqliteFactory;
use crate::core::executor::{ExecutionAdapter, QueryExecutor, QueryOutcome};
use crate::core::llm::{ChatMessage, LlmClient, LlmProvider};
use crate::core::recovery::RecoveryEngine;
use crate::core::schema::{Catalog, SchemaCache, SchemaContext, SqliteCatalog};
use crate::core::session::{
    ConversationState, Orchestrator, TurnFailure, TurnState,
};

/// Answers the synthesis request with a fixed query and the response
/// request with a fixed answer, telling them apart by the digest marker.
struct ScriptedProvider {
    sql: String,
    answer: String,
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, _model: &str, messages: &[ChatMessage]) -> Result<String> {
        let is_answer_request = messages
            .iter()
            .any(|m| m.content.starts_with("Query Results:"));
        if is_answer_request {
            Ok(self.answer.clone())
        } else {
            Ok(self.sql.clone())
        }
    }
}

struct FixedValueCatalog(Vec<String>);

#[async_trait]
impl Catalog for FixedValueCatalog {
    async fn load_schema(&self) -> Result<SchemaContext> {
        Ok(SchemaContext::default())
    }

    async fn load_column_values(
        &self,
        _table: &str,
        _column: &str,
        _limit: usize,
    ) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Counts calls and returns the same outcome every time.
struct RepeatingExecutor {
    outcome: QueryOutcome,
    calls: AtomicUsize,
}

impl RepeatingExecutor {
    fn new(outcome: QueryOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QueryExecutor for RepeatingExecutor {
    async fn execute(&self, _sql: &str) -> QueryOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

fn llm(sql: &str, answer: &str) -> Arc<LlmClient> {
    Arc::new(LlmClient::new(
        Arc::new(ScriptedProvider {
            sql: sql.to_string(),
            answer: answer.to_string(),
        }),
        "test-model".to_string(),
        Duration::from_secs(5),
    ))
}

fn orchestrator_with_stub_executor(
    executor: Arc<dyn QueryExecutor>,
    values: &[&str],
    sql: &str,
    max_attempts: u32,
) -> Orchestrator {
    let cache = Arc::new(SchemaCache::new(
        Arc::new(FixedValueCatalog(
            values.iter().map(|v| v.to_string()).collect(),
        )),
        100,
    ));
    Orchestrator::new(
        llm(sql, "the answer"),
        executor,
        RecoveryEngine::new(cache.clone(), 50),
        cache,
        max_attempts,
    )
}

#[tokio::test]
async fn persistent_value_not_found_fails_after_exactly_the_ceiling() {
    let sql = "SELECT f.title FROM film f WHERE f.title = 'Jurasic Park'";
    let executor = RepeatingExecutor::new(QueryOutcome::ValueNotFound {
        table: "film".to_string(),
        column: "title".to_string(),
        literal: "Jurasic Park".to_string(),
    });
    // The catalog serves the offending literal itself, so every recovery
    // finds a "match", rewrites to the same query, and re-executes.
    let orch =
        orchestrator_with_stub_executor(executor.clone(), &["Jurasic Park"], sql, 3);

    let mut convo = ConversationState::default();
    let report = orch.run_turn(&mut convo, "any question").await;

    assert_eq!(report.state, TurnState::Failed);
    assert_eq!(report.attempts, 3);
    assert!(matches!(
        report.failure,
        Some(TurnFailure::RecoveryExhausted { .. })
    ));
    // Initial execution plus one per recovery iteration, then the ceiling.
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn no_candidate_above_threshold_fails_on_first_recovery() {
    let sql = "SELECT f.title FROM film f WHERE f.title = 'Zzzz'";
    let executor = RepeatingExecutor::new(QueryOutcome::ValueNotFound {
        table: "film".to_string(),
        column: "title".to_string(),
        literal: "Zzzz".to_string(),
    });
    let orch = orchestrator_with_stub_executor(
        executor.clone(),
        &["Completely Unrelated"],
        sql,
        3,
    );

    let mut convo = ConversationState::default();
    let report = orch.run_turn(&mut convo, "any question").await;

    assert_eq!(report.state, TurnState::Failed);
    assert_eq!(report.attempts, 1);
    assert!(matches!(
        report.failure,
        Some(TurnFailure::RecoveryExhausted { .. })
    ));
    assert!(report.response.contains("close match"));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn syntax_errors_are_never_retried() {
    let executor =
        RepeatingExecutor::new(QueryOutcome::SyntaxError("near FRM".to_string()));
    let orch =
        orchestrator_with_stub_executor(executor.clone(), &[], "SELEC 1 FRM dual", 3);

    let mut convo = ConversationState::default();
    let report = orch.run_turn(&mut convo, "any question").await;

    assert_eq!(report.state, TurnState::Failed);
    assert_eq!(report.attempts, 0);
    let Some(TurnFailure::Syntax { query, .. }) = report.failure else {
        panic!("expected syntax failure, got {:?}", report.failure);
    };
    assert_eq!(query, "SELEC 1 FRM dual");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connection_errors_fail_the_turn_immediately() {
    let executor =
        RepeatingExecutor::new(QueryOutcome::ConnectionError("store down".to_string()));
    let orch = orchestrator_with_stub_executor(executor.clone(), &[], "SELECT 1", 3);

    let mut convo = ConversationState::default();
    let report = orch.run_turn(&mut convo, "any question").await;

    assert_eq!(report.state, TurnState::Failed);
    assert!(matches!(report.failure, Some(TurnFailure::Connection(_))));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

fn sqlite_stack(
    sql: &str,
    answer: &str,
) -> (tempfile::TempDir, Orchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rentals.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE film (
             film_id INTEGER PRIMARY KEY,
             title TEXT NOT NULL,
             description TEXT
         );
         INSERT INTO film VALUES
             (1, 'Jurassic Park', 'Dinosaurs run amok'),
             (2, 'Jaws', 'A shark terrorizes a beach town');",
    )
    .unwrap();

    let factory = Arc::new(SqliteFactory::new(&path));
    let cache = Arc::new(SchemaCache::new(
        Arc::new(SqliteCatalog::new(factory.clone())),
        100,
    ));
    let orch = Orchestrator::new(
        llm(sql, answer),
        Arc::new(ExecutionAdapter::new(factory, cache.clone())),
        RecoveryEngine::new(cache.clone(), 50),
        cache,
        3,
    );
    (dir, orch)
}

#[tokio::test]
async fn misspelled_literal_recovers_end_to_end() {
    let (_dir, orch) = sqlite_stack(
        "SELECT f.title, f.description FROM film f WHERE f.title = 'Jurasic Park'",
        "Jurassic Park is about dinosaurs running amok.",
    );

    let mut convo = ConversationState::default();
    let report = orch.run_turn(&mut convo, "What is Jurasic Park about?").await;

    assert_eq!(report.state, TurnState::Done);
    assert_eq!(report.attempts, 1);
    assert!(report.failure.is_none());
    assert!(report.sql.unwrap().contains("'Jurassic Park'"));
    assert_eq!(report.response, "Jurassic Park is about dinosaurs running amok.");
    assert_eq!(convo.rows.as_ref().unwrap().rows.len(), 1);
}

#[tokio::test]
async fn prefix_like_pattern_recovers_end_to_end() {
    let (_dir, orch) = sqlite_stack(
        "SELECT title FROM film WHERE title LIKE 'Jurasic%'",
        "That would be Jurassic Park.",
    );

    let mut convo = ConversationState::default();
    let report = orch.run_turn(&mut convo, "Which titles start with Jurasic?").await;

    assert_eq!(report.state, TurnState::Done);
    assert_eq!(report.attempts, 1);
    assert!(report.failure.is_none());
    assert!(report.sql.unwrap().contains("LIKE 'Jurassic Park%'"));
    assert_eq!(convo.rows.as_ref().unwrap().rows.len(), 1);
}

#[tokio::test]
async fn history_accumulates_and_attempts_reset_per_turn() {
    let (_dir, orch) = sqlite_stack(
        "SELECT title FROM film WHERE title = 'Jurasic Park'",
        "It is a dinosaur movie.",
    );

    let mut convo = ConversationState::default();
    let first = orch.run_turn(&mut convo, "first question").await;
    assert_eq!(first.attempts, 1);
    assert_eq!(convo.history.len(), 2);

    let second = orch.run_turn(&mut convo, "second question").await;
    // The column-value cache already holds the real titles; the turn still
    // recovers independently and its counter starts from zero.
    assert_eq!(second.attempts, 1);
    assert_eq!(second.state, TurnState::Done);
    assert_eq!(convo.history.len(), 4);
    assert_eq!(convo.current_response, "It is a dinosaur movie.");
}
