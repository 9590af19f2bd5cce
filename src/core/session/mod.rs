use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::executor::{QueryExecutor, QueryOutcome, RowSet};
use crate::core::formatter::format_rows;
use crate::core::llm::{ChatMessage, LlmClient};
use crate::core::recovery::{RecoveryEngine, rewrite_literal};
use crate::core::schema::SchemaCache;

/// Default recovery ceiling per conversation turn.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Per-turn pipeline states. `Init` is entry, `Done` and `Failed` are
/// terminal; `Failed` is reachable from anywhere on unrecoverable error or
/// ceiling breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Init,
    Synthesize,
    Execute,
    Recover,
    Format,
    Respond,
    Done,
    Failed,
}

pub fn can_transition(from: TurnState, to: TurnState) -> bool {
    if to == TurnState::Failed {
        return from != TurnState::Done && from != TurnState::Failed;
    }
    match from {
        TurnState::Init => to == TurnState::Synthesize,
        TurnState::Synthesize => to == TurnState::Execute,
        TurnState::Execute => matches!(to, TurnState::Recover | TurnState::Format),
        TurnState::Recover => to == TurnState::Execute,
        TurnState::Format => to == TurnState::Respond,
        TurnState::Respond => to == TurnState::Done,
        TurnState::Done | TurnState::Failed => false,
    }
}

/// Why a turn ended in `Failed`. Drives the user-facing message; only
/// `ValueNotFound` outcomes were ever retried on the way here.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnFailure {
    /// Transport-class: data store or LLM unreachable, or a call timed out.
    Connection(String),
    /// The generated query was malformed; carries the query for diagnosis.
    Syntax { query: String, message: String },
    /// Retry ceiling reached, or no candidate cleared the threshold.
    RecoveryExhausted {
        table: String,
        column: String,
        literal: String,
    },
    /// Internal-consistency error (e.g. literal vanished before rewrite).
    Internal(String),
}

impl TurnFailure {
    /// Message surfaced to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            TurnFailure::Connection(msg) => {
                format!("I could not reach the database or language model: {}", msg)
            }
            TurnFailure::Syntax { query, message } => format!(
                "The generated query was not valid SQL ({}). Query was:\n{}",
                message, query
            ),
            TurnFailure::RecoveryExhausted {
                table,
                column,
                literal,
            } => format!(
                "I could not find a close match for '{}' in {}.{}. \
                 Try rephrasing the value.",
                literal, table, column
            ),
            TurnFailure::Internal(msg) => format!("Internal error: {}", msg),
        }
    }
}

/// State owned by one conversation. History persists across turns; the
/// query, rows, and attempt counter reset at each turn boundary. Mutated
/// only by the orchestrator.
#[derive(Debug, Default)]
pub struct ConversationState {
    pub history: Vec<ChatMessage>,
    pub sql_query: Option<String>,
    pub rows: Option<RowSet>,
    pub current_response: String,
    pub attempts: u32,
}

/// Terminal report of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub state: TurnState,
    pub response: String,
    pub sql: Option<String>,
    pub attempts: u32,
    pub failure: Option<TurnFailure>,
}

impl TurnReport {
    fn failed(failure: TurnFailure, sql: Option<String>, attempts: u32) -> Self {
        Self {
            state: TurnState::Failed,
            response: failure.user_message(),
            sql,
            attempts,
            failure: Some(failure),
        }
    }
}

/// Drives one user turn end to end: synthesis, execution, bounded fuzzy
/// recovery, formatting, response synthesis. Every collaborator is an
/// explicit capability passed in at construction.
pub struct Orchestrator {
    llm: Arc<LlmClient>,
    executor: Arc<dyn QueryExecutor>,
    recovery: RecoveryEngine,
    cache: Arc<SchemaCache>,
    max_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<LlmClient>,
        executor: Arc<dyn QueryExecutor>,
        recovery: RecoveryEngine,
        cache: Arc<SchemaCache>,
        max_attempts: u32,
    ) -> Self {
        Self {
            llm,
            executor,
            recovery,
            cache,
            max_attempts,
        }
    }

    pub async fn run_turn(&self, convo: &mut ConversationState, question: &str) -> TurnReport {
        // Turn boundary: attempts and per-turn fields reset, history stays.
        convo.sql_query = None;
        convo.rows = None;
        convo.attempts = 0;
        convo.current_response.clear();

        let report = self.drive(convo, question).await;
        convo.current_response = report.response.clone();
        convo.history.push(ChatMessage::user(question));
        convo
            .history
            .push(ChatMessage::assistant(report.response.clone()));
        report
    }

    async fn drive(&self, convo: &mut ConversationState, question: &str) -> TurnReport {
        let mut state = TurnState::Init;

        // INIT -> SYNTHESIZE: assemble schema context and draft a query.
        state = self.step(state, TurnState::Synthesize);
        let (summary, stats) = match self.load_context().await {
            Ok(ctx) => ctx,
            Err(e) => return TurnReport::failed(TurnFailure::Connection(e.to_string()), None, 0),
        };
        let mut sql = match self
            .llm
            .draft_query(&summary, &stats, &convo.history, question)
            .await
        {
            Ok(sql) => sql,
            Err(e) => return TurnReport::failed(TurnFailure::Connection(e.to_string()), None, 0),
        };
        info!(%sql, "candidate query drafted");
        convo.sql_query = Some(sql.clone());

        // EXECUTE, looping through RECOVER while the ceiling allows.
        state = self.step(state, TurnState::Execute);
        let rowset = loop {
            match self.executor.execute(&sql).await {
                QueryOutcome::Success(rowset) => break rowset,
                QueryOutcome::Empty => break RowSet::default(),
                QueryOutcome::SyntaxError(message) => {
                    return TurnReport::failed(
                        TurnFailure::Syntax {
                            query: sql.clone(),
                            message,
                        },
                        convo.sql_query.clone(),
                        convo.attempts,
                    );
                }
                QueryOutcome::ConnectionError(message) => {
                    return TurnReport::failed(
                        TurnFailure::Connection(message),
                        convo.sql_query.clone(),
                        convo.attempts,
                    );
                }
                QueryOutcome::ValueNotFound {
                    table,
                    column,
                    literal,
                } => {
                    if convo.attempts >= self.max_attempts {
                        warn!(attempts = convo.attempts, "recovery ceiling reached");
                        return TurnReport::failed(
                            TurnFailure::RecoveryExhausted {
                                table,
                                column,
                                literal,
                            },
                            convo.sql_query.clone(),
                            convo.attempts,
                        );
                    }
                    state = self.step(state, TurnState::Recover);
                    convo.attempts += 1;
                    let attempt = match self
                        .recovery
                        .recover(&table, &column, &literal, convo.attempts)
                        .await
                    {
                        Ok(attempt) => attempt,
                        Err(e) => {
                            return TurnReport::failed(
                                TurnFailure::Connection(e.to_string()),
                                convo.sql_query.clone(),
                                convo.attempts,
                            );
                        }
                    };
                    let Some(replacement) = attempt.replacement else {
                        return TurnReport::failed(
                            TurnFailure::RecoveryExhausted {
                                table,
                                column,
                                literal,
                            },
                            convo.sql_query.clone(),
                            convo.attempts,
                        );
                    };
                    sql = match rewrite_literal(&sql, &literal, &replacement) {
                        Ok(sql) => sql,
                        Err(e) => {
                            return TurnReport::failed(
                                TurnFailure::Internal(e.to_string()),
                                convo.sql_query.clone(),
                                convo.attempts,
                            );
                        }
                    };
                    info!(attempt = convo.attempts, %sql, "retrying with rewritten query");
                    convo.sql_query = Some(sql.clone());
                    state = self.step(state, TurnState::Execute);
                }
            }
        };
        convo.rows = Some(rowset.clone());

        // FORMAT -> RESPOND: digest the rows, then ask for prose.
        state = self.step(state, TurnState::Format);
        let digest = format_rows(&rowset);
        state = self.step(state, TurnState::Respond);
        let response = match self.llm.compose_answer(question, &sql, &digest).await {
            Ok(response) => response,
            Err(e) => {
                return TurnReport::failed(
                    TurnFailure::Connection(e.to_string()),
                    convo.sql_query.clone(),
                    convo.attempts,
                );
            }
        };

        let state = self.step(state, TurnState::Done);
        TurnReport {
            state,
            response,
            sql: convo.sql_query.clone(),
            attempts: convo.attempts,
            failure: None,
        }
    }

    async fn load_context(&self) -> Result<(String, String)> {
        let summary = self.cache.schema_summary().await?;
        let stats = self.cache.statistics().await?;
        Ok((summary, stats))
    }

    fn step(&self, from: TurnState, to: TurnState) -> TurnState {
        debug_assert!(can_transition(from, to), "bad transition {from:?} -> {to:?}");
        debug!(?from, ?to, "turn transition");
        to
    }
}

#[cfg(test)]
mod tests;
