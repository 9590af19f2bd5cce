use std::sync::Arc;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::{info, warn};

use crate::core::matcher::{self, MatchCandidate};
use crate::core::schema::SchemaCache;

/// One fuzzy-recovery iteration: the offending literal, where it pointed,
/// what the matcher found, and the chosen replacement if any. Consumed by
/// the orchestrator and discarded.
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub literal: String,
    pub table: String,
    pub column: String,
    pub candidates: Vec<MatchCandidate>,
    pub replacement: Option<String>,
    pub attempt: u32,
}

/// Resolves a `ValueNotFound` failure by ranking the column's known values
/// against the offending literal.
pub struct RecoveryEngine {
    cache: Arc<SchemaCache>,
    threshold: u32,
}

impl RecoveryEngine {
    pub fn new(cache: Arc<SchemaCache>, threshold: u32) -> Self {
        Self { cache, threshold }
    }

    pub async fn recover(
        &self,
        table: &str,
        column: &str,
        literal: &str,
        attempt: u32,
    ) -> Result<RecoveryAttempt> {
        let values = self.cache.column_values(table, column).await?;
        let candidates = matcher::rank(literal, &values, self.threshold);
        let replacement = candidates.first().map(|c| c.value.clone());
        match &replacement {
            Some(best) => info!(
                %literal, table, column, best = %best,
                score = candidates[0].score,
                "fuzzy match found"
            ),
            None => warn!(%literal, table, column, "no similar value cleared the threshold"),
        }
        Ok(RecoveryAttempt {
            literal: literal.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            candidates,
            replacement,
            attempt,
        })
    }
}

/// Substitute the first quoted occurrence of `literal` with `replacement`,
/// keeping whatever `%` wildcards surround it in the query (`'lit'`,
/// `'%lit%'`, `'lit%'`, `'%lit'` all rewrite in place). A query with no
/// quoted string whose wildcard-stripped body is `literal` means the text
/// changed between classification and rewrite, which is an
/// internal-consistency bug and never retried.
pub fn rewrite_literal(query: &str, literal: &str, replacement: &str) -> Result<String> {
    let re = Regex::new(r"'([^']*)'").unwrap();
    for caps in re.captures_iter(query) {
        let body = match caps.get(1) {
            Some(m) => m,
            None => continue,
        };
        let text = body.as_str();
        if text.trim_matches('%') != literal {
            continue;
        }
        let lead = text.len() - text.trim_start_matches('%').len();
        let trail = text.len() - text.trim_end_matches('%').len();
        let mut rewritten = String::with_capacity(query.len());
        rewritten.push_str(&query[..body.start()]);
        rewritten.push_str(&text[..lead]);
        rewritten.push_str(replacement);
        rewritten.push_str(&text[text.len() - trail..]);
        rewritten.push_str(&query[body.end()..]);
        return Ok(rewritten);
    }
    bail!(
        "literal '{}' no longer present in query during rewrite: {}",
        literal,
        query
    );
}
