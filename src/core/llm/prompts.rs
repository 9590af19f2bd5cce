//! System prompts for the two generation tasks and cleanup of model
//! output before it is used as a query.

pub fn sql_system_prompt(schema_summary: &str, statistics: &str) -> String {
    format!(
        "You are a SQL query generator for a relational database.\n\
         Generate only the SQL query, without markdown formatting or explanation.\n\
         The query must be executable SQLite.\n\n\
         Database Schema:\n{schema}\n\
         Table Statistics:\n{stats}\n\
         Rules:\n\
         1. Prefix column names with their table name or alias (e.g. f.title).\n\
         2. Use meaningful table aliases and proper JOIN syntax.\n\
         3. Use fully qualified column names in GROUP BY and ORDER BY.\n\
         4. Prefer CTEs (WITH clauses) for complex queries.\n\
         5. Handle NULL values with IS NULL / IS NOT NULL.\n\
         6. Use DISTINCT when duplicates would otherwise appear.\n\
         7. Quote string literals with single quotes.",
        schema = schema_summary,
        stats = statistics,
    )
}

pub fn answer_system_prompt() -> &'static str {
    "You are a helpful assistant for a relational database.\n\
     Interpret the SQL query results below and answer the user's question in \
     clear natural language.\n\
     Guidelines:\n\
     1. Lead with the most relevant information.\n\
     2. If there are many results, summarize and name only notable examples.\n\
     3. Render timestamps as readable dates and round decimals sensibly.\n\
     4. If the results are empty, say so plainly; do not invent data."
}

/// Strip markdown fences and surrounding whitespace from generated text so
/// it can be executed verbatim. No SQL parsing happens here.
pub fn clean_generated_sql(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```sql") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_sql_is_unwrapped() {
        assert_eq!(
            clean_generated_sql("```sql\nSELECT 1;\n```"),
            "SELECT 1;"
        );
        assert_eq!(clean_generated_sql("```\nSELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn plain_sql_is_only_trimmed() {
        assert_eq!(clean_generated_sql("  SELECT 1  \n"), "SELECT 1");
    }

    #[test]
    fn schema_and_stats_are_embedded_in_the_prompt() {
        let prompt = sql_system_prompt("Table: film", "film: 1000 rows");
        assert!(prompt.contains("Table: film"));
        assert!(prompt.contains("film: 1000 rows"));
    }
}
