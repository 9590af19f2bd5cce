pub mod db;
pub mod executor;
pub mod formatter;
pub mod llm;
pub mod matcher;
pub mod recovery;
pub mod schema;
pub mod session;
pub mod terminal;
