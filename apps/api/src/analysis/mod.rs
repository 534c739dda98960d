// Career analysis: request building, stream parsing, fallbacks, sessions, report.
// All provider calls go through llm_client; nothing here speaks HTTP upstream.

pub mod fetcher;
pub mod handlers;
pub mod models;
pub mod ndjson;
pub mod prompts;
pub mod report;
pub mod request;
pub mod session;
