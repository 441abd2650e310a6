pub mod history;
pub mod run;

pub use history::{record_history, HistoryEntry, HistorySink, NoHistory, RedisHistory};
pub use run::{process_run_request, RunRequest, RunResponse};
