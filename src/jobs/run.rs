//! Run requests received from the queue

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{EngineResponse, Job};
use crate::engine::Dispatcher;

use super::history::{record_history, HistoryEntry, HistorySink};

/// Job received from the Redis queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Caller-chosen id; the result is stored under it
    pub request_id: String,
    pub language: String,
    pub code: String,
    /// Text fed to the program's standard input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Signed-in user; successful runs are recorded to their history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Result stored for a run request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub response: EngineResponse,
}

pub async fn process_run_request(
    dispatcher: &Dispatcher,
    history: &dyn HistorySink,
    request: RunRequest,
) -> RunResponse {
    let mut job = Job::new(request.language, request.code);
    if let Some(input) = request.input {
        job = job.with_stdin(input);
    }

    info!(
        "Received run job: request_id={}, job_id={}, language={}",
        request.request_id, job.id, job.language
    );

    let result = dispatcher.run(&job).await;

    if let (Some(user_id), true) = (request.user_id, result.is_success()) {
        let entry = HistoryEntry::new(user_id, &job.language, &job.source_code, result.summary());
        record_history(history, entry).await;
    }

    RunResponse {
        request_id: request.request_id,
        response: result.to_response(),
    }
}
