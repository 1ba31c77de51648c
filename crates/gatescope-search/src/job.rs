//! Search job lifecycle state.

use serde_json::Value;

/// Lifecycle state of a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Polling,
    Done,
    Failed,
}

/// A search job on the backend, alive for the duration of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchJob {
    /// Backend job id.
    pub sid: String,
    pub query: String,
    pub state: JobState,
}

impl SearchJob {
    /// A freshly created job.
    pub fn submitted(sid: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            query: query.into(),
            state: JobState::Submitted,
        }
    }

    /// Applies a status document, returning the new state.
    pub fn observe(&mut self, status: &Value) -> JobState {
        self.state = state_from_status(status);
        self.state
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true"),
        _ => false,
    }
}

/// Reads `entry[0].content` of a job status document.
fn state_from_status(status: &Value) -> JobState {
    let content = status
        .get("entry")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("content"));
    let Some(content) = content else {
        return JobState::Polling;
    };

    let failed = truthy(content.get("isFailed"))
        || content
            .get("dispatchState")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("FAILED"));

    if failed {
        JobState::Failed
    } else if truthy(content.get("isDone")) {
        JobState::Done
    } else {
        JobState::Polling
    }
}
