use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Semantic Scholar corpus id of a cited work.
pub type CorpusId = i64;

// The backend emits `null` for several list/string fields it has not filled yet.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Error,
    NotFound,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Error | TaskState::NotFound)
    }
}

/// Links one placeholder token in the answer text to a cited paper and the
/// snippet that supports the claim at that point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationRef {
    pub id: String,
    #[serde(alias = "corpusId", default = "missing_corpus_id")]
    pub corpus_id: CorpusId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub snippet: String,
    #[serde(default)]
    pub n_citations: Option<u64>,
    #[serde(default)]
    pub score: Option<f64>,
}

fn missing_corpus_id() -> CorpusId {
    -1
}

/// One draft of the answer. Drafts arrive in order and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub citations: Vec<CitationRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub iterations: Vec<Iteration>,
}

/// Raw body of the status endpoint, before it is classified.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub task_id: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub task_status: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub task_result: Option<TaskResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedTask {
    pub task_id: String,
    #[serde(default)]
    pub query: Option<String>,
}

/// `task_status` is sent as `"<start_epoch>:<message>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub started_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl TaskProgress {
    pub fn parse(raw: &str) -> Self {
        if let Some((prefix, message)) = raw.split_once(':') {
            if let Ok(epoch) = prefix.trim().parse::<f64>() {
                let started_at = Utc.timestamp_opt(epoch as i64, 0).single();
                return TaskProgress {
                    started_at,
                    message: message.trim().to_string(),
                };
            }
        }
        TaskProgress {
            started_at: None,
            message: raw.trim().to_string(),
        }
    }

    /// Short "2m"-style age of the task, or `None` before the backend reports a start.
    pub fn elapsed_label(&self, now: DateTime<Utc>) -> Option<String> {
        let started = self.started_at?;
        let secs = (now - started).num_seconds().max(0);
        Some(match secs {
            0..=59 => format!("{}s", secs),
            60..=3599 => format!("{}m", secs / 60),
            _ => format!("{}h", secs / 3600),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunningStatus {
    pub task_id: String,
    pub query: Option<String>,
    pub progress: TaskProgress,
    pub estimated_time: Option<String>,
    pub iterations: Vec<Iteration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTask {
    pub task_id: String,
    pub query: Option<String>,
    pub iterations: Vec<Iteration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    InProgress(RunningStatus),
    Done(FinishedTask),
}

impl From<StatusResponse> for TaskStatus {
    fn from(response: StatusResponse) -> Self {
        match (response.task_result, response.task_status) {
            (Some(result), None) => TaskStatus::Done(FinishedTask {
                task_id: response.task_id,
                query: response.query,
                iterations: result.iterations,
            }),
            (result, status) => TaskStatus::InProgress(RunningStatus {
                task_id: response.task_id,
                query: response.query,
                progress: TaskProgress::parse(status.as_deref().unwrap_or_default()),
                estimated_time: response.estimated_time,
                iterations: result.map(|r| r.iterations).unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "authorId", default)]
    pub author_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperMetadata {
    pub corpus_id: CorpusId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub venue: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub authors: Vec<Author>,
}

/// Client-side view of one backend task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub query: String,
    pub state: TaskState,
    pub progress: Option<TaskProgress>,
    pub estimated_time: Option<String>,
    pub iterations: Vec<Iteration>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Task {
            id: id.into(),
            query: query.into(),
            state: TaskState::Pending,
            progress: None,
            estimated_time: None,
            iterations: Vec::new(),
            error: None,
        }
    }

    /// Appends only the drafts beyond the ones already held and returns the
    /// index of the first new draft.
    pub fn append_iterations(&mut self, incoming: Vec<Iteration>) -> std::ops::Range<usize> {
        let start = self.iterations.len();
        self.iterations.extend(incoming.into_iter().skip(start));
        start..self.iterations.len()
    }

    pub fn apply_running(&mut self, status: RunningStatus) -> std::ops::Range<usize> {
        self.state = TaskState::Running;
        if let Some(query) = status.query.filter(|q| !q.is_empty()) {
            self.query = query;
        }
        self.progress = Some(status.progress);
        self.estimated_time = status.estimated_time;
        self.append_iterations(status.iterations)
    }

    pub fn apply_done(&mut self, finished: FinishedTask) -> std::ops::Range<usize> {
        self.state = TaskState::Done;
        if let Some(query) = finished.query.filter(|q| !q.is_empty()) {
            self.query = query;
        }
        self.append_iterations(finished.iterations)
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = TaskState::Error;
        self.error = Some(message.into());
    }

    pub fn mark_not_found(&mut self) {
        self.state = TaskState::NotFound;
        self.error = None;
    }

    pub fn is_running(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IN_PROGRESS: &str = r#"{
        "task_id": "t-1",
        "query": "How are long-form answers evaluated?",
        "task_status": "1718000000:Retrieving papers",
        "estimated_time": "~3 minutes",
        "task_result": null
    }"#;

    const DONE: &str = r#"{
        "task_id": "t-1",
        "query": "How are long-form answers evaluated?",
        "task_result": {
            "iterations": [
                {
                    "text": "Metrics improve results (C1).",
                    "feedback": null,
                    "citations": [
                        {"id": "(C1)", "corpus_id": 42, "n_citations": 3, "snippet": "we show", "score": 0.5}
                    ]
                },
                {"text": "Second draft.", "citations": null}
            ]
        }
    }"#;

    #[test]
    fn classifies_in_progress_shape() {
        let response: StatusResponse = serde_json::from_str(IN_PROGRESS).unwrap();
        match TaskStatus::from(response) {
            TaskStatus::InProgress(status) => {
                assert_eq!(status.progress.message, "Retrieving papers");
                assert_eq!(status.progress.started_at.map(|t| t.timestamp()), Some(1718000000));
                assert_eq!(status.estimated_time.as_deref(), Some("~3 minutes"));
                assert!(status.iterations.is_empty());
            }
            other => panic!("expected in-progress, got {:?}", other),
        }
    }

    #[test]
    fn classifies_done_shape() {
        let response: StatusResponse = serde_json::from_str(DONE).unwrap();
        match TaskStatus::from(response) {
            TaskStatus::Done(done) => {
                assert_eq!(done.iterations.len(), 2);
                assert_eq!(done.iterations[0].citations[0].corpus_id, 42);
                assert!(done.iterations[1].citations.is_empty());
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[test]
    fn partial_result_with_status_is_still_running() {
        let body = r#"{"task_id": "t", "task_status": "Refining", "task_result": {"iterations": [{"text": "a"}]}}"#;
        let response: StatusResponse = serde_json::from_str(body).unwrap();
        match TaskStatus::from(response) {
            TaskStatus::InProgress(status) => {
                assert_eq!(status.iterations.len(), 1);
                assert_eq!(status.progress.message, "Refining");
                assert!(status.progress.started_at.is_none());
            }
            other => panic!("expected in-progress, got {:?}", other),
        }
    }

    #[test]
    fn append_only_takes_new_iterations() {
        let draft = |text: &str| Iteration {
            text: text.to_string(),
            feedback: None,
            citations: Vec::new(),
        };
        let mut task = Task::new("t", "q");
        assert_eq!(task.append_iterations(vec![draft("one")]), 0..1);
        let added = task.append_iterations(vec![draft("changed"), draft("two")]);
        assert_eq!(added, 1..2);
        assert_eq!(task.iterations[0].text, "one");
        assert_eq!(task.iterations[1].text, "two");
    }

    #[test]
    fn paper_metadata_tolerates_nulls() {
        let body = r#"{"corpusId": 7, "title": null, "year": null, "venue": null, "authors": [{"authorId": null, "name": "A B"}]}"#;
        let paper: PaperMetadata = serde_json::from_str(body).unwrap();
        assert_eq!(paper.corpus_id, 7);
        assert!(paper.title.is_empty());
        assert_eq!(paper.authors[0].name, "A B");
    }

    #[test]
    fn elapsed_label_scales_units() {
        let progress = TaskProgress::parse("100:x");
        let at = |secs| Utc.timestamp_opt(secs, 0).single().unwrap();
        assert_eq!(progress.elapsed_label(at(130)).as_deref(), Some("30s"));
        assert_eq!(progress.elapsed_label(at(400)).as_deref(), Some("5m"));
        assert_eq!(progress.elapsed_label(at(7300)).as_deref(), Some("2h"));
    }
}
