//! Tool output files.

use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::InputError;

/// Final status of a scan task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
    Timeout,
    Stopped,
}

/// What a scanner run hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub status: TaskStatus,
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub task_id: String,
    /// Scanner-specific result document.
    #[serde(default)]
    pub result: Option<Value>,
}

impl ToolOutput {
    pub fn success(result: Value) -> Self {
        Self {
            status: TaskStatus::Success,
            err: String::new(),
            task_id: String::new(),
            result: Some(result),
        }
    }

    pub fn failed(err: impl fmt::Display) -> Self {
        Self::with_error(TaskStatus::Failed, err)
    }

    pub fn with_error(status: TaskStatus, err: impl fmt::Display) -> Self {
        Self {
            status,
            err: err.to_string(),
            task_id: String::new(),
            result: None,
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

/// Write `output` as JSON to `path`, replacing any existing file.
pub async fn write_output(path: &Path, output: &ToolOutput) -> Result<(), InputError> {
    let body = serde_json::to_vec(output)?;
    tokio::fs::write(path, body).await?;
    info!(path = %path.display(), status = ?output.status, "Wrote tool output");
    Ok(())
}

/// Read a JSON report produced by a scanner.
pub async fn read_report<T: DeserializeOwned>(path: &Path) -> Result<T, InputError> {
    let body = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&body)?)
}
