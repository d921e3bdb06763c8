//! Task descriptor handed to a scanner.

use std::path::PathBuf;
use std::time::Duration;

use scanprep_image::BlobReference;
use serde::{Deserialize, Serialize};

use crate::error::InputError;

pub const ARG_PACKAGE_TYPE: &str = "packageType";
pub const ARG_WORKER_COUNT: &str = "downloaderWorkerCount";
pub const ARG_WORKER_HEADERS: &str = "downloaderWorkerHeaders";
pub const ARG_MAX_TIME: &str = "maxTime";

/// `packageType` value selecting image mode.
pub const PACKAGE_TYPE_DOCKER: &str = "DOCKER";

/// Declared type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentType {
    String,
    Number,
    Boolean,
    #[serde(other)]
    Other,
}

/// One tool argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub des: String,
}

/// Tool configuration carried by the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl ToolConfig {
    fn find(&self, key: &str, kind: ArgumentType) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.key == key && a.kind == kind)
            .map(|a| a.value.as_str())
    }

    /// Value of a `STRING` argument.
    pub fn string_arg(&self, key: &str) -> Option<&str> {
        self.find(key, ArgumentType::String)
    }

    /// Integer value of a `NUMBER` argument. A present but non-integer value is an
    /// error.
    pub fn int_arg(&self, key: &str) -> Result<Option<i64>, InputError> {
        self.find(key, ArgumentType::Number)
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| InputError::config(format!("argument {key} is not an integer: {v}")))
            })
            .transpose()
    }

    pub fn float_arg(&self, key: &str) -> Result<Option<f64>, InputError> {
        self.find(key, ArgumentType::Number)
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| InputError::config(format!("argument {key} is not a number: {v}")))
            })
            .transpose()
    }

    pub fn bool_arg(&self, key: &str) -> Result<Option<bool>, InputError> {
        self.find(key, ArgumentType::Boolean)
            .map(|v| {
                v.trim()
                    .parse()
                    .map_err(|_| InputError::config(format!("argument {key} is not a boolean: {v}")))
            })
            .transpose()
    }
}

/// A scan task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub tool_config: ToolConfig,
    /// Local file to scan instead of downloading.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub file_urls: Vec<BlobReference>,
}

impl TaskDescriptor {
    pub fn from_slice(body: &[u8]) -> Result<Self, InputError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// True when the task targets a container image.
    pub fn is_image(&self) -> bool {
        self.tool_config.string_arg(ARG_PACKAGE_TYPE) == Some(PACKAGE_TYPE_DOCKER)
    }

    /// Scanner execution budget from `maxTime` (milliseconds).
    pub fn max_time(&self) -> Result<Option<Duration>, InputError> {
        Ok(self
            .tool_config
            .int_arg(ARG_MAX_TIME)?
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64)))
    }

    /// `downloaderWorkerCount`, or `0` for a plain stream download.
    pub fn worker_count(&self) -> Result<i64, InputError> {
        Ok(self.tool_config.int_arg(ARG_WORKER_COUNT)?.unwrap_or(0))
    }

    /// Raw `downloaderWorkerHeaders` spec.
    pub fn worker_headers(&self) -> Option<&str> {
        self.tool_config.string_arg(ARG_WORKER_HEADERS)
    }

    /// The local file shortcut, when set and non-empty.
    pub fn local_file(&self) -> Option<&PathBuf> {
        self.file_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}
