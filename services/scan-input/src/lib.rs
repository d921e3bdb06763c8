//! # scanprep-input
//!
//! Prepares the local input a scanner runs against. Given a task descriptor it either
//! opens a local file, downloads and verifies a single artifact, or reconstructs a
//! container image into a legacy archive. It also writes tool output files and reads
//! scanner reports.

pub mod config;
mod error;
mod headers;
mod input;
mod report;
pub mod task;

pub use config::Config;
pub use error::InputError;
pub use headers::parse_header_spec;
pub use input::{InputKind, InputPreparer, PreparedInput, IMAGE_ARCHIVE_NAME};
pub use report::{read_report, write_output, TaskStatus, ToolOutput};
pub use task::{Argument, ArgumentType, TaskDescriptor, ToolConfig};
