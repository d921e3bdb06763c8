//! # scanprep-archive
//!
//! Expands gzip-compressed tarballs (vulnerability databases and similar auxiliary
//! scanner inputs) onto disk. Only directories and regular files are accepted; any
//! other entry type aborts the extraction.

mod extract;

pub use extract::{extract, extract_file, extract_url, ArchiveError, ExtractSummary};
