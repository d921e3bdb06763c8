//! Parsing of the `downloaderWorkerHeaders` task argument.

use scanprep_fetch::{HeaderMap, HeaderName, HeaderValue};

use crate::error::InputError;

/// Parse `"Key1: Value1, Key2: Value2"` into request headers.
///
/// Every comma-separated pair must contain exactly one `:`. Keys and values are
/// trimmed. An empty or blank spec yields no headers.
pub fn parse_header_spec(spec: &str) -> Result<HeaderMap, InputError> {
    let mut headers = HeaderMap::new();
    if spec.trim().is_empty() {
        return Ok(headers);
    }

    for pair in spec.split(',') {
        let parts: Vec<&str> = pair.split(':').collect();
        let [key, value] = parts.as_slice() else {
            return Err(InputError::config(format!("invalid header: {pair}")));
        };
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|e| InputError::config(format!("invalid header name {key:?}: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| InputError::config(format!("invalid header value for {name}: {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}
