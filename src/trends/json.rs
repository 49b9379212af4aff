//! Response body decoding for the Trends endpoints.
//!
//! Every Trends API body starts with an anti-XSSI guard (`)]}'` for explore,
//! `)]}',` plus a newline for widget data) that must be removed before the
//! remainder is valid JSON.

use anyhow::Result;

/// Strip the anti-XSSI guard, returning the body from its first JSON token.
pub fn strip_xssi_prefix(body: &str) -> &str {
    match body.find(['{', '[']) {
        Some(idx) => &body[idx..],
        None => body,
    }
}

/// Decode a Trends body into `T`, reporting the serde path and a snippet of
/// the offending line on failure.
pub fn parse_trends_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    parse_json_with_context(strip_xssi_prefix(body))
}

/// Attempt to parse JSON and, on failure, include a contextual snippet of the
/// line where the error occurred along with the serde path and type mismatch.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize(jd) {
        Ok(value) => Ok(value),
        Err(err) => {
            let inner_err = err.inner();
            let (line, column) = (inner_err.line(), inner_err.column());
            let path = err.path().to_string();

            let msg = inner_err.to_string();
            let loc = format!(" at line {line} column {column}");
            let msg_without_loc = msg.strip_suffix(&loc).unwrap_or(&msg);

            let mut final_err = String::new();
            if !path.is_empty() && path != "." {
                final_err.push_str(&format!("at path '{path}': "));
            }
            final_err.push_str(&format!(
                "{} (line {line} col {column})\n{}",
                describe_mismatch(msg_without_loc),
                error_snippet(body, line, column, 24)
            ));

            Err(anyhow::anyhow!(final_err))
        }
    }
}

/// Rewrite "invalid type: X, expected Y" as "expected Y, got X".
fn describe_mismatch(error_msg: &str) -> String {
    if let Some(rest) = error_msg.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {expected}, got {actual}");
    }
    error_msg.to_string()
}

/// Show roughly `context_len` characters around the error column with a caret.
///
/// Operates on chars, so multi-byte country names never split a boundary.
fn error_snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .chars()
        .collect();
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    let error_idx = column.saturating_sub(1).min(target.len());
    let half = context_len / 2;
    let start = error_idx.saturating_sub(half);
    let end = (error_idx + half).min(target.len());

    let slice: String = target[start..end].iter().collect();
    let indicator = " ".repeat(error_idx - start) + "^";
    format!("...{slice}...\n   {indicator}")
}
