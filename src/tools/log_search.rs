// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Log file search tool.
//!
//! Greps the configured log paths directly rather than the log index, so
//! the agent sees lines that have not been ingested yet. Output is bounded
//! on every axis: bytes read per file, matches returned, and line length.

use super::{Tool, ToolError, ToolResult};
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Only the tail of large files is scanned.
const MAX_SCAN_BYTES: u64 = 2 * 1024 * 1024;
/// Hard cap on returned matches.
const MAX_MATCHES: usize = 200;
/// Long lines are trimmed to this many characters.
const MAX_LINE_CHARS: usize = 500;

/// Searches the configured log files with a regex.
pub struct LogSearchTool {
    log_paths: Vec<PathBuf>,
}

impl LogSearchTool {
    pub fn new(log_paths: Vec<String>) -> Self {
        Self {
            log_paths: log_paths.into_iter().map(PathBuf::from).collect(),
        }
    }

    async fn scan_file(
        path: &PathBuf,
        regex: &regex::Regex,
        limit: usize,
    ) -> std::io::Result<(Vec<Value>, usize)> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        if len > MAX_SCAN_BYTES {
            file.seek(std::io::SeekFrom::End(-(MAX_SCAN_BYTES as i64)))
                .await?;
        }
        let mut buffer = Vec::with_capacity(len.min(MAX_SCAN_BYTES) as usize);
        file.read_to_end(&mut buffer).await?;
        let text = String::from_utf8_lossy(&buffer);

        let mut matches = Vec::new();
        let mut total = 0usize;
        for (line_no, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                total += 1;
                if matches.len() < limit {
                    matches.push(json!({
                        "line": line_no + 1,
                        "text": line.chars().take(MAX_LINE_CHARS).collect::<String>(),
                    }));
                }
            }
        }
        Ok((matches, total))
    }
}

#[async_trait]
impl Tool for LogSearchTool {
    fn name(&self) -> &str {
        "search_logs"
    }

    fn description(&self) -> &str {
        "Search the monitored log files with a regular expression. Returns matching lines \
         with their line numbers, newest files scanned from the tail."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression to search for"},
                "limit": {"type": "integer", "description": "Max matches per file (default 50)"},
                "case_sensitive": {"type": "boolean", "description": "Default false"}
            },
            "required": ["pattern"]
        })
    }

    fn display_type(&self) -> &str {
        "log_viewer"
    }

    async fn execute(&self, args: Value) -> ToolResult<Value> {
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("pattern is required".into()))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(50)
            .min(MAX_MATCHES as u64) as usize;
        let case_sensitive = args
            .get("case_sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| ToolError::InvalidInput(format!("invalid pattern: {e}")))?;

        let mut files = Vec::new();
        let mut total_matches = 0usize;
        for path in &self.log_paths {
            match Self::scan_file(path, &regex, limit).await {
                Ok((matches, total)) => {
                    total_matches += total;
                    files.push(json!({
                        "file": path.display().to_string(),
                        "total_matches": total,
                        "matches": matches,
                    }));
                }
                Err(e) => {
                    // Missing or unreadable files are reported, not fatal
                    files.push(json!({
                        "file": path.display().to_string(),
                        "error": e.to_string(),
                    }));
                }
            }
        }

        Ok(json!({
            "pattern": pattern,
            "total_matches": total_matches,
            "files": files,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_search_finds_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            &dir,
            "app.log",
            &[
                "2025-06-01 INFO started",
                "2025-06-01 ERROR connection refused",
                "2025-06-01 WARN slow query",
                "2025-06-01 ERROR connection refused",
            ],
        );

        let tool = LogSearchTool::new(vec![path.clone()]);
        let result = tool.execute(json!({"pattern": "ERROR"})).await.unwrap();
        assert_eq!(result["total_matches"], 2);
        assert_eq!(result["files"][0]["file"], path);
        assert_eq!(result["files"][0]["matches"][0]["line"], 2);
    }

    #[tokio::test]
    async fn test_case_insensitive_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "app.log", &["error: lowercase"]);
        let tool = LogSearchTool::new(vec![path]);

        let result = tool.execute(json!({"pattern": "ERROR"})).await.unwrap();
        assert_eq!(result["total_matches"], 1);

        let result = tool
            .execute(json!({"pattern": "ERROR", "case_sensitive": true}))
            .await
            .unwrap();
        assert_eq!(result["total_matches"], 0);
    }

    #[tokio::test]
    async fn test_missing_file_reported_not_fatal() {
        let tool = LogSearchTool::new(vec!["/definitely/not/here.log".to_string()]);
        let result = tool.execute(json!({"pattern": "x"})).await.unwrap();
        assert_eq!(result["total_matches"], 0);
        assert!(result["files"][0]["error"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        let tool = LogSearchTool::new(vec![]);
        let err = tool.execute(json!({"pattern": "("})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_limit_caps_returned_matches() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..20).map(|i| format!("ERROR number {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = write_log(&dir, "app.log", &refs);

        let tool = LogSearchTool::new(vec![path]);
        let result = tool
            .execute(json!({"pattern": "ERROR", "limit": 5}))
            .await
            .unwrap();
        assert_eq!(result["total_matches"], 20);
        assert_eq!(result["files"][0]["matches"].as_array().unwrap().len(), 5);
    }
}
