//! ExifTool adapter: EXIF-like tag reads plus small rating/tag writes.

use super::{run_with_timeout, TimedOutput};
use crate::error::AtelierError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Max files handed to a single exiftool invocation in batch mode.
const BATCH_CHUNK: usize = 32;

pub struct ExifTool {
    bin: String,
    timeout: Duration,
    available: OnceLock<bool>,
}

impl ExifTool {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
            available: OnceLock::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            Command::new(&self.bin)
                .arg("-ver")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    /// Read tags from a file. `tags` narrows the read to the given tag names
    /// (used by the lightweight rating/tags path).
    pub fn read(&self, path: &Path, tags: Option<&[&str]>) -> crate::Result<Map<String, Value>> {
        if !self.is_available() {
            return Err(AtelierError::ToolMissing { tool: "exiftool" });
        }

        let mut cmd = Command::new(&self.bin);
        // -G1 groups keys (XMP-xmp:Rating), -s uses tag names, -n numeric values.
        cmd.arg("-json").arg("-G1").arg("-s").arg("-n");
        if let Some(tags) = tags {
            for tag in tags {
                cmd.arg(format!("-{tag}"));
            }
        }
        cmd.arg(path);

        let out = run_with_timeout(&mut cmd, self.timeout)?;
        let objects = self.parse_output(out, path)?;
        objects
            .into_iter()
            .next()
            .ok_or_else(|| AtelierError::Exiftool("empty exiftool output".into()))
    }

    /// Read tags from many files with native batch invocations (chunked).
    pub fn read_batch(&self, paths: &[&Path]) -> HashMap<String, crate::Result<Map<String, Value>>> {
        let mut results: HashMap<String, crate::Result<Map<String, Value>>> = HashMap::new();
        if paths.is_empty() {
            return results;
        }
        if !self.is_available() {
            for p in paths {
                results.insert(
                    p.to_string_lossy().into_owned(),
                    Err(AtelierError::ToolMissing { tool: "exiftool" }),
                );
            }
            return results;
        }

        for chunk in paths.chunks(BATCH_CHUNK) {
            let mut cmd = Command::new(&self.bin);
            cmd.arg("-json").arg("-G1").arg("-s").arg("-n");
            for &p in chunk {
                cmd.arg(p);
            }
            // Scale the deadline with the chunk; a single stuck file should
            // not sink the whole batch silently.
            let timeout = self.timeout * (chunk.len().min(8) as u32);

            let parsed = run_with_timeout(&mut cmd, timeout)
                .map_err(AtelierError::from)
                .and_then(|out| self.parse_batch_output(out));

            match parsed {
                Ok(by_source) => {
                    for &p in chunk {
                        let key = p.to_string_lossy().into_owned();
                        match by_source.get(&key) {
                            Some(map) => {
                                results.insert(key, Ok(map.clone()));
                            }
                            None => {
                                // exiftool silently skips unreadable files in
                                // batch mode; fall back to a single read so the
                                // error is attributable.
                                results.insert(key, self.read(p, None));
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("exiftool batch chunk failed ({e}); retrying files individually");
                    for &p in chunk {
                        results.insert(p.to_string_lossy().into_owned(), self.read(p, None));
                    }
                }
            }
        }

        results
    }

    /// Write a set of tag fields. Arrays are written as repeated values.
    /// The original file is overwritten in place with its modify date kept.
    pub fn write(
        &self,
        path: &Path,
        fields: &Map<String, Value>,
        _preserve_workflow: bool,
    ) -> crate::Result<()> {
        if !self.is_available() {
            return Err(AtelierError::ToolMissing { tool: "exiftool" });
        }

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-overwrite_original").arg("-P");
        for (key, value) in fields {
            if !is_safe_tag_name(key) {
                return Err(AtelierError::InvalidInput(format!(
                    "Invalid exiftool tag name: {key}"
                )));
            }
            match value {
                Value::Array(items) => {
                    if items.is_empty() {
                        cmd.arg(format!("-{key}="));
                    }
                    for item in items {
                        cmd.arg(format!("-{key}={}", scalar_str(item)));
                    }
                }
                other => {
                    cmd.arg(format!("-{key}={}", scalar_str(other)));
                }
            }
        }
        cmd.arg(path);

        let out = run_with_timeout(&mut cmd, self.timeout)?;
        match out.status {
            None => Err(AtelierError::Timeout(format!(
                "exiftool write timeout after {:?}",
                self.timeout
            ))),
            Some(status) if !status.success() => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                warn!(path = %path.display(), "exiftool write failed: {stderr}");
                Err(AtelierError::Exiftool(if stderr.is_empty() {
                    "exiftool write failed".into()
                } else {
                    stderr
                }))
            }
            Some(_) => Ok(()),
        }
    }

    fn parse_output(&self, out: TimedOutput, path: &Path) -> crate::Result<Vec<Map<String, Value>>> {
        let status = out.status.ok_or_else(|| {
            AtelierError::Timeout(format!("exiftool timeout after {:?}", self.timeout))
        })?;
        if !status.success() && out.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            warn!(path = %path.display(), "exiftool error: {stderr}");
            return Err(AtelierError::Exiftool(if stderr.is_empty() {
                "exiftool command failed".into()
            } else {
                stderr
            }));
        }

        let value: Value = serde_json::from_slice(&out.stdout)
            .map_err(|e| AtelierError::Parse(format!("failed to parse exiftool output: {e}")))?;
        match value {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            _ => Err(AtelierError::Parse("invalid exiftool output format".into())),
        }
    }

    fn parse_batch_output(&self, out: TimedOutput) -> crate::Result<HashMap<String, Map<String, Value>>> {
        let objects = self.parse_output(out, Path::new("<batch>"))?;
        let mut by_source = HashMap::new();
        for map in objects {
            if let Some(Value::String(source)) = map.get("SourceFile") {
                by_source.insert(source.clone(), map);
            }
        }
        Ok(by_source)
    }
}

fn scalar_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Tag names passed on the exiftool command line: letters, digits, and the
/// group/structure separators exiftool itself uses.
fn is_safe_tag_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_tag_names() {
        assert!(is_safe_tag_name("XMP:Rating"));
        assert!(is_safe_tag_name("XMP-microsoft:RatingPercent"));
        assert!(is_safe_tag_name("Keywords"));
        assert!(!is_safe_tag_name(""));
        assert!(!is_safe_tag_name("Keywords=x"));
        assert!(!is_safe_tag_name("a b"));
        assert!(!is_safe_tag_name("-exec"));
    }

    #[test]
    fn test_missing_tool_errors() {
        let tool = ExifTool::new("definitely-not-exiftool-bin", Duration::from_secs(1));
        assert!(!tool.is_available());
        let err = tool.read(Path::new("/tmp/x.png"), None).unwrap_err();
        assert_eq!(err.code(), "TOOL_MISSING");
    }
}
