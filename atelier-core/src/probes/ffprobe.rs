//! FFprobe adapter: container/stream technical metadata.

use super::run_with_timeout;
use crate::error::AtelierError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::warn;

/// Max concurrent ffprobe processes in batch mode (no native batch support).
const BATCH_WORKERS: usize = 4;

pub struct FfProbe {
    bin: String,
    timeout: Duration,
    available: OnceLock<bool>,
}

impl FfProbe {
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
                .arg("-version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    /// Probe a media file, returning `{format, streams, video_stream, audio_stream}`.
    pub fn read(&self, path: &Path) -> crate::Result<Value> {
        if !self.is_available() {
            return Err(AtelierError::ToolMissing { tool: "ffprobe" });
        }

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path);

        let out = run_with_timeout(&mut cmd, self.timeout)?;
        let status = out.status.ok_or_else(|| {
            AtelierError::Timeout(format!("ffprobe timeout after {:?}", self.timeout))
        })?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            warn!(path = %path.display(), "ffprobe error: {stderr}");
            return Err(AtelierError::Ffprobe(if stderr.is_empty() {
                "ffprobe command failed".into()
            } else {
                stderr
            }));
        }
        if out.stdout.is_empty() {
            return Err(AtelierError::Ffprobe("no ffprobe output".into()));
        }

        let data: Value = serde_json::from_slice(&out.stdout)
            .map_err(|e| AtelierError::Parse(format!("failed to parse ffprobe output: {e}")))?;
        if !data.is_object() {
            return Err(AtelierError::Parse("invalid ffprobe output format".into()));
        }

        let streams = data.get("streams").cloned().unwrap_or_else(|| json!([]));
        let video_stream = find_stream(&streams, "video");
        let audio_stream = find_stream(&streams, "audio");
        Ok(json!({
            "format": data.get("format").cloned().unwrap_or_else(|| json!({})),
            "streams": streams,
            "video_stream": video_stream,
            "audio_stream": audio_stream,
        }))
    }

    /// Probe many files with a bounded worker pool (ffprobe has no native
    /// batch mode).
    pub fn read_batch(&self, paths: &[&Path]) -> HashMap<String, crate::Result<Value>> {
        let mut results: HashMap<String, crate::Result<Value>> = HashMap::new();
        if paths.is_empty() {
            return results;
        }
        if !self.is_available() {
            for p in paths {
                results.insert(
                    p.to_string_lossy().into_owned(),
                    Err(AtelierError::ToolMissing { tool: "ffprobe" }),
                );
            }
            return results;
        }

        let (tx, rx) = crossbeam_channel::unbounded::<&Path>();
        for &p in paths {
            let _ = tx.send(p);
        }
        drop(tx);

        let collected: Mutex<HashMap<String, crate::Result<Value>>> = Mutex::new(HashMap::new());
        let workers = BATCH_WORKERS.min(paths.len());
        std::thread::scope(|s| {
            for _ in 0..workers {
                let rx = rx.clone();
                let collected = &collected;
                s.spawn(move || {
                    while let Ok(path) = rx.recv() {
                        let result = self.read(path);
                        collected
                            .lock()
                            .expect("batch result lock poisoned")
                            .insert(path.to_string_lossy().into_owned(), result);
                    }
                });
            }
        });

        results.extend(collected.into_inner().expect("batch result lock poisoned"));
        results
    }

    /// Duration in seconds from the container format info.
    pub fn get_duration(&self, path: &Path) -> crate::Result<f64> {
        let data = self.read(path)?;
        duration_of(&data)
            .ok_or_else(|| AtelierError::Ffprobe("no duration in ffprobe output".into()))
    }

    /// (width, height) of the first video stream.
    pub fn get_resolution(&self, path: &Path) -> crate::Result<(i64, i64)> {
        let data = self.read(path)?;
        let stream = data.get("video_stream");
        let width = stream.and_then(|s| s.get("width")).and_then(Value::as_i64);
        let height = stream.and_then(|s| s.get("height")).and_then(Value::as_i64);
        match (width, height) {
            (Some(w), Some(h)) => Ok((w, h)),
            _ => Err(AtelierError::Ffprobe("no video stream resolution".into())),
        }
    }
}

fn find_stream(streams: &Value, codec_type: &str) -> Value {
    if let Some(items) = streams.as_array() {
        for stream in items {
            if stream.get("codec_type").and_then(Value::as_str) == Some(codec_type) {
                return stream.clone();
            }
        }
    }
    json!({})
}

/// Container duration, tolerating ffprobe's string-encoded numbers.
pub fn duration_of(probe: &Value) -> Option<f64> {
    let raw = probe.get("format")?.get("duration")?;
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_errors() {
        let tool = FfProbe::new("definitely-not-ffprobe-bin", Duration::from_secs(1));
        assert!(!tool.is_available());
        let err = tool.read(Path::new("/tmp/x.mp4")).unwrap_err();
        assert_eq!(err.code(), "TOOL_MISSING");
    }

    #[test]
    fn test_duration_of_handles_string_numbers() {
        let probe = json!({"format": {"duration": "12.5"}});
        assert_eq!(duration_of(&probe), Some(12.5));
        let probe = json!({"format": {"duration": 3.0}});
        assert_eq!(duration_of(&probe), Some(3.0));
        let probe = json!({"format": {}});
        assert_eq!(duration_of(&probe), None);
    }

    #[test]
    fn test_find_stream_picks_codec_type() {
        let streams = json!([
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 640, "height": 480},
        ]);
        let v = find_stream(&streams, "video");
        assert_eq!(v.get("codec_name").and_then(Value::as_str), Some("h264"));
        let missing = find_stream(&streams, "subtitle");
        assert!(missing.as_object().map(|o| o.is_empty()).unwrap_or(false));
    }
}
