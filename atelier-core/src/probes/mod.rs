//! External metadata probes (exiftool, ffprobe) and the router that decides
//! which tool(s) to invoke per file.

pub mod exiftool;
pub mod ffprobe;

use crate::asset::{classify_path, AssetKind};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub use exiftool::ExifTool;
pub use ffprobe::FfProbe;

/// Which probe tool(s) to use for metadata extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    #[default]
    Auto,
    Exiftool,
    Ffprobe,
    Both,
}

impl ProbeMode {
    pub fn parse(s: &str) -> ProbeMode {
        match s.trim().to_ascii_lowercase().as_str() {
            "exiftool" => Self::Exiftool,
            "ffprobe" => Self::Ffprobe,
            "both" => Self::Both,
            "auto" => Self::Auto,
            other => {
                if !other.is_empty() {
                    warn!("invalid probe backend '{other}', falling back to 'auto'");
                }
                Self::Auto
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Exiftool => "exiftool",
            Self::Ffprobe => "ffprobe",
            Self::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBackend {
    Exiftool,
    Ffprobe,
}

/// Decides which probe backend(s) to use for a file. Unavailable tools are
/// silently dropped from the plan.
#[derive(Clone)]
pub struct ProbeRouter {
    exiftool: Arc<ExifTool>,
    ffprobe: Arc<FfProbe>,
    default_mode: ProbeMode,
}

impl ProbeRouter {
    pub fn new(exiftool: Arc<ExifTool>, ffprobe: Arc<FfProbe>, default_mode: ProbeMode) -> Self {
        Self {
            exiftool,
            ffprobe,
            default_mode,
        }
    }

    pub fn default_mode(&self) -> ProbeMode {
        self.default_mode
    }

    /// Pick the backends for `path`, in invocation order.
    pub fn pick(&self, path: &Path, mode_override: Option<ProbeMode>) -> Vec<ProbeBackend> {
        let mode = mode_override.unwrap_or(self.default_mode);
        let has_exif = self.exiftool.is_available();
        let has_ffprobe = self.ffprobe.is_available();

        match mode {
            ProbeMode::Exiftool => {
                if has_exif {
                    vec![ProbeBackend::Exiftool]
                } else if has_ffprobe {
                    warn!("exiftool requested but not available, trying ffprobe");
                    vec![ProbeBackend::Ffprobe]
                } else {
                    vec![]
                }
            }
            ProbeMode::Ffprobe => {
                if has_ffprobe {
                    vec![ProbeBackend::Ffprobe]
                } else if has_exif {
                    warn!("ffprobe requested but not available, trying exiftool");
                    vec![ProbeBackend::Exiftool]
                } else {
                    vec![]
                }
            }
            ProbeMode::Both => {
                let mut tools = Vec::new();
                if has_exif {
                    tools.push(ProbeBackend::Exiftool);
                }
                if has_ffprobe {
                    tools.push(ProbeBackend::Ffprobe);
                }
                tools
            }
            ProbeMode::Auto => match classify_path(path) {
                // Videos and audio: exiftool for generation tags, ffprobe for
                // technical metadata.
                AssetKind::Video | AssetKind::Audio => {
                    let mut tools = Vec::new();
                    if has_exif {
                        tools.push(ProbeBackend::Exiftool);
                    }
                    if has_ffprobe {
                        tools.push(ProbeBackend::Ffprobe);
                    }
                    tools
                }
                // Images: exiftool is sufficient; ffprobe only as fallback.
                _ => {
                    if has_exif {
                        vec![ProbeBackend::Exiftool]
                    } else if has_ffprobe {
                        debug!("using ffprobe for image (exiftool not available)");
                        vec![ProbeBackend::Ffprobe]
                    } else {
                        vec![]
                    }
                }
            },
        }
    }
}

pub(crate) struct TimedOutput {
    /// None when the process was killed after exceeding its deadline.
    pub status: Option<std::process::ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run a child process with a wall-clock deadline, killing it on expiry.
/// Stdout/stderr are drained from helper threads so the child never blocks
/// on a full pipe.
pub(crate) fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<TimedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_handle = std::thread::spawn(move || drain(stdout));
    let err_handle = std::thread::spawn(move || drain(stderr));

    let status = wait_deadline(&mut child, timeout)?;
    let stdout = out_handle.join().unwrap_or_default();
    let stderr = err_handle.join().unwrap_or_default();
    Ok(TimedOutput {
        status,
        stdout,
        stderr,
    })
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

fn wait_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_mode_parse() {
        assert_eq!(ProbeMode::parse("auto"), ProbeMode::Auto);
        assert_eq!(ProbeMode::parse("EXIFTOOL"), ProbeMode::Exiftool);
        assert_eq!(ProbeMode::parse("ffprobe"), ProbeMode::Ffprobe);
        assert_eq!(ProbeMode::parse("both"), ProbeMode::Both);
        assert_eq!(ProbeMode::parse("bogus"), ProbeMode::Auto);
    }

    #[test]
    fn test_run_with_timeout_kills_slow_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out = run_with_timeout(&mut cmd, Duration::from_millis(100)).unwrap();
        assert!(out.status.is_none());
    }

    #[test]
    fn test_run_with_timeout_captures_output() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap();
        assert!(out.status.map(|s| s.success()).unwrap_or(false));
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }
}
