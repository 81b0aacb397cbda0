// src/remux.rs

use crate::negotiator::StreamDescriptor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const FFMPEG: &str = "ffmpeg";

static FFMPEG_AVAILABLE: OnceCell<bool> = OnceCell::const_new();

/// Whether `ffmpeg` runs on this host. Probed once per process.
pub async fn ffmpeg_available() -> bool {
    *FFMPEG_AVAILABLE
        .get_or_init(|| async {
            let available = probe(Path::new(FFMPEG)).await;
            if available {
                info!("ffmpeg detected, FLAC remuxing enabled");
            } else {
                warn!("ffmpeg not found, FLAC streams in MP4 containers will be saved as .m4a");
            }
            available
        })
        .await
}

async fn probe(program: &Path) -> bool {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, output).await,
        Ok(Ok(status)) if status.success()
    )
}

/// How a negotiated stream ends up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerPlan {
    /// Save under the stream's own extension.
    Native { extension: String },
    /// Lossless audio in a generic container: download as `generic`, remux into `native`.
    Remux { generic: String, native: String },
}

impl ContainerPlan {
    pub fn for_stream(stream: &StreamDescriptor, remux_available: bool) -> Self {
        let lossless_in_generic =
            stream.codec.eq_ignore_ascii_case("flac") && stream.extension.eq_ignore_ascii_case(".m4a");

        match (lossless_in_generic, remux_available) {
            (true, true) => ContainerPlan::Remux {
                generic: stream.extension.clone(),
                native: ".flac".to_string(),
            },
            (true, false) => {
                warn!("FLAC in MP4 container but ffmpeg not available, saving as .m4a");
                ContainerPlan::Native {
                    extension: stream.extension.clone(),
                }
            }
            (false, _) => ContainerPlan::Native {
                extension: stream.extension.clone(),
            },
        }
    }
}

/// Copies an audio stream into its native container with an external ffmpeg.
#[derive(Debug, Clone)]
pub struct Remuxer {
    program: PathBuf,
    timeout: Duration,
    available: bool,
}

impl Remuxer {
    /// A remuxer backed by the system ffmpeg, if there is one.
    pub async fn detect(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from(FFMPEG),
            timeout,
            available: ffmpeg_available().await,
        }
    }

    pub fn with_program(program: impl Into<PathBuf>, timeout: Duration, available: bool) -> Self {
        Self {
            program: program.into(),
            timeout,
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Remux `input` into a FLAC file at `output` without re-encoding.
    ///
    /// Returns false on a missing tool, non-zero exit or timeout; the caller decides
    /// what to keep.
    pub async fn remux(&self, input: &Path, output: &Path) -> bool {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(input)
            .args(["-vn", "-acodec", "copy", "-f", "flac", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(result)) if result.status.success() => {
                info!(path = %output.display(), "remuxed to FLAC");
                true
            }
            Ok(Ok(result)) => {
                error!(
                    status = %result.status,
                    stderr = %String::from_utf8_lossy(&result.stderr).trim(),
                    "ffmpeg remux failed"
                );
                false
            }
            Ok(Err(e)) => {
                error!(error = %e, "could not run ffmpeg");
                false
            }
            Err(_) => {
                error!(timeout = ?self.timeout, "ffmpeg remux timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Quality;
    use crate::negotiator::StreamUrls;

    fn stream(codec: &str, extension: &str) -> StreamDescriptor {
        StreamDescriptor {
            codec: codec.into(),
            extension: extension.into(),
            tier: Quality::HighLossless,
            quality_label: "LOSSLESS".into(),
            bit_depth: 16,
            sample_rate: 44_100,
            urls: StreamUrls::Single("u".into()),
        }
    }

    #[test]
    fn only_flac_in_m4a_is_remuxed() {
        assert_eq!(
            ContainerPlan::for_stream(&stream("FLAC", ".m4a"), true),
            ContainerPlan::Remux { generic: ".m4a".into(), native: ".flac".into() }
        );
        assert_eq!(
            ContainerPlan::for_stream(&stream("FLAC", ".m4a"), false),
            ContainerPlan::Native { extension: ".m4a".into() }
        );
        assert_eq!(
            ContainerPlan::for_stream(&stream("FLAC", ".flac"), true),
            ContainerPlan::Native { extension: ".flac".into() }
        );
        assert_eq!(
            ContainerPlan::for_stream(&stream("AAC", ".m4a"), true),
            ContainerPlan::Native { extension: ".m4a".into() }
        );
    }

    #[tokio::test]
    async fn missing_tool_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.m4a");
        let output = dir.path().join("out.flac");
        tokio::fs::write(&input, b"not audio").await.unwrap();

        let remuxer = Remuxer::with_program(
            dir.path().join("no-such-ffmpeg"),
            Duration::from_secs(5),
            true,
        );

        assert!(!remuxer.remux(&input, &output).await);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn probe_rejects_missing_program() {
        assert!(!probe(Path::new("/definitely/not/a/real/ffmpeg")).await);
    }
}
