//! Audio conversion through an external ffmpeg process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTarget {
    /// 16 kHz mono 16-bit PCM WAV, what speech-to-text expects.
    SpeechInput,
    /// OGG/Opus, what Telegram plays inline as a voice note.
    VoiceNote,
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("conversion failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },
    #[error("conversion timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path, target: AudioTarget)
    -> Result<(), AudioError>;
}

pub struct Ffmpeg {
    binary: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

/// Builds the ffmpeg argument list for one conversion.
pub fn ffmpeg_args(input: &Path, output: &Path, target: AudioTarget) -> Vec<OsString> {
    let flags = |list: &[&str]| list.iter().map(OsString::from).collect::<Vec<_>>();

    let mut args = flags(&["-y", "-hide_banner", "-loglevel", "error"]);
    match target {
        AudioTarget::SpeechInput => {
            args.push(OsString::from("-i"));
            args.push(input.as_os_str().to_owned());
            args.extend(flags(&["-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le", "-f", "wav"]));
        }
        AudioTarget::VoiceNote => {
            // Telegram cuts off the first ~200ms when playing voice messages,
            // so 300ms of silence goes in front.
            args.extend(flags(&["-f", "lavfi", "-i", "anullsrc=r=48000:cl=mono", "-i"]));
            args.push(input.as_os_str().to_owned());
            args.extend(flags(&[
                "-filter_complex",
                "[1:a]aresample=48000,aformat=channel_layouts=mono[speech];\
                 [0]atrim=0:0.3[silence];[silence][speech]concat=n=2:v=0:a=1",
                "-c:a",
                "libopus",
                "-b:a",
                "64k",
                "-f",
                "ogg",
            ]));
        }
    }
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl AudioTranscoder for Ffmpeg {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        target: AudioTarget,
    ) -> Result<(), AudioError> {
        let args = ffmpeg_args(input, output, target);
        debug!("ffmpeg {:?} -> {:?} ({:?})", input, output, target);

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| AudioError::TimedOut(self.timeout))?
            .map_err(|source| AudioError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            return Err(AudioError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
