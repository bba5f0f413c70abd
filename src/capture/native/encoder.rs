//! FFmpeg encoder
//!
//! Raw RGBA surface snapshots go to ffmpeg's stdin, microphone samples
//! (f32le) over a loopback TCP connection. The fragmented container comes
//! back on stdout and is handed over once per timeslice.

use crate::capture::traits::{AudioTrack, ChunkSender, EncoderSettings, MediaEncoder};
use crate::recorder::compositor::RenderSurface;
use crate::utils::error::{RecorderError, RecorderResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How long stop waits for ffmpeg to flush and exit
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// FFmpeg muxer and codecs behind a MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderProfile {
    pub muxer: &'static str,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
}

/// Profile for a MIME type such as `video/webm;codecs=vp9,opus`
pub fn profile_for(mime_type: &str) -> Option<EncoderProfile> {
    let mut parts = mime_type.split(';').map(str::trim);
    let container = parts.next()?;
    let codecs: Vec<&str> = parts
        .find_map(|p| p.strip_prefix("codecs="))
        .map(|c| c.split(',').map(str::trim).collect())
        .unwrap_or_default();

    match container {
        "video/mp4" => {
            let video_ok = codecs.is_empty() || codecs.contains(&"h264");
            video_ok.then_some(EncoderProfile {
                muxer: "mp4",
                video_codec: "libx264",
                audio_codec: "aac",
            })
        }
        "video/webm" => {
            let video_codec = if codecs.contains(&"vp9") { "libvpx-vp9" } else { "libvpx" };
            let video_ok = codecs.is_empty() || codecs.iter().any(|c| *c == "vp8" || *c == "vp9");
            video_ok.then_some(EncoderProfile {
                muxer: "webm",
                video_codec,
                audio_codec: "libopus",
            })
        }
        _ => None,
    }
}

/// Output of `ffmpeg -encoders`, queried once. `None` without ffmpeg.
fn available_encoders() -> Option<&'static str> {
    static ENCODERS: OnceLock<Option<String>> = OnceLock::new();
    ENCODERS
        .get_or_init(|| {
            let output = std::process::Command::new("ffmpeg")
                .args(["-hide_banner", "-encoders"])
                .output();
            match output {
                Ok(output) if output.status.success() => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
                Ok(output) => {
                    tracing::warn!("ffmpeg -encoders exited with {}", output.status);
                    None
                }
                Err(e) => {
                    tracing::warn!("FFmpeg not found: {}", e);
                    None
                }
            }
        })
        .as_deref()
}

/// The installed ffmpeg can produce `mime_type`
pub fn is_type_supported(mime_type: &str) -> bool {
    let (Some(profile), Some(encoders)) = (profile_for(mime_type), available_encoders()) else {
        return false;
    };
    let has = |codec: &str| encoders.split_whitespace().any(|word| word == codec);
    has(profile.video_codec) && has(profile.audio_codec)
}

struct Running {
    child: Child,
    feeder: JoinHandle<()>,
    audio: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

/// MediaEncoder backed by an ffmpeg child process
pub struct FfmpegEncoder {
    settings: EncoderSettings,
    profile: EncoderProfile,
    running: Option<Running>,
}

impl FfmpegEncoder {
    pub fn new(settings: EncoderSettings) -> RecorderResult<Self> {
        let profile = profile_for(&settings.mime_type)
            .ok_or_else(|| RecorderError::EncoderUnavailable(settings.mime_type.clone()))?;
        Ok(Self {
            settings,
            profile,
            running: None,
        })
    }

    fn args(&self, audio_port: Option<u16>) -> Vec<String> {
        let size = self.settings.surface.size();
        let fps = self.settings.frame_rate.to_string();
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            "rgba".into(),
            "-video_size".into(),
            size.to_string(),
            "-framerate".into(),
            fps.clone(),
            "-i".into(),
            "pipe:0".into(),
        ];

        if let (Some(port), Some(audio)) = (audio_port, self.settings.audio.as_ref()) {
            args.extend([
                "-f".into(),
                "f32le".into(),
                "-ar".into(),
                audio.sample_rate.to_string(),
                "-ac".into(),
                audio.channels.to_string(),
                "-i".into(),
                format!("tcp://127.0.0.1:{}", port),
                "-c:a".into(),
                self.profile.audio_codec.into(),
                "-b:a".into(),
                self.settings.audio_bits_per_second.to_string(),
            ]);
        }

        args.extend([
            "-c:v".into(),
            self.profile.video_codec.into(),
            "-b:v".into(),
            self.settings.video_bits_per_second.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-g".into(),
            (self.settings.frame_rate * 2).to_string(),
        ]);

        if self.profile.muxer == "mp4" {
            // Fragmented so the stream can be emitted as it is produced
            args.extend([
                "-preset".into(),
                "veryfast".into(),
                "-movflags".into(),
                "frag_keyframe+empty_moov+default_base_moof".into(),
            ]);
        } else {
            args.extend(["-deadline".into(), "realtime".into()]);
        }

        args.extend(["-f".into(), self.profile.muxer.into(), "pipe:1".into()]);
        args
    }
}

/// Write one surface snapshot per frame period until aborted
fn spawn_feeder(mut stdin: ChildStdin, surface: Arc<RenderSurface>, frame_rate: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1) / frame_rate.max(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let frame = surface.snapshot().into_raw();
            if let Err(e) = stdin.write_all(&frame).await {
                tracing::debug!("FFmpeg video input closed: {}", e);
                break;
            }
        }
    })
}

/// Serve microphone samples to ffmpeg's TCP input
fn spawn_audio(listener: TcpListener, track: &AudioTrack) -> JoinHandle<()> {
    let mut samples = track.subscribe();
    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("FFmpeg never connected to the audio input: {}", e);
                return;
            }
        };
        tracing::debug!("FFmpeg connected to the audio input");

        loop {
            let block = match samples.recv().await {
                Ok(block) => block,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Audio encoder lagged, {} blocks dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let bytes: Vec<u8> = block.iter().flat_map(|s| s.to_le_bytes()).collect();
            if socket.write_all(&bytes).await.is_err() {
                break;
            }
        }
    })
}

/// Forward ffmpeg's output to the sink once per timeslice, then once more
/// at end of stream. Dropping the sink marks the last chunk.
fn spawn_reader(mut stdout: ChildStdout, timeslice: Duration, sink: ChunkSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeslice);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            tokio::select! {
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => pending.extend_from_slice(&buf[..n]),
                    Err(e) => {
                        tracing::warn!("Failed reading ffmpeg output: {}", e);
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        let _ = sink.send(std::mem::take(&mut pending));
                    }
                }
            }
        }

        if !pending.is_empty() {
            let _ = sink.send(pending);
        }
    })
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    fn mime_type(&self) -> &str {
        &self.settings.mime_type
    }

    fn start(&mut self, timeslice: Duration, sink: ChunkSender) -> RecorderResult<()> {
        if self.running.is_some() {
            return Err(RecorderError::Encoder("encoder already started".to_string()));
        }

        let listener = match self.settings.audio {
            Some(_) => {
                let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
                std_listener.set_nonblocking(true)?;
                Some(TcpListener::from_std(std_listener)?)
            }
            None => None,
        };
        let port = listener
            .as_ref()
            .map(|l| l.local_addr().map(|a| a.port()))
            .transpose()?;

        let mut child = Command::new("ffmpeg")
            .args(self.args(port))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::Encoder(format!("failed to start ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Encoder("ffmpeg stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Encoder("ffmpeg stdout unavailable".to_string()))?;

        let feeder = spawn_feeder(stdin, self.settings.surface.clone(), self.settings.frame_rate);
        let audio = match (listener, self.settings.audio.as_ref()) {
            (Some(listener), Some(track)) => Some(spawn_audio(listener, track)),
            _ => None,
        };
        let reader = spawn_reader(stdout, timeslice, sink);

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps, {} ({}/{})",
            self.settings.surface.size(),
            self.settings.frame_rate,
            self.settings.mime_type,
            self.profile.video_codec,
            self.profile.audio_codec
        );

        self.running = Some(Running {
            child,
            feeder,
            audio,
            reader,
        });
        Ok(())
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        let Some(Running {
            mut child,
            feeder,
            audio,
            reader,
        }) = self.running.take()
        else {
            return Ok(());
        };

        // Closing both inputs lets ffmpeg flush and exit
        feeder.abort();
        if let Some(audio) = audio {
            audio.abort();
        }

        match tokio::time::timeout(FINALIZE_TIMEOUT, reader).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("FFmpeg did not finish within {:?}, killing it", FINALIZE_TIMEOUT);
                let _ = child.start_kill();
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            tracing::warn!("FFmpeg exited with status {}", status);
        }
        tracing::info!("FFmpeg encoder finished ({})", self.settings.mime_type);
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.feeder.abort();
            if let Some(audio) = running.audio {
                audio.abort();
            }
            running.reader.abort();
            let _ = running.child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        assert_eq!(profile_for("video/mp4;codecs=h264,aac").unwrap().video_codec, "libx264");
        assert_eq!(profile_for("video/webm;codecs=vp9,opus").unwrap().video_codec, "libvpx-vp9");
        assert_eq!(profile_for("video/webm;codecs=vp8,opus").unwrap().video_codec, "libvpx");
        assert_eq!(profile_for("video/webm").unwrap().muxer, "webm");
        assert_eq!(profile_for("video/mp4;codecs=av1"), None);
        assert_eq!(profile_for("audio/ogg"), None);
    }
}
