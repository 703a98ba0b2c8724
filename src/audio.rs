//! Decoding of base64 PCM speech and playback sinks.
//!
//! ## Design
//! - [`decode_pcm`] turns the provider's base64 PCM16 into an [`AudioClip`].
//! - [`AudioSink::play`] blocks until the clip has finished or was stopped.
//! - [`PlaybackControls`] is a cloneable handle onto the playback cursor, so
//!   another thread (a Ctrl-C handler) can pause, resume or stop a sink that is
//!   blocked in `play`.
//! - `DeviceSink` (feature `playback`) drives the default output device through
//!   `cpal`; the device callback pulls frames from the shared cursor and emits
//!   silence while paused. [`PcmFileSink`] is the headless fallback.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{ChatError, Result};

/// Decoded audio, one sample vector per channel, samples in `[-1.0, 1.0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioClip {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel. Shorter channels are padded with silence.
    pub fn frames(&self) -> usize {
        self.channels.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Sample `frame` of `channel`, or silence past the end of that channel.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.channels
            .get(channel)
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Re-interleave to signed 16-bit little-endian bytes.
    pub fn to_pcm16(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frames() * self.channel_count() * 2);
        for frame in 0..self.frames() {
            for channel in 0..self.channel_count() {
                let scaled = self.sample(channel, frame) * 32768.0;
                let sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        out
    }
}

/// Decode base64 interleaved PCM16 into an [`AudioClip`].
pub fn decode_pcm(encoded: &str, sample_rate: u32, channels: u16) -> Result<AudioClip> {
    if channels == 0 {
        return Err(ChatError::InvalidInput("channel count must be > 0".to_string()));
    }
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ChatError::InvalidInput(format!("audio is not valid base64: {e}")))?;
    let stride = 2 * channels as usize;
    if bytes.len() % stride != 0 {
        return Err(ChatError::InvalidInput(format!(
            "audio length {} is not a multiple of {stride} bytes",
            bytes.len()
        )));
    }

    let frames = bytes.len() / stride;
    let mut out = vec![Vec::with_capacity(frames); channels as usize];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels as usize].push(sample as f32 / 32768.0);
    }
    Ok(AudioClip {
        sample_rate,
        channels: out,
    })
}

/// Destination for decoded audio. `play` returns once playback has finished.
pub trait AudioSink {
    fn play(&mut self, clip: &AudioClip) -> Result<()>;

    // Transport controls. Sinks that finish synchronously have nothing to do.
    fn stop(&mut self) {}
    fn pause(&mut self) {}
    fn resume(&mut self) {}
}

// ---------------------------------------------------------------------------
// Playback cursor
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Cursor {
    clip: Option<AudioClip>,
    position: usize,
    paused: bool,
    stopped: bool,
}

impl Cursor {
    fn frames(&self) -> usize {
        self.clip.as_ref().map(AudioClip::frames).unwrap_or(0)
    }
}

/// Shared pause/resume/stop state for one sink.
#[derive(Debug, Clone, Default)]
pub struct PlaybackControls {
    cursor: Arc<Mutex<Cursor>>,
}

impl PlaybackControls {
    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rewind onto `clip`, unpaused.
    pub fn load(&self, clip: &AudioClip) {
        let mut cursor = self.lock();
        cursor.clip = Some(clip.clone());
        cursor.position = 0;
        cursor.paused = false;
        cursor.stopped = false;
    }

    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
    }

    /// End playback; `finished` reports true from now on.
    pub fn stop(&self) {
        self.lock().stopped = true;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// True when the clip has run out or playback was stopped.
    pub fn finished(&self) -> bool {
        let cursor = self.lock();
        cursor.stopped || cursor.position >= cursor.frames()
    }

    /// Frames played so far.
    pub fn position(&self) -> usize {
        self.lock().position
    }

    /// Fill an interleaved device buffer of `out_channels` channels and
    /// advance. Paused, stopped or exhausted playback writes silence. A mono
    /// clip is copied to every output channel.
    pub fn fill(&self, out: &mut [f32], out_channels: usize) {
        let mut guard = self.lock();
        let Cursor {
            clip,
            position,
            paused,
            stopped,
        } = &mut *guard;
        let clip = match clip.as_ref() {
            Some(clip) if !*paused && !*stopped => clip,
            _ => {
                out.fill(0.0);
                return;
            }
        };
        let frames = clip.frames();
        let source_channels = clip.channel_count().max(1);
        for frame in out.chunks_mut(out_channels.max(1)) {
            if *position >= frames {
                frame.fill(0.0);
                continue;
            }
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = clip.sample(c % source_channels, *position);
            }
            *position += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

#[cfg(feature = "playback")]
pub use device::DeviceSink;

#[cfg(feature = "playback")]
mod device {
    use std::thread;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{info, warn};

    use super::{AudioClip, AudioSink, PlaybackControls};
    use crate::error::{ChatError, Result};

    /// How often `play` checks whether the cursor has run out.
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Plays clips on the host's default output device.
    pub struct DeviceSink {
        device: cpal::Device,
        controls: PlaybackControls,
    }

    impl DeviceSink {
        /// Bind to the default output device, or fail with
        /// [`ChatError::EnvironmentUnsupported`] when there is none.
        pub fn default_output() -> Result<Self> {
            let device = cpal::default_host().default_output_device().ok_or_else(|| {
                ChatError::EnvironmentUnsupported("no audio output device found".to_string())
            })?;
            info!(device = %device.name().unwrap_or_default(), "audio output ready");
            Ok(Self {
                device,
                controls: PlaybackControls::default(),
            })
        }

        pub fn controls(&self) -> PlaybackControls {
            self.controls.clone()
        }
    }

    impl AudioSink for DeviceSink {
        fn play(&mut self, clip: &AudioClip) -> Result<()> {
            let channels = clip.channel_count().max(1) as u16;
            let config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(clip.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            self.controls.load(clip);

            let cursor = self.controls.clone();
            let stream = self
                .device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        cursor.fill(data, channels as usize);
                    },
                    |err| warn!("audio stream error: {err}"),
                    None,
                )
                .map_err(|e| {
                    ChatError::EnvironmentUnsupported(format!("cannot open audio stream: {e}"))
                })?;
            stream.play().map_err(|e| {
                ChatError::EnvironmentUnsupported(format!("cannot start audio stream: {e}"))
            })?;

            while !self.controls.finished() {
                thread::sleep(POLL_INTERVAL);
            }
            info!(frames = self.controls.position(), "playback finished");
            Ok(())
        }

        fn stop(&mut self) {
            self.controls.stop();
        }

        fn pause(&mut self) {
            self.controls.pause();
        }

        fn resume(&mut self) {
            self.controls.resume();
        }
    }
}
