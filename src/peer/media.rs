//! Local camera/microphone tracks.
//!
//! Capture backends are platform specific, so a track here is a
//! `TrackLocalStaticSample` fed by whoever owns the device. Disabling a track
//! drops the samples written to it, which the remote side sees as a frozen
//! picture or silence, the same as a disabled browser track.

use crate::error::MediaError;
use crate::peer::types::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            track,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opus audio or VP8 video track.
    pub fn sample(kind: MediaKind, stream_id: &str) -> Self {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            kind.to_string(),
            stream_id.to_owned(),
        );
        Self::new(kind, Arc::new(track))
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Returns `false` when the sample was dropped because the track is off.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, MediaError> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(false);
        }
        self.track
            .write_sample(sample)
            .await
            .map_err(|err| MediaError::Capture(err.to_string()))?;
        Ok(true)
    }

    /// Encoded frame straight from a capture loop.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<bool, MediaError> {
        self.write_sample(&Sample {
            data,
            duration,
            ..Default::default()
        })
        .await
    }
}

/// The camera/microphone stream shared by every room of one chat session.
#[derive(Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// May wait indefinitely on a permission prompt.
    async fn acquire(&self) -> Result<LocalMediaStream, MediaError>;

    fn release(&self, stream: &LocalMediaStream) {
        stream.stop();
    }
}

/// Devices exposed as sample-fed tracks.
pub struct SampleTrackDevices {
    audio: bool,
    video: bool,
}

impl SampleTrackDevices {
    pub fn new(audio: bool, video: bool) -> Self {
        Self { audio, video }
    }
}

#[async_trait]
impl MediaDevices for SampleTrackDevices {
    async fn acquire(&self) -> Result<LocalMediaStream, MediaError> {
        let stream_id = format!("local-{}", crate::utils::random_id());
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack::sample(MediaKind::Audio, &stream_id));
        }
        if self.video {
            tracks.push(LocalTrack::sample(MediaKind::Video, &stream_id));
        }
        if tracks.is_empty() {
            return Err(MediaError::NoDevices);
        }
        Ok(LocalMediaStream::new(stream_id, tracks))
    }
}

/// Owns the local stream between acquisition and full stop.
pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    stream: Option<LocalMediaStream>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: None,
        }
    }

    pub fn devices(&self) -> Arc<dyn MediaDevices> {
        Arc::clone(&self.devices)
    }

    /// Reuses the current stream; devices are only opened when none is held.
    pub async fn acquire(&mut self) -> Result<&LocalMediaStream, MediaError> {
        if self.stream.is_none() {
            let stream = self.devices.acquire().await?;
            self.adopt(stream);
        }
        self.stream.as_ref().ok_or(MediaError::NoDevices)
    }

    /// Takes ownership of a stream acquired elsewhere.
    pub fn adopt(&mut self, stream: LocalMediaStream) {
        if let Some(previous) = self.stream.replace(stream) {
            self.devices.release(&previous);
        }
        info!(
            tracks = self.stream.as_ref().map(|s| s.tracks.len()).unwrap_or(0),
            "local media ready"
        );
    }

    /// Releases a stream that arrived after the session it was requested for ended.
    pub fn discard(&self, stream: LocalMediaStream) {
        debug!(stream_id = %stream.id, "releasing stale local media");
        self.devices.release(&stream);
    }

    pub fn stream(&self) -> Option<&LocalMediaStream> {
        self.stream.as_ref()
    }

    /// Flips the track of `kind`; `None` when there is no such track.
    pub fn toggle(&self, kind: MediaKind) -> Option<bool> {
        let track = self.stream.as_ref()?.track(kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        debug!(%kind, enabled, "local track toggled");
        Some(enabled)
    }

    pub fn toggle_camera(&self) -> Option<bool> {
        self.toggle(MediaKind::Video)
    }

    pub fn toggle_mic(&self) -> Option<bool> {
        self.toggle(MediaKind::Audio)
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(stream_id = %stream.id, "releasing local media");
            self.devices.release(&stream);
        }
    }
}
