//! Local audio capture.
//!
//! Device access is owned by the host (browser shell, ALSA, CoreAudio); the call only
//! needs an Opus track to attach to the peer connection and a way to release it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::AudioConstraints;
use crate::error::Result;

/// Opus frame that decodes to 20 ms of silence.
const OPUS_SILENCE_FRAME: &[u8] = &[0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// A live local audio stream.
pub trait AudioSource: Send + Sync {
    fn track(&self) -> Arc<dyn TrackLocal + Send + Sync>;

    /// Stop capture and release the device.
    fn stop(&mut self);
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire the microphone. Denial or absence is reported as
    /// [`CallError::MicrophoneDenied`](crate::CallError::MicrophoneDenied).
    async fn acquire_audio(&self, constraints: &AudioConstraints) -> Result<Box<dyn AudioSource>>;
}

pub fn opus_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_owned(),
        stream_id.to_owned(),
    ))
}

/// Capture that feeds Opus silence, for headless kiosks and smoke tests.
#[derive(Debug, Default)]
pub struct SilenceCapture;

#[async_trait]
impl MediaCapture for SilenceCapture {
    async fn acquire_audio(&self, constraints: &AudioConstraints) -> Result<Box<dyn AudioSource>> {
        debug!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            "acquiring silent audio source"
        );
        let track = opus_track("frontdesk-silence");
        let pump_track = Arc::clone(&track);
        let pump = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            loop {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(OPUS_SILENCE_FRAME),
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                if pump_track.write_sample(&sample).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(SilenceSource {
            track,
            pump: Some(pump),
        }))
    }
}

struct SilenceSource {
    track: Arc<TrackLocalStaticSample>,
    pump: Option<JoinHandle<()>>,
}

impl AudioSource for SilenceSource {
    fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            info!("silent audio source released");
        }
    }
}

impl Drop for SilenceSource {
    fn drop(&mut self) {
        self.stop();
    }
}
