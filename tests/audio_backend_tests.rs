// Tests for the audio types and the software output pipeline
//
// These tests verify the frame and config types, and that the playback
// scheduler drives a real paced timeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prombot::audio::playback::samples_to_duration;
use prombot::audio::{
    AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, InboundFrame, OutputTarget,
    PacedSink, PlaybackScheduler, PlaybackSink,
};
use prombot::SessionError;

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.sample_rate, 16000, "Live endpoint expects 16kHz input");
    assert_eq!(config.channels, 1, "Default should be mono");
    assert_eq!(config.buffer_size, 4096);
}

#[test]
fn test_audio_frame_timing_calculation() {
    let frame = AudioFrame {
        samples: vec![0i16; 4096],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    };

    assert!((frame.duration_secs() - 0.256).abs() < 1e-9);
}

#[test]
fn test_audio_frame_stereo_interleaved() {
    let frame = AudioFrame {
        samples: vec![100, 200, 150, 250, 175, 275], // 3 frames, 2 channels
        sample_rate: 44100,
        channels: 2,
        timestamp_ms: 0,
    };

    let num_frames = frame.samples.len() / frame.channels as usize;
    assert_eq!(num_frames, 3);
    assert!((frame.duration_secs() - 3.0 / 44100.0).abs() < 1e-12);
}

#[test]
fn test_factory_without_source_denies_access() {
    let result = AudioBackendFactory::create(&AudioSource::None, AudioBackendConfig::default());

    assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
}

#[test]
fn test_samples_to_duration() {
    assert_eq!(samples_to_duration(24000, 24000), Duration::from_secs(1));
    assert_eq!(samples_to_duration(12000, 24000), Duration::from_millis(500));
    assert_eq!(samples_to_duration(100, 0), Duration::ZERO);
}

#[tokio::test]
async fn test_scheduler_on_paced_sink() -> Result<()> {
    let sink = Arc::new(PacedSink::spawn(24000, OutputTarget::Null)?);
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    let first = scheduler
        .schedule(InboundFrame {
            samples: vec![0.25; 2400],
            sample_rate: 24000,
        })
        .expect("scheduled");
    let second = scheduler
        .schedule(InboundFrame {
            samples: vec![0.25; 2400],
            sample_rate: 24000,
        })
        .expect("scheduled");

    assert_eq!(second.start, first.end);
    assert_eq!(first.end - first.start, Duration::from_millis(100));

    // The pacer renders in real time; both frames finish within a second
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(scheduler.in_flight(), 0);
    assert!(sink.current_time() >= second.end);

    scheduler.close();
    Ok(())
}

#[tokio::test]
async fn test_interrupt_silences_paced_output() -> Result<()> {
    let sink = Arc::new(PacedSink::spawn(24000, OutputTarget::Null)?);
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    scheduler.schedule(InboundFrame {
        samples: vec![0.5; 24000 * 5],
        sample_rate: 24000,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(scheduler.interrupt(), 1);
    assert_eq!(sink.timeline().active_voices(), 0);

    let next = scheduler
        .schedule(InboundFrame {
            samples: vec![0.5; 240],
            sample_rate: 24000,
        })
        .expect("scheduled");
    assert!(next.start < Duration::from_secs(1), "restarts near now, not after the cut frame");

    scheduler.close();
    Ok(())
}
