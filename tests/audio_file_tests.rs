// Integration tests for WAV input
//
// These tests verify that we can read WAV files, convert them to the session
// input format, and stream them as a capture source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use prombot::audio::{AudioBackend, AudioBackendConfig, AudioFile, FileBackend};
use prombot::SessionError;

fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, frames: usize) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for i in 0..frames {
        let value = ((i % 100) as i16 - 50) * 100;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()?;
    Ok(path)
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_wav(dir.path(), "question.wav", 16000, 1, 8000)?;

    let audio = AudioFile::open(&path)?;

    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!(audio.path.contains("question.wav"));
    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_stereo_44k_converts_to_mono_16k() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_wav(dir.path(), "stereo.wav", 44100, 2, 44100)?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.samples.len() % audio.channels as usize, 0);

    let mono = audio.to_mono(16000);
    assert_eq!(mono.len(), 16000);
    Ok(())
}

#[test]
fn test_missing_capture_file_is_permission_denied() {
    let result = FileBackend::open("/nonexistent/mic.wav", AudioBackendConfig::default());

    assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_file_backend_streams_fixed_size_frames() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Three full buffers of 1024 plus a short tail
    let path = write_wav(dir.path(), "stream.wav", 16000, 1, 1024 * 3 + 100)?;

    let config = AudioBackendConfig {
        buffer_size: 1024,
        ..Default::default()
    };
    let mut backend = FileBackend::open(&path, config)?;
    let mut frames = backend.start().await?;
    assert!(backend.is_capturing());

    let mut sizes = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(2), frames.recv()).await {
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.channels, 1);
        sizes.push(frame.samples.len());
    }

    assert_eq!(sizes, vec![1024, 1024, 1024, 100]);
    assert!(!backend.is_capturing());
    backend.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_file_backend_stop_ends_stream() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_wav(dir.path(), "long.wav", 16000, 1, 16000 * 10)?;

    let mut backend = FileBackend::open(&path, AudioBackendConfig::default())?;
    let mut frames = backend.start().await?;
    assert!(frames.recv().await.is_some());

    backend.stop()?;
    backend.stop()?;
    assert!(!backend.is_capturing());

    // The feeder is gone, so the channel closes
    let rest = tokio::time::timeout(Duration::from_secs(2), async {
        while frames.recv().await.is_some() {}
    })
    .await;
    assert!(rest.is_ok());
    Ok(())
}
