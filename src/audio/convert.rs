//! Conversion of captured frames to the session's input format.

use super::backend::AudioFrame;

/// Convert a frame to the target rate and mono layout
pub fn process_frame(frame: AudioFrame, target_sample_rate: u32, target_channels: u16) -> AudioFrame {
    let mut processed = frame;

    // Mix down first so resampling works on fewer samples
    if processed.channels != target_channels && target_channels == 1 {
        processed = to_mono(processed);
    }

    if processed.sample_rate != target_sample_rate {
        processed = resample(processed, target_sample_rate);
    }

    processed
}

/// Average interleaved channels into one
pub fn to_mono(frame: AudioFrame) -> AudioFrame {
    if frame.channels <= 1 {
        return frame;
    }

    let channels = frame.channels as usize;
    let mono_samples = frame
        .samples
        .chunks_exact(channels)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect();

    AudioFrame {
        samples: mono_samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Linear-interpolation resampling of a mono frame
pub fn resample(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    if frame.sample_rate == target_rate || frame.sample_rate == 0 || frame.samples.is_empty() {
        return frame;
    }

    let ratio = frame.sample_rate as f64 / target_rate as f64;
    let out_len =
        (frame.samples.len() as u64 * target_rate as u64 / frame.sample_rate as u64) as usize;
    let last = frame.samples.len() - 1;

    let samples = (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = frame.samples[idx.min(last)] as f64;
            let b = frame.samples[(idx + 1).min(last)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect();

    AudioFrame {
        samples,
        sample_rate: target_rate,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Linear-interpolation resampling of mono float samples
pub fn resample_f32(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Convert float device samples to i16 PCM, clamping to [-1.0, 1.0]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let mono = to_mono(frame(vec![100, 300, -100, -300], 16000, 2));
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![200, -200]);
    }

    #[test]
    fn test_resample_48k_to_16k() {
        let input: Vec<i16> = (0..4800).map(|i| (i % 100) as i16).collect();
        let out = resample(frame(input, 48000, 1), 16000);
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.samples.len(), 1600);
        assert_eq!(out.samples[1], 3);
    }

    #[test]
    fn test_process_frame_noop_when_matching() {
        let out = process_frame(frame(vec![1, 2, 3], 16000, 1), 16000, 1);
        assert_eq!(out.samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(&[2.0, -2.0, 0.0]), vec![i16::MAX, -i16::MAX, 0]);
    }
}
