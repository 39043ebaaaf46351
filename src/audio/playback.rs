//! Gapless scheduling of synthesized speech on the output pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::convert::resample_f32;

/// Identifier of one scheduled buffer on a sink
pub type VoiceId = u64;

/// Output pipeline contract
///
/// A sink renders mono f32 audio at a fixed rate and exposes the clock of
/// what it has rendered so far. Buffers are started at absolute clock times.
pub trait PlaybackSink: Send + Sync {
    /// Output clock: time of the next sample to be rendered
    fn current_time(&self) -> Duration;

    /// Render rate in Hz
    fn sample_rate(&self) -> u32;

    /// Start `samples` at clock time `at`
    fn start(&self, id: VoiceId, samples: Arc<[f32]>, at: Duration);

    /// Stop a buffer immediately, whether pending or playing
    fn stop(&self, id: VoiceId);

    /// Copy the most recently rendered samples into `out` (oldest first)
    fn recent_samples(&self, out: &mut [f32]);

    /// Release the pipeline. Safe to call more than once.
    fn close(&self);
}

/// Decoded synthesized speech received from the endpoint
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl InboundFrame {
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// A buffer currently scheduled or playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFrame {
    pub id: VoiceId,
    pub start: Duration,
    pub end: Duration,
}

/// Schedule cursor and in-flight set for one output pipeline
///
/// All mutation of the in-flight set goes through `schedule`, `reap`,
/// `interrupt` and `close`.
pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    next_start: Duration,
    in_flight: BTreeMap<VoiceId, ScheduledFrame>,
    next_id: VoiceId,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            next_start: Duration::ZERO,
            in_flight: BTreeMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Current output clock
    pub fn now(&self) -> Duration {
        self.sink.current_time()
    }

    /// Clock time at which the next buffer would start if it arrived now
    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    pub fn sink(&self) -> &Arc<dyn PlaybackSink> {
        &self.sink
    }

    /// Schedule a frame right after the previous one, or now if the
    /// schedule has already drained. Returns `None` once closed.
    pub fn schedule(&mut self, frame: InboundFrame) -> Option<ScheduledFrame> {
        if self.closed {
            debug!("Dropping inbound frame: playback closed");
            return None;
        }

        let now = self.sink.current_time();
        self.reap_at(now);

        let rate = self.sink.sample_rate();
        let samples: Arc<[f32]> = if frame.sample_rate == rate || frame.sample_rate == 0 {
            frame.samples.into()
        } else {
            resample_f32(&frame.samples, frame.sample_rate, rate).into()
        };
        let duration = samples_to_duration(samples.len(), rate);

        let start = self.next_start.max(now);
        let id = self.next_id;
        self.next_id += 1;

        self.sink.start(id, samples, start);
        self.next_start = start + duration;

        let scheduled = ScheduledFrame {
            id,
            start,
            end: self.next_start,
        };
        self.in_flight.insert(id, scheduled);

        debug!(
            "Scheduled frame {} at {:.3}s ({:.3}s long, {} in flight)",
            id,
            start.as_secs_f64(),
            duration.as_secs_f64(),
            self.in_flight.len()
        );

        Some(scheduled)
    }

    /// Drop buffers that finished playing
    pub fn reap(&mut self) {
        let now = self.sink.current_time();
        self.reap_at(now);
    }

    fn reap_at(&mut self, now: Duration) {
        self.in_flight.retain(|_, frame| frame.end > now);
    }

    /// Stop everything scheduled or playing and reset the cursor
    ///
    /// Returns the number of buffers that were cut.
    pub fn interrupt(&mut self) -> usize {
        self.reap();
        let stopped = self.stop_all();
        self.next_start = Duration::ZERO;
        if stopped > 0 {
            info!("Playback interrupted: {} buffers stopped", stopped);
        }
        stopped
    }

    fn stop_all(&mut self) -> usize {
        let stopped = self.in_flight.len();
        for id in self.in_flight.keys() {
            self.sink.stop(*id);
        }
        self.in_flight.clear();
        stopped
    }

    /// Number of buffers still scheduled or playing
    pub fn in_flight(&mut self) -> usize {
        self.reap();
        self.in_flight.len()
    }

    /// Stop all buffers and release the sink. Later schedules are ignored.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_all();
        self.next_start = Duration::ZERO;
        self.sink.close();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        now: Mutex<Duration>,
        started: Mutex<Vec<(VoiceId, usize, Duration)>>,
        stopped: Mutex<Vec<VoiceId>>,
        closed: Mutex<bool>,
    }

    impl PlaybackSink for RecordingSink {
        fn current_time(&self) -> Duration {
            *self.now.lock().unwrap()
        }
        fn sample_rate(&self) -> u32 {
            24000
        }
        fn start(&self, id: VoiceId, samples: Arc<[f32]>, at: Duration) {
            self.started.lock().unwrap().push((id, samples.len(), at));
        }
        fn stop(&self, id: VoiceId) {
            self.stopped.lock().unwrap().push(id);
        }
        fn recent_samples(&self, out: &mut [f32]) {
            out.fill(0.0);
        }
        fn close(&self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn frame(secs: f64) -> InboundFrame {
        InboundFrame {
            samples: vec![0.0; (24000.0 * secs) as usize],
            sample_rate: 24000,
        }
    }

    #[test]
    fn test_frames_are_back_to_back() {
        let sink = Arc::new(RecordingSink::default());
        *sink.now.lock().unwrap() = Duration::from_millis(500);
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        let a = scheduler.schedule(frame(0.5)).unwrap();
        let b = scheduler.schedule(frame(0.25)).unwrap();

        assert_eq!(a.start, Duration::from_millis(500));
        assert_eq!(b.start, Duration::from_millis(1000));
        assert_eq!(scheduler.next_start(), Duration::from_millis(1250));
    }

    #[test]
    fn test_late_frame_starts_now() {
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        scheduler.schedule(frame(0.5)).unwrap();
        *sink.now.lock().unwrap() = Duration::from_secs(3);
        let late = scheduler.schedule(frame(0.5)).unwrap();

        assert_eq!(late.start, Duration::from_secs(3));
    }

    #[test]
    fn test_finished_frames_leave_in_flight_set() {
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        scheduler.schedule(frame(1.0)).unwrap();
        scheduler.schedule(frame(1.0)).unwrap();
        assert_eq!(scheduler.in_flight(), 2);

        *sink.now.lock().unwrap() = Duration::from_millis(1500);
        assert_eq!(scheduler.in_flight(), 1);

        *sink.now.lock().unwrap() = Duration::from_secs(2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_interrupt_stops_everything_in_flight() {
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        scheduler.schedule(frame(1.0)).unwrap();
        scheduler.schedule(frame(1.0)).unwrap();
        assert_eq!(scheduler.interrupt(), 2);

        assert_eq!(*sink.stopped.lock().unwrap(), vec![0, 1]);
        assert_eq!(scheduler.next_start(), Duration::ZERO);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_resamples_to_sink_rate() {
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        let scheduled = scheduler
            .schedule(InboundFrame {
                samples: vec![0.0; 16000],
                sample_rate: 16000,
            })
            .unwrap();

        assert_eq!(scheduled.end, Duration::from_secs(1));
        assert_eq!(sink.started.lock().unwrap()[0].1, 24000);
    }

    #[test]
    fn test_closed_scheduler_ignores_frames() {
        let sink = Arc::new(RecordingSink::default());
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        scheduler.close();
        scheduler.close();

        assert!(*sink.closed.lock().unwrap());
        assert!(scheduler.schedule(frame(1.0)).is_none());
        assert!(sink.started.lock().unwrap().is_empty());
    }
}
