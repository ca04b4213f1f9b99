//! Rolling throughput/latency statistics, guarded by a lock distinct from
//! the GPU mutex so a stats reader can never stall an acquire (spec
//! &4.6, &5).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A 1-second sliding window of per-frame completion timestamps plus
/// capture/preprocess latencies, used to derive FPS and min/max/average
/// stage times.
struct Window {
    completions: VecDeque<Instant>,
    capture_ms: VecDeque<f64>,
    preprocess_ms: VecDeque<f64>,
    total_frames: u64,
    dropped_frames: u64,
    start_time: Instant,
}

impl Window {
    fn new() -> Self {
        Self {
            completions: VecDeque::new(),
            capture_ms: VecDeque::new(),
            preprocess_ms: VecDeque::new(),
            total_frames: 0,
            dropped_frames: 0,
            start_time: Instant::now(),
        }
    }

    fn record(&mut self, now: Instant, capture_ms: f64, preprocess_ms: f64) {
        self.completions.push_back(now);
        self.capture_ms.push_back(capture_ms);
        self.preprocess_ms.push_back(preprocess_ms);
        self.total_frames += 1;
        self.trim(now);
    }

    fn record_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    fn trim(&mut self, now: Instant) {
        while let Some(&front) = self.completions.front() {
            if now.duration_since(front) > Duration::from_secs(1) {
                self.completions.pop_front();
                self.capture_ms.pop_front();
                self.preprocess_ms.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A point-in-time snapshot of [`Window`]'s state, returned by
/// `get_stats()` (spec &6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub fps: f64,
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub min_capture_ms: f64,
    pub max_capture_ms: f64,
    pub avg_capture_ms: f64,
    pub min_preprocess_ms: f64,
    pub max_preprocess_ms: f64,
    pub avg_preprocess_ms: f64,
    pub uptime: Duration,
}

pub struct StatsRecorder {
    window: Mutex<Window>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self { window: Mutex::new(Window::new()) }
    }

    /// Records one completed frame's stage latencies.
    pub fn record_frame(&self, capture_ms: f64, preprocess_ms: f64) {
        let mut w = self.window.lock().unwrap();
        let now = Instant::now();
        w.record(now, capture_ms, preprocess_ms);
    }

    /// Records an auto-recovered unreleased frame (spec &4.6 step 2).
    pub fn record_dropped(&self) {
        self.window.lock().unwrap().record_dropped();
    }

    #[must_use]
    pub fn snapshot(&self) -> Stats {
        let mut w = self.window.lock().unwrap();
        let now = Instant::now();
        w.trim(now);

        let fps = w.completions.len() as f64;
        Stats {
            fps,
            total_frames: w.total_frames,
            dropped_frames: w.dropped_frames,
            min_capture_ms: min_of(&w.capture_ms),
            max_capture_ms: max_of(&w.capture_ms),
            avg_capture_ms: avg_of(&w.capture_ms),
            min_preprocess_ms: min_of(&w.preprocess_ms),
            max_preprocess_ms: max_of(&w.preprocess_ms),
            avg_preprocess_ms: avg_of(&w.preprocess_ms),
            uptime: now.duration_since(w.start_time),
        }
    }

    /// Clears accumulated statistics and restarts the uptime clock.
    pub fn reset(&self) {
        let mut w = self.window.lock().unwrap();
        *w = Window::new();
    }
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn min_of(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

fn max_of(values: &VecDeque<f64>) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn avg_of(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_zeroed_stats() {
        let recorder = StatsRecorder::new();
        let s = recorder.snapshot();
        assert_eq!(s.total_frames, 0);
        assert_eq!(s.avg_capture_ms, 0.0);
    }

    #[test]
    fn recording_updates_totals_and_averages() {
        let recorder = StatsRecorder::new();
        recorder.record_frame(1.0, 2.0);
        recorder.record_frame(3.0, 4.0);
        let s = recorder.snapshot();
        assert_eq!(s.total_frames, 2);
        assert_eq!(s.min_capture_ms, 1.0);
        assert_eq!(s.max_capture_ms, 3.0);
        assert!((s.avg_capture_ms - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dropped_frames_counted_separately_from_total() {
        let recorder = StatsRecorder::new();
        recorder.record_frame(1.0, 1.0);
        recorder.record_dropped();
        let s = recorder.snapshot();
        assert_eq!(s.total_frames, 1);
        assert_eq!(s.dropped_frames, 1);
    }

    #[test]
    fn reset_clears_accumulated_stats() {
        let recorder = StatsRecorder::new();
        recorder.record_frame(1.0, 1.0);
        recorder.reset();
        let s = recorder.snapshot();
        assert_eq!(s.total_frames, 0);
    }
}
