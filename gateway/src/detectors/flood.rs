//! Flood / DoS detector: command-rate, burst and sustained-load
//! scoring over a sliding timestamp window.
//!
//! Grounded on `src/ai_layer/attack_detection/dos_detector.py`'s
//! `DoSDetector`: same thresholds, same two-tier burst/sustained scoring,
//! same detection cascade precedence.

use std::collections::VecDeque;
use std::sync::Mutex;

const WINDOW_SIZE_SEC: f64 = 10.0;
const SUB_WINDOW_SIZE_SEC: f64 = 2.0;
const BURST_WINDOW_SEC: f64 = 1.0;
const MAX_TRACKED_TIMESTAMPS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloodMetrics {
    pub commands_per_second: f64,
    pub burst_score: f64,
    pub sustained_load: f64,
    pub is_attack: bool,
    pub confidence: f64,
}

struct Inner {
    timestamps: VecDeque<f64>,
}

pub struct FloodDetector {
    normal_threshold: f64,
    attack_threshold: f64,
    burst_threshold: f64,
    inner: Mutex<Inner>,
}

impl FloodDetector {
    pub fn new(normal_threshold: f64, attack_threshold: f64, burst_threshold: f64) -> Self {
        Self {
            normal_threshold,
            attack_threshold,
            burst_threshold,
            inner: Mutex::new(Inner {
                timestamps: VecDeque::new(),
            }),
        }
    }

    /// Records a command at `timestamp_sec` (monotonic seconds, caller's
    /// choice of epoch) and scores the current traffic shape.
    pub fn record(&self, timestamp_sec: f64) -> FloodMetrics {
        let mut inner = self.inner.lock().unwrap();
        inner.timestamps.push_back(timestamp_sec);
        while inner.timestamps.len() > MAX_TRACKED_TIMESTAMPS {
            inner.timestamps.pop_front();
        }

        let rate = Self::calculate_rate(&inner.timestamps, timestamp_sec);
        let burst = self.calculate_burst_score(&inner.timestamps, timestamp_sec);
        let sustained = self.calculate_sustained_load(&inner.timestamps, timestamp_sec);
        let (is_attack, confidence) = self.detect(rate, burst, sustained);

        FloodMetrics {
            commands_per_second: rate,
            burst_score: burst,
            sustained_load: sustained,
            is_attack,
            confidence,
        }
    }

    fn calculate_rate(timestamps: &VecDeque<f64>, now: f64) -> f64 {
        let window_start = now - WINDOW_SIZE_SEC;
        let recent: Vec<f64> = timestamps.iter().copied().filter(|&t| t >= window_start).collect();
        if recent.len() < 2 {
            return 0.0;
        }
        let span = recent[recent.len() - 1] - recent[0];
        if span < 0.1 {
            return recent.len() as f64;
        }
        recent.len() as f64 / span
    }

    fn calculate_burst_score(&self, timestamps: &VecDeque<f64>, now: f64) -> f64 {
        let one_sec_ago = now - BURST_WINDOW_SEC;
        let burst_rate = timestamps.iter().filter(|&&t| t >= one_sec_ago).count() as f64;

        if burst_rate <= self.normal_threshold {
            0.0
        } else if burst_rate >= self.burst_threshold {
            1.0
        } else {
            (burst_rate - self.normal_threshold) / (self.burst_threshold - self.normal_threshold)
        }
    }

    fn calculate_sustained_load(&self, timestamps: &VecDeque<f64>, now: f64) -> f64 {
        if timestamps.len() < 10 {
            return 0.0;
        }
        let window_start = now - WINDOW_SIZE_SEC;
        let recent: Vec<f64> = timestamps.iter().copied().filter(|&t| t >= window_start).collect();
        if recent.len() < 10 {
            return 0.0;
        }

        let n_sub_windows = (WINDOW_SIZE_SEC / SUB_WINDOW_SIZE_SEC) as usize;
        let mut sub_rates = Vec::new();
        for i in 0..n_sub_windows {
            let sub_start = window_start + (i as f64 * SUB_WINDOW_SIZE_SEC);
            let sub_end = sub_start + SUB_WINDOW_SIZE_SEC;
            let count = recent.iter().filter(|&&t| t >= sub_start && t < sub_end).count();
            if count > 0 {
                sub_rates.push(count as f64 / SUB_WINDOW_SIZE_SEC);
            }
        }
        if sub_rates.is_empty() {
            return 0.0;
        }

        let avg_rate = sub_rates.iter().sum::<f64>() / sub_rates.len() as f64;
        let std_dev = if sub_rates.len() > 1 {
            let variance = sub_rates.iter().map(|r| (r - avg_rate).powi(2)).sum::<f64>()
                / (sub_rates.len() - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        if avg_rate <= self.normal_threshold {
            0.0
        } else if avg_rate >= self.attack_threshold {
            let consistency = 1.0 - (std_dev / avg_rate).min(0.5);
            consistency.min(1.0)
        } else {
            let normalized = (avg_rate - self.normal_threshold) / (self.attack_threshold - self.normal_threshold);
            let consistency = 1.0 - (std_dev / avg_rate).min(0.5);
            (normalized * consistency).min(1.0)
        }
    }

    fn detect(&self, rate: f64, burst: f64, sustained: f64) -> (bool, f64) {
        if burst >= 0.8 {
            return (true, 0.95);
        }
        if sustained >= 0.7 && rate >= self.attack_threshold {
            return (true, 0.90);
        }
        if sustained >= 0.5 && rate >= self.attack_threshold * 0.75 {
            return (true, 0.75);
        }
        if burst >= 0.5 {
            return (true, 0.60);
        }
        (false, 0.0)
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().timestamps.clear();
    }
}
