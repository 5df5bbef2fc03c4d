//! Remote-entity interpolation.
//!
//! Remote entities are drawn `interpolation_delay_ms` in the past, blended
//! between the two buffered samples that straddle the render time.

use glam::Vec2;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// One buffered server state, stamped with the client's receipt time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSample {
    pub position: Vec2,
    pub size: f32,
    pub timestamp: u64,
}

impl StateSample {
    fn lerp(&self, other: &StateSample, alpha: f32) -> StateSample {
        let alpha = alpha.clamp(0.0, 1.0);
        let timestamp = self.timestamp as f64
            + (other.timestamp as f64 - self.timestamp as f64) * alpha as f64;
        StateSample {
            position: self.position.lerp(other.position, alpha),
            size: self.size + (other.size - self.size) * alpha,
            timestamp: timestamp.round() as u64,
        }
    }
}

/// Time-ordered samples for one remote entity.
#[derive(Debug, Clone)]
pub struct InterpolationBuffer {
    samples: VecDeque<StateSample>,
    window_ms: u64,
    max_samples: usize,
}

impl InterpolationBuffer {
    pub fn new(window_ms: u64, max_samples: usize) -> Self {
        let max_samples = max_samples.max(2);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            window_ms,
            max_samples,
        }
    }

    /// Append a sample. Returns false if it arrived out of order.
    pub fn push(&mut self, sample: StateSample) -> bool {
        if let Some(newest) = self.samples.back()
            && sample.timestamp <= newest.timestamp
        {
            trace!(
                "Dropping out-of-order sample at {} (newest {})",
                sample.timestamp, newest.timestamp
            );
            return false;
        }
        self.samples.push_back(sample);

        let cutoff = sample.timestamp.saturating_sub(self.window_ms);
        while self.samples.len() > 1 && self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn newest(&self) -> Option<&StateSample> {
        self.samples.back()
    }

    /// State at `render_time`.
    ///
    /// Interpolates between the straddling pair; with fewer than two samples,
    /// or when no pair straddles `render_time`, returns the newest sample.
    pub fn sample_at(&self, render_time: u64) -> Option<StateSample> {
        let newest = *self.samples.back()?;
        let straddle = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .find(|(a, b)| a.timestamp <= render_time && render_time <= b.timestamp);

        match straddle {
            Some((before, after)) => {
                let span = (after.timestamp - before.timestamp) as f32;
                let alpha = if span > 0.0 {
                    (render_time - before.timestamp) as f32 / span
                } else {
                    1.0
                };
                Some(before.lerp(after, alpha))
            }
            None => Some(newest),
        }
    }
}

/// Interpolation buffers for every remote entity, by id.
#[derive(Debug, Clone)]
pub struct RemoteEntities {
    buffers: HashMap<u32, InterpolationBuffer>,
    window_ms: u64,
    max_samples: usize,
}

impl RemoteEntities {
    pub fn new(window_ms: u64, max_samples: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            window_ms,
            max_samples,
        }
    }

    pub fn record(&mut self, id: u32, sample: StateSample) -> bool {
        let (window_ms, max_samples) = (self.window_ms, self.max_samples);
        self.buffers
            .entry(id)
            .or_insert_with(|| InterpolationBuffer::new(window_ms, max_samples))
            .push(sample)
    }

    pub fn remove(&mut self, id: u32) -> bool {
        self.buffers.remove(&id).is_some()
    }

    /// Keep only entities for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(u32) -> bool) {
        self.buffers.retain(|id, _| keep(*id));
    }

    pub fn contains(&self, id: u32) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&InterpolationBuffer> {
        self.buffers.get(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Interpolated state of every remote at `render_time`, sorted by id.
    pub fn sample(&self, render_time: u64) -> Vec<(u32, StateSample)> {
        let mut out: Vec<(u32, StateSample)> = self
            .buffers
            .iter()
            .filter_map(|(id, buf)| buf.sample_at(render_time).map(|s| (*id, s)))
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
