//! Streaming upper-tail quantiles
//!
//! A bounded cache keeps the largest samples seen so far. While the requested
//! rank falls inside the cache the quantile is exact; past that point a P²
//! marker estimate (Jain & Chlamtac) is returned instead. Both paths depend only
//! on the order in which samples arrive.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Largest samples retained for exact tail quantiles.
pub const TAIL_CACHE_CAPACITY: usize = 8192;

/// Quantiles tracked by [`TailQuantiles`].
pub const TRACKED_QUANTILES: [f64; 3] = [0.95, 0.98, 0.99];

/// f64 with a total order, for the heap.
#[derive(Debug, Clone, Copy)]
struct Ordered(f64);

impl PartialEq for Ordered {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Ordered {}

impl PartialOrd for Ordered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordered {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// P² estimator for one quantile: five markers, constant memory.
#[derive(Debug, Clone)]
pub struct P2Quantile {
    p: f64,
    heights: [f64; 5],
    positions: [f64; 5],
    desired: [f64; 5],
    increments: [f64; 5],
    count: usize,
}

impl P2Quantile {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            heights: [0.0; 5],
            positions: [1.0, 2.0, 3.0, 4.0, 5.0],
            desired: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            count: 0,
        }
    }

    pub fn observe(&mut self, x: f64) {
        if self.count < 5 {
            self.heights[self.count] = x;
            self.count += 1;
            if self.count == 5 {
                self.heights.sort_by(f64::total_cmp);
            }
            return;
        }

        let h = &mut self.heights;
        let k = if x < h[0] {
            h[0] = x;
            0
        } else if x < h[1] {
            0
        } else if x < h[2] {
            1
        } else if x < h[3] {
            2
        } else if x <= h[4] {
            3
        } else {
            h[4] = x;
            3
        };

        for pos in &mut self.positions[k + 1..] {
            *pos += 1.0;
        }
        for (d, inc) in self.desired.iter_mut().zip(self.increments.iter()) {
            *d += inc;
        }

        for i in 1..4 {
            let d = self.desired[i] - self.positions[i];
            let right = self.positions[i + 1] - self.positions[i];
            let left = self.positions[i - 1] - self.positions[i];
            if (d >= 1.0 && right > 1.0) || (d <= -1.0 && left < -1.0) {
                let step = d.signum();
                let candidate = self.parabolic(i, step);
                self.heights[i] = if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                    candidate
                } else {
                    self.linear(i, step)
                };
                self.positions[i] += step;
            }
        }
        self.count += 1;
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let (q, n) = (&self.heights, &self.positions);
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let j = if d > 0.0 { i + 1 } else { i - 1 };
        self.heights[i] + d * (self.heights[j] - self.heights[i]) / (self.positions[j] - self.positions[i])
    }

    pub fn estimate(&self) -> Option<f64> {
        match self.count {
            0 => None,
            n if n < 5 => {
                let mut head = self.heights[..n].to_vec();
                head.sort_by(f64::total_cmp);
                Some(head[nearest_rank(self.p, n)])
            }
            _ => Some(self.heights[2]),
        }
    }
}

/// Index of quantile `q` in an ascending array of length `n` (n > 0).
pub fn nearest_rank(q: f64, n: usize) -> usize {
    let idx = (q * (n - 1) as f64).round() as usize;
    idx.min(n - 1)
}

/// p95/p98/p99 over a stream.
#[derive(Debug, Clone)]
pub struct TailQuantiles {
    cache: BinaryHeap<Reverse<Ordered>>,
    capacity: usize,
    markers: Vec<P2Quantile>,
    count: usize,
}

impl Default for TailQuantiles {
    fn default() -> Self {
        Self::with_capacity(TAIL_CACHE_CAPACITY)
    }
}

impl TailQuantiles {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: BinaryHeap::with_capacity(capacity.max(1) + 1),
            capacity: capacity.max(1),
            markers: TRACKED_QUANTILES.iter().map(|&p| P2Quantile::new(p)).collect(),
            count: 0,
        }
    }

    pub fn observe(&mut self, x: f64) {
        self.count += 1;
        for marker in &mut self.markers {
            marker.observe(x);
        }

        if self.cache.len() < self.capacity {
            self.cache.push(Reverse(Ordered(x)));
        } else if let Some(Reverse(smallest)) = self.cache.peek() {
            if x > smallest.0 {
                self.cache.pop();
                self.cache.push(Reverse(Ordered(x)));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Quantile `q`, exact when the cache reaches down to its rank.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let from_top = self.count - 1 - nearest_rank(q, self.count);
        if from_top < self.cache.len() {
            let mut tail: Vec<f64> = self.cache.iter().map(|Reverse(o)| o.0).collect();
            tail.sort_by(|a, b| b.total_cmp(a));
            return Some(tail[from_top]);
        }

        self.markers
            .iter()
            .find(|m| (m.p - q).abs() < f64::EPSILON)
            .and_then(P2Quantile::estimate)
    }

    pub fn p95(&self) -> Option<f64> {
        self.quantile(0.95)
    }

    pub fn p98(&self) -> Option<f64> {
        self.quantile(0.98)
    }

    pub fn p99(&self) -> Option<f64> {
        self.quantile(0.99)
    }
}
