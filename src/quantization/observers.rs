//! Range observers feeding the fake quantizers
//!
//! Observers collect statistics about the tensors flowing through a quanter
//! during training. `forward` only borrows its layer, so the running state
//! lives in `Cell`s.

use crate::Tensor;
use std::cell::Cell;

/// Statistics reported by an observer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverStats {
    pub num_observations: usize,
    pub min: f32,
    pub max: f32,
}

impl ObserverStats {
    pub fn range(&self) -> f32 {
        self.max - self.min
    }
}

/// Moving-average abs-max observer.
///
/// After each observation `state = r * state + 1`, `accum = r * accum + absmax(x)`
/// and the tracked value is `accum / state`.
#[derive(Debug, Clone)]
pub struct AbsMaxObserver {
    moving_rate: f32,
    state: Cell<f32>,
    accum: Cell<f32>,
    num_observations: Cell<usize>,
}

impl AbsMaxObserver {
    pub fn new(moving_rate: f32) -> Self {
        Self {
            moving_rate,
            state: Cell::new(0.0),
            accum: Cell::new(0.0),
            num_observations: Cell::new(0),
        }
    }

    pub fn moving_rate(&self) -> f32 {
        self.moving_rate
    }

    pub fn observe(&self, tensor: &Tensor) {
        let state = self.moving_rate * self.state.get() + 1.0;
        let accum = self.moving_rate * self.accum.get() + tensor.abs_max();
        self.state.set(state);
        self.accum.set(accum);
        self.num_observations.set(self.num_observations.get() + 1);
    }

    /// Current moving-average abs-max, `0.0` before the first observation.
    pub fn abs_max(&self) -> f32 {
        let state = self.state.get();
        if state == 0.0 {
            0.0
        } else {
            self.accum.get() / state
        }
    }

    pub fn num_observations(&self) -> usize {
        self.num_observations.get()
    }

    pub fn reset(&self) {
        self.state.set(0.0);
        self.accum.set(0.0);
        self.num_observations.set(0);
    }

    pub fn stats(&self) -> ObserverStats {
        let abs_max = self.abs_max();
        ObserverStats {
            num_observations: self.num_observations(),
            min: -abs_max,
            max: abs_max,
        }
    }
}

/// Running global min/max observer for asymmetric quantization.
#[derive(Debug, Clone)]
pub struct MinMaxObserver {
    min: Cell<f32>,
    max: Cell<f32>,
    num_observations: Cell<usize>,
}

impl Default for MinMaxObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl MinMaxObserver {
    pub fn new() -> Self {
        Self {
            min: Cell::new(f32::INFINITY),
            max: Cell::new(f32::NEG_INFINITY),
            num_observations: Cell::new(0),
        }
    }

    pub fn observe(&self, tensor: &Tensor) {
        let (mut min, mut max) = (self.min.get(), self.max.get());
        for &val in tensor.data().iter().filter(|v| v.is_finite()) {
            min = min.min(val);
            max = max.max(val);
        }
        self.min.set(min);
        self.max.set(max);
        self.num_observations.set(self.num_observations.get() + 1);
    }

    /// Observed `(min, max)` widened to include zero, or `None` before any finite value.
    pub fn range(&self) -> Option<(f32, f32)> {
        let (min, max) = (self.min.get(), self.max.get());
        if min > max {
            return None;
        }
        Some((min.min(0.0), max.max(0.0)))
    }

    pub fn num_observations(&self) -> usize {
        self.num_observations.get()
    }

    pub fn reset(&self) {
        self.min.set(f32::INFINITY);
        self.max.set(f32::NEG_INFINITY);
        self.num_observations.set(0);
    }

    pub fn stats(&self) -> ObserverStats {
        let (min, max) = self.range().unwrap_or((0.0, 0.0));
        ObserverStats {
            num_observations: self.num_observations(),
            min,
            max,
        }
    }
}
