//! Fake quantization for Quantization-Aware Training
//!
//! A [`FakeQuantize`] node rounds and clips its input onto an integer grid and
//! maps it straight back to `f32`, so downstream layers see quantization noise
//! without any real change of precision. [`QuanterFactory`] is the
//! serializable description a config holds; every layer that needs a quanter
//! gets its own fresh instance from it.

use super::observers::{AbsMaxObserver, MinMaxObserver, ObserverStats};
use crate::{QatError, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blueprint for per-layer fake quanters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuanterFactory {
    /// Bit width of the simulated integer grid
    pub bits: u8,
    /// Moving-average rate of the abs-max observer
    pub moving_rate: f32,
    /// Symmetric (abs-max, zero point 0) or asymmetric (min/max) grid
    pub symmetric: bool,
}

impl Default for QuanterFactory {
    fn default() -> Self {
        Self {
            bits: 8,
            moving_rate: 0.9,
            symmetric: true,
        }
    }
}

impl QuanterFactory {
    /// Symmetric abs-max quanter with the given moving rate
    pub fn abs_max(moving_rate: f32) -> Self {
        Self {
            moving_rate,
            ..Self::default()
        }
    }

    /// Asymmetric min/max quanter
    pub fn min_max() -> Self {
        Self {
            symmetric: false,
            ..Self::default()
        }
    }

    pub fn with_bits(mut self, bits: u8) -> Self {
        self.bits = bits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=16).contains(&self.bits) {
            return Err(QatError::InvalidConfiguration {
                message: format!("bit width must be within 2..=16, got {}", self.bits),
            });
        }
        if !(self.moving_rate > 0.0 && self.moving_rate < 1.0) {
            return Err(QatError::InvalidConfiguration {
                message: format!("moving rate must be within (0, 1), got {}", self.moving_rate),
            });
        }
        Ok(())
    }

    /// Fresh quanter with empty statistics
    pub fn instance(&self) -> FakeQuantize {
        FakeQuantize::new(*self)
    }
}

impl fmt::Display for QuanterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.symmetric {
            write!(f, "AbsMax(bits={}, moving_rate={})", self.bits, self.moving_rate)
        } else {
            write!(f, "MinMax(bits={})", self.bits)
        }
    }
}

#[derive(Debug, Clone)]
enum RangeObserver {
    AbsMax(AbsMaxObserver),
    MinMax(MinMaxObserver),
}

/// Fake quantization node that simulates quantization during training
#[derive(Debug, Clone)]
pub struct FakeQuantize {
    factory: QuanterFactory,
    observer: RangeObserver,
    qmin: i32,
    qmax: i32,
    training: bool,
}

impl FakeQuantize {
    pub fn new(factory: QuanterFactory) -> Self {
        let bits = u32::from(factory.bits.clamp(2, 16));
        let qmax = (1i32 << (bits - 1)) - 1;
        let qmin = -(1i32 << (bits - 1));

        let observer = if factory.symmetric {
            RangeObserver::AbsMax(AbsMaxObserver::new(factory.moving_rate))
        } else {
            RangeObserver::MinMax(MinMaxObserver::new())
        };

        Self {
            factory,
            observer,
            qmin,
            qmax,
            training: true,
        }
    }

    pub fn int8() -> Self {
        Self::new(QuanterFactory::default())
    }

    pub fn factory(&self) -> &QuanterFactory {
        &self.factory
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn qrange(&self) -> (i32, i32) {
        (self.qmin, self.qmax)
    }

    /// Current `(scale, zero_point)`, `None` until a non-zero range was observed.
    pub fn qparams(&self) -> Option<(f32, i32)> {
        match &self.observer {
            RangeObserver::AbsMax(obs) => {
                let abs_max = obs.abs_max();
                (abs_max > 0.0).then(|| (abs_max / self.qmax as f32, 0))
            }
            RangeObserver::MinMax(obs) => {
                let (min, max) = obs.range()?;
                if max <= min {
                    return None;
                }
                let scale = (max - min) / (self.qmax - self.qmin) as f32;
                let zero_point = (self.qmin - (min / scale).round() as i32).clamp(self.qmin, self.qmax);
                Some((scale, zero_point))
            }
        }
    }

    pub fn stats(&self) -> ObserverStats {
        match &self.observer {
            RangeObserver::AbsMax(obs) => obs.stats(),
            RangeObserver::MinMax(obs) => obs.stats(),
        }
    }

    /// Observe `input` and return its fake-quantized copy; identity in eval mode.
    pub fn forward(&self, input: &Tensor) -> Tensor {
        if !self.training {
            return input.clone();
        }

        match &self.observer {
            RangeObserver::AbsMax(obs) => obs.observe(input),
            RangeObserver::MinMax(obs) => obs.observe(input),
        }

        let Some((scale, zero_point)) = self.qparams() else {
            return input.clone();
        };

        let (qmin, qmax) = (self.qmin, self.qmax);
        input.map(|val| {
            // q = clamp(round(x / scale) + zp), x' = (q - zp) * scale
            let q = ((val / scale).round() as i32 + zero_point).clamp(qmin, qmax);
            (q - zero_point) as f32 * scale
        })
    }
}

impl fmt::Display for FakeQuantize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.factory)
    }
}
