//! Quantization-aware training preparation
//!
//! [`QuantConfig`] describes which quanters go where, [`QATRewriter`] applies
//! it to a layer tree: mapped layers become their QAT counterparts and
//! activation-producing leaves get wrapped in observers.

pub mod config;
pub mod fake_quantize;
pub mod observers;
pub mod qat;
pub mod qat_layers;

pub use config::{LayerQuantConfig, QuantConfig, QuantSettings};
pub use fake_quantize::{FakeQuantize, QuanterFactory};
pub use qat::QATRewriter;
pub use qat_layers::{ObserveWrapper, QATConv2d, QATLinear};
