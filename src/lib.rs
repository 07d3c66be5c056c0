//! qatprep - prepare layer trees for quantization-aware training
//!
//! A small layer-tree library (tensors, layers, containers) plus the
//! machinery that rewrites such a tree for QAT:
//!
//! - [`quantization::QuantConfig`] binds quanter settings to layers by path and kind
//! - [`quantization::QATRewriter`] swaps mapped layers for QAT layers and inserts observers

pub mod activation;
pub mod error;
pub mod gemm;
pub mod nn;
pub mod quantization;
pub mod tensor;

pub use error::{QatError, Result};
pub use nn::{LayerKind, Module};
pub use quantization::{QATRewriter, QuantConfig};
pub use tensor::Tensor;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging; a logger installed earlier is left in place.
pub fn init() -> Result<()> {
    let _ = env_logger::try_init();
    log::info!("qatprep v{} initialized", VERSION);
    Ok(())
}
