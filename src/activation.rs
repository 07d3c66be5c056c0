use crate::nn::{LayerKind, Module};
use crate::{Result, Tensor};
use std::any::Any;

/// ReLU activation as a module
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl Module for ReLU {
    fn kind(&self) -> LayerKind {
        LayerKind::RELU
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        input.relu()
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(*self))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Sigmoid activation
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn kind(&self) -> LayerKind {
        LayerKind::SIGMOID
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        input.sigmoid()
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(*self))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
