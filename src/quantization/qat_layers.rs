//! QAT-aware layer implementations
//!
//! Quantization-simulating counterparts of the built-in layers, plus the
//! observer wrapper placed around activation-producing leaves.

use super::config::LayerQuantConfig;
use super::FakeQuantize;
use crate::nn::{Conv2d, LayerKind, Linear, Module};
use crate::{QatError, Result, Tensor};
use std::any::Any;

fn downcast<T: 'static>(layer: Box<dyn Module>, expected: LayerKind) -> Result<T> {
    let found = layer.kind();
    match layer.into_any().downcast::<T>() {
        Ok(layer) => Ok(*layer),
        Err(_) => Err(QatError::LayerMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }),
    }
}

fn quanters(config: &LayerQuantConfig) -> (Option<FakeQuantize>, Option<FakeQuantize>) {
    (
        config.weight.map(|q| q.instance()),
        config.activation.map(|q| q.instance()),
    )
}

fn quant_repr(weight: &Option<FakeQuantize>, activation: &Option<FakeQuantize>) -> String {
    let show = |q: &Option<FakeQuantize>| match q {
        Some(q) => q.to_string(),
        None => "None".to_string(),
    };
    format!("weight_quanter={}, activation_quanter={}", show(weight), show(activation))
}

/// QAT-aware Linear layer: fake-quantizes the input activation and the
/// weight before the linear transform.
#[derive(Debug, Clone)]
pub struct QATLinear {
    /// Inner linear layer
    inner: Linear,
    weight_fake_quant: Option<FakeQuantize>,
    activation_fake_quant: Option<FakeQuantize>,
    training: bool,
}

impl QATLinear {
    pub fn new(inner: Linear, config: &LayerQuantConfig) -> Self {
        let (weight_fake_quant, activation_fake_quant) = quanters(config);
        Self {
            inner,
            weight_fake_quant,
            activation_fake_quant,
            training: true,
        }
    }

    /// QAT layer mapping entry for [`LayerKind::LINEAR`]
    pub fn from_layer(layer: Box<dyn Module>, config: &LayerQuantConfig) -> Result<Box<dyn Module>> {
        let linear = downcast::<Linear>(layer, LayerKind::LINEAR)?;
        Ok(Box::new(Self::new(linear, config)))
    }

    pub fn inner(&self) -> &Linear {
        &self.inner
    }

    pub fn weight_quanter(&self) -> Option<&FakeQuantize> {
        self.weight_fake_quant.as_ref()
    }

    pub fn activation_quanter(&self) -> Option<&FakeQuantize> {
        self.activation_fake_quant.as_ref()
    }

    pub fn is_training(&self) -> bool {
        self.training
    }
}

impl Module for QATLinear {
    fn kind(&self) -> LayerKind {
        LayerKind::QAT_LINEAR
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        if !self.training {
            return self.inner.forward(input);
        }

        let input = match &self.activation_fake_quant {
            Some(fq) => fq.forward(input),
            None => input.clone(),
        };
        match &self.weight_fake_quant {
            Some(fq) => self.inner.forward_with(&input, &fq.forward(&self.inner.weight)),
            None => self.inner.forward(&input),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.inner.parameters()
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(self.clone()))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for fq in [&mut self.weight_fake_quant, &mut self.activation_fake_quant]
            .into_iter()
            .flatten()
        {
            fq.set_training(training);
        }
    }

    fn extra_repr(&self) -> String {
        format!(
            "{}, {}",
            self.inner.extra_repr(),
            quant_repr(&self.weight_fake_quant, &self.activation_fake_quant)
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// QAT-aware Conv2d layer
#[derive(Debug, Clone)]
pub struct QATConv2d {
    /// Inner conv2d layer
    inner: Conv2d,
    weight_fake_quant: Option<FakeQuantize>,
    activation_fake_quant: Option<FakeQuantize>,
    training: bool,
}

impl QATConv2d {
    pub fn new(inner: Conv2d, config: &LayerQuantConfig) -> Self {
        let (weight_fake_quant, activation_fake_quant) = quanters(config);
        Self {
            inner,
            weight_fake_quant,
            activation_fake_quant,
            training: true,
        }
    }

    /// QAT layer mapping entry for [`LayerKind::CONV2D`]
    pub fn from_layer(layer: Box<dyn Module>, config: &LayerQuantConfig) -> Result<Box<dyn Module>> {
        let conv = downcast::<Conv2d>(layer, LayerKind::CONV2D)?;
        Ok(Box::new(Self::new(conv, config)))
    }

    pub fn inner(&self) -> &Conv2d {
        &self.inner
    }

    pub fn weight_quanter(&self) -> Option<&FakeQuantize> {
        self.weight_fake_quant.as_ref()
    }

    pub fn activation_quanter(&self) -> Option<&FakeQuantize> {
        self.activation_fake_quant.as_ref()
    }
}

impl Module for QATConv2d {
    fn kind(&self) -> LayerKind {
        LayerKind::QAT_CONV2D
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        if !self.training {
            return self.inner.forward(input);
        }

        let input = match &self.activation_fake_quant {
            Some(fq) => fq.forward(input),
            None => input.clone(),
        };
        match &self.weight_fake_quant {
            Some(fq) => self.inner.forward_with(&input, &fq.forward(&self.inner.weight)),
            None => self.inner.forward(&input),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.inner.parameters()
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(self.clone()))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for fq in [&mut self.weight_fake_quant, &mut self.activation_fake_quant]
            .into_iter()
            .flatten()
        {
            fq.set_training(training);
        }
    }

    fn extra_repr(&self) -> String {
        format!(
            "{}, {}",
            self.inner.extra_repr(),
            quant_repr(&self.weight_fake_quant, &self.activation_fake_quant)
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Runs the observed layer, then fake-quantizes its output.
///
/// The observed layer is exposed as the single child `"layer"`.
#[derive(Debug)]
pub struct ObserveWrapper {
    observer: FakeQuantize,
    observed: Box<dyn Module>,
}

impl ObserveWrapper {
    pub fn new(observer: FakeQuantize, observed: Box<dyn Module>) -> Self {
        Self { observer, observed }
    }

    pub fn observer(&self) -> &FakeQuantize {
        &self.observer
    }

    pub fn observed(&self) -> &dyn Module {
        self.observed.as_ref()
    }
}

impl Module for ObserveWrapper {
    fn kind(&self) -> LayerKind {
        LayerKind::OBSERVE_WRAPPER
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.observer.forward(&self.observed.forward(input))
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.observed.parameters()
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        vec![("layer", self.observed.as_ref())]
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Module> {
        match name {
            "layer" => Some(self.observed.as_mut()),
            _ => None,
        }
    }

    fn replace_child(&mut self, name: &str, layer: Box<dyn Module>) -> Result<Box<dyn Module>> {
        if name != "layer" {
            return Err(QatError::UnknownChild {
                kind: self.kind().to_string(),
                name: name.to_string(),
            });
        }
        Ok(std::mem::replace(&mut self.observed, layer))
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self {
            observer: self.observer.clone(),
            observed: self.observed.clone_module()?,
        }))
    }

    fn set_training(&mut self, training: bool) {
        self.observer.set_training(training);
        self.observed.set_training(training);
    }

    fn extra_repr(&self) -> String {
        format!("observer={}", self.observer)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ReLU;
    use crate::quantization::QuanterFactory;

    fn full_config() -> LayerQuantConfig {
        LayerQuantConfig::new(Some(QuanterFactory::default()), Some(QuanterFactory::default()))
    }

    #[test]
    fn test_qat_linear_from_layer() {
        let linear = Linear::new(784, 128, true);
        let qat = QATLinear::from_layer(Box::new(linear.clone()), &full_config()).unwrap();
        assert_eq!(qat.kind(), LayerKind::QAT_LINEAR);

        let qat = qat.as_any().downcast_ref::<QATLinear>().unwrap();
        assert_eq!(qat.inner().weight, linear.weight);
        assert!(qat.weight_quanter().is_some());
        assert!(qat.activation_quanter().is_some());
    }

    #[test]
    fn test_from_layer_rejects_other_kinds() {
        let err = QATLinear::from_layer(Box::new(ReLU), &full_config()).unwrap_err();
        match err {
            QatError::LayerMismatch { expected, found } => {
                assert_eq!(expected, "linear");
                assert_eq!(found, "relu");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(QATConv2d::from_layer(Box::new(Linear::new(2, 2, false)), &full_config()).is_err());
    }

    #[test]
    fn test_from_layer_keeps_weight_buffer() {
        let linear = Linear::new(4, 4, true);
        let ptr = linear.weight.data().as_ptr();
        let qat = QATLinear::from_layer(Box::new(linear), &full_config()).unwrap();

        let qat = qat.as_any().downcast_ref::<QATLinear>().unwrap();
        assert_eq!(qat.inner().weight.data().as_ptr(), ptr);
    }

    #[test]
    fn test_qat_linear_forward() {
        let qat = QATLinear::new(Linear::new(784, 128, true), &full_config());
        let output = qat.forward(&Tensor::randn(&[32, 784]));

        assert_eq!(output.shape(), &[32, 128]);
        assert_eq!(qat.weight_quanter().unwrap().stats().num_observations, 1);
    }

    #[test]
    fn test_qat_linear_eval_matches_float() {
        let linear = Linear::new(8, 4, true);
        let mut qat = QATLinear::new(linear.clone(), &full_config());
        qat.set_training(false);
        assert!(!qat.is_training());

        let input = Tensor::randn(&[2, 8]);
        assert_eq!(qat.forward(&input).data(), linear.forward(&input).data());
        assert_eq!(qat.weight_quanter().unwrap().stats().num_observations, 0);
    }

    #[test]
    fn test_weight_only_config() {
        let config = LayerQuantConfig::new(None, Some(QuanterFactory::default()));
        let qat = QATLinear::new(Linear::new(4, 4, false), &config);
        assert!(qat.activation_quanter().is_none());
        assert!(qat.extra_repr().contains("activation_quanter=None"));
    }

    #[test]
    fn test_qat_conv2d_forward() {
        let conv = Conv2d::new(1, 8, (3, 3), Some((1, 1)), Some((1, 1)), true);
        let qat = QATConv2d::from_layer(Box::new(conv), &full_config()).unwrap();
        let output = qat.forward(&Tensor::randn(&[1, 1, 28, 28]));

        assert_eq!(output.shape(), &[1, 8, 28, 28]);
        assert_eq!(qat.kind(), LayerKind::QAT_CONV2D);
    }

    #[test]
    fn test_observe_wrapper() {
        let mut wrapper = ObserveWrapper::new(FakeQuantize::int8(), Box::new(ReLU));
        let names: Vec<&str> = wrapper.named_children().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["layer"]);

        let input = Tensor::new(vec![-1.0, 0.5, 1.0], &[3]);
        let out = wrapper.forward(&input);
        assert_eq!(out.data()[0], 0.0);
        assert_eq!(wrapper.observer().stats().num_observations, 1);

        let old = wrapper.replace_child("layer", Box::new(crate::activation::Sigmoid)).unwrap();
        assert_eq!(old.kind(), LayerKind::RELU);
        assert_eq!(wrapper.observed().kind(), LayerKind::SIGMOID);
        assert!(wrapper.replace_child("other", Box::new(ReLU)).is_err());
    }

    #[test]
    fn test_observe_wrapper_clone_has_own_statistics() {
        let wrapper = ObserveWrapper::new(FakeQuantize::int8(), Box::new(ReLU));
        let copy = wrapper.clone_module().unwrap();
        copy.forward(&Tensor::new(vec![1.0], &[1]));

        assert_eq!(wrapper.observer().stats().num_observations, 0);
    }
}
