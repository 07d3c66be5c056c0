//! Layer tree: the [`Module`] trait and the built-in layers.

use crate::{QatError, Result, Tensor};
use std::any::Any;
use std::fmt;

/// Stable identifier of a layer's concrete kind.
///
/// Used as the key of QAT layer mappings and type configs, in place of
/// inspecting the concrete Rust type at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerKind(&'static str);

impl LayerKind {
    pub const LINEAR: LayerKind = LayerKind("linear");
    pub const CONV2D: LayerKind = LayerKind("conv2d");
    pub const RELU: LayerKind = LayerKind("relu");
    pub const SIGMOID: LayerKind = LayerKind("sigmoid");
    pub const FLATTEN: LayerKind = LayerKind("flatten");
    pub const SEQUENTIAL: LayerKind = LayerKind("sequential");
    pub const LAYER_DICT: LayerKind = LayerKind("layer_dict");
    pub const QAT_LINEAR: LayerKind = LayerKind("qat_linear");
    pub const QAT_CONV2D: LayerKind = LayerKind("qat_conv2d");
    pub const OBSERVE_WRAPPER: LayerKind = LayerKind("observe_wrapper");
    pub const DETACHED: LayerKind = LayerKind("detached");

    /// Kinds shipped with this crate, in the order settings files resolve them.
    pub const BUILTIN: [LayerKind; 10] = [
        Self::LINEAR,
        Self::CONV2D,
        Self::RELU,
        Self::SIGMOID,
        Self::FLATTEN,
        Self::SEQUENTIAL,
        Self::LAYER_DICT,
        Self::QAT_LINEAR,
        Self::QAT_CONV2D,
        Self::OBSERVE_WRAPPER,
    ];

    /// Declare a kind for a user-defined layer.
    pub const fn custom(name: &'static str) -> Self {
        LayerKind(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    /// Resolve a built-in kind by name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::BUILTIN
            .iter()
            .copied()
            .find(|kind| kind.0 == name)
            .ok_or_else(|| QatError::UnknownLayerKind {
                kind: name.to_string(),
            })
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A node of the model tree.
///
/// Containers expose their sub-layers through [`Module::named_children`] in a
/// stable order and accept by-name replacement; leaves keep the defaults.
pub trait Module: fmt::Debug {
    fn kind(&self) -> LayerKind;

    fn forward(&self, input: &Tensor) -> Tensor;

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        Vec::new()
    }

    fn child_mut(&mut self, _name: &str) -> Option<&mut dyn Module> {
        None
    }

    /// Swap the child called `name` for `layer`, returning the old child.
    fn replace_child(&mut self, name: &str, layer: Box<dyn Module>) -> Result<Box<dyn Module>> {
        drop(layer);
        Err(QatError::UnknownChild {
            kind: self.kind().to_string(),
            name: name.to_string(),
        })
    }

    /// Move the child called `name` out, leaving a [`Detached`] stand-in
    /// until something is installed in its place.
    fn take_child(&mut self, name: &str) -> Result<Box<dyn Module>> {
        self.replace_child(name, Box::new(Detached))
    }

    /// Deep copy, fully independent of `self`.
    fn clone_module(&self) -> Result<Box<dyn Module>>;

    /// Switch quantization simulation on (training) or off (eval), recursively.
    fn set_training(&mut self, _training: bool) {}

    /// One-line layer attributes shown by [`describe`].
    fn extra_repr(&self) -> String {
        String::new()
    }

    fn as_any(&self) -> &dyn Any;

    /// Owned counterpart of [`Module::as_any`], for factories that consume the layer.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Render a layer tree, one node per line.
pub fn describe(module: &dyn Module) -> String {
    let mut out = String::new();
    describe_into(module, None, 0, &mut out);
    out
}

fn describe_into(module: &dyn Module, name: Option<&str>, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let label = match name {
        Some(name) => format!("{}({}): ", indent, name),
        None => indent,
    };
    out.push_str(&format!("{}{}({})\n", label, module.kind(), module.extra_repr()));
    for (child_name, child) in module.named_children() {
        describe_into(child, Some(child_name), depth + 1, out);
    }
}

/// Ordered, named sub-layers shared by the container layers.
#[derive(Debug, Default)]
struct Children {
    entries: Vec<(String, Box<dyn Module>)>,
}

impl Children {
    fn push(&mut self, name: String, layer: Box<dyn Module>) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = layer,
            None => self.entries.push((name, layer)),
        }
    }

    fn named(&self) -> Vec<(&str, &dyn Module)> {
        self.entries
            .iter()
            .map(|(name, layer)| (name.as_str(), layer.as_ref()))
            .collect()
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut dyn Module> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, layer)) => Some(layer.as_mut()),
            None => None,
        }
    }

    fn get(&self, name: &str) -> Option<&dyn Module> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, layer)| layer.as_ref())
    }

    fn replace(
        &mut self,
        owner: LayerKind,
        name: &str,
        layer: Box<dyn Module>,
    ) -> Result<Box<dyn Module>> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => Ok(std::mem::replace(&mut entry.1, layer)),
            None => Err(QatError::UnknownChild {
                kind: owner.to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn try_clone(&self) -> Result<Self> {
        let entries = self
            .entries
            .iter()
            .map(|(name, layer)| Ok((name.clone(), layer.clone_module()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.entries.iter().flat_map(|(_, l)| l.parameters()).collect()
    }

    fn set_training(&mut self, training: bool) {
        for (_, layer) in self.entries.iter_mut() {
            layer.set_training(training);
        }
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.entries
            .iter()
            .fold(input.clone(), |x, (_, l)| l.forward(&x))
    }
}

/// Linear (fully connected) layer: `y = xWᵀ + b`
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, with_bias: bool) -> Self {
        // Xavier/He-style initialization
        let scale = (2.0 / in_features as f32).sqrt();
        let weight = Tensor::uniform(&[out_features, in_features], scale);
        let bias = with_bias.then(|| Tensor::zeros(&[out_features]));

        Self { weight, bias }
    }

    /// Build from trained parameters: weight `[out, in]`, bias `[out]`.
    pub fn from_parts(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if weight.shape().len() != 2 {
            return Err(QatError::InvalidConfiguration {
                message: format!("linear weight must be 2D, got shape {:?}", weight.shape()),
            });
        }
        if let Some(b) = &bias {
            if b.shape() != [weight.shape()[0]].as_slice() {
                return Err(QatError::InvalidConfiguration {
                    message: format!(
                        "linear bias shape {:?} does not match {} output features",
                        b.shape(),
                        weight.shape()[0]
                    ),
                });
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Forward with an explicit weight, used by the QAT variant.
    pub(crate) fn forward_with(&self, input: &Tensor, weight: &Tensor) -> Tensor {
        let out = input.matmul_t(weight);
        match &self.bias {
            Some(b) => out.add_broadcast(b),
            None => out,
        }
    }
}

impl Module for Linear {
    fn kind(&self) -> LayerKind {
        LayerKind::LINEAR
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.forward_with(input, &self.weight)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut p = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            p.push(b.clone());
        }
        p
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(self.clone()))
    }

    fn extra_repr(&self) -> String {
        format!(
            "in_features={}, out_features={}, bias={}",
            self.in_features(),
            self.out_features(),
            self.bias.is_some()
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// 2D convolution over `[N, C, H, W]` inputs.
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl Conv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: Option<(usize, usize)>,
        padding: Option<(usize, usize)>,
        bias: bool,
    ) -> Self {
        let fan_in = in_channels * kernel_size.0 * kernel_size.1;
        let scale = (2.0 / fan_in as f32).sqrt();
        let weight = Tensor::uniform(
            &[out_channels, in_channels, kernel_size.0, kernel_size.1],
            scale,
        );
        let bias = bias.then(|| Tensor::zeros(&[out_channels]));

        Self {
            weight,
            bias,
            stride: stride.unwrap_or((1, 1)),
            padding: padding.unwrap_or((0, 0)),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    pub(crate) fn forward_with(&self, input: &Tensor, weight: &Tensor) -> Tensor {
        input.conv2d(weight, self.bias.as_ref(), self.stride, self.padding)
    }
}

impl Module for Conv2d {
    fn kind(&self) -> LayerKind {
        LayerKind::CONV2D
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.forward_with(input, &self.weight)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut p = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            p.push(b.clone());
        }
        p
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(self.clone()))
    }

    fn extra_repr(&self) -> String {
        let shape = self.weight.shape();
        format!(
            "{}, {}, kernel_size=({}, {}), stride={:?}, padding={:?}",
            self.in_channels(),
            self.out_channels(),
            shape[2],
            shape[3],
            self.stride,
            self.padding
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Placeholder occupying a slot whose layer was moved out; passes input through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl Module for Detached {
    fn kind(&self) -> LayerKind {
        LayerKind::DETACHED
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        input.clone()
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

/// Collapse everything after the batch dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten;

impl Module for Flatten {
    fn kind(&self) -> LayerKind {
        LayerKind::FLATTEN
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        let batch = input.shape().first().copied().unwrap_or(1);
        let rest = input.numel() / batch.max(1);
        input.reshape(&[batch, rest])
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

/// A stack of layers applied in sequence; children are named `"0"`, `"1"`, ...
#[derive(Debug, Default)]
pub struct Sequential {
    children: Children,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        let mut children = Children::default();
        for (idx, layer) in layers.into_iter().enumerate() {
            children.push(idx.to_string(), layer);
        }
        Self { children }
    }

    pub fn len(&self) -> usize {
        self.children.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Module> {
        self.children
            .entries
            .get(index)
            .map(|(_, layer)| layer.as_ref())
    }
}

impl Module for Sequential {
    fn kind(&self) -> LayerKind {
        LayerKind::SEQUENTIAL
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.children.forward(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.children.parameters()
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        self.children.named()
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Module> {
        self.children.get_mut(name)
    }

    fn replace_child(&mut self, name: &str, layer: Box<dyn Module>) -> Result<Box<dyn Module>> {
        self.children.replace(LayerKind::SEQUENTIAL, name, layer)
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self {
            children: self.children.try_clone()?,
        }))
    }

    fn set_training(&mut self, training: bool) {
        self.children.set_training(training);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Named sub-layers applied in insertion order.
///
/// Names are path segments: a name containing `.` is rejected when a config
/// is bound to the tree.
#[derive(Debug, Default)]
pub struct LayerDict {
    children: Children,
}

impl LayerDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated name replaces the earlier layer in place.
    pub fn with(mut self, name: &str, layer: Box<dyn Module>) -> Self {
        self.insert(name, layer);
        self
    }

    pub fn insert(&mut self, name: &str, layer: Box<dyn Module>) {
        self.children.push(name.to_string(), layer);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Module> {
        self.children.get(name)
    }
}

impl Module for LayerDict {
    fn kind(&self) -> LayerKind {
        LayerKind::LAYER_DICT
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.children.forward(input)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.children.parameters()
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        self.children.named()
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Module> {
        self.children.get_mut(name)
    }

    fn replace_child(&mut self, name: &str, layer: Box<dyn Module>) -> Result<Box<dyn Module>> {
        self.children.replace(LayerKind::LAYER_DICT, name, layer)
    }

    fn clone_module(&self) -> Result<Box<dyn Module>> {
        Ok(Box::new(Self {
            children: self.children.try_clone()?,
        }))
    }

    fn set_training(&mut self, training: bool) {
        self.children.set_training(training);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Follow a dotted path (`"features.0"`) from `root`.
pub fn find<'a>(root: &'a dyn Module, path: &str) -> Option<&'a dyn Module> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, name| {
        node.named_children()
            .into_iter()
            .find(|(child_name, _)| *child_name == name)
            .map(|(_, child)| child)
    })
}
