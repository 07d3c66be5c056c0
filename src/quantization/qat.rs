//! Model preparation for quantization-aware training
//!
//! [`QATRewriter`] walks a layer tree twice. The first pass swaps every
//! quantifiable layer that has a QAT mapping for its QAT counterpart; the
//! second wraps activation-producing leaves of the *rewritten* tree in
//! observers, so observers end up around the QAT layers, not the originals.
//!
//! Both passes visit children in order, depth first. A child that gets
//! replaced or wrapped is moved out of its parent and the result is staged;
//! staged nodes are installed once the parent's children have all been
//! visited. A replaced or wrapped child is never descended into within the
//! same pass, and a subtree whose root is not quantifiable is skipped whole.

use super::config::{join_path, QuantConfig};
use crate::nn::Module;
use crate::{QatError, Result};
use log::{debug, info};
use std::fmt;

/// Prepares models for quantization-aware training.
///
/// Holds its own copy of the configuration, taken at construction; later
/// changes to the caller's config do not affect it.
#[derive(Debug, Clone)]
pub struct QATRewriter {
    config: QuantConfig,
}

impl QATRewriter {
    pub fn new(config: &QuantConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &QuantConfig {
        &self.config
    }

    /// Prepare a deep copy of `model`; the caller's tree is left untouched.
    pub fn quantize(&self, model: &dyn Module) -> Result<Box<dyn Module>> {
        let mut prepared = model.clone_module()?;
        self.quantize_in_place(prepared.as_mut())?;
        Ok(prepared)
    }

    /// Prepare `model` itself.
    ///
    /// On error the tree may be left partially rewritten.
    pub fn quantize_in_place(&self, model: &mut dyn Module) -> Result<()> {
        // bind on a per-call copy so the owned config stays as constructed
        let mut config = self.config.clone();
        config.specify(model)?;

        info!("Converting quantifiable layers of {} model", model.kind());
        let replaced = convert_to_quant_layers(model, "", &config)?;
        info!("Replaced {} layers with QAT layers", replaced);

        let wrapped = insert_activation_observers(model, "", &config)?;
        info!("Inserted {} activation observers", wrapped);
        Ok(())
    }

    pub fn details(&self) -> String {
        self.config.details()
    }
}

impl fmt::Display for QATRewriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.details())
    }
}

fn convert_to_quant_layers(
    model: &mut dyn Module,
    prefix: &str,
    config: &QuantConfig,
) -> Result<usize> {
    let mut replaced = Vec::new();
    let mut count = 0;

    for name in child_names(model) {
        let path = join_path(prefix, &name);
        if !config.is_quantifiable(&path) {
            debug!("{}: not quantifiable, subtree skipped", path);
            continue;
        }

        let child = child_mut(model, &name)?;
        let kind = child.kind();
        if config.has_qat_layer_mapping(kind) {
            debug!("{}: {} -> QAT layer", path, kind);
            let layer = model.take_child(&name)?;
            replaced.push((name, config.get_qat_layer(&path, layer)?));
        } else {
            count += convert_to_quant_layers(child, &path, config)?;
        }
    }
    Ok(count + install(model, replaced)?)
}

fn insert_activation_observers(
    model: &mut dyn Module,
    prefix: &str,
    config: &QuantConfig,
) -> Result<usize> {
    let mut replaced = Vec::new();
    let mut count = 0;

    for name in child_names(model) {
        let path = join_path(prefix, &name);
        let child = child_mut(model, &name)?;
        if config.need_observe(&path, child) {
            debug!("{}: wrapping {} with observer", path, child.kind());
            let layer = model.take_child(&name)?;
            replaced.push((name, config.get_observe_wrapper(&path, layer)?));
        } else {
            count += insert_activation_observers(child, &path, config)?;
        }
    }
    Ok(count + install(model, replaced)?)
}

fn child_names(model: &dyn Module) -> Vec<String> {
    model
        .named_children()
        .into_iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

fn child_mut<'a>(model: &'a mut dyn Module, name: &str) -> Result<&'a mut dyn Module> {
    let kind = model.kind();
    model.child_mut(name).ok_or_else(|| QatError::UnknownChild {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}

fn install(model: &mut dyn Module, staged: Vec<(String, Box<dyn Module>)>) -> Result<usize> {
    let count = staged.len();
    for (name, layer) in staged {
        model.replace_child(&name, layer)?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ReLU;
    use crate::nn::{find, LayerDict, LayerKind, Linear, Sequential};
    use crate::quantization::QuanterFactory;

    fn model() -> LayerDict {
        LayerDict::new()
            .with("fc", Box::new(Linear::new(4, 4, true)))
            .with("act", Box::new(ReLU))
            .with(
                "head",
                Box::new(Sequential::new(vec![Box::new(Linear::new(4, 2, true))])),
            )
    }

    #[test]
    fn test_replaces_and_wraps() {
        let rewriter = QATRewriter::new(&QuantConfig::default());
        let prepared = rewriter.quantize(&model()).unwrap();

        // fc is replaced, then observed as a leaf
        let fc = find(prepared.as_ref(), "fc").unwrap();
        assert_eq!(fc.kind(), LayerKind::OBSERVE_WRAPPER);
        assert_eq!(find(prepared.as_ref(), "fc.layer").unwrap().kind(), LayerKind::QAT_LINEAR);
        assert_eq!(find(prepared.as_ref(), "act").unwrap().kind(), LayerKind::OBSERVE_WRAPPER);
        assert_eq!(find(prepared.as_ref(), "head").unwrap().kind(), LayerKind::SEQUENTIAL);
        assert_eq!(
            find(prepared.as_ref(), "head.0.layer").unwrap().kind(),
            LayerKind::QAT_LINEAR
        );
    }

    #[test]
    fn test_weight_only_config_skips_observers() {
        let config = QuantConfig::new(None, Some(QuanterFactory::default()));
        let prepared = QATRewriter::new(&config).quantize(&model()).unwrap();

        assert_eq!(find(prepared.as_ref(), "fc").unwrap().kind(), LayerKind::QAT_LINEAR);
        assert_eq!(find(prepared.as_ref(), "act").unwrap().kind(), LayerKind::RELU);
    }

    #[test]
    fn test_in_place() {
        let rewriter = QATRewriter::new(&QuantConfig::default());
        let mut model = model();
        rewriter.quantize_in_place(&mut model).unwrap();
        assert_eq!(model.get("fc").unwrap().kind(), LayerKind::OBSERVE_WRAPPER);
    }

    #[test]
    fn test_display_delegates_to_config() {
        let config = QuantConfig::default();
        let rewriter = QATRewriter::new(&config);
        assert_eq!(rewriter.to_string(), config.details());
        assert_eq!(format!("{}", rewriter), rewriter.details());
    }
}
