//! Quantization configuration
//!
//! [`QuantConfig`] decides, per layer, which quanters apply and which QAT layer
//! replaces it. Layers are addressed by their dotted path from the model root
//! (`"features.0"`); paths survive replacement, so a replaced layer keeps the
//! configuration bound to its slot.
//!
//! Resolution priority when binding a layer: name config, then type config,
//! then the parent's bound config, then the global config.

use super::fake_quantize::QuanterFactory;
use super::qat_layers::{ObserveWrapper, QATConv2d, QATLinear};
use crate::nn::{LayerKind, Module};
use crate::{QatError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Quanters applied to one layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerQuantConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<QuanterFactory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<QuanterFactory>,
}

impl LayerQuantConfig {
    pub fn new(activation: Option<QuanterFactory>, weight: Option<QuanterFactory>) -> Self {
        Self { activation, weight }
    }

    pub fn is_empty(&self) -> bool {
        self.activation.is_none() && self.weight.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(activation) = &self.activation {
            activation.validate()?;
        }
        if let Some(weight) = &self.weight {
            weight.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for LayerQuantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |q: &Option<QuanterFactory>| match q {
            Some(q) => q.to_string(),
            None => "None".to_string(),
        };
        write!(
            f,
            "activation={}, weight={}",
            show(&self.activation),
            show(&self.weight)
        )
    }
}

/// Builds the QAT counterpart of a layer from its bound config, consuming the layer.
pub type QatLayerFactory =
    Arc<dyn Fn(Box<dyn Module>, &LayerQuantConfig) -> Result<Box<dyn Module>> + Send + Sync>;

/// Layer kinds treated as leaves even though they might not look like one.
const DEFAULT_LEAVES: [LayerKind; 2] = [LayerKind::RELU, LayerKind::SIGMOID];

fn default_qat_layer_mappings() -> BTreeMap<LayerKind, QatLayerFactory> {
    let mut mappings: BTreeMap<LayerKind, QatLayerFactory> = BTreeMap::new();
    mappings.insert(LayerKind::LINEAR, Arc::new(QATLinear::from_layer));
    mappings.insert(LayerKind::CONV2D, Arc::new(QATConv2d::from_layer));
    mappings
}

/// Configuration driving QAT preparation.
///
/// `Clone` yields a fully independent copy: quanter factories are plain
/// values and QAT layer factories are immutable.
#[derive(Clone)]
pub struct QuantConfig {
    global: Option<LayerQuantConfig>,
    name_configs: BTreeMap<String, LayerQuantConfig>,
    type_configs: BTreeMap<LayerKind, LayerQuantConfig>,
    default_qat_mappings: BTreeMap<LayerKind, QatLayerFactory>,
    custom_qat_mappings: BTreeMap<LayerKind, QatLayerFactory>,
    customized_leaves: Vec<LayerKind>,
    /// Per-path configs produced by [`QuantConfig::specify`]
    bindings: BTreeMap<String, LayerQuantConfig>,
}

impl fmt::Debug for QuantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantConfig")
            .field("global", &self.global)
            .field("name_configs", &self.name_configs)
            .field("type_configs", &self.type_configs)
            .field("qat_layer_mappings", &self.qat_layer_mappings())
            .field("customized_leaves", &self.customized_leaves)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl Default for QuantConfig {
    /// 8-bit abs-max quanters for both activations and weights
    fn default() -> Self {
        Self::new(
            Some(QuanterFactory::default()),
            Some(QuanterFactory::default()),
        )
    }
}

impl QuantConfig {
    /// Global quanters; with both `None` no layer is quantifiable unless a
    /// name or type config says otherwise.
    pub fn new(activation: Option<QuanterFactory>, weight: Option<QuanterFactory>) -> Self {
        let global = LayerQuantConfig::new(activation, weight);
        Self {
            global: (!global.is_empty()).then_some(global),
            name_configs: BTreeMap::new(),
            type_configs: BTreeMap::new(),
            default_qat_mappings: default_qat_layer_mappings(),
            custom_qat_mappings: BTreeMap::new(),
            customized_leaves: Vec::new(),
            bindings: BTreeMap::new(),
        }
    }

    /// Override the config of the layer at `path`.
    pub fn add_name_config(
        &mut self,
        path: &str,
        activation: Option<QuanterFactory>,
        weight: Option<QuanterFactory>,
    ) {
        self.name_configs
            .insert(path.to_string(), LayerQuantConfig::new(activation, weight));
    }

    /// Override the config of every layer of `kind`.
    pub fn add_type_config(
        &mut self,
        kind: LayerKind,
        activation: Option<QuanterFactory>,
        weight: Option<QuanterFactory>,
    ) {
        self.type_configs
            .insert(kind, LayerQuantConfig::new(activation, weight));
    }

    /// Register a QAT replacement for `source`; takes precedence over the defaults.
    pub fn add_qat_layer_mapping<F>(&mut self, source: LayerKind, factory: F)
    where
        F: Fn(Box<dyn Module>, &LayerQuantConfig) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.custom_qat_mappings.insert(source, Arc::new(factory));
    }

    /// Treat layers of `kind` as leaves when deciding where observers go.
    pub fn add_customized_leaf(&mut self, kind: LayerKind) {
        if !self.customized_leaves.contains(&kind) {
            self.customized_leaves.push(kind);
        }
    }

    pub fn global_config(&self) -> Option<&LayerQuantConfig> {
        self.global.as_ref()
    }

    pub fn customized_leaves(&self) -> &[LayerKind] {
        &self.customized_leaves
    }

    /// Every kind with a QAT replacement, custom and default merged.
    pub fn qat_layer_mappings(&self) -> Vec<LayerKind> {
        let mut kinds: Vec<LayerKind> = self
            .default_qat_mappings
            .keys()
            .chain(self.custom_qat_mappings.keys())
            .copied()
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn has_qat_layer_mapping(&self, kind: LayerKind) -> bool {
        self.custom_qat_mappings.contains_key(&kind) || self.default_qat_mappings.contains_key(&kind)
    }

    /// Bind configs to every layer of `model`, replacing earlier bindings.
    ///
    /// Fails on a child name containing `.`, which would make paths ambiguous.
    pub fn specify(&mut self, model: &dyn Module) -> Result<()> {
        if let Some(global) = &self.global {
            global.validate()?;
        }
        for config in self.name_configs.values().chain(self.type_configs.values()) {
            config.validate()?;
        }

        self.bindings.clear();
        self.specify_helper(model, "")?;

        for path in self.name_configs.keys() {
            if !self.bindings.contains_key(path) && crate::nn::find(model, path).is_none() {
                warn!("Name config `{}` matches no layer in the model", path);
            }
        }
        debug!("Bound quantization config to {} layers", self.bindings.len());
        Ok(())
    }

    fn specify_helper(&mut self, model: &dyn Module, prefix: &str) -> Result<()> {
        for (name, child) in model.named_children() {
            if name.is_empty() || name.contains('.') {
                return Err(QatError::InvalidChildName {
                    parent: prefix.to_string(),
                    name: name.to_string(),
                });
            }
            let path = join_path(prefix, name);

            let inherited = self.bindings.get(prefix).or(self.global.as_ref());
            let config = self
                .name_configs
                .get(&path)
                .or_else(|| self.type_configs.get(&child.kind()))
                .or(inherited)
                .copied();

            if let Some(config) = config {
                debug!("{} ({}): {}", path, child.kind(), config);
                self.bindings.insert(path.clone(), config);
            }
            self.specify_helper(child, &path)?;
        }
        Ok(())
    }

    /// Config bound to `path` by the last [`QuantConfig::specify`]
    pub fn config_for(&self, path: &str) -> Option<&LayerQuantConfig> {
        self.bindings.get(path)
    }

    pub fn is_quantifiable(&self, path: &str) -> bool {
        self.bindings.contains_key(path)
    }

    pub fn is_leaf(&self, layer: &dyn Module) -> bool {
        let kind = layer.kind();
        DEFAULT_LEAVES.contains(&kind)
            || layer.named_children().is_empty()
            || self.customized_leaves.contains(&kind)
    }

    fn has_observer_config(&self, path: &str) -> bool {
        self.config_for(path)
            .is_some_and(|config| config.activation.is_some())
    }

    pub fn need_observe(&self, path: &str, layer: &dyn Module) -> bool {
        self.is_leaf(layer) && self.has_observer_config(path)
    }

    /// Build the QAT replacement for the layer at `path`, consuming it.
    pub fn get_qat_layer(&self, path: &str, layer: Box<dyn Module>) -> Result<Box<dyn Module>> {
        let config = self
            .config_for(path)
            .ok_or_else(|| QatError::MissingLayerConfig {
                path: path.to_string(),
            })?;
        let kind = layer.kind();
        let factory = self
            .custom_qat_mappings
            .get(&kind)
            .or_else(|| self.default_qat_mappings.get(&kind))
            .ok_or_else(|| QatError::MissingQatMapping {
                kind: kind.to_string(),
            })?;
        factory(layer, config)
    }

    /// Wrap the layer at `path` with its activation quanter.
    pub fn get_observe_wrapper(&self, path: &str, layer: Box<dyn Module>) -> Result<Box<dyn Module>> {
        let config = self
            .config_for(path)
            .ok_or_else(|| QatError::MissingLayerConfig {
                path: path.to_string(),
            })?;
        let activation = config
            .activation
            .ok_or_else(|| QatError::MissingActivationQuanter {
                path: path.to_string(),
            })?;
        Ok(Box::new(ObserveWrapper::new(activation.instance(), layer)))
    }

    /// Human readable summary of the configuration and its current bindings.
    pub fn details(&self) -> String {
        let mut out = String::new();
        match &self.global {
            Some(global) => out.push_str(&format!("Global config:\n  {}\n", global)),
            None => out.push_str("Global config: None\n"),
        }
        if !self.name_configs.is_empty() {
            out.push_str("Name configs:\n");
            for (path, config) in &self.name_configs {
                out.push_str(&format!("  {}: {}\n", path, config));
            }
        }
        if !self.type_configs.is_empty() {
            out.push_str("Type configs:\n");
            for (kind, config) in &self.type_configs {
                out.push_str(&format!("  {}: {}\n", kind, config));
            }
        }
        let mappings: Vec<String> = self
            .qat_layer_mappings()
            .iter()
            .map(|kind| {
                if self.custom_qat_mappings.contains_key(kind) {
                    format!("{} (custom)", kind)
                } else {
                    kind.to_string()
                }
            })
            .collect();
        out.push_str(&format!("QAT layer mappings: [{}]\n", mappings.join(", ")));
        if !self.customized_leaves.is_empty() {
            let leaves: Vec<&str> = self.customized_leaves.iter().map(|k| k.name()).collect();
            out.push_str(&format!("Customized leaves: [{}]\n", leaves.join(", ")));
        }
        if !self.bindings.is_empty() {
            out.push_str("Bound layers:\n");
            for (path, config) in &self.bindings {
                out.push_str(&format!("  {}: {}\n", path, config));
            }
        }
        out
    }

    /// Build a config from file settings.
    ///
    /// Kind names resolve against the built-in kinds and `extra_kinds`.
    pub fn from_settings(settings: &QuantSettings, extra_kinds: &[LayerKind]) -> Result<Self> {
        settings.validate()?;

        let resolve = |name: &str| -> Result<LayerKind> {
            match extra_kinds.iter().find(|kind| kind.name() == name) {
                Some(kind) => Ok(*kind),
                None => LayerKind::from_name(name),
            }
        };

        let mut config = Self::new(settings.global.activation, settings.global.weight);
        for entry in &settings.names {
            config.add_name_config(&entry.path, entry.activation, entry.weight);
        }
        for entry in &settings.kinds {
            config.add_type_config(resolve(&entry.kind)?, entry.activation, entry.weight);
        }
        for leaf in &settings.customized_leaves {
            config.add_customized_leaf(resolve(leaf)?);
        }
        Ok(config)
    }
}

impl fmt::Display for QuantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.details())
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Per-path entry of a settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameSettings {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<QuanterFactory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<QuanterFactory>,
}

/// Per-kind entry of a settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSettings {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<QuanterFactory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<QuanterFactory>,
}

/// TOML form of a [`QuantConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantSettings {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub customized_leaves: Vec<String>,
    pub global: LayerQuantConfig,
    #[serde(rename = "name", skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<NameSettings>,
    #[serde(rename = "kind", skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<KindSettings>,
}

impl QuantSettings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: QuantSettings =
            toml::from_str(&content).map_err(|e| QatError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| QatError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate quanter parameters and entry keys
    pub fn validate(&self) -> Result<()> {
        self.global.validate()?;
        for entry in &self.names {
            if entry.path.is_empty() {
                return Err(QatError::InvalidConfiguration {
                    message: "name config with empty path".to_string(),
                });
            }
            LayerQuantConfig::new(entry.activation, entry.weight).validate()?;
        }
        for entry in &self.kinds {
            LayerQuantConfig::new(entry.activation, entry.weight).validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ReLU;
    use crate::nn::{LayerDict, Linear, Sequential};

    fn model() -> LayerDict {
        LayerDict::new()
            .with("fc1", Box::new(Linear::new(4, 4, true)))
            .with("act", Box::new(ReLU))
            .with(
                "block",
                Box::new(Sequential::new(vec![
                    Box::new(Linear::new(4, 2, true)),
                    Box::new(ReLU),
                ])),
            )
    }

    #[test]
    fn test_global_config_binds_every_layer() {
        let mut config = QuantConfig::default();
        config.specify(&model()).unwrap();

        for path in ["fc1", "act", "block", "block.0", "block.1"] {
            assert!(config.is_quantifiable(path), "{} should be bound", path);
        }
        assert!(!config.is_quantifiable(""));
    }

    #[test]
    fn test_no_global_config_binds_nothing() {
        let mut config = QuantConfig::new(None, None);
        assert!(config.global_config().is_none());
        config.specify(&model()).unwrap();
        assert!(!config.is_quantifiable("fc1"));
        assert!(config.details().contains("Global config: None"));
    }

    #[test]
    fn test_resolution_priority() {
        let act4 = QuanterFactory::default().with_bits(4);
        let w6 = QuanterFactory::default().with_bits(6);

        let mut config = QuantConfig::new(None, Some(QuanterFactory::default()));
        config.add_type_config(LayerKind::LINEAR, Some(act4), None);
        config.add_name_config("block.0", None, Some(w6));
        config.specify(&model()).unwrap();

        // type config beats global
        assert_eq!(config.config_for("fc1").unwrap().activation, Some(act4));
        // name config beats type config
        assert_eq!(config.config_for("block.0").unwrap().weight, Some(w6));
        assert!(config.config_for("block.0").unwrap().activation.is_none());
        // parent's binding is inherited
        assert_eq!(
            config.config_for("block.1"),
            config.config_for("block")
        );
    }

    #[test]
    fn test_parent_binding_inherited_without_global() {
        let act4 = QuanterFactory::default().with_bits(4);
        let mut config = QuantConfig::new(None, None);
        config.add_name_config("block", Some(act4), None);
        config.specify(&model()).unwrap();

        assert!(!config.is_quantifiable("fc1"));
        assert_eq!(config.config_for("block.0").unwrap().activation, Some(act4));
        assert_eq!(config.config_for("block.1").unwrap().activation, Some(act4));
    }

    #[test]
    fn test_specify_replaces_previous_bindings() {
        let mut config = QuantConfig::default();
        config.specify(&model()).unwrap();
        assert!(config.is_quantifiable("block.1"));

        let other = LayerDict::new().with("only", Box::new(ReLU));
        config.specify(&other).unwrap();
        assert!(config.is_quantifiable("only"));
        assert!(!config.is_quantifiable("block.1"));
    }

    #[test]
    fn test_specify_rejects_invalid_quanter() {
        let mut config = QuantConfig::new(Some(QuanterFactory::default().with_bits(40)), None);
        let err = config.specify(&model()).unwrap_err();
        assert!(matches!(err, QatError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_leaf_and_observe_decisions() {
        let mut config = QuantConfig::new(Some(QuanterFactory::default()), None);
        let model = model();
        config.specify(&model).unwrap();

        let block = model.get("block").unwrap();
        assert!(!config.is_leaf(block));
        assert!(config.need_observe("act", model.get("act").unwrap()));
        assert!(!config.need_observe("block", block));

        config.add_customized_leaf(LayerKind::SEQUENTIAL);
        config.add_customized_leaf(LayerKind::SEQUENTIAL);
        assert_eq!(config.customized_leaves().len(), 1);
        assert!(config.need_observe("block", block));
    }

    #[test]
    fn test_weight_only_config_needs_no_observer() {
        let mut config = QuantConfig::new(None, Some(QuanterFactory::default()));
        let model = model();
        config.specify(&model).unwrap();
        assert!(!config.need_observe("act", model.get("act").unwrap()));
    }

    #[test]
    fn test_get_qat_layer_uses_mapping() {
        let mut config = QuantConfig::default();
        let model = model();
        config.specify(&model).unwrap();

        let qat = config
            .get_qat_layer("fc1", Box::new(Linear::new(4, 4, true)))
            .unwrap();
        assert_eq!(qat.kind(), LayerKind::QAT_LINEAR);

        let err = config.get_qat_layer("act", Box::new(ReLU)).unwrap_err();
        assert!(matches!(err, QatError::MissingQatMapping { .. }));

        let err = config
            .get_qat_layer("nope", Box::new(Linear::new(4, 4, true)))
            .unwrap_err();
        assert!(matches!(err, QatError::MissingLayerConfig { .. }));
    }

    #[test]
    fn test_custom_mapping_takes_precedence() {
        let mut config = QuantConfig::default();
        config.add_qat_layer_mapping(LayerKind::LINEAR, |_layer, _config| Ok(Box::new(ReLU)));
        config.add_qat_layer_mapping(LayerKind::RELU, |_layer, _config| Ok(Box::new(ReLU)));

        let model = model();
        config.specify(&model).unwrap();
        let replaced = config
            .get_qat_layer("fc1", Box::new(Linear::new(4, 4, true)))
            .unwrap();
        assert_eq!(replaced.kind(), LayerKind::RELU);
        assert!(config.has_qat_layer_mapping(LayerKind::RELU));
        assert_eq!(
            config.qat_layer_mappings(),
            vec![LayerKind::CONV2D, LayerKind::LINEAR, LayerKind::RELU]
        );
        assert!(config.details().contains("linear (custom)"));
    }

    #[test]
    fn test_observe_wrapper_requires_activation() {
        let mut config = QuantConfig::new(None, Some(QuanterFactory::default()));
        let model = model();
        config.specify(&model).unwrap();

        let err = config
            .get_observe_wrapper("act", Box::new(ReLU))
            .unwrap_err();
        assert!(matches!(err, QatError::MissingActivationQuanter { .. }));
    }

    #[test]
    fn test_observe_wrapper_wraps_given_layer() {
        let mut config = QuantConfig::default();
        config.specify(&model()).unwrap();

        let wrapped = config.get_observe_wrapper("act", Box::new(ReLU)).unwrap();
        let wrapper = wrapped.as_any().downcast_ref::<ObserveWrapper>().unwrap();
        assert_eq!(wrapper.observed().kind(), LayerKind::RELU);
    }

    #[test]
    fn test_specify_rejects_dotted_child_names() {
        let model = LayerDict::new()
            .with("a.b", Box::new(ReLU))
            .with("a", Box::new(LayerDict::new().with("b", Box::new(ReLU))));

        let mut config = QuantConfig::default();
        let err = config.specify(&model).unwrap_err();
        match err {
            QatError::InvalidChildName { parent, name } => {
                assert_eq!(parent, "");
                assert_eq!(name, "a.b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clone_is_independent() {
        let original = QuantConfig::default();
        let mut copy = original.clone();
        copy.add_name_config("fc1", None, None);
        copy.add_customized_leaf(LayerKind::SEQUENTIAL);

        assert!(!original.details().contains("fc1"));
        assert!(original.customized_leaves().is_empty());
    }

    #[test]
    fn test_details_lists_bindings() {
        let mut config = QuantConfig::default();
        config.add_type_config(LayerKind::RELU, None, None);
        config.specify(&model()).unwrap();

        let details = config.details();
        assert!(details.contains("Global config:"));
        assert!(details.contains("Type configs:"));
        assert!(details.contains("QAT layer mappings: [conv2d, linear]"));
        assert!(details.contains("Bound layers:"));
        assert!(details.contains("  block.0: activation=AbsMax(bits=8, moving_rate=0.9)"));
        assert_eq!(format!("{}", config), details);
    }

    #[test]
    fn test_from_settings() {
        let settings: QuantSettings = toml::from_str(
            r#"
            customized_leaves = ["my_block"]

            [global]
            activation = { bits = 8, moving_rate = 0.9 }
            weight = { bits = 8 }

            [[name]]
            path = "classifier.2"
            activation = { bits = 4 }

            [[kind]]
            kind = "conv2d"
            weight = { bits = 4, symmetric = false }
            "#,
        )
        .unwrap();

        let my_block = LayerKind::custom("my_block");
        let config = QuantConfig::from_settings(&settings, &[my_block]).unwrap();
        assert_eq!(config.customized_leaves(), &[my_block]);
        assert!(config.global_config().unwrap().weight.is_some());
        let details = config.details();
        assert!(details.contains("classifier.2: activation=AbsMax(bits=4"));
        assert!(details.contains("conv2d: activation=None, weight=MinMax(bits=4)"));

        let err = QuantConfig::from_settings(&settings, &[]).unwrap_err();
        assert!(matches!(err, QatError::UnknownLayerKind { .. }));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = QuantSettings::default();
        assert!(settings.validate().is_ok());

        settings.names.push(NameSettings {
            path: String::new(),
            activation: None,
            weight: None,
        });
        assert!(settings.validate().is_err());

        let mut settings = QuantSettings::default();
        settings.global.activation = Some(QuanterFactory::abs_max(1.5));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quant.toml");

        let mut settings = QuantSettings::default();
        settings.global.activation = Some(QuanterFactory::default());
        settings.kinds.push(KindSettings {
            kind: "linear".to_string(),
            activation: None,
            weight: Some(QuanterFactory::default().with_bits(4)),
        });
        settings.save(&path).unwrap();

        let loaded = QuantSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "global = 3").unwrap();
        assert!(matches!(
            QuantSettings::load(&path),
            Err(QatError::Configuration(_))
        ));
        assert!(matches!(
            QuantSettings::load(dir.path().join("absent.toml")),
            Err(QatError::Io(_))
        ));
    }
}
