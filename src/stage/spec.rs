//! Stage configuration: JSON stage specs, property descriptors and the
//! catalog of stage types

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::cache::{TemporalOperationsTestStage, TimeoutOperationsTestStage};
use super::lifecycle::{CollectTimelineStage, ReconfigureSocketTimeoutStage, ServiceStartStage, ServiceStopStage};
use super::strong_counter::StrongCounterTestStage;
use super::weak_counter::{WeakCounterResetStage, WeakCounterTestStage};
use super::Stage;
use crate::error::{HarnessError, Result};

/// Serialized configuration of one stage, as sent to every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl StageSpec {
    pub fn new(stage_type: impl Into<String>) -> Self {
        Self {
            stage_type: stage_type.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

/// JSON type a property accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Integer,
    Boolean,
    /// A string restricted to the listed values
    Choice(&'static [&'static str]),
}

impl PropertyKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyKind::String => value.is_string(),
            PropertyKind::Integer => value.is_i64() || value.is_u64(),
            PropertyKind::Boolean => value.is_boolean(),
            PropertyKind::Choice(choices) => value.as_str().is_some_and(|s| choices.contains(&s)),
        }
    }

    fn describe(&self) -> String {
        match self {
            PropertyKind::String => "a string".to_string(),
            PropertyKind::Integer => "an integer".to_string(),
            PropertyKind::Boolean => "a boolean".to_string(),
            PropertyKind::Choice(choices) => format!("one of {}", choices.join(", ")),
        }
    }
}

/// A named, typed stage property
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub required: bool,
    pub default: Option<Value>,
    pub doc: &'static str,
}

impl PropertyDescriptor {
    /// Required property without a default
    pub fn required(name: &'static str, kind: PropertyKind, doc: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            doc,
        }
    }

    /// Optional property that is filled with `default` when absent
    pub fn with_default(name: &'static str, kind: PropertyKind, default: impl Into<Value>, doc: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default.into()),
            doc,
        }
    }

    /// Optional property that stays absent when not given
    pub fn optional(name: &'static str, kind: PropertyKind, doc: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            doc,
        }
    }
}

/// Declared configuration surface of one stage type
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub doc: &'static str,
    pub properties: Vec<PropertyDescriptor>,
}

impl StageDescriptor {
    pub fn new(name: &'static str, doc: &'static str) -> Self {
        Self {
            name,
            doc,
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn properties(mut self, properties: impl IntoIterator<Item = PropertyDescriptor>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Check that required properties are present, names are known and
    /// values have the declared type
    pub fn validate(&self, properties: &Map<String, Value>) -> Result<()> {
        for name in properties.keys() {
            if !self.properties.iter().any(|p| p.name == name) {
                return Err(HarnessError::invalid_config(
                    self.name,
                    format!("unknown property '{}'", name),
                ));
            }
        }

        for descriptor in &self.properties {
            match properties.get(descriptor.name) {
                None | Some(Value::Null) if descriptor.required => {
                    return Err(HarnessError::invalid_config(
                        self.name,
                        format!("missing required property '{}'", descriptor.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) if !descriptor.kind.accepts(value) => {
                    return Err(HarnessError::invalid_config(
                        self.name,
                        format!(
                            "property '{}' must be {}, got {}",
                            descriptor.name,
                            descriptor.kind.describe(),
                            value
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Validate and fill in defaults
    pub fn resolve(&self, properties: &Map<String, Value>) -> Result<Map<String, Value>> {
        self.validate(properties)?;
        let mut resolved = properties.clone();
        for descriptor in &self.properties {
            if let Some(default) = &descriptor.default {
                resolved
                    .entry(descriptor.name.to_string())
                    .or_insert_with(|| default.clone());
            }
        }
        Ok(resolved)
    }

    /// Validate, fill in defaults and deserialize into a typed config
    pub fn parse<T: serde::de::DeserializeOwned>(&self, properties: &Map<String, Value>) -> Result<T> {
        let resolved = self.resolve(properties)?;
        serde_json::from_value(Value::Object(resolved))
            .map_err(|e| HarnessError::invalid_config(self.name, e.to_string()))
    }
}

/// All stage types a worker and the coordinator know how to build
pub struct StageCatalog {
    descriptors: Vec<StageDescriptor>,
}

impl StageCatalog {
    pub fn builtin() -> Self {
        Self {
            descriptors: vec![
                ServiceStartStage::descriptor(),
                ServiceStopStage::descriptor(),
                StrongCounterTestStage::descriptor(),
                WeakCounterTestStage::descriptor(),
                WeakCounterResetStage::descriptor(),
                TimeoutOperationsTestStage::descriptor(),
                TemporalOperationsTestStage::descriptor(),
                ReconfigureSocketTimeoutStage::descriptor(),
                CollectTimelineStage::descriptor(),
            ],
        }
    }

    pub fn descriptors(&self) -> &[StageDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, stage_type: &str) -> Result<&StageDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == stage_type)
            .ok_or_else(|| HarnessError::UnknownStage(stage_type.to_string()))
    }

    pub fn validate(&self, spec: &StageSpec) -> Result<()> {
        self.descriptor(&spec.stage_type)?.validate(&spec.properties)
    }

    /// Build a stage object from its spec
    pub fn build(&self, spec: &StageSpec) -> Result<Box<dyn Stage>> {
        let descriptor = self.descriptor(&spec.stage_type)?;
        let properties = &spec.properties;
        descriptor.validate(properties)?;
        let stage: Box<dyn Stage> = match descriptor.name {
            ServiceStartStage::NAME => Box::new(ServiceStartStage),
            ServiceStopStage::NAME => Box::new(ServiceStopStage),
            CollectTimelineStage::NAME => Box::new(CollectTimelineStage),
            ReconfigureSocketTimeoutStage::NAME => {
                Box::new(ReconfigureSocketTimeoutStage::new(descriptor.parse(properties)?))
            }
            StrongCounterTestStage::NAME => Box::new(StrongCounterTestStage::new(descriptor.parse(properties)?)?),
            WeakCounterTestStage::NAME => Box::new(WeakCounterTestStage::new(descriptor.parse(properties)?)?),
            WeakCounterResetStage::NAME => Box::new(WeakCounterResetStage::new(descriptor.parse(properties)?)),
            TimeoutOperationsTestStage::NAME => {
                Box::new(TimeoutOperationsTestStage::new(descriptor.parse(properties)?)?)
            }
            TemporalOperationsTestStage::NAME => {
                Box::new(TemporalOperationsTestStage::new(descriptor.parse(properties)?)?)
            }
            other => return Err(HarnessError::UnknownStage(other.to_string())),
        };
        Ok(stage)
    }
}

/// Ordered list of stages making up a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scenario {
    pub stages: Vec<StageSpec>,
}

impl Scenario {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    /// Parse a JSON list of stage specs
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}
