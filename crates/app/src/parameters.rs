//! Parameter store — current values of the named parameters.
//!
//! Owned by the engine event loop: values change when a message arrives on a
//! parameter's bound topic or when a `param/<name>` control message defines
//! or sets it.

use std::collections::{BTreeMap, BTreeSet};

use mqttrules_domain::parameter::Parameter;
use mqttrules_domain::rule::EvaluationContext;

use crate::matcher::Matcher;

#[derive(Debug, Clone)]
struct Slot {
    definition: Parameter,
    value: String,
}

impl Slot {
    fn new(definition: Parameter) -> Self {
        Self {
            value: definition.value.clone(),
            definition,
        }
    }
}

/// Definitions and current values of every parameter.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    slots: BTreeMap<String, Slot>,
}

impl ParameterStore {
    #[must_use]
    pub fn new(definitions: BTreeMap<String, Parameter>) -> Self {
        let slots = definitions
            .into_iter()
            .map(|(name, definition)| (name, Slot::new(definition)))
            .collect();
        Self { slots }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.slots.get(name).map(|slot| slot.value.as_str())
    }

    /// Topics parameters are bound to.
    #[must_use]
    pub fn topics(&self) -> BTreeSet<String> {
        self.slots
            .values()
            .filter_map(|slot| slot.definition.topic.clone())
            .collect()
    }

    /// Update every parameter bound to a filter covering `topic`.
    ///
    /// Returns the names of the updated parameters.
    pub fn update_from_message(
        &mut self,
        matcher: &Matcher,
        topic: &str,
        payload: &[u8],
    ) -> Vec<String> {
        let mut updated = Vec::new();
        for (name, slot) in &mut self.slots {
            let Some(filter) = slot.definition.topic.as_deref() else {
                continue;
            };
            if !matcher.covers(filter, topic) {
                continue;
            }
            match slot.definition.extract(payload) {
                Some(value) => {
                    slot.value = value;
                    updated.push(name.clone());
                }
                None => {
                    tracing::debug!(parameter = %name, topic, "payload has no value for parameter");
                }
            }
        }
        updated
    }

    /// Apply a `param/<name>` control message.
    ///
    /// A JSON object payload is a full [`Parameter`] definition replacing the
    /// existing one. Any other payload sets the value and keeps the binding.
    /// Returns `true` when the set of bound topics may have changed.
    pub fn define(&mut self, name: &str, payload: &[u8]) -> bool {
        if let Ok(definition) = parse_definition(payload) {
            let previous_topic = self
                .slots
                .get(name)
                .and_then(|slot| slot.definition.topic.clone());
            let rebound = previous_topic != definition.topic;
            self.slots.insert(name.to_string(), Slot::new(definition));
            return rebound;
        }

        let value = String::from_utf8_lossy(payload).into_owned();
        self.slots
            .entry(name.to_string())
            .and_modify(|slot| slot.value.clone_from(&value))
            .or_insert_with(|| Slot::new(Parameter::constant(value)));
        false
    }

    /// Facts visible to conditions and templates for one fire.
    #[must_use]
    pub fn context<'a>(&'a self, payload: Option<&'a [u8]>) -> FireContext<'a> {
        FireContext {
            parameters: self,
            payload,
        }
    }
}

fn parse_definition(payload: &[u8]) -> Result<Parameter, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(serde::de::Error::custom("not a parameter definition"));
    }
    serde_json::from_value(value)
}

/// [`EvaluationContext`] of a single fire.
#[derive(Debug, Clone, Copy)]
pub struct FireContext<'a> {
    parameters: &'a ParameterStore,
    payload: Option<&'a [u8]>,
}

impl EvaluationContext for FireContext<'_> {
    fn payload(&self) -> Option<&[u8]> {
        self.payload
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)
    }
}
