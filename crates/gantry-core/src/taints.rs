//! Taints and tolerations.
//!
//! A node advertises taints; a pod may only land on the node when its
//! tolerations admit every hard taint (`NoSchedule`/`NoExecute`).
//! `PreferNoSchedule` never blocks admission.

use serde::{Deserialize, Serialize};

/// Effect a taint has on pods that do not tolerate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A node taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn new(key: &str, value: Option<&str>, effect: TaintEffect) -> Self {
        Self {
            key: key.to_string(),
            value: value.map(|v| v.to_string()),
            effect,
        }
    }

    fn is_hard(&self) -> bool {
        matches!(self.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute)
    }
}

/// How a toleration matches a taint's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TolerationOperator {
    /// Key and value must match.
    Equal,
    /// Key must match; any value is tolerated.
    Exists,
}

/// A pod toleration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    /// An empty key with `Exists` tolerates every taint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub operator: TolerationOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// A missing effect tolerates all effects for the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn equal(key: &str, value: &str, effect: TaintEffect) -> Self {
        Self {
            key: Some(key.to_string()),
            operator: TolerationOperator::Equal,
            value: Some(value.to_string()),
            effect: Some(effect),
        }
    }

    pub fn exists(key: &str, effect: Option<TaintEffect>) -> Self {
        Self {
            key: Some(key.to_string()),
            operator: TolerationOperator::Exists,
            value: None,
            effect,
        }
    }

    /// Tolerates everything.
    pub fn wildcard() -> Self {
        Self {
            key: None,
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        }
    }

    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match &self.key {
            None => self.operator == TolerationOperator::Exists,
            Some(key) if *key != taint.key => false,
            Some(_) => match self.operator {
                TolerationOperator::Exists => true,
                TolerationOperator::Equal => self.value == taint.value,
            },
        }
    }
}

/// First hard taint not admitted by the tolerations, considering the
/// extra tolerations as well (used for the implicit not-ready set at
/// bind time).
pub fn untolerated<'a>(
    taints: &'a [Taint],
    tolerations: &[Toleration],
    extra: &[Toleration],
) -> Option<&'a Taint> {
    taints.iter().find(|taint| {
        taint.is_hard()
            && !tolerations
                .iter()
                .chain(extra.iter())
                .any(|t| t.tolerates(taint))
    })
}
