//! Label-selector constraint algebra.
//!
//! A [`Requirements`] value is a conjunction of per-key constraints built
//! from [`Requirement`] triples (key, operator, values). Adding
//! requirements only ever narrows the allowed values for a key; the
//! intersection of two sets is either another set or a conflict on a
//! specific key.
//!
//! Well-known keys (architecture, OS, zone, instance type, capacity type,
//! provisioner name) have first-class constants and accessors; arbitrary
//! keys work through the same generic machinery.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Well-known node label keys.
pub mod keys {
    /// CPU architecture, e.g. `amd64` / `arm64`.
    pub const ARCH: &str = "kubernetes.io/arch";
    /// Operating system, e.g. `linux`.
    pub const OS: &str = "kubernetes.io/os";
    /// Topology zone, e.g. `us-east-1a`.
    pub const ZONE: &str = "topology.kubernetes.io/zone";
    /// Concrete instance type name, e.g. `m5.large`.
    pub const INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
    /// Capacity type, e.g. `on-demand` / `spot`.
    pub const CAPACITY_TYPE: &str = "gantry.dev/capacity-type";
    /// The provisioner that owns a node.
    pub const PROVISIONER_NAME: &str = "gantry.dev/provisioner-name";

    pub const WELL_KNOWN: [&str; 6] = [
        ARCH,
        OS,
        ZONE,
        INSTANCE_TYPE,
        CAPACITY_TYPE,
        PROVISIONER_NAME,
    ];
}

/// Selector operator of a single requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

/// A single (key, operator, values) constraint.
///
/// `Gt`/`Lt` carry exactly one value holding the decimal bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Requirement {
    pub fn new(key: &str, operator: Operator, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn within(key: &str, values: &[&str]) -> Self {
        Self::new(key, Operator::In, values)
    }

    pub fn not_in(key: &str, values: &[&str]) -> Self {
        Self::new(key, Operator::NotIn, values)
    }

    pub fn exists(key: &str) -> Self {
        Self::new(key, Operator::Exists, &[])
    }

    pub fn does_not_exist(key: &str) -> Self {
        Self::new(key, Operator::DoesNotExist, &[])
    }

    pub fn greater_than(key: &str, bound: i64) -> Self {
        Self::new(key, Operator::Gt, &[&bound.to_string()])
    }

    pub fn less_than(key: &str, bound: i64) -> Self {
        Self::new(key, Operator::Lt, &[&bound.to_string()])
    }
}

/// The set of values a key may take.
///
/// Either a finite catalog of allowed values, or the complement of an
/// exclusion set (`Complement(∅)` is the symbolic "any").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSet {
    Catalog(BTreeSet<String>),
    Complement(BTreeSet<String>),
}

impl ValueSet {
    pub fn any() -> Self {
        ValueSet::Complement(BTreeSet::new())
    }

    pub fn of(values: &[&str]) -> Self {
        ValueSet::Catalog(values.iter().map(|v| v.to_string()).collect())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ValueSet::Complement(excluded) if excluded.is_empty())
    }

    /// True when no value can satisfy the set.
    pub fn is_empty(&self) -> bool {
        matches!(self, ValueSet::Catalog(allowed) if allowed.is_empty())
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            ValueSet::Catalog(allowed) => allowed.contains(value),
            ValueSet::Complement(excluded) => !excluded.contains(value),
        }
    }

    /// Set intersection. Catalogs stay finite; two complements union
    /// their exclusions.
    pub fn intersect(&self, other: &ValueSet) -> ValueSet {
        match (self, other) {
            (ValueSet::Catalog(a), ValueSet::Catalog(b)) => {
                ValueSet::Catalog(a.intersection(b).cloned().collect())
            }
            (ValueSet::Catalog(a), ValueSet::Complement(b))
            | (ValueSet::Complement(b), ValueSet::Catalog(a)) => {
                ValueSet::Catalog(a.iter().filter(|v| !b.contains(*v)).cloned().collect())
            }
            (ValueSet::Complement(a), ValueSet::Complement(b)) => {
                ValueSet::Complement(a.union(b).cloned().collect())
            }
        }
    }

    /// Smallest catalog value, when the set is finite.
    pub fn first(&self) -> Option<&str> {
        match self {
            ValueSet::Catalog(allowed) => allowed.iter().next().map(|s| s.as_str()),
            ValueSet::Complement(_) => None,
        }
    }

    /// The finite allowed values, when known.
    pub fn catalog(&self) -> Option<&BTreeSet<String>> {
        match self {
            ValueSet::Catalog(allowed) => Some(allowed),
            ValueSet::Complement(_) => None,
        }
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSet::Catalog(allowed) => {
                write!(f, "[")?;
                for (i, v) in allowed.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            ValueSet::Complement(excluded) if excluded.is_empty() => write!(f, "[*]"),
            ValueSet::Complement(excluded) => {
                write!(f, "[* except ")?;
                for (i, v) in excluded.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Accumulated per-key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyConstraint {
    values: ValueSet,
    greater_than: Option<i64>,
    less_than: Option<i64>,
    /// The key must be present on the target (In/Exists/Gt/Lt).
    requires_presence: bool,
    /// The key must be absent from the target (DoesNotExist).
    forbidden: bool,
}

impl KeyConstraint {
    fn from_requirement(r: &Requirement) -> Self {
        let mut c = Self {
            values: ValueSet::any(),
            greater_than: None,
            less_than: None,
            requires_presence: false,
            forbidden: false,
        };
        match r.operator {
            Operator::In => {
                c.values = ValueSet::Catalog(r.values.iter().cloned().collect());
                c.requires_presence = true;
            }
            Operator::NotIn => {
                c.values = ValueSet::Complement(r.values.iter().cloned().collect());
            }
            Operator::Exists => {
                c.requires_presence = true;
            }
            Operator::DoesNotExist => {
                c.forbidden = true;
            }
            Operator::Gt => {
                c.greater_than = r.values.first().and_then(|v| v.parse().ok());
                c.requires_presence = true;
            }
            Operator::Lt => {
                c.less_than = r.values.first().and_then(|v| v.parse().ok());
                c.requires_presence = true;
            }
        }
        c
    }

    /// Narrow this constraint by another. Returns the conflict kind on an
    /// empty result.
    fn narrow(&mut self, other: &KeyConstraint) -> Result<(), ()> {
        self.requires_presence |= other.requires_presence;
        self.forbidden |= other.forbidden;
        if self.requires_presence && self.forbidden {
            return Err(());
        }
        self.greater_than = match (self.greater_than, other.greater_than) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.less_than = match (self.less_than, other.less_than) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.values = self.values.intersect(&other.values);
        self.apply_bounds();
        // A forbidden key is satisfied by absence; the value set only
        // matters when presence is required.
        if !self.forbidden && self.values.is_empty() {
            return Err(());
        }
        if let (Some(gt), Some(lt)) = (self.greater_than, self.less_than) {
            if gt + 1 >= lt {
                return Err(());
            }
        }
        Ok(())
    }

    /// Filter a finite catalog by the numeric bounds. Non-numeric values
    /// cannot satisfy a bound.
    fn apply_bounds(&mut self) {
        if self.greater_than.is_none() && self.less_than.is_none() {
            return;
        }
        if let ValueSet::Catalog(allowed) = &self.values {
            let gt = self.greater_than;
            let lt = self.less_than;
            let filtered = allowed
                .iter()
                .filter(|v| match v.parse::<i64>() {
                    Ok(n) => gt.is_none_or(|b| n > b) && lt.is_none_or(|b| n < b),
                    Err(_) => false,
                })
                .cloned()
                .collect();
            self.values = ValueSet::Catalog(filtered);
        }
    }
}

/// A conjunction of per-key constraints with set-algebraic narrowing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    constraints: BTreeMap<String, KeyConstraint>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build requirements from a set of initial constraints.
    pub fn try_from_iter<'a>(
        requirements: impl IntoIterator<Item = &'a Requirement>,
    ) -> CoreResult<Self> {
        let mut out = Self::new();
        out.add(requirements)?;
        Ok(out)
    }

    /// One `In` requirement per label.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let mut out = Self::new();
        for (key, value) in labels {
            // A single fresh In constraint cannot conflict.
            let _ = out.add(&[Requirement::within(key, &[value])]);
        }
        out
    }

    /// Monotone narrowing: each added requirement intersects any existing
    /// constraint on its key. Fails with the offending key when a key's
    /// allowed set becomes empty.
    pub fn add<'a>(
        &mut self,
        requirements: impl IntoIterator<Item = &'a Requirement>,
    ) -> CoreResult<()> {
        for r in requirements {
            let incoming = KeyConstraint::from_requirement(r);
            match self.constraints.get_mut(&r.key) {
                Some(existing) => existing
                    .narrow(&incoming)
                    .map_err(|_| CoreError::IncompatibleRequirement(r.key.clone()))?,
                None => {
                    self.constraints.insert(r.key.clone(), incoming);
                }
            }
        }
        Ok(())
    }

    /// Whether any constraint exists for `key`.
    pub fn has(&self, key: &str) -> bool {
        self.constraints.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.constraints.keys().map(|k| k.as_str())
    }

    /// The current allowed values for a key. Unconstrained keys are the
    /// symbolic "any"; forbidden keys have no allowed value.
    pub fn values(&self, key: &str) -> ValueSet {
        match self.constraints.get(key) {
            Some(c) if c.forbidden => ValueSet::Catalog(BTreeSet::new()),
            Some(c) => c.values.clone(),
            None => ValueSet::any(),
        }
    }

    /// Whether the target key may take `value`.
    pub fn allows(&self, key: &str, value: &str) -> bool {
        match self.constraints.get(key) {
            Some(c) if c.forbidden => false,
            Some(c) => {
                c.values.contains(value)
                    && match value.parse::<i64>() {
                        Ok(n) => {
                            c.greater_than.is_none_or(|b| n > b)
                                && c.less_than.is_none_or(|b| n < b)
                        }
                        Err(_) => c.greater_than.is_none() && c.less_than.is_none(),
                    }
            }
            None => true,
        }
    }

    /// First conflicting key against `other`, or ok.
    pub fn compatible(&self, other: &Requirements) -> CoreResult<()> {
        for (key, incoming) in &other.constraints {
            if let Some(existing) = self.constraints.get(key) {
                let mut merged = existing.clone();
                merged
                    .narrow(incoming)
                    .map_err(|_| CoreError::IncompatibleRequirement(key.clone()))?;
            }
        }
        Ok(())
    }

    /// The combined requirement set, or the first conflicting key.
    pub fn intersect(&self, other: &Requirements) -> CoreResult<Requirements> {
        let mut out = self.clone();
        for (key, incoming) in &other.constraints {
            match out.constraints.get_mut(key) {
                Some(existing) => existing
                    .narrow(incoming)
                    .map_err(|_| CoreError::IncompatibleRequirement(key.clone()))?,
                None => {
                    out.constraints.insert(key.clone(), incoming.clone());
                }
            }
        }
        Ok(out)
    }

    /// Node labels implied by the requirements: every key pinned to a
    /// single allowed value.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, constraint) in &self.constraints {
            if constraint.forbidden {
                continue;
            }
            if let ValueSet::Catalog(allowed) = &constraint.values {
                if allowed.len() == 1 {
                    if let Some(value) = allowed.iter().next() {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        out
    }

    // ── Well-known key accessors ───────────────────────────────────

    pub fn zones(&self) -> ValueSet {
        self.values(keys::ZONE)
    }

    pub fn instance_types(&self) -> ValueSet {
        self.values(keys::INSTANCE_TYPE)
    }

    pub fn architectures(&self) -> ValueSet {
        self.values(keys::ARCH)
    }

    pub fn capacity_types(&self) -> ValueSet {
        self.values(keys::CAPACITY_TYPE)
    }

    pub fn provisioner_name(&self) -> Option<String> {
        self.values(keys::PROVISIONER_NAME)
            .first()
            .map(|s| s.to_string())
    }
}

impl fmt::Display for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for key in self.constraints.keys() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{key}{}", self.values(key))?;
            first = false;
        }
        Ok(())
    }
}
