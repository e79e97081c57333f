//! Resource vectors.
//!
//! A [`Resources`] value maps resource names to integer quantities: `cpu`
//! in millicores, `memory` in bytes, `pods` and extended resources such as
//! `nvidia.com/gpu` by count. The map is ordered so that iteration (and
//! therefore everything derived from it, including scheduling output) is
//! deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// CPU, measured in millicores.
pub const CPU: &str = "cpu";
/// Memory, measured in bytes.
pub const MEMORY: &str = "memory";
/// Pod slots on a node.
pub const PODS: &str = "pods";
/// NVIDIA GPUs, by count.
pub const NVIDIA_GPU: &str = "nvidia.com/gpu";

/// An ordered resource-name → quantity vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources(BTreeMap<String, i64>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Zero quantities are stored; negative
    /// quantities are clamped to zero.
    pub fn with(mut self, name: &str, quantity: i64) -> Self {
        self.0.insert(name.to_string(), quantity.max(0));
        self
    }

    pub fn cpu_millis(self, millis: i64) -> Self {
        self.with(CPU, millis)
    }

    pub fn memory_bytes(self, bytes: i64) -> Self {
        self.with(MEMORY, bytes)
    }

    pub fn pods(self, count: i64) -> Self {
        self.with(PODS, count)
    }

    pub fn gpus(self, count: i64) -> Self {
        self.with(NVIDIA_GPU, count)
    }

    /// Quantity for a resource name; absent resources are zero.
    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|q| *q == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Component-wise addition.
    pub fn add(&mut self, other: &Resources) {
        for (name, quantity) in &other.0 {
            *self.0.entry(name.clone()).or_insert(0) += quantity;
        }
    }

    /// Component-wise sum of two vectors.
    pub fn plus(&self, other: &Resources) -> Resources {
        let mut out = self.clone();
        out.add(other);
        out
    }

    /// Component-wise saturating subtraction.
    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        let mut out = self.clone();
        for (name, quantity) in &other.0 {
            let entry = out.0.entry(name.clone()).or_insert(0);
            *entry = (*entry - quantity).max(0);
        }
        out
    }

    /// True when every requested quantity fits within `available`.
    pub fn fits(&self, available: &Resources) -> bool {
        self.0
            .iter()
            .all(|(name, quantity)| *quantity <= available.get(name))
    }

    /// The first resource whose quantity exceeds `limit`, with the
    /// requested and limiting quantities.
    pub fn exceeding(&self, limit: &Resources) -> Option<(String, i64, i64)> {
        for (name, limit_quantity) in &limit.0 {
            let used = self.get(name);
            if used > *limit_quantity {
                return Some((name.clone(), used, *limit_quantity));
            }
        }
        None
    }

    /// Sum of resource requests across an iterator of vectors.
    pub fn sum<'a>(vectors: impl IntoIterator<Item = &'a Resources>) -> Resources {
        let mut out = Resources::new();
        for v in vectors {
            out.add(v);
        }
        out
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, quantity) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{name}={quantity}")?;
            first = false;
        }
        Ok(())
    }
}

/// Parse a CPU quantity string into millicores: `"2"` → 2000, `"500m"` → 500.
pub fn parse_cpu_millis(s: &str) -> CoreResult<i64> {
    let s = s.trim();
    if let Some(millis) = s.strip_suffix('m') {
        millis
            .parse::<i64>()
            .map_err(|_| CoreError::InvalidQuantity(s.to_string()))
    } else {
        s.parse::<i64>()
            .map(|cores| cores * 1000)
            .map_err(|_| CoreError::InvalidQuantity(s.to_string()))
    }
}

/// Parse a memory quantity string into bytes: `"512Mi"`, `"4Gi"`, `"1024"`.
pub fn parse_memory_bytes(s: &str) -> CoreResult<i64> {
    let s = s.trim();
    let (digits, multiplier) = if let Some(d) = s.strip_suffix("Ki") {
        (d, 1 << 10)
    } else if let Some(d) = s.strip_suffix("Mi") {
        (d, 1 << 20)
    } else if let Some(d) = s.strip_suffix("Gi") {
        (d, 1 << 30)
    } else if let Some(d) = s.strip_suffix("Ti") {
        (d, 1u64 << 40)
    } else {
        (s, 1)
    };
    digits
        .parse::<i64>()
        .map(|n| n * multiplier as i64)
        .map_err(|_| CoreError::InvalidQuantity(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_resource_is_zero() {
        let r = Resources::new().cpu_millis(500);
        assert_eq!(r.get(CPU), 500);
        assert_eq!(r.get(MEMORY), 0);
    }

    #[test]
    fn add_and_sum() {
        let a = Resources::new().cpu_millis(500).memory_bytes(1024);
        let b = Resources::new().cpu_millis(250).gpus(1);
        let total = Resources::sum([&a, &b]);
        assert_eq!(total.get(CPU), 750);
        assert_eq!(total.get(MEMORY), 1024);
        assert_eq!(total.get(NVIDIA_GPU), 1);
    }

    #[test]
    fn fits_checks_every_dimension() {
        let need = Resources::new().cpu_millis(2000).memory_bytes(4 << 30);
        let node = Resources::new().cpu_millis(4000).memory_bytes(8 << 30);
        assert!(need.fits(&node));

        let too_small = Resources::new().cpu_millis(4000).memory_bytes(2 << 30);
        assert!(!need.fits(&too_small));
    }

    #[test]
    fn fits_requires_extended_resources() {
        let need = Resources::new().cpu_millis(100).gpus(1);
        let node = Resources::new().cpu_millis(4000).memory_bytes(8 << 30);
        assert!(!need.fits(&node));
        assert!(need.fits(&node.clone().gpus(1)));
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        let a = Resources::new().cpu_millis(500);
        let b = Resources::new().cpu_millis(800).memory_bytes(10);
        let out = a.saturating_sub(&b);
        assert_eq!(out.get(CPU), 0);
        assert_eq!(out.get(MEMORY), 0);
    }

    #[test]
    fn exceeding_reports_first_offender() {
        let limit = Resources::new().cpu_millis(10_000);
        let usage = Resources::new().cpu_millis(12_000);
        assert_eq!(
            usage.exceeding(&limit),
            Some((CPU.to_string(), 12_000, 10_000))
        );
        assert_eq!(Resources::new().cpu_millis(8_000).exceeding(&limit), None);
    }

    #[test]
    fn cpu_quantities() {
        assert_eq!(parse_cpu_millis("2").unwrap(), 2000);
        assert_eq!(parse_cpu_millis("500m").unwrap(), 500);
        assert!(parse_cpu_millis("lots").is_err());
    }

    #[test]
    fn memory_quantities() {
        assert_eq!(parse_memory_bytes("4Gi").unwrap(), 4 << 30);
        assert_eq!(parse_memory_bytes("512Mi").unwrap(), 512 << 20);
        assert_eq!(parse_memory_bytes("1024").unwrap(), 1024);
        assert!(parse_memory_bytes("4GB").is_err());
    }

    #[test]
    fn display_is_ordered() {
        let r = Resources::new().memory_bytes(1).cpu_millis(2);
        assert_eq!(r.to_string(), "cpu=2,memory=1");
    }
}
