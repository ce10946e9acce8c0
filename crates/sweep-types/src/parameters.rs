//! Parameter space definitions, concrete combinations, and cache keys.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::errors::{SweepError, SweepResult};

/// Tolerance used when counting grid points, so `0.1`-style steps that land
/// a hair above `max` through float error still include the endpoint.
const STEP_EPSILON: f64 = 1e-9;

/// Grid values are rounded to this many decimal places to drop float noise
/// from repeated `min + i * step` arithmetic.
const VALUE_DECIMALS: i32 = 10;

/// A single parameter dimension: the inclusive arithmetic sequence
/// `min, min + step, ..., <= max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    /// Human-readable parameter name (e.g. "fast_period").
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterSpace {
    pub fn new(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            step,
        }
    }

    /// A degenerate space holding exactly one value.
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, value, 1.0)
    }

    /// Reject non-finite bounds, `step <= 0`, and `min > max`.
    pub fn validate(&self) -> SweepResult<()> {
        let invalid = |message: &str| SweepError::InvalidSpace {
            name: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !(self.min.is_finite() && self.max.is_finite() && self.step.is_finite()) {
            return Err(invalid("bounds and step must be finite"));
        }
        if self.step <= 0.0 {
            return Err(invalid(&format!("step must be positive, got {}", self.step)));
        }
        if self.min > self.max {
            return Err(invalid(&format!(
                "min {} is greater than max {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Number of grid points along this dimension. Assumes a valid space.
    pub fn value_count(&self) -> usize {
        ((self.max - self.min) / self.step + STEP_EPSILON).floor() as usize + 1
    }

    /// The `index`-th grid value, without bounds checking.
    pub fn value_at(&self, index: usize) -> f64 {
        round_value(self.min + index as f64 * self.step)
    }

    /// All grid values in ascending order.
    pub fn values(&self) -> Vec<f64> {
        (0..self.value_count()).map(|i| self.value_at(i)).collect()
    }
}

fn round_value(value: f64) -> f64 {
    let scale = 10f64.powi(VALUE_DECIMALS);
    let rounded = (value * scale).round() / scale;
    // Fold -0.0 into 0.0 so keys and comparisons agree.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

// ---------------------------------------------------------------------------
// Combinations
// ---------------------------------------------------------------------------

/// One concrete assignment of a value to every parameter in the grid, in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterCombination {
    entries: Vec<(String, f64)>,
}

impl ParameterCombination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert. Replaces the value if `name` is already present.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Canonical, order-independent key for this combination.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_combination(self)
    }
}

impl FromIterator<(String, f64)> for ParameterCombination {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut combo = Self::new();
        for (name, value) in iter {
            combo.insert(name, value);
        }
        combo
    }
}

impl fmt::Display for ParameterCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

// Serialized as a JSON object whose keys keep declaration order.
impl Serialize for ParameterCombination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterCombination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CombinationVisitor;

        impl<'de> Visitor<'de> for CombinationVisitor {
            type Value = ParameterCombination;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter name to number")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut combo = ParameterCombination::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, f64>()? {
                    combo.insert(name, value);
                }
                Ok(combo)
            }
        }

        deserializer.deserialize_map(CombinationVisitor)
    }
}

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// Canonical signature of a combination: entries sorted by name and joined as
/// `name=value` pairs. Identical name/value sets map to the same key no matter
/// how the combination was built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_combination(combo: &ParameterCombination) -> Self {
        let mut pairs: Vec<(&str, f64)> = combo.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let joined = pairs
            .iter()
            .map(|(name, value)| format!("{name}={}", round_value(*value)))
            .collect::<Vec<_>>()
            .join(",");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_expands_inclusive_sequence() {
        let space = ParameterSpace::new("fast", 5.0, 15.0, 5.0);
        assert_eq!(space.values(), vec![5.0, 10.0, 15.0]);

        // max not on the step lattice is excluded
        let space = ParameterSpace::new("slow", 20.0, 35.0, 10.0);
        assert_eq!(space.values(), vec![20.0, 30.0]);
    }

    #[test]
    fn fractional_steps_keep_endpoint() {
        let space = ParameterSpace::new("stop", 0.1, 0.5, 0.1);
        assert_eq!(space.value_count(), 5);
        assert_eq!(space.values(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn fixed_space_has_one_value() {
        let space = ParameterSpace::fixed("lookback", 14.0);
        assert!(space.validate().is_ok());
        assert_eq!(space.values(), vec![14.0]);
    }

    #[test]
    fn invalid_spaces_are_rejected() {
        let zero_step = ParameterSpace::new("a", 1.0, 2.0, 0.0);
        assert!(matches!(zero_step.validate(), Err(SweepError::InvalidSpace { .. })));

        let negative_step = ParameterSpace::new("a", 1.0, 2.0, -1.0);
        assert!(negative_step.validate().is_err());

        let inverted = ParameterSpace::new("a", 3.0, 2.0, 1.0);
        assert!(inverted.validate().is_err());

        let nan = ParameterSpace::new("a", f64::NAN, 2.0, 1.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn cache_key_is_order_independent() {
        let ab = ParameterCombination::new().with("a", 1.0).with("b", 2.0);
        let ba = ParameterCombination::new().with("b", 2.0).with("a", 1.0);
        assert_eq!(ab.cache_key(), ba.cache_key());
        assert_eq!(ab.cache_key().as_str(), "a=1,b=2");

        let other = ParameterCombination::new().with("a", 1.0).with("b", 3.0);
        assert_ne!(ab.cache_key(), other.cache_key());
    }

    #[test]
    fn cache_key_folds_negative_zero() {
        let neg = ParameterCombination::new().with("x", -0.0);
        let pos = ParameterCombination::new().with("x", 0.0);
        assert_eq!(neg.cache_key(), pos.cache_key());
    }

    #[test]
    fn combination_insert_replaces_existing() {
        let mut combo = ParameterCombination::new().with("a", 1.0);
        combo.insert("a", 4.0);
        assert_eq!(combo.len(), 1);
        assert_eq!(combo.get("a"), Some(4.0));
        assert_eq!(combo.get("missing"), None);
    }

    #[test]
    fn combination_serializes_as_ordered_map() {
        let combo = ParameterCombination::new().with("slow", 30.0).with("fast", 5.0);
        let json = serde_json::to_string(&combo).unwrap();
        assert_eq!(json, r#"{"slow":30.0,"fast":5.0}"#);

        let back: ParameterCombination = serde_json::from_str(&json).unwrap();
        assert_eq!(back, combo);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["slow", "fast"]);
    }

    #[test]
    fn combination_display() {
        let combo = ParameterCombination::new().with("fast", 5.0).with("slow", 20.5);
        assert_eq!(combo.to_string(), "{fast=5, slow=20.5}");
    }
}
