//! Key translation between the service broker spec and the APB spec
//!
//! Maps CloudFormation-side keys (`DisplayName`, `ServicePlans[].Free`) to
//! APB key paths (`metadata.displayName`, `plans.free`) and back.

use apb_packager_common::{PackagerError, Result, SpecMappings};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::str::FromStr;

/// Which side of the mapping a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Cfn,
    Apb,
}

impl FromStr for KeyType {
    type Err = PackagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cfn" => Ok(KeyType::Cfn),
            "apb" => Ok(KeyType::Apb),
            other => Err(PackagerError::InvalidMappingKeyType(other.to_string())),
        }
    }
}

/// A possibly nested APB key, split on `.`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApbKeyPath {
    segments: Vec<String>,
}

impl ApbKeyPath {
    pub fn parse(key: &str) -> Self {
        Self {
            segments: key.split('.').map(String::from).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment
    pub fn head(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }

    /// Segments after the first
    pub fn tail(&self) -> Option<ApbKeyPath> {
        (self.segments.len() > 1).then(|| ApbKeyPath {
            segments: self.segments[1..].to_vec(),
        })
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Insert `value` at this path, creating intermediate mappings and
    /// merging into ones that already exist
    pub fn insert_into(&self, target: &mut Mapping, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };

        let mut current = target;
        for segment in parents {
            let slot = current
                .entry(Value::from(segment.as_str()))
                .or_insert(Value::Null);
            if !slot.is_mapping() {
                tracing::debug!(path = %self, segment = %segment, "replacing non-mapping value on key path");
                *slot = Value::Mapping(Mapping::new());
            }
            current = match slot {
                Value::Mapping(m) => m,
                _ => return,
            };
        }
        current.insert(Value::from(last.as_str()), value);
    }

    /// Value stored at this path, if any
    pub fn lookup_in<'a>(&self, source: &'a Mapping) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = source.get(first.as_str())?;
        for segment in rest {
            current = current.as_mapping()?.get(segment.as_str())?;
        }
        Some(current)
    }
}

impl fmt::Display for ApbKeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Bidirectional lookup over a [`SpecMappings`] table
#[derive(Debug, Clone, Copy)]
pub struct KeyMapper<'a> {
    mappings: &'a SpecMappings,
}

impl<'a> KeyMapper<'a> {
    pub fn new(mappings: &'a SpecMappings) -> Self {
        Self { mappings }
    }

    /// APB path for a spec key; `None` when unknown or mapped to `None`
    ///
    /// # Examples
    /// ```
    /// use apb_packager_common::SpecMappings;
    /// use apb_packager_parser::KeyMapper;
    ///
    /// let table = SpecMappings::from_yaml("DisplayName: metadata.displayName\n").unwrap();
    /// let path = KeyMapper::new(&table).map_to_apb("DisplayName").unwrap();
    /// assert_eq!(path.segments(), ["metadata", "displayName"]);
    /// ```
    pub fn map_to_apb(&self, cfn_key: &str) -> Option<ApbKeyPath> {
        self.mappings.apb_key(cfn_key).map(ApbKeyPath::parse)
    }

    /// Spec key for an APB key. The first entry in table order wins.
    pub fn map_to_cfn(&self, apb_key: &str) -> Option<&'a str> {
        let mut candidates = self.mappings.cfn_keys(apb_key);
        let first = candidates.next()?;
        if let Some(second) = candidates.next() {
            tracing::warn!(
                apb_key,
                chosen = first,
                also = second,
                "APB key is mapped from more than one spec key, using the first"
            );
        }
        Some(first)
    }

    /// APB path for a plan-level field (`ServicePlans[].<field>`)
    pub fn map_plan_field(&self, field: &str) -> Option<ApbKeyPath> {
        self.map_to_apb(&format!("ServicePlans[].{field}"))
    }

    /// Lookup by key-type tag, `"cfn"` or `"apb"`
    ///
    /// Any other tag fails with [`PackagerError::InvalidMappingKeyType`];
    /// an empty key maps to nothing.
    pub fn lookup(&self, key: &str, key_type: &str) -> Result<Option<String>> {
        let key_type: KeyType = key_type.parse()?;
        if key.is_empty() {
            return Ok(None);
        }
        Ok(match key_type {
            KeyType::Cfn => self.map_to_apb(key).map(|p| p.to_string()),
            KeyType::Apb => self.map_to_cfn(key).map(String::from),
        })
    }
}
