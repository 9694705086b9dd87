//! Network devices and dynamic device pools.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::types::{DeviceId, PoolId};

/// Errors raised while evaluating pool filters.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A regex criterion failed to compile.
    #[error("pool '{pool}': invalid regex for '{property}': {reason}")]
    InvalidRegex {
        pool: PoolId,
        property: String,
        reason: String,
    },
}

/// A network device that services run against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub location: String,
    /// Free-form properties, matchable by pool criteria.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.into(),
            ip_address: String::new(),
            vendor: String::new(),
            operating_system: String::new(),
            model: String::new(),
            location: String::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = ip_address.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "vendor" => self.vendor = value,
            "operating_system" => self.operating_system = value,
            "model" => self.model = value,
            "location" => self.location = value,
            _ => {
                self.properties.insert(key, value);
            }
        }
        self
    }

    /// Look up a named attribute, falling back to free-form properties.
    pub fn property(&self, name: &str) -> Option<&str> {
        match name {
            "id" => Some(self.id.as_str()),
            "name" => Some(&self.name),
            "ip_address" => Some(&self.ip_address),
            "vendor" => Some(&self.vendor),
            "operating_system" => Some(&self.operating_system),
            "model" => Some(&self.model),
            "location" => Some(&self.location),
            other => self.properties.get(other).map(String::as_str),
        }
    }
}

/// How a criterion value is compared to a device property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    #[default]
    Equality,
    Inclusion,
    Regex,
}

/// How criteria are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

/// One property test of a pool filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub property: String,
    pub value: String,
    #[serde(default)]
    pub kind: MatchKind,
}

/// A named, dynamically computed device group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    /// Snapshot of the last computed membership. Never used for resolution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cached_members: Vec<DeviceId>,
}

impl Pool {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PoolId::new(id),
            name: name.into(),
            mode: MatchMode::All,
            criteria: Vec::new(),
            cached_members: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_criterion(
        mut self,
        property: impl Into<String>,
        value: impl Into<String>,
        kind: MatchKind,
    ) -> Self {
        self.criteria.push(Criterion {
            property: property.into(),
            value: value.into(),
            kind,
        });
        self
    }

    /// Check that every regex criterion compiles.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.compiled().map(|_| ())
    }

    fn compiled(&self) -> Result<Vec<(&Criterion, Option<Regex>)>, PoolError> {
        self.criteria
            .iter()
            .map(|criterion| {
                let regex = match criterion.kind {
                    MatchKind::Regex => Some(Regex::new(&criterion.value).map_err(|e| {
                        PoolError::InvalidRegex {
                            pool: self.id.clone(),
                            property: criterion.property.clone(),
                            reason: e.to_string(),
                        }
                    })?),
                    _ => None,
                };
                Ok((criterion, regex))
            })
            .collect()
    }

    /// Compute the current membership of this pool over `devices`.
    ///
    /// A pool with no criteria matches nothing.
    pub fn compute_pool<'a, I>(&self, devices: I) -> Result<Vec<DeviceId>, PoolError>
    where
        I: IntoIterator<Item = &'a Device>,
    {
        let compiled = self.compiled()?;
        if compiled.is_empty() {
            return Ok(Vec::new());
        }

        let matches = |device: &Device| {
            let mut results = compiled.iter().map(|(criterion, regex)| {
                let Some(actual) = device.property(&criterion.property) else {
                    return false;
                };
                match (criterion.kind, regex) {
                    (MatchKind::Equality, _) => actual == criterion.value,
                    (MatchKind::Inclusion, _) => actual.contains(&criterion.value),
                    (MatchKind::Regex, Some(regex)) => regex.is_match(actual),
                    (MatchKind::Regex, None) => false,
                }
            });
            match self.mode {
                MatchMode::All => results.all(|m| m),
                MatchMode::Any => results.any(|m| m),
            }
        };

        Ok(devices
            .into_iter()
            .filter(|device| matches(device))
            .map(|device| device.id.clone())
            .collect())
    }
}
