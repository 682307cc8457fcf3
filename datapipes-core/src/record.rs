//! Records: the unit of data flowing through a pipeline
//!
//! A record is a key plus an ordered set of named byte payloads. Records
//! read from a tar shard group all members that share a key, so a record
//! with key `train/0001` might hold the fields `jpg` and `cls`.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Name of the distinguished key field
pub const KEY_FIELD: &str = "__key__";

/// A keyed bundle of named byte payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier shared by all fields of the sample
    key: String,

    /// Fields in insertion order; names are unique
    fields: Vec<(String, Bytes)>,
}

impl Record {
    /// Create a record with no fields
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style variant of [`Record::insert`]
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, keeping its position if it already exists
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// The record key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Look up a field payload by name
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Whether the record has a field with this name
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(name, payload)` pairs in order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Field names in order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Number of fields, not counting the key
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total payload size in bytes
    pub fn payload_bytes(&self) -> usize {
        self.fields.iter().map(|(_, value)| value.len()).sum()
    }

    /// Decompose into key and fields
    pub fn into_parts(self) -> (String, Vec<(String, Bytes)>) {
        (self.key, self.fields)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for (name, value) in &self.fields {
            write!(f, " {}:{}", name, value.len())?;
        }
        Ok(())
    }
}
