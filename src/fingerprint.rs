//! # Change Detector
//!
//! A fingerprint is a SHA-256 digest over the canonical JSON of the parent spec
//! subtree (plus any ancillary generator inputs) that determines one child's
//! payload. It is stored on the child as the [`FINGERPRINT_ANNOTATION`] and compared
//! on the next pass to skip convergence when nothing relevant changed.
//!
//! Canonical JSON sorts object keys recursively, so the digest does not depend on
//! map ordering in the serializer.

use crate::constants::FINGERPRINT_ANNOTATION;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Digest of the inputs of one child payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a serializable spec subtree
    pub fn of<T: Serialize + ?Sized>(subtree: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(subtree)?;
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical)?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(Self(format!("{digest:x}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fingerprint recorded on a child, if any
    pub fn recorded_on<K: Resource>(child: &K) -> Option<&str> {
        child
            .meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(FINGERPRINT_ANNOTATION))
            .map(String::as_str)
    }

    /// Whether the child carries this fingerprint
    pub fn matches<K: Resource>(&self, child: &K) -> bool {
        Self::recorded_on(child) == Some(self.as_str())
    }

    /// Record this fingerprint on the child
    pub fn annotate<K: Resource>(&self, child: &mut K) {
        child
            .meta_mut()
            .annotations
            .get_or_insert_with(Default::default)
            .insert(FINGERPRINT_ANNOTATION.to_string(), self.0.clone());
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `existing` was generated from `subtree`
pub fn fingerprint_matches<K: Resource, T: Serialize + ?Sized>(
    existing: &K,
    subtree: &T,
) -> Result<bool, serde_json::Error> {
    Ok(Fingerprint::of(subtree)?.matches(existing))
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}
