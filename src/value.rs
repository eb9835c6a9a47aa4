/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Canonical argument value.
///
/// The variant set is closed on purpose: every variant has exactly one binary
/// encoding, so equal values always produce equal fingerprints. Values that
/// encode differently hash differently even when a host language would compare
/// them equal: `Int(1)` and `Float(1.0)` are distinct cache keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Keys are kept sorted, so the encoding does not depend on insertion order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Rejects values that break key equality. NaN is the only such value:
    /// NaN != NaN, so a call carrying it could never be found again.
    pub fn ensure_hashable(&self) -> Result<()> {
        match self {
            Value::Float(f) if f.is_nan() => {
                Err(CacheError::Unhashable("NaN float argument".to_owned()))
            }
            Value::List(items) => {
                for item in items {
                    item.ensure_hashable()?;
                }
                Ok(())
            }
            Value::Map(map) => {
                for item in map.values() {
                    item.ensure_hashable()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}
