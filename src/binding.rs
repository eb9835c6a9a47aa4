/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::value::Value;

/// Declared parameter of the wrapped function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: &str) -> Self {
        Param {
            name: name.to_owned(),
            default: None,
        }
    }

    pub fn with_default(name: &str, default: impl Into<Value>) -> Self {
        Param {
            name: name.to_owned(),
            default: Some(default.into()),
        }
    }
}

/// Declared signature of the wrapped function, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn create(params: Vec<Param>) -> Result<Self> {
        for (i, param) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == param.name) {
                return Err(CacheError::BadCall(format!(
                    "duplicate parameter name '{}' in signature",
                    param.name
                )));
            }
        }
        Ok(Signature { params })
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Binds a call against the declared parameters.
    ///
    /// Positional values fill parameters in declaration order, keyword values
    /// fill by name, defaults fill the rest. Anything else is a `BadCall`:
    /// too many positional values, an unknown or repeated keyword, or a
    /// required parameter left unfilled.
    pub fn bind(&self, call: &Call) -> Result<NamedArgs> {
        if call.positional.len() > self.params.len() {
            return Err(CacheError::BadCall(format!(
                "too many positional arguments: got {}, signature takes {}",
                call.positional.len(),
                self.params.len()
            )));
        }

        let mut bound: BTreeMap<String, Value> = BTreeMap::new();
        for (param, value) in self.params.iter().zip(call.positional.iter()) {
            bound.insert(param.name.clone(), value.clone());
        }

        for (name, value) in &call.keyword {
            if !self.params.iter().any(|p| &p.name == name) {
                return Err(CacheError::BadCall(format!(
                    "unknown keyword argument '{}'",
                    name
                )));
            }
            if bound.insert(name.clone(), value.clone()).is_some() {
                return Err(CacheError::BadCall(format!(
                    "argument '{}' given more than once",
                    name
                )));
            }
        }

        for param in &self.params {
            if bound.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    bound.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(CacheError::BadCall(format!(
                        "missing required argument '{}'",
                        param.name
                    )))
                }
            }
        }

        Ok(NamedArgs { args: bound })
    }
}

/// One invocation of the wrapped function: positional values followed by
/// keyword values, before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl Call {
    pub fn new() -> Self {
        Call::default()
    }

    pub fn pos(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kw(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keyword.push((name.to_owned(), value.into()));
        self
    }
}

/// Fully bound arguments: parameter name to value, defaults materialized.
/// The map is name-sorted, so serializing it yields canonical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArgs {
    args: BTreeMap<String, Value>,
}

impl NamedArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.args.iter()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature::create(vec![
            Param::required("x"),
            Param::with_default("a", 1),
            Param::with_default("b", 2),
        ])
        .unwrap()
    }

    #[test]
    fn test_bind_applies_defaults() {
        let named = sig().bind(&Call::new().pos(4)).unwrap();
        assert_eq!(Some(&Value::Int(4)), named.get("x"));
        assert_eq!(Some(&Value::Int(1)), named.get("a"));
        assert_eq!(Some(&Value::Int(2)), named.get("b"));
    }

    #[test]
    fn test_bind_keyword_overrides_default() {
        let named = sig().bind(&Call::new().pos(4).kw("b", 7)).unwrap();
        assert_eq!(Some(&Value::Int(7)), named.get("b"));
    }

    #[test]
    fn test_positional_and_keyword_bind_the_same() {
        let fst = sig().bind(&Call::new().pos(4).pos(5)).unwrap();
        let snd = sig().bind(&Call::new().kw("a", 5).kw("x", 4)).unwrap();
        assert_eq!(fst, snd);
    }

    #[test]
    fn test_missing_required_is_bad_call() {
        assert!(matches!(
            sig().bind(&Call::new().kw("a", 5)),
            Err(CacheError::BadCall(_))
        ));
    }

    #[test]
    fn test_unknown_keyword_is_bad_call() {
        assert!(matches!(
            sig().bind(&Call::new().pos(4).kw("nope", 0)),
            Err(CacheError::BadCall(_))
        ));
    }

    #[test]
    fn test_duplicate_assignment_is_bad_call() {
        assert!(matches!(
            sig().bind(&Call::new().pos(4).kw("x", 4)),
            Err(CacheError::BadCall(_))
        ));
        assert!(matches!(
            sig().bind(&Call::new().pos(4).kw("a", 1).kw("a", 1)),
            Err(CacheError::BadCall(_))
        ));
    }

    #[test]
    fn test_too_many_positional_is_bad_call() {
        assert!(matches!(
            sig().bind(&Call::new().pos(1).pos(2).pos(3).pos(4)),
            Err(CacheError::BadCall(_))
        ));
    }

    #[test]
    fn test_duplicate_signature_param_rejected() {
        assert!(matches!(
            Signature::create(vec![Param::required("x"), Param::required("x")]),
            Err(CacheError::BadCall(_))
        ));
    }
}
