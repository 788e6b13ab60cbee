//! `${name}` parameter substitution for configuration strings.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

static PARAMETER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(.*?)\}").expect("parameter pattern is valid"));

/// Immutable list of named parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterList {
    pairs: BTreeMap<String, String>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parameters taken from the current process environment.
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    pub fn pairs(&self) -> &BTreeMap<String, String> {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Replaces every `${name}` in `string` with the corresponding value.
    ///
    /// Inserted values are never scanned again. An unknown name fails in
    /// strict mode; otherwise the `$` is dropped and the rest of the token is
    /// kept as literal text, so `"${missing}"` becomes `"{missing}"`.
    pub fn replace(&self, string: &str, strict: bool) -> Result<String> {
        let mut buf = String::with_capacity(string.len());
        let mut start = 0;
        while let Some(caps) = PARAMETER.captures_at(string, start) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let name = name.as_str();
            buf.push_str(&string[start..whole.start()]);
            match self.pairs.get(name) {
                Some(value) => {
                    buf.push_str(value.as_str());
                    start = whole.end();
                }
                None if strict => {
                    return Err(GateError::MissingParameter(name.to_string()));
                }
                None => {
                    // resume right after the '$'
                    start = whole.start() + 1;
                }
            }
        }
        buf.push_str(&string[start..]);
        Ok(buf)
    }
}

/// Collects the parameter names referenced by `string`.
pub fn referenced_names(string: &str) -> BTreeSet<String> {
    PARAMETER
        .captures_iter(string)
        .map(|caps| caps[1].to_string())
        .collect()
}
