//! Metric key aliases.
//!
//! An alias is configured as `name:target`. A plain alias replaces a key that
//! matches it exactly. An alias of the form `name[*]` matches any key with the
//! same name and passes the parameters through to the target.

use crate::itemkey::parse_key;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AliasError {
    #[error("cannot find separator \":\" in alias \"{0}\"")]
    MissingSeparator(String),
    #[error("cannot add alias \"{0}\": {1}")]
    InvalidKey(String, String),
    #[error("cannot add alias \"{0}\": target must not have parameters when the alias is \"[*]\"")]
    WildcardTarget(String),
    #[error("failed to add alias \"{0}\": duplicate name")]
    Duplicate(String),
}

/// Resolves configured aliases into their target keys.
#[derive(Debug, Clone, Default)]
pub struct AliasManager {
    exact: HashMap<String, String>,
    wildcard: HashMap<String, String>,
}

impl AliasManager {
    /// Builds the alias table from `name:target` definitions.
    pub fn new<S: AsRef<str>>(definitions: &[S]) -> Result<Self, AliasError> {
        let mut manager = Self::default();
        for definition in definitions {
            manager.add(definition.as_ref())?;
        }
        Ok(manager)
    }

    fn add(&mut self, definition: &str) -> Result<(), AliasError> {
        // the alias itself may contain quoted ':' inside parameters, so split
        // on the first separator that follows the key
        let split = find_separator(definition)
            .ok_or_else(|| AliasError::MissingSeparator(definition.to_string()))?;
        let (name, target) = (definition[..split].trim(), definition[split + 1..].trim());

        let (target_name, target_params) = parse_key(target)
            .map_err(|e| AliasError::InvalidKey(definition.to_string(), e.to_string()))?;

        if let Some(base) = name.strip_suffix("[*]") {
            parse_key(base)
                .map_err(|e| AliasError::InvalidKey(definition.to_string(), e.to_string()))?;
            if !target_params.is_empty() {
                return Err(AliasError::WildcardTarget(definition.to_string()));
            }
            if self.wildcard.insert(base.to_string(), target_name).is_some() {
                return Err(AliasError::Duplicate(name.to_string()));
            }
        } else {
            parse_key(name)
                .map_err(|e| AliasError::InvalidKey(definition.to_string(), e.to_string()))?;
            if self.exact.insert(name.to_string(), target.to_string()).is_some() {
                return Err(AliasError::Duplicate(name.to_string()));
            }
        }
        Ok(())
    }

    /// Returns the aliased key, or the original key when no alias applies.
    pub fn get(&self, key: &str) -> String {
        if let Some(target) = self.exact.get(key) {
            return target.clone();
        }
        if let Some(open) = key.find('[') {
            if let Some(target) = self.wildcard.get(&key[..open]) {
                return format!("{}{}", target, &key[open..]);
            }
        }
        key.to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

fn find_separator(definition: &str) -> Option<usize> {
    let mut depth = 0;
    let mut quoted = false;
    for (i, c) in definition.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '[' if !quoted => depth += 1,
            ']' if !quoted => depth -= 1,
            ':' if !quoted && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}
