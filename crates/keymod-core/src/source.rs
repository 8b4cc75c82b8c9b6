//! Where node values come from while a decision graph is walked.
//!
//! Mount helpers run non-interactively from a scripted option string
//! (`key=openssl,keyfile=/k.pem,passwd=secret`); operator tools may fall back to
//! prompting. Both are expressed through [`ParamSource`].

use crate::error::{KeymodError, KeymodResult};
use crate::graph::ParamFlags;
use zeroize::Zeroizing;

/// Description of a value the walker could not find in the scripted options.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub name: &'a str,
    pub prompt: &'a str,
    /// Suggested (or default) value to offer.
    pub suggested: Option<&'a str>,
    pub flags: ParamFlags,
}

/// Supplier of node values.
pub trait ParamSource {
    /// True when a value for `name` is still available without prompting.
    fn contains(&self, name: &str) -> bool;

    /// Remove and return the value for `name`.
    fn take(&mut self, name: &str) -> Option<Zeroizing<String>>;

    /// Ask for a value that was not supplied up front. Non-interactive sources return `None`.
    fn prompt(&mut self, _request: &PromptRequest<'_>) -> KeymodResult<Option<Zeroizing<String>>> {
        Ok(None)
    }
}

/// Values parsed from a mount-option style string.
#[derive(Default)]
pub struct ScriptedParams {
    values: Vec<(String, Zeroizing<String>)>,
}

impl ScriptedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=value` entries separated by `,`. A bare `name` carries an empty value.
    ///
    /// Values are kept verbatim, so passphrases and paths may hold `:` or spaces.
    pub fn parse(options: &str) -> KeymodResult<Self> {
        let mut params = Self::new();
        for entry in options.split(',') {
            if entry.trim().is_empty() {
                continue;
            }
            let (name, value) = entry.split_once('=').unwrap_or((entry, ""));
            let name = name.trim();
            if name.is_empty() {
                return Err(KeymodError::Configuration(format!(
                    "option entry without a name: [{entry}]"
                )));
            }
            params.insert(name, value);
        }
        Ok(params)
    }

    /// Add or replace `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = Zeroizing::new(value.into());
        match self.values.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    /// Names that were supplied but never consumed.
    pub fn remaining(&self) -> Vec<&str> {
        self.values.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ParamSource for ScriptedParams {
    fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(existing, _)| existing == name)
    }

    fn take(&mut self, name: &str) -> Option<Zeroizing<String>> {
        let index = self.values.iter().position(|(existing, _)| existing == name)?;
        Some(self.values.remove(index).1)
    }
}
