//! Parser for `name = value` option files (passphrase files and friends).
//!
//! Values are kept in zeroizing storage and the whole list is owned by the caller,
//! so dropping the returned [`NameValuePairs`] releases every parsed secret.

use crate::error::{KeymodError, KeymodResult};
use std::io::Read;
use zeroize::Zeroizing;

/// One parsed option.
pub struct NameValuePair {
    pub name: String,
    pub value: Zeroizing<String>,
}

/// Parsed option list in file order.
#[derive(Default)]
pub struct NameValuePairs {
    pairs: Vec<NameValuePair>,
}

impl NameValuePairs {
    /// First value recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|pair| pair.name == name)
            .map(|pair| pair.value.as_str())
    }

    /// Move the first value recorded for `name` out of the list.
    pub fn take(&mut self, name: &str) -> Option<Zeroizing<String>> {
        let index = self.pairs.iter().position(|pair| pair.name == name)?;
        Some(self.pairs.remove(index).value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|pair| pair.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Read everything from `reader` and parse it.
pub fn parse_options<R: Read>(mut reader: R) -> KeymodResult<NameValuePairs> {
    let mut contents = Zeroizing::new(String::new());
    reader.read_to_string(&mut contents)?;
    parse_options_str(&contents)
}

/// Parse one `name = value` pair per line; blank lines and `#` comments are skipped.
pub fn parse_options_str(contents: &str) -> KeymodResult<NameValuePairs> {
    let mut pairs = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, value) = line.split_once('=').unwrap_or((line, ""));
        let name = name.trim();
        if name.is_empty() {
            return Err(KeymodError::Configuration(format!(
                "option on line {} has no name",
                lineno + 1
            )));
        }
        pairs.push(NameValuePair {
            name: name.to_string(),
            value: Zeroizing::new(unquote(value.trim()).to_string()),
        });
    }
    Ok(NameValuePairs { pairs })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}
