//! Keyring collaborator: where resolved key-module keys are registered.
//!
//! The mount tool normally hands the blob to the kernel keyring. [`MemoryKeyring`]
//! keeps the same contract in-process for operator tooling and tests.

use crate::error::KeymodResult;
use crate::module::KeyModuleHandle;
use crate::signature::KeySignature;
use log::info;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use zeroize::Zeroizing;

/// Registers key-module keys and reports their signatures.
pub trait Keyring: Send + Sync {
    /// Compute the key's signature through `module` and store `blob` under it.
    fn add_key_module_key(
        &self,
        module: &KeyModuleHandle,
        blob: &[u8],
    ) -> KeymodResult<KeySignature>;
}

/// A key stored in a [`MemoryKeyring`].
#[derive(Clone)]
pub struct RegisteredKey {
    pub alias: String,
    pub blob: Zeroizing<Vec<u8>>,
}

/// Process-local keyring.
#[derive(Default)]
pub struct MemoryKeyring {
    entries: Mutex<BTreeMap<KeySignature, RegisteredKey>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sig: &KeySignature) -> Option<RegisteredKey> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sig)
            .cloned()
    }

    pub fn signatures(&self) -> Vec<KeySignature> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Keyring for MemoryKeyring {
    fn add_key_module_key(
        &self,
        module: &KeyModuleHandle,
        blob: &[u8],
    ) -> KeymodResult<KeySignature> {
        let sig = module.ops().key_sig(blob)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let replaced = entries
            .insert(
                sig.clone(),
                RegisteredKey {
                    alias: module.alias().to_string(),
                    blob: Zeroizing::new(blob.to_vec()),
                },
            )
            .is_some();
        info!(
            "{} key [{sig}] for key module [{}]",
            if replaced { "refreshed" } else { "added" },
            module.alias()
        );
        Ok(sig)
    }
}
