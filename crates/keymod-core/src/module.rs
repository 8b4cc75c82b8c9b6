//! Host-facing contract every key module implements, plus the alias registry.
//!
//! A key module resolves a wrapping key from its own parameters (carried in an
//! opaque blob) and wraps/unwraps the per-mount file-encryption key with it. Not
//! every module supports every operation: the optional slots have default bodies
//! returning [`KeymodError::Unsupported`], and hosts must tolerate that.

use crate::error::{KeymodError, KeymodResult};
use crate::graph::ParamSubgraph;
use crate::signature::KeySignature;
use log::{info, warn};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Protocol capability bitmask advertised by the host mount tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionFlags(u32);

impl VersionFlags {
    pub const PASSPHRASE: Self = Self(0x0000_0001);
    pub const PUBKEY: Self = Self(0x0000_0002);
    pub const PLAINTEXT_PASSTHROUGH: Self = Self(0x0000_0004);
    pub const POLICY: Self = Self(0x0000_0008);
    pub const FILENAME_ENCRYPTION: Self = Self(0x0000_0010);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for VersionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Fail with `Unsupported` unless `version` carries the public-key capability.
pub fn require_pubkey(version: VersionFlags, op: &'static str) -> KeymodResult<()> {
    if version.contains(VersionFlags::PUBKEY) {
        Ok(())
    } else {
        Err(KeymodError::Unsupported(op))
    }
}

/// Presentation flags for a parameter accepted outside the decision graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyModuleParamFlags {
    /// Do not echo the value while it is typed.
    pub no_echo: bool,
    /// Keep the value in locked memory.
    pub lock_mem: bool,
}

/// Named parameter a module accepts through `blob` rather than the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyModuleParam {
    pub id: u32,
    pub option: &'static str,
    pub description: &'static str,
    pub flags: KeyModuleParamFlags,
    pub suggested_val: Option<String>,
    pub default_val: Option<String>,
}

/// A resolved value for a [`KeyModuleParam`].
#[derive(Clone)]
pub struct ParamValue {
    pub name: String,
    pub value: Zeroizing<String>,
}

impl ParamValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Zeroizing::new(value.into()),
        }
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamValue")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Operation table of a key-module backend.
///
/// `init` is mandatory because it names the module; everything else is optional.
pub trait KeyModule: Send + Sync {
    /// Prepare process-lifetime state and return the module alias.
    fn init(&self) -> KeymodResult<String>;

    /// Parameters accepted outside the decision graph.
    fn params(&self) -> KeymodResult<Vec<KeyModuleParam>> {
        Err(KeymodError::Unsupported("get_params"))
    }

    /// Entry into the interactive/scripted configuration subgraph.
    fn param_subgraph_transition(
        &self,
        _version: VersionFlags,
    ) -> KeymodResult<Arc<dyn ParamSubgraph>> {
        Err(KeymodError::Unsupported("get_param_subgraph_trans_node"))
    }

    /// Entry into the key-generation subgraph.
    fn gen_key_subgraph_transition(
        &self,
        _version: VersionFlags,
    ) -> KeymodResult<Arc<dyn ParamSubgraph>> {
        Err(KeymodError::Unsupported("get_gen_key_subgraph_trans_node"))
    }

    /// Size of the blob `blob` would produce, without producing it.
    fn blob_size(&self, _values: &[ParamValue]) -> KeymodResult<usize> {
        Err(KeymodError::Unsupported("get_blob"))
    }

    /// Serialise resolved parameter values into the module blob.
    fn blob(&self, _values: &[ParamValue]) -> KeymodResult<Zeroizing<Vec<u8>>> {
        Err(KeymodError::Unsupported("get_blob"))
    }

    /// Signature of the key described by `blob`.
    fn key_sig(&self, _blob: &[u8]) -> KeymodResult<KeySignature> {
        Err(KeymodError::Unsupported("get_key_sig"))
    }

    /// Size of the ciphertext `encrypt` would produce for `blob`.
    fn encrypted_size(&self, _blob: &[u8]) -> KeymodResult<usize> {
        Err(KeymodError::Unsupported("encrypt"))
    }

    fn encrypt(&self, _plaintext: &[u8], _blob: &[u8]) -> KeymodResult<Vec<u8>> {
        Err(KeymodError::Unsupported("encrypt"))
    }

    fn decrypt(&self, _ciphertext: &[u8], _blob: &[u8]) -> KeymodResult<Zeroizing<Vec<u8>>> {
        Err(KeymodError::Unsupported("decrypt"))
    }

    /// Release whatever `init` cached.
    fn finalize(&self) -> KeymodResult<()> {
        Ok(())
    }
}

/// A registered module together with the alias it reported from `init`.
#[derive(Clone)]
pub struct KeyModuleHandle {
    alias: Arc<str>,
    ops: Arc<dyn KeyModule>,
}

impl KeyModuleHandle {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn ops(&self) -> &dyn KeyModule {
        self.ops.as_ref()
    }
}

impl fmt::Debug for KeyModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyModuleHandle")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// Alias → module lookup used when a traversal enters a module's subgraph.
#[derive(Default)]
pub struct KeyModuleRegistry {
    modules: Vec<KeyModuleHandle>,
}

impl KeyModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialise `module` and register it under the alias it reports.
    pub fn register(&mut self, module: Arc<dyn KeyModule>) -> KeymodResult<KeyModuleHandle> {
        let alias = module.init()?;
        if self.modules.iter().any(|handle| handle.alias() == alias) {
            let _ = module.finalize();
            return Err(KeymodError::Configuration(format!(
                "key module alias [{alias}] registered twice"
            )));
        }
        info!("registered key module [{alias}]");
        let handle = KeyModuleHandle {
            alias: Arc::from(alias.as_str()),
            ops: module,
        };
        self.modules.push(handle.clone());
        Ok(handle)
    }

    pub fn find(&self, alias: &str) -> KeymodResult<KeyModuleHandle> {
        self.modules
            .iter()
            .find(|handle| handle.alias() == alias)
            .cloned()
            .ok_or_else(|| {
                KeymodError::Configuration(format!("cannot find key module [{alias}]"))
            })
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.modules.iter().map(KeyModuleHandle::alias).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Finalize and drop every module, reporting the first failure.
    pub fn finalize(&mut self) -> KeymodResult<()> {
        let mut first_err = None;
        for handle in self.modules.drain(..) {
            if let Err(err) = handle.ops.finalize() {
                warn!("finalize failed for key module [{}]: {err}", handle.alias);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
