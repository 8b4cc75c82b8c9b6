//! Host side of the key-module protocol: module selection and subgraph walks.

use crate::error::{KeymodError, KeymodResult};
use crate::graph::{ParamSubgraph, TraversalEnv};
use crate::keyring::Keyring;
use crate::module::{KeyModule, KeyModuleHandle, KeyModuleRegistry, VersionFlags};
use crate::source::ParamSource;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;

/// Option naming the key module at the host's selection node.
pub const KEY_MODULE_OPTION: &str = "key";

/// Mount options accumulated while walking the decision graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions(Vec<String>);

impl MountOptions {
    pub fn push(&mut self, option: impl Into<String>) {
        self.0.push(option.into());
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of the first `name=value` option.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find_map(|option| {
            option
                .split_once('=')
                .filter(|(key, _)| *key == name)
                .map(|(_, value)| value)
        })
    }
}

impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Which of a module's subgraphs to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubgraphKind {
    Params,
    GenKey,
}

/// Owns the registered modules and the keyring they register keys into.
pub struct KeyModuleHost {
    registry: KeyModuleRegistry,
    keyring: Arc<dyn Keyring>,
    versioning: VersionFlags,
}

impl KeyModuleHost {
    pub fn new(keyring: Arc<dyn Keyring>, versioning: VersionFlags) -> Self {
        Self {
            registry: KeyModuleRegistry::new(),
            keyring,
            versioning,
        }
    }

    /// Initialise and register `module`, returning its alias.
    pub fn register(&mut self, module: Arc<dyn KeyModule>) -> KeymodResult<String> {
        self.registry
            .register(module)
            .map(|handle| handle.alias().to_string())
    }

    pub fn registry(&self) -> &KeyModuleRegistry {
        &self.registry
    }

    pub fn module(&self, alias: &str) -> KeymodResult<KeyModuleHandle> {
        self.registry.find(alias)
    }

    /// Walk the configuration subgraph of the module named by the `key` option.
    ///
    /// When `key` is absent and exactly one module is registered, that module is used.
    pub fn configure(&self, source: &mut dyn ParamSource) -> KeymodResult<MountOptions> {
        let alias = self.select_alias(source)?;
        self.walk(&alias, SubgraphKind::Params, source)
    }

    /// Walk the configuration subgraph of `alias`.
    pub fn configure_with(
        &self,
        alias: &str,
        source: &mut dyn ParamSource,
    ) -> KeymodResult<MountOptions> {
        self.walk(alias, SubgraphKind::Params, source)
    }

    /// Walk the key-generation subgraph of `alias`.
    pub fn generate_key(&self, alias: &str, source: &mut dyn ParamSource) -> KeymodResult<()> {
        self.walk(alias, SubgraphKind::GenKey, source).map(|_| ())
    }

    /// Finalize every registered module.
    pub fn finalize(&mut self) -> KeymodResult<()> {
        self.registry.finalize()
    }

    fn select_alias(&self, source: &mut dyn ParamSource) -> KeymodResult<String> {
        if let Some(alias) = source.take(KEY_MODULE_OPTION) {
            return Ok(alias.to_string());
        }
        match self.registry.aliases().as_slice() {
            [only] => Ok((*only).to_string()),
            [] => Err(KeymodError::Configuration(
                "no key modules are registered".into(),
            )),
            many => Err(KeymodError::Configuration(format!(
                "option [{KEY_MODULE_OPTION}] must name one of: {}",
                many.join(", ")
            ))),
        }
    }

    fn walk(
        &self,
        alias: &str,
        kind: SubgraphKind,
        source: &mut dyn ParamSource,
    ) -> KeymodResult<MountOptions> {
        let handle = self.registry.find(alias)?;
        let subgraph: Arc<dyn ParamSubgraph> = match kind {
            SubgraphKind::Params => handle.ops().param_subgraph_transition(self.versioning)?,
            SubgraphKind::GenKey => handle.ops().gen_key_subgraph_transition(self.versioning)?,
        };

        let mut mount_options = MountOptions::default();
        let mut env = TraversalEnv {
            registry: &self.registry,
            keyring: self.keyring.as_ref(),
            mount_options: &mut mount_options,
        };
        if let Err(err) = subgraph.traverse(&mut env, source) {
            warn!(
                "aborting {:?} subgraph of key module [{alias}] ({}): {err}",
                kind,
                subgraph.pretty_val()
            );
            return Err(err);
        }

        info!(
            "key module [{alias}] {:?} subgraph complete ({} mount option(s))",
            kind,
            mount_options.len()
        );
        Ok(mount_options)
    }
}
