//! The OpenSSL key module: operation table and init/finalize lifecycle.

use crate::blob::{BlobView, OpensslParams, PASSPHRASE_PARAM, PATH_PARAM};
use crate::defaults::DefaultPaths;
use crate::key::{compute_signature, unwrap_key, wrap_key, wrapped_len};
use crate::nodes::{gen_key_graph, legacy_graph, revised_graph};
use crate::transitions::{enter, KeyGenSettings, SubgraphCtx};
use keymod_core::module::{require_pubkey, KeyModuleParamFlags};
use keymod_core::{
    KeyModule, KeyModuleParam, KeySignature, KeymodConfig, KeymodError, KeymodResult, NodeSet,
    ParamGraph, ParamSubgraph, ParamValue, SubgraphTransition, TraversalEnv, VersionFlags,
};
use log::{debug, info};
use std::sync::{Arc, PoisonError, RwLock};
use zeroize::Zeroizing;

/// Alias the module registers under.
pub const ALIAS: &str = "openssl";
const PRETTY_NAME: &str = "OpenSSL RSA key module";

/// State built by `init` and released by `finalize`.
struct ModuleState {
    defaults: DefaultPaths,
    param_subgraph: Arc<SubgraphTransition<SubgraphCtx>>,
    gen_key_subgraph: Arc<SubgraphTransition<SubgraphCtx>>,
}

/// RSA key module backed by passphrase-protected PEM files.
pub struct OpensslKeyModule {
    config: KeymodConfig,
    state: RwLock<Option<ModuleState>>,
}

impl OpensslKeyModule {
    pub fn new(config: KeymodConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    /// Default key location cached by `init`.
    pub fn default_paths(&self) -> KeymodResult<DefaultPaths> {
        self.with_state(|state| state.defaults.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn keygen_settings(&self) -> KeyGenSettings {
        KeyGenSettings {
            bits: self.config.openssl.key_bits,
            public_exponent: self.config.openssl.public_exponent,
        }
    }

    fn build_subgraph(
        &self,
        val: &'static str,
        graph: ParamGraph<SubgraphCtx>,
    ) -> Arc<SubgraphTransition<SubgraphCtx>> {
        let keygen = self.keygen_settings();
        Arc::new(SubgraphTransition {
            val,
            pretty_val: PRETTY_NAME,
            graph,
            enter: Box::new(move |env: &mut TraversalEnv<'_>, alias: &str| {
                enter(env, alias, keygen)
            }),
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&ModuleState) -> T) -> KeymodResult<T> {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f).ok_or_else(|| {
            KeymodError::Configuration(format!("key module [{ALIAS}] is not initialised"))
        })
    }
}

impl KeyModule for OpensslKeyModule {
    fn init(&self) -> KeymodResult<String> {
        let defaults = DefaultPaths::from_config(&self.config)?;
        let suggested = Some(defaults.key_file_string());
        let params_graph = match self.config.openssl.node_set {
            NodeSet::Legacy => legacy_graph(suggested.clone())?,
            NodeSet::Revised => revised_graph(suggested.clone())?,
        };
        let gen_graph = gen_key_graph(suggested)?;

        let state = ModuleState {
            param_subgraph: self.build_subgraph(ALIAS, params_graph),
            gen_key_subgraph: self.build_subgraph(ALIAS, gen_graph),
            defaults,
        };
        debug!(
            "key module [{ALIAS}] using {:?} nodes, default key {}",
            self.config.openssl.node_set,
            state.defaults.key_file.display()
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
        Ok(ALIAS.to_string())
    }

    fn params(&self) -> KeymodResult<Vec<KeyModuleParam>> {
        let suggested = self.default_paths()?.key_file_string();
        Ok(vec![
            KeyModuleParam {
                id: 0,
                option: PATH_PARAM,
                description: "Path to the passphrase-protected PEM key file",
                flags: KeyModuleParamFlags::default(),
                suggested_val: Some(suggested),
                default_val: None,
            },
            KeyModuleParam {
                id: 1,
                option: PASSPHRASE_PARAM,
                description: "Passphrase protecting the key file",
                flags: KeyModuleParamFlags {
                    no_echo: true,
                    lock_mem: true,
                },
                suggested_val: None,
                default_val: None,
            },
        ])
    }

    fn param_subgraph_transition(
        &self,
        version: VersionFlags,
    ) -> KeymodResult<Arc<dyn ParamSubgraph>> {
        require_pubkey(version, "get_param_subgraph_trans_node")?;
        self.with_state(|state| state.param_subgraph.clone() as Arc<dyn ParamSubgraph>)
    }

    fn gen_key_subgraph_transition(
        &self,
        version: VersionFlags,
    ) -> KeymodResult<Arc<dyn ParamSubgraph>> {
        require_pubkey(version, "get_gen_key_subgraph_trans_node")?;
        self.with_state(|state| state.gen_key_subgraph.clone() as Arc<dyn ParamSubgraph>)
    }

    fn blob_size(&self, values: &[ParamValue]) -> KeymodResult<usize> {
        OpensslParams::from_param_values(values)?.serialized_len()
    }

    fn blob(&self, values: &[ParamValue]) -> KeymodResult<Zeroizing<Vec<u8>>> {
        OpensslParams::from_param_values(values)?.serialize()
    }

    fn key_sig(&self, blob: &[u8]) -> KeymodResult<KeySignature> {
        compute_signature(&BlobView::deserialize(blob)?)
    }

    fn encrypted_size(&self, blob: &[u8]) -> KeymodResult<usize> {
        wrapped_len(&BlobView::deserialize(blob)?)
    }

    fn encrypt(&self, plaintext: &[u8], blob: &[u8]) -> KeymodResult<Vec<u8>> {
        wrap_key(plaintext, &BlobView::deserialize(blob)?)
    }

    fn decrypt(&self, ciphertext: &[u8], blob: &[u8]) -> KeymodResult<Zeroizing<Vec<u8>>> {
        unwrap_key(ciphertext, &BlobView::deserialize(blob)?)
    }

    fn finalize(&self) -> KeymodResult<()> {
        if self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("key module [{ALIAS}] finalized");
        }
        Ok(())
    }
}
