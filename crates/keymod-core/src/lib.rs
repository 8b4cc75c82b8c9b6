//! Core building blocks shared by eCryptfs key modules and their hosts.
//!
//! The key-module contract, the decision-graph walker, configuration, and the
//! keyring collaborator live here so backend crates only describe their own
//! parameters and cryptography.

pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod keyring;
pub mod logging;
pub mod module;
pub mod options;
pub mod signature;
pub mod source;

pub use config::{KeymodConfig, NodeSet, OpensslCfg};
pub use error::{KeymodError, KeymodResult};
pub use graph::{
    Flow, NodeId, NodeInput, ParamFlags, ParamGraph, ParamNode, ParamSubgraph,
    SubgraphTransition, Transition, TraversalEnv,
};
pub use host::{KeyModuleHost, MountOptions};
pub use keyring::{Keyring, MemoryKeyring};
pub use module::{
    KeyModule, KeyModuleHandle, KeyModuleParam, KeyModuleRegistry, ParamValue, VersionFlags,
};
pub use signature::KeySignature;
pub use source::{ParamSource, PromptRequest, ScriptedParams};
