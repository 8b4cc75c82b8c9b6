use keymod_core::{
    Flow, KeyModule, KeyModuleHost, KeySignature, KeymodError, KeymodResult, MemoryKeyring,
    NodeId, NodeInput, ParamFlags, ParamGraph, ParamNode, ParamSubgraph, ScriptedParams,
    SubgraphTransition, Transition, TraversalEnv, VersionFlags,
};
use std::sync::Arc;

/// Module whose graph asks for a single `token` and registers it as the blob.
struct TokenModule {
    alias: &'static str,
    subgraph: Arc<SubgraphTransition<Vec<u8>>>,
}

fn store_token(
    ctx: &mut Vec<u8>,
    input: &mut NodeInput,
    env: &mut TraversalEnv<'_>,
) -> KeymodResult<Flow> {
    ctx.extend_from_slice(input.take_required()?.as_bytes());
    let handle = env.registry.find("token")?;
    let sig = env.keyring.add_key_module_key(&handle, ctx)?;
    env.mount_options.push(sig.mount_option());
    Ok(Flow::Complete)
}

impl TokenModule {
    fn new(alias: &'static str) -> Self {
        let graph = ParamGraph::new(vec![
            ParamNode::new("mode", "Mode", ParamFlags::NO_VALUE)
                .with_default("token")
                .with_transition(Transition::on("default", "Token", Some(NodeId::new(1)), None)),
            ParamNode::new("token", "Token", ParamFlags::MASK_OUTPUT)
                .with_transition(Transition::always(None, Some(store_token))),
        ])
        .expect("valid graph");
        Self {
            alias,
            subgraph: Arc::new(SubgraphTransition {
                val: alias,
                pretty_val: "Token module",
                graph,
                enter: Box::new(
                    |_env: &mut TraversalEnv<'_>, _alias: &str| -> KeymodResult<Vec<u8>> {
                        Ok(Vec::new())
                    },
                ),
            }),
        }
    }
}

impl KeyModule for TokenModule {
    fn init(&self) -> KeymodResult<String> {
        Ok(self.alias.to_string())
    }

    fn param_subgraph_transition(
        &self,
        version: VersionFlags,
    ) -> KeymodResult<Arc<dyn ParamSubgraph>> {
        keymod_core::module::require_pubkey(version, "get_param_subgraph_trans_node")?;
        Ok(self.subgraph.clone())
    }

    fn key_sig(&self, blob: &[u8]) -> KeymodResult<KeySignature> {
        let mut digest = [0u8; 20];
        for (slot, byte) in digest.iter_mut().zip(blob) {
            *slot = *byte;
        }
        Ok(KeySignature::from_digest(&digest))
    }
}

fn host_with(aliases: &[&'static str]) -> (KeyModuleHost, Arc<MemoryKeyring>) {
    let keyring = Arc::new(MemoryKeyring::new());
    let mut host = KeyModuleHost::new(keyring.clone(), VersionFlags::PUBKEY);
    for alias in aliases {
        host.register(Arc::new(TokenModule::new(*alias)))
            .expect("register");
    }
    (host, keyring)
}

#[test]
fn single_module_is_selected_without_key_option() -> KeymodResult<()> {
    let (host, keyring) = host_with(&["token"]);
    let mut source = ScriptedParams::parse("token=abc")?;

    let options = host.configure(&mut source)?;
    assert_eq!(
        options.get("ecryptfs_sig"),
        Some("6162630000000000000000000000000000000000")
    );
    assert_eq!(keyring.len(), 1);
    Ok(())
}

#[test]
fn key_option_is_required_with_several_modules() {
    let (host, _) = host_with(&["token", "other"]);
    let mut source = ScriptedParams::parse("token=abc").unwrap();
    match host.configure(&mut source) {
        Err(KeymodError::Configuration(message)) => {
            assert!(message.contains("token") && message.contains("other"))
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let mut source = ScriptedParams::parse("key=token,token=abc").unwrap();
    assert!(host.configure(&mut source).is_ok());
}

#[test]
fn missing_gen_key_subgraph_is_unsupported() {
    let (host, _) = host_with(&["token"]);
    let err = host
        .generate_key("token", &mut ScriptedParams::new())
        .unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn finalize_empties_the_registry() -> KeymodResult<()> {
    let (mut host, _) = host_with(&["token"]);
    host.finalize()?;
    assert!(host.registry().is_empty());
    assert!(host.module("token").is_err());
    Ok(())
}
