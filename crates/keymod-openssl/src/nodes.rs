//! Decision graphs exposed by the OpenSSL module.
//!
//! Node indices are fixed per table; each builder wires edges by index and
//! lets [`ParamGraph::new`] check them.

use crate::transitions::{
    tf_gen_passphrase, tf_keyfile, tf_passenv, tf_passfile, tf_passwd, SubgraphCtx,
};
use keymod_core::graph::DEFAULT_TRANSITION;
use keymod_core::{KeymodResult, NodeId, ParamFlags, ParamGraph, ParamNode, Transition};

type Node = ParamNode<SubgraphCtx>;
type Edge = Transition<SubgraphCtx>;

const fn id(index: usize) -> Option<NodeId> {
    Some(NodeId::new(index))
}

/// `keyformat` → `keyfile` → one terminal node per passphrase source.
pub fn legacy_graph(default_key_file: Option<String>) -> KeymodResult<ParamGraph<SubgraphCtx>> {
    const KEYFILE: usize = 1;
    const PASSWD: usize = 2;
    const PASSFILE: usize = 3;
    const PASSENV: usize = 4;
    const PASSFD: usize = 5;
    const PASSSTDIN: usize = 6;
    const DEFAULTPASS: usize = 7;

    let keyfile = [
        ("passwd", "Passphrase", PASSWD),
        ("passfile", "Passphrase File", PASSFILE),
        ("passenv", "Passphrase ENV", PASSENV),
        ("passfd", "Passphrase FD", PASSFD),
        ("passstdin", "Passphrase STDIN", PASSSTDIN),
        (DEFAULT_TRANSITION, "Passphrase", DEFAULTPASS),
    ]
    .into_iter()
    .fold(
        Node::new("keyfile", "SSL key file path", ParamFlags::ECHO_INPUT)
            .with_suggested(default_key_file),
        |node, (val, pretty, next)| {
            node.with_transition(Edge::on(val, pretty, id(next), Some(tf_keyfile)))
        },
    );

    ParamGraph::new(vec![
        Node::new("keyformat", "Key format", ParamFlags::NO_VALUE)
            .with_default("keyfile")
            .with_transition(Edge::on(DEFAULT_TRANSITION, "OpenSSL Key File", id(KEYFILE), None)),
        keyfile,
        Node::new("passwd", "Passphrase", ParamFlags::MASK_OUTPUT)
            .with_transition(Edge::always(None, Some(tf_passwd))),
        Node::new("passfile", "Passphrase File", ParamFlags::MASK_OUTPUT)
            .with_transition(Edge::always(None, Some(tf_passfile))),
        Node::new("passenv", "Passphrase Environment Variable", ParamFlags::MASK_OUTPUT)
            .with_transition(Edge::always(None, Some(tf_passenv))),
        Node::new("passfd", "Passphrase File Descriptor", ParamFlags::MASK_OUTPUT)
            .with_transition(Edge::always(None, Some(tf_passfile))),
        Node::new(
            "passstdin",
            "Passphrase",
            ParamFlags::VERIFY_VALUE | ParamFlags::STDIN_REQUIRED,
        )
        .with_transition(Edge::always(None, Some(tf_passwd))),
        Node::new("defaultpass", "Passphrase", ParamFlags::STDIN_REQUIRED)
            .with_transition(Edge::always(None, Some(tf_passwd))),
    ])
}

/// `keysource` → `keyfile` → `passwd_specification_method` → passphrase source.
pub fn revised_graph(default_key_file: Option<String>) -> KeymodResult<ParamGraph<SubgraphCtx>> {
    const KEYFILE: usize = 1;
    const METHOD: usize = 2;
    const PASSWD: usize = 3;
    const PASSWD_FILE: usize = 4;
    const PASSWD_FD: usize = 5;

    ParamGraph::new(vec![
        Node::new("keysource", "Key source", ParamFlags::NO_VALUE)
            .with_default("keyfile")
            .with_transition(Edge::on(DEFAULT_TRANSITION, "OpenSSL Key File", id(KEYFILE), None)),
        Node::new("keyfile", "Path to the PEM key file", ParamFlags::NONE)
            .with_suggested(default_key_file)
            .with_transition(Edge::on(
                DEFAULT_TRANSITION,
                "Passphrase Method",
                id(METHOD),
                Some(tf_keyfile),
            )),
        Node::new("passwd_specification_method", "Passphrase method", ParamFlags::NO_VALUE)
            .with_default("passwd")
            .with_transition(Edge::on("passwd", "User-provided Passphrase", id(PASSWD), None))
            .with_transition(Edge::on(
                "passwd_file",
                "File Containing Passphrase",
                id(PASSWD_FILE),
                None,
            ))
            .with_transition(Edge::on(
                "passwd_fd",
                "File Descriptor for File Containing Passphrase",
                id(PASSWD_FD),
                None,
            )),
        Node::new("passwd", "Passphrase", ParamFlags::STDIN_REQUIRED)
            .with_transition(Edge::always(None, Some(tf_passwd))),
        Node::new("passwd_file", "Passphrase file", ParamFlags::STDIN_REQUIRED)
            .with_transition(Edge::always(None, Some(tf_passfile))),
        Node::new("passwd_fd", "Passphrase file descriptor", ParamFlags::STDIN_REQUIRED)
            .with_transition(Edge::always(None, Some(tf_passfile))),
    ])
}

/// `keyfile` → `passphrase`, then generate and write the key.
pub fn gen_key_graph(default_key_file: Option<String>) -> KeymodResult<ParamGraph<SubgraphCtx>> {
    ParamGraph::new(vec![
        Node::new("keyfile", "SSL key file path", ParamFlags::ECHO_INPUT)
            .with_suggested(default_key_file)
            .with_transition(Edge::always(id(1), Some(tf_keyfile))),
        Node::new(
            "passphrase",
            "Passphrase",
            ParamFlags::MASK_OUTPUT | ParamFlags::VERIFY_VALUE,
        )
        .with_transition(Edge::always(None, Some(tf_gen_passphrase))),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_validate() {
        let legacy = legacy_graph(Some("/k.pem".into())).unwrap();
        assert_eq!(legacy.len(), 8);
        assert_eq!(legacy.node(legacy.entry()).name(), "keyformat");
        let keyfile = legacy.node(legacy.find("keyfile").unwrap());
        assert_eq!(keyfile.suggested_val.as_deref(), Some("/k.pem"));
        assert_eq!(keyfile.transitions.len(), 6);

        let revised = revised_graph(None).unwrap();
        assert_eq!(revised.len(), 6);
        assert!(revised.find("passwd_specification_method").is_some());
        assert!(revised.find("passenv").is_none());

        let gen_key = gen_key_graph(None).unwrap();
        assert_eq!(gen_key.len(), 2);
        assert!(gen_key
            .node(gen_key.find("passphrase").unwrap())
            .flags
            .contains(ParamFlags::VERIFY_VALUE));
    }

    #[test]
    fn stdin_sources_require_stdin() {
        let legacy = legacy_graph(None).unwrap();
        for name in ["passstdin", "defaultpass"] {
            let node = legacy.node(legacy.find(name).unwrap());
            assert!(node.flags.contains(ParamFlags::STDIN_REQUIRED), "{name}");
        }
    }

    #[test]
    fn passphrase_locators_are_masked() {
        let legacy = legacy_graph(None).unwrap();
        for name in ["passwd", "passfile", "passenv", "passfd"] {
            let flags = legacy.node(legacy.find(name).unwrap()).flags;
            assert!(flags.contains(ParamFlags::MASK_OUTPUT), "{name}");
            assert!(!flags.contains(ParamFlags::ECHO_INPUT), "{name}");
        }
    }
}
