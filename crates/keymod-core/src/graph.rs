//! Decision-graph model and the walker that drives a key module's subgraph.
//!
//! A key module describes its configuration questions as an immutable arena of
//! [`ParamNode`]s. Edges carry the value that selects them, an optional
//! transition function, and the next node (none = the subgraph ends there).
//! Everything that changes during a walk lives outside the graph: node values in
//! [`NodeInput`], module state in the subgraph context `C`, and host output in
//! [`TraversalEnv`]. The context is created when the walk enters the subgraph and
//! dropped on every exit path, successful or not.

use crate::error::{KeymodError, KeymodResult};
use crate::host::MountOptions;
use crate::keyring::Keyring;
use crate::module::KeyModuleRegistry;
use crate::source::{ParamSource, PromptRequest};
use log::{debug, warn};
use std::ops::BitOr;
use zeroize::Zeroizing;

/// Edge value that matches when nothing more specific does.
pub const DEFAULT_TRANSITION: &str = "default";

/// Upper bound on node visits in one walk; graphs with a cycle abort instead of spinning.
const MAX_STEPS: usize = 128;

/// Index of a node inside its [`ParamGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// How a node's value is collected and displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamFlags(u32);

impl ParamFlags {
    pub const NONE: Self = Self(0);
    pub const ECHO_INPUT: Self = Self(0x01);
    pub const MASK_OUTPUT: Self = Self(0x02);
    /// The value must be read from standard input when not supplied inline.
    pub const STDIN_REQUIRED: Self = Self(0x04);
    /// Interactive entry should be confirmed by typing it twice.
    pub const VERIFY_VALUE: Self = Self(0x08);
    /// The node only routes; its value defaults silently.
    pub const NO_VALUE: Self = Self(0x10);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParamFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What the walker does after a transition function returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Follow the edge to its next node.
    Continue,
    /// The module finished its work; leave the subgraph.
    Complete,
}

/// Host collaborators visible to transition functions.
pub struct TraversalEnv<'a> {
    pub registry: &'a KeyModuleRegistry,
    pub keyring: &'a dyn Keyring,
    pub mount_options: &'a mut MountOptions,
}

/// Side effect attached to an edge.
pub type TransitionFn<C> =
    fn(&mut C, &mut NodeInput, &mut TraversalEnv<'_>) -> KeymodResult<Flow>;

/// Builds the subgraph context when the walk enters a module; receives the module alias.
pub type EnterFn<C> = Box<dyn Fn(&mut TraversalEnv<'_>, &str) -> KeymodResult<C> + Send + Sync>;

/// Outgoing edge of a node.
pub struct Transition<C> {
    /// Value selecting this edge; `None` marks the node's only, unconditional edge.
    pub val: Option<&'static str>,
    pub pretty_val: Option<&'static str>,
    pub next: Option<NodeId>,
    pub action: Option<TransitionFn<C>>,
}

impl<C> Transition<C> {
    /// Unconditional edge.
    pub fn always(next: Option<NodeId>, action: Option<TransitionFn<C>>) -> Self {
        Self {
            val: None,
            pretty_val: None,
            next,
            action,
        }
    }

    /// Edge selected by `val`.
    pub fn on(
        val: &'static str,
        pretty_val: &'static str,
        next: Option<NodeId>,
        action: Option<TransitionFn<C>>,
    ) -> Self {
        Self {
            val: Some(val),
            pretty_val: Some(pretty_val),
            next,
            action,
        }
    }
}

/// One question in the decision graph.
pub struct ParamNode<C> {
    /// Option names answering this node; the first is its canonical name.
    pub names: Vec<&'static str>,
    pub prompt: &'static str,
    pub default_val: Option<String>,
    pub suggested_val: Option<String>,
    pub flags: ParamFlags,
    pub transitions: Vec<Transition<C>>,
}

impl<C> ParamNode<C> {
    pub fn new(name: &'static str, prompt: &'static str, flags: ParamFlags) -> Self {
        Self {
            names: vec![name],
            prompt,
            default_val: None,
            suggested_val: None,
            flags,
            transitions: Vec::new(),
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_val = Some(value.into());
        self
    }

    pub fn with_suggested(mut self, value: Option<String>) -> Self {
        self.suggested_val = value;
        self
    }

    pub fn with_transition(mut self, transition: Transition<C>) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn name(&self) -> &'static str {
        self.names[0]
    }
}

/// Immutable arena of nodes; the first node is the entry.
pub struct ParamGraph<C> {
    nodes: Vec<ParamNode<C>>,
}

impl<C> ParamGraph<C> {
    /// Validate edges and freeze the node table.
    pub fn new(nodes: Vec<ParamNode<C>>) -> KeymodResult<Self> {
        if nodes.is_empty() {
            return Err(KeymodError::Configuration(
                "decision graph must contain at least one node".into(),
            ));
        }
        for node in &nodes {
            if node.names.is_empty() || node.names.iter().any(|name| name.is_empty()) {
                return Err(KeymodError::Configuration(format!(
                    "node [{}] must carry a non-empty option name",
                    node.prompt
                )));
            }
            if node.transitions.is_empty() {
                return Err(KeymodError::Configuration(format!(
                    "node [{}] has no transitions",
                    node.name()
                )));
            }
            for transition in &node.transitions {
                if let Some(next) = transition.next {
                    if next.index() >= nodes.len() {
                        return Err(KeymodError::Configuration(format!(
                            "node [{}] points at missing node {}",
                            node.name(),
                            next.index()
                        )));
                    }
                }
            }
        }
        Ok(Self { nodes })
    }

    pub fn entry(&self) -> NodeId {
        NodeId::new(0)
    }

    pub fn node(&self, id: NodeId) -> &ParamNode<C> {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a node by any of its option names.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.names.contains(&name))
            .map(NodeId::new)
    }
}

/// Value collected for the node being left; traversal-scoped, never stored on the graph.
pub struct NodeInput {
    name: &'static str,
    value: Option<Zeroizing<String>>,
    explicit: bool,
}

impl NodeInput {
    pub fn new(name: &'static str, value: Option<Zeroizing<String>>) -> Self {
        Self {
            name,
            value,
            explicit: true,
        }
    }

    /// Option name the value was supplied under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref().map(String::as_str)
    }

    /// Move the value out; the input is empty afterwards.
    pub fn take(&mut self) -> Option<Zeroizing<String>> {
        self.value.take()
    }

    /// Move the value out, failing when the node carried none.
    pub fn take_required(&mut self) -> KeymodResult<Zeroizing<String>> {
        let name = self.name;
        self.take().ok_or_else(|| {
            KeymodError::Configuration(format!("no value supplied for [{name}]"))
        })
    }
}

/// Type-erased entry point the host uses to walk a module's subgraph.
pub trait ParamSubgraph: Send + Sync {
    /// Value selecting this module at the host's key-module node.
    fn val(&self) -> &str;

    fn pretty_val(&self) -> &str;

    /// Walk from the entry node until the subgraph completes or fails.
    fn traverse(
        &self,
        env: &mut TraversalEnv<'_>,
        source: &mut dyn ParamSource,
    ) -> KeymodResult<()>;
}

/// A module's subgraph: how to build its context and which graph to walk.
pub struct SubgraphTransition<C> {
    pub val: &'static str,
    pub pretty_val: &'static str,
    pub graph: ParamGraph<C>,
    pub enter: EnterFn<C>,
}

impl<C: 'static> ParamSubgraph for SubgraphTransition<C> {
    fn val(&self) -> &str {
        self.val
    }

    fn pretty_val(&self) -> &str {
        self.pretty_val
    }

    fn traverse(
        &self,
        env: &mut TraversalEnv<'_>,
        source: &mut dyn ParamSource,
    ) -> KeymodResult<()> {
        let mut ctx = (self.enter)(env, self.val)?;
        let mut current = Some(self.graph.entry());
        let mut steps = 0;

        while let Some(id) = current {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(KeymodError::Configuration(format!(
                    "decision graph for [{}] did not terminate",
                    self.val
                )));
            }

            let node = self.graph.node(id);
            let mut input = resolve_input(node, source)?;
            let transition = select_transition(node, &input, source)?;
            debug!(
                "[{}] {} -> {}",
                self.val,
                node.name(),
                transition
                    .next
                    .map(|next| self.graph.node(next).name())
                    .unwrap_or("<end>")
            );

            let flow = match transition.action {
                Some(action) => action(&mut ctx, &mut input, env).map_err(|err| {
                    warn!("[{}] transition from [{}] failed: {err}", self.val, node.name());
                    err
                })?,
                None => Flow::Continue,
            };

            current = match flow {
                Flow::Complete => None,
                Flow::Continue => transition.next,
            };
        }
        Ok(())
    }
}

fn resolve_input<C>(node: &ParamNode<C>, source: &mut dyn ParamSource) -> KeymodResult<NodeInput> {
    let supplied = node
        .names
        .iter()
        .find_map(|name| source.take(name).map(|value| (*name, value)));

    let stdin_required = node.flags.contains(ParamFlags::STDIN_REQUIRED);
    match supplied {
        Some((_, value)) if value.is_empty() && stdin_required => {}
        Some((name, value)) => return Ok(NodeInput::new(name, Some(value))),
        None => {}
    }

    if node.flags.contains(ParamFlags::NO_VALUE) {
        return Ok(NodeInput {
            name: node.name(),
            value: node.default_val.clone().map(Zeroizing::new),
            explicit: false,
        });
    }

    let request = PromptRequest {
        name: node.name(),
        prompt: node.prompt,
        suggested: node
            .suggested_val
            .as_deref()
            .or(node.default_val.as_deref()),
        flags: node.flags,
    };
    if let Some(value) = source.prompt(&request)? {
        return Ok(NodeInput::new(node.name(), Some(value)));
    }

    if let Some(default) = &node.default_val {
        return Ok(NodeInput {
            name: node.name(),
            value: Some(Zeroizing::new(default.clone())),
            explicit: false,
        });
    }

    if node.transitions.iter().all(|t| t.action.is_none()) {
        return Ok(NodeInput {
            name: node.name(),
            value: None,
            explicit: false,
        });
    }

    Err(KeymodError::Configuration(format!(
        "missing value for [{}]",
        node.name()
    )))
}

fn select_transition<'g, C>(
    node: &'g ParamNode<C>,
    input: &NodeInput,
    source: &dyn ParamSource,
) -> KeymodResult<&'g Transition<C>> {
    if let [only] = node.transitions.as_slice() {
        if only.val.is_none() {
            return Ok(only);
        }
    }

    let matches_value = |t: &&Transition<C>| t.val.is_some() && t.val == input.value();

    if input.explicit {
        if let Some(t) = node.transitions.iter().find(matches_value) {
            return Ok(t);
        }
    }

    let lookahead = node.transitions.iter().find(|t| {
        t.val
            .map(|val| val != DEFAULT_TRANSITION && source.contains(val))
            .unwrap_or(false)
    });
    if let Some(t) = lookahead {
        return Ok(t);
    }

    if !input.explicit {
        if let Some(t) = node.transitions.iter().find(matches_value) {
            return Ok(t);
        }
    }

    node.transitions
        .iter()
        .find(|t| t.val == Some(DEFAULT_TRANSITION))
        .ok_or_else(|| {
            KeymodError::Configuration(format!(
                "no transition from [{}] matches [{}]",
                node.name(),
                input.value().unwrap_or("")
            ))
        })
}
