//! Per-client command trees.
//!
//! Each client receives the canonical tree pruned to what its cause may use.
//! Pruned trees are assembled from per-client caches of permission verdicts
//! and materialized subtrees, and both are thrown away whenever the
//! canonical tree changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lodestone_api::{ArgKind, TreePacket, WireNode, WireNodeKind};

use crate::node::{CommandNode, NodeId, NodeKind};

mod builder;
mod cache;

pub use builder::SuggestionTreeBuilder;
pub use cache::{CacheStats, ClientId, PermissionCache};

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionKind {
    Root,
    Literal {
        name: String,
    },
    Argument {
        name: String,
        kind: ArgKind,
        /// The client asks the server to complete this argument.
        custom_suggestions: bool,
    },
}

/// A node of a pruned per-client tree.
///
/// Subtrees are shared between builds through `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionNode {
    id: Option<NodeId>,
    kind: SuggestionKind,
    executable: bool,
    redirect: Option<Vec<String>>,
    children: Vec<Arc<SuggestionNode>>,
    custom_count: usize,
}

impl SuggestionNode {
    /// Copy of `node` without children.
    pub(crate) fn shallow(node: &CommandNode) -> Self {
        let kind = match node.kind() {
            NodeKind::Root => SuggestionKind::Root,
            NodeKind::Literal { literal } => SuggestionKind::Literal {
                name: literal.clone(),
            },
            NodeKind::Argument {
                name,
                kind,
                suggestions,
                ..
            } => SuggestionKind::Argument {
                name: name.clone(),
                kind: kind.clone(),
                custom_suggestions: suggestions.is_some(),
            },
        };
        let mut shallow = Self {
            id: Some(node.id()),
            kind,
            executable: node.is_executable(),
            redirect: node.redirect().map(|p| p.to_vec()),
            children: Vec::new(),
            custom_count: 0,
        };
        shallow.recount();
        shallow
    }

    /// Literal forwarding to the top-level literal `target`.
    pub(crate) fn alias(key: &str, target: &str) -> Self {
        Self {
            id: None,
            kind: SuggestionKind::Literal {
                name: key.to_string(),
            },
            executable: false,
            redirect: Some(vec![target.to_string()]),
            children: Vec::new(),
            custom_count: 0,
        }
    }

    /// Canonical node this was derived from. `None` for alias literals.
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn kind(&self) -> &SuggestionKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            SuggestionKind::Root => "",
            SuggestionKind::Literal { name } | SuggestionKind::Argument { name, .. } => name,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    pub fn redirect(&self) -> Option<&[String]> {
        self.redirect.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &SuggestionNode> {
        self.children.iter().map(Arc::as_ref)
    }

    pub fn child(&self, name: &str) -> Option<&SuggestionNode> {
        self.children().find(|c| c.name().eq_ignore_ascii_case(name))
    }

    pub fn find(&self, path: &[&str]) -> Option<&SuggestionNode> {
        let mut current = self;
        for segment in path {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn has_custom_suggestions(&self) -> bool {
        matches!(
            self.kind,
            SuggestionKind::Argument {
                custom_suggestions: true,
                ..
            }
        )
    }

    /// Nodes in this subtree that ask the server for completions.
    pub fn custom_suggestion_count(&self) -> usize {
        self.custom_count
    }

    /// Number of nodes in this subtree, this one included.
    pub fn len(&self) -> usize {
        1 + self.children().map(SuggestionNode::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn push_child(&mut self, child: Arc<SuggestionNode>) {
        self.custom_count += child.custom_count;
        self.children.push(child);
    }

    fn recount(&mut self) {
        self.custom_count = usize::from(self.has_custom_suggestions())
            + self.children.iter().map(|c| c.custom_count).sum::<usize>();
    }

    fn strip_custom_suggestions(&mut self) {
        if let SuggestionKind::Argument {
            custom_suggestions, ..
        } = &mut self.kind
        {
            *custom_suggestions = false;
        }
    }

    /// Flatten into the wire form, root first, children in order.
    ///
    /// Redirects that do not resolve within this tree are pruned first.
    pub fn to_packet(&self) -> TreePacket {
        let mut tree = self.clone();
        prune_dangling_redirects(&mut tree);
        tree.flatten_into_packet()
    }

    fn flatten_into_packet(&self) -> TreePacket {
        let mut packet = TreePacket::new();
        if let Some(root) = packet.nodes.get_mut(packet.root as usize) {
            root.executable = self.executable;
        }
        let mut paths = HashMap::new();
        paths.insert(Vec::new(), packet.root);
        let mut redirects = Vec::new();
        let root = packet.root;
        if let Some(target) = &self.redirect {
            redirects.push((root, lowercase(target)));
        }
        flatten(self, root, &[], &mut packet, &mut paths, &mut redirects);
        for (index, target) in redirects {
            if let Some(&target) = paths.get(&target) {
                packet.set_redirect(index, target);
            }
        }
        packet
    }

    fn wire_kind(&self) -> WireNodeKind {
        match &self.kind {
            SuggestionKind::Root => WireNodeKind::Root,
            SuggestionKind::Literal { name } => WireNodeKind::Literal { name: name.clone() },
            SuggestionKind::Argument {
                name,
                kind,
                custom_suggestions,
            } => WireNodeKind::Argument {
                name: name.clone(),
                parser: kind.parser_id().to_string(),
                properties: kind.properties(),
                ask_server: *custom_suggestions,
            },
        }
    }
}

fn lowercase(path: &[String]) -> Vec<String> {
    path.iter().map(|s| s.to_lowercase()).collect()
}

/// Drop redirects whose target is not part of `root`, and with them every
/// node left neither executable nor leading anywhere.
///
/// Runs until nothing changes, since removing a node can strand redirects
/// that pointed at it. Subtrees shared with a client cache are copied before
/// they are modified.
pub fn prune_dangling_redirects(root: &mut SuggestionNode) {
    loop {
        let mut paths = HashSet::new();
        collect_paths(root, &mut Vec::new(), &mut paths);
        if !prune(root, &paths) {
            break;
        }
    }
    root.recount();
}

fn collect_paths(node: &SuggestionNode, path: &mut Vec<String>, out: &mut HashSet<Vec<String>>) {
    out.insert(path.clone());
    for child in node.children() {
        path.push(child.name().to_lowercase());
        collect_paths(child, path, out);
        path.pop();
    }
}

fn dangles(node: &SuggestionNode, paths: &HashSet<Vec<String>>) -> bool {
    node.redirect
        .as_ref()
        .is_some_and(|target| !paths.contains(&lowercase(target)))
        || node.children().any(|child| dangles(child, paths))
}

fn prune(node: &mut SuggestionNode, paths: &HashSet<Vec<String>>) -> bool {
    if !node.children().any(|child| dangles(child, paths)) {
        return false;
    }
    let mut kept = Vec::with_capacity(node.children.len());
    for mut child in std::mem::take(&mut node.children) {
        if dangles(&child, paths) {
            let inner = Arc::make_mut(&mut child);
            if inner
                .redirect
                .as_ref()
                .is_some_and(|target| !paths.contains(&lowercase(target)))
            {
                inner.redirect = None;
            }
            prune(inner, paths);
            if !(inner.executable || inner.redirect.is_some() || !inner.children.is_empty()) {
                continue;
            }
        }
        kept.push(child);
    }
    node.children = kept;
    node.recount();
    true
}

fn flatten(
    node: &SuggestionNode,
    index: u32,
    path: &[String],
    packet: &mut TreePacket,
    paths: &mut HashMap<Vec<String>, u32>,
    redirects: &mut Vec<(u32, Vec<String>)>,
) {
    for child in node.children() {
        let child_index = packet.push(WireNode::new(child.wire_kind(), child.executable));
        packet.add_child(index, child_index);
        let mut child_path = path.to_vec();
        child_path.push(child.name().to_lowercase());
        paths.entry(child_path.clone()).or_insert(child_index);
        if let Some(target) = &child.redirect {
            redirects.push((child_index, lowercase(target)));
        }
        flatten(child, child_index, &child_path, packet, paths, redirects);
    }
}

/// Keep completion round-trips to one node per tree.
///
/// The first node in pre-order (declaration order) that asks the server
/// keeps doing so. Every later one is downgraded to client-side completion.
pub fn limit_custom_suggestions(root: &mut SuggestionNode) {
    let mut claimed = root.has_custom_suggestions();
    limit(root, &mut claimed);
    root.recount();
}

fn limit(node: &mut SuggestionNode, claimed: &mut bool) {
    for child in node.children.iter_mut() {
        if child.custom_count == 0 {
            continue;
        }
        if !*claimed && child.custom_count == 1 {
            *claimed = true;
            continue;
        }
        let child = Arc::make_mut(child);
        if child.has_custom_suggestions() {
            if *claimed {
                child.strip_custom_suggestions();
            } else {
                *claimed = true;
            }
        }
        limit(child, claimed);
        child.recount();
    }
}
