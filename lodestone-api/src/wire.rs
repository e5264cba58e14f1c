//! Wire form of a per-client command tree
//!
//! The tree is flattened into an indexed node list; node `root` is the entry
//! point and edges are indices into `nodes`. Secondary aliases are literal
//! nodes whose `redirect` points at the primary literal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::API_VERSION;

/// A property value attached to an argument parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// Node payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum WireNodeKind {
    Root,
    Literal {
        name: String,
    },
    Argument {
        name: String,
        parser: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, PropertyValue>,
        /// The client must ask the server to complete this node
        #[serde(default)]
        ask_server: bool,
    },
}

/// A single node of a [`TreePacket`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireNode {
    pub kind: WireNodeKind,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub children: Vec<u32>,
    #[serde(default)]
    pub redirect: Option<u32>,
}

impl WireNode {
    /// Create a node without edges
    pub fn new(kind: WireNodeKind, executable: bool) -> Self {
        Self {
            kind,
            executable,
            children: Vec::new(),
            redirect: None,
        }
    }

    /// Literal or argument name; `None` for the root
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            WireNodeKind::Root => None,
            WireNodeKind::Literal { name } | WireNodeKind::Argument { name, .. } => Some(name),
        }
    }

    /// Whether the client will issue a server round-trip to complete this node
    pub fn asks_server(&self) -> bool {
        matches!(
            self.kind,
            WireNodeKind::Argument {
                ask_server: true,
                ..
            }
        )
    }
}

/// Errors raised while encoding or decoding a tree
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Failed to encode command tree: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode command tree: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to render command tree as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported tree version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    #[error("Node {node} references missing node {target}")]
    DanglingIndex { node: u32, target: u32 },
}

/// Flattened command tree as sent to one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreePacket {
    pub api_version: u32,
    pub root: u32,
    pub nodes: Vec<WireNode>,
}

impl Default for TreePacket {
    fn default() -> Self {
        Self::new()
    }
}

impl TreePacket {
    /// Create a packet holding only the root node
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION,
            root: 0,
            nodes: vec![WireNode::new(WireNodeKind::Root, false)],
        }
    }

    /// Append a node and return its index
    pub fn push(&mut self, node: WireNode) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    /// Record `child` as a child of `parent`
    pub fn add_child(&mut self, parent: u32, child: u32) {
        if let Some(node) = self.nodes.get_mut(parent as usize) {
            node.children.push(child);
        }
    }

    /// Point `node` at `target`
    pub fn set_redirect(&mut self, node: u32, target: u32) {
        if let Some(node) = self.nodes.get_mut(node as usize) {
            node.redirect = Some(target);
        }
    }

    /// Get a node by index
    pub fn get(&self, index: u32) -> Option<&WireNode> {
        self.nodes.get(index as usize)
    }

    /// The root node
    pub fn root_node(&self) -> Option<&WireNode> {
        self.get(self.root)
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds nothing but its root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Iterate the children of a node with their indices
    pub fn children_of(&self, index: u32) -> impl Iterator<Item = (u32, &WireNode)> + '_ {
        self.get(index)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(move |&c| self.get(c).map(|n| (c, n)))
    }

    /// Resolve a path of node names starting below the root
    pub fn find(&self, path: &[&str]) -> Option<u32> {
        let mut current = self.root;
        for segment in path {
            current = self
                .children_of(current)
                .find(|(_, n)| n.name() == Some(segment))
                .map(|(i, _)| i)?;
        }
        Some(current)
    }

    /// Number of nodes that make the client ask the server for completions
    pub fn ask_server_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.asks_server()).count()
    }

    /// Encode as MessagePack
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from MessagePack, checking version and index integrity
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let packet: TreePacket = rmp_serde::from_slice(bytes)?;
        if packet.api_version != API_VERSION {
            return Err(WireError::Version {
                found: packet.api_version,
                expected: API_VERSION,
            });
        }
        let len = packet.nodes.len() as u32;
        if packet.root >= len {
            return Err(WireError::DanglingIndex {
                node: packet.root,
                target: packet.root,
            });
        }
        for (index, node) in packet.nodes.iter().enumerate() {
            for &target in node.children.iter().chain(node.redirect.iter()) {
                if target >= len {
                    return Err(WireError::DanglingIndex {
                        node: index as u32,
                        target,
                    });
                }
            }
        }
        Ok(packet)
    }

    /// Pretty JSON, for logs and debugging
    pub fn to_json_pretty(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content hash of the encoded tree
    pub fn fingerprint(&self) -> Result<String, WireError> {
        let bytes = self.encode()?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreePacket {
        let mut packet = TreePacket::new();
        let home = packet.push(WireNode::new(
            WireNodeKind::Literal {
                name: "home".into(),
            },
            true,
        ));
        packet.add_child(packet.root, home);
        let name = packet.push(WireNode::new(
            WireNodeKind::Argument {
                name: "name".into(),
                parser: "brigadier:string".into(),
                properties: BTreeMap::new(),
                ask_server: true,
            },
            true,
        ));
        packet.add_child(home, name);
        let alias = packet.push(WireNode::new(
            WireNodeKind::Literal { name: "h".into() },
            false,
        ));
        packet.add_child(packet.root, alias);
        packet.set_redirect(alias, home);
        packet
    }

    #[test]
    fn test_packet_encode_decode() {
        let packet = sample();
        let bytes = packet.encode().unwrap();
        let decoded = TreePacket::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_find_and_ask_server_count() {
        let packet = sample();
        let name = packet.find(&["home", "name"]).unwrap();
        assert!(packet.get(name).unwrap().asks_server());
        assert_eq!(packet.ask_server_count(), 1);
        assert!(packet.find(&["home", "missing"]).is_none());
    }

    #[test]
    fn test_decode_rejects_dangling_index() {
        let mut packet = sample();
        packet.nodes[1].children.push(42);
        let bytes = packet.encode().unwrap();
        assert!(matches!(
            TreePacket::decode(&bytes),
            Err(WireError::DanglingIndex { node: 1, target: 42 })
        ));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        b.nodes[1].executable = false;
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_json_rendering() {
        let json = sample().to_json_pretty().unwrap();
        assert!(json.contains("\"type\": \"literal\""));
        assert!(json.contains("\"ask_server\": true"));
    }
}
