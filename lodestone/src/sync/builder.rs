use std::sync::{Arc, PoisonError};

use tracing::trace;

use super::cache::{ClientId, ClientSuggestionState, PermissionCache};
use super::{limit_custom_suggestions, prune_dangling_redirects, SuggestionNode};
use crate::canonical::TreeSnapshot;
use crate::cause::CommandCause;
use crate::node::CommandNode;

/// Assembles the pruned tree a client is allowed to see.
///
/// A node survives pruning when the cause may use it and it is either
/// executable, a forward redirect to a node that also survives, or has a
/// surviving child. Hidden nodes never survive. Verdicts and materialized subtrees are cached per client,
/// so a denied node's children are never evaluated and a subtree already
/// built for this client and generation is reused as is.
pub struct SuggestionTreeBuilder<'a> {
    cache: &'a PermissionCache,
}

impl<'a> SuggestionTreeBuilder<'a> {
    pub fn new(cache: &'a PermissionCache) -> Self {
        Self { cache }
    }

    pub fn build(
        &self,
        client: ClientId,
        cause: &CommandCause,
        snapshot: &TreeSnapshot,
    ) -> SuggestionNode {
        let root = snapshot.dispatcher.root();
        let state = self.cache.state(client, snapshot.generation);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tree = SuggestionNode::shallow(root);
        self.fill(root, &mut tree, cause, &mut state);
        for (key, target) in root.redirects() {
            if tree.child(target).is_some() {
                tree.push_child(Arc::new(SuggestionNode::alias(key, target)));
            }
        }
        prune_dangling_redirects(&mut tree);
        limit_custom_suggestions(&mut tree);
        trace!(
            %client,
            generation = snapshot.generation,
            nodes = tree.len(),
            "built client command tree"
        );
        tree
    }

    fn fill(
        &self,
        node: &CommandNode,
        out: &mut SuggestionNode,
        cause: &CommandCause,
        state: &mut ClientSuggestionState,
    ) {
        for child in node.children().filter(|c| !c.is_hidden()) {
            if let Some(resolved) = state.resolved.get(&child.id()) {
                self.cache.record_reuse();
                if let Some(resolved) = resolved.clone() {
                    out.push_child(resolved);
                }
                continue;
            }
            if !self.cache.check(state, child, cause) {
                state.resolved.insert(child.id(), None);
                continue;
            }
            let mut built = SuggestionNode::shallow(child);
            self.fill(child, &mut built, cause, state);
            let keep = built.is_executable() || built.redirect().is_some() || !built.is_empty();
            let materialized = keep.then(|| Arc::new(built));
            state.resolved.insert(child.id(), materialized.clone());
            if let Some(materialized) = materialized {
                out.push_child(materialized);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::CanonicalTree;
    use crate::cause::StaticSubject;
    use crate::node::{argument, literal};
    use crate::suggestion::provider_fn;
    use lodestone_api::ArgKind;

    fn tree() -> CanonicalTree {
        let tree = CanonicalTree::new();
        tree.mutate(|d| {
            d.register(
                literal("home")
                    .executes(|_| Ok(1))
                    .then(
                        literal("admin")
                            .requires_permission("home.admin")
                            .then(literal("reload").executes(|_| Ok(1))),
                    )
                    .then(literal("empty"))
                    .then(literal("secret").hidden().executes(|_| Ok(1))),
            )?;
            d.add_alias("h", "home")?;
            d.register(
                literal("tp").then(
                    argument("target", ArgKind::Word)
                        .suggests(provider_fn(|_, _| Vec::new()))
                        .executes(|_| Ok(1)),
                ),
            )?;
            Ok(())
        })
        .unwrap();
        tree
    }

    fn cause(perms: &[&str]) -> CommandCause {
        CommandCause::new(Arc::new(StaticSubject::new("p", perms.iter().copied())))
    }

    #[test]
    fn test_pruning() {
        let tree = tree();
        let cache = PermissionCache::new();
        let built = SuggestionTreeBuilder::new(&cache).build(
            ClientId::new(1),
            &cause(&[]),
            &tree.snapshot(),
        );
        let home = built.child("home").unwrap();
        assert!(home.child("admin").is_none());
        assert!(home.child("empty").is_none());
        assert!(home.child("secret").is_none());
        assert_eq!(built.child("h").unwrap().redirect(), Some(&["home".to_string()][..]));
        assert!(built.find(&["tp", "target"]).unwrap().has_custom_suggestions());

        let admin = SuggestionTreeBuilder::new(&cache).build(
            ClientId::new(2),
            &cause(&["home.admin"]),
            &tree.snapshot(),
        );
        assert!(admin.find(&["home", "admin", "reload"]).is_some());
    }

    #[test]
    fn test_rebuild_reuses_subtrees() {
        let tree = tree();
        let cache = PermissionCache::new();
        let builder = SuggestionTreeBuilder::new(&cache);
        let snapshot = tree.snapshot();
        let first = builder.build(ClientId::new(1), &cause(&[]), &snapshot);
        let checks = cache.stats().permission_checks;
        let second = builder.build(ClientId::new(1), &cause(&[]), &snapshot);
        assert_eq!(first, second);
        assert_eq!(cache.stats().permission_checks, checks);
        assert!(cache.stats().subtree_reuses >= 2);
    }

    #[test]
    fn test_denied_children_never_evaluated() {
        let tree = CanonicalTree::new();
        tree.mutate(|d| {
            d.register(
                literal("locked")
                    .requires(|_| false)
                    .then(literal("inner").requires(|_| panic!("evaluated")).executes(|_| Ok(1))),
            )
            .map(|_| ())
        })
        .unwrap();
        let cache = PermissionCache::new();
        let built = SuggestionTreeBuilder::new(&cache).build(
            ClientId::new(1),
            &CommandCause::console(),
            &tree.snapshot(),
        );
        assert!(built.is_empty());
    }
}
