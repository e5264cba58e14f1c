//! The shared command tree every client's view is derived from.

use std::sync::{PoisonError, RwLock};

use tracing::trace;

use crate::dispatcher::Dispatcher;
use crate::error::RegistrationError;

/// Immutable view of the canonical tree at one generation.
#[derive(Clone, Debug)]
pub struct TreeSnapshot {
    pub dispatcher: Dispatcher,
    pub generation: u64,
}

#[derive(Debug)]
struct CanonicalState {
    dispatcher: Dispatcher,
    generation: u64,
}

/// Canonical tree plus a generation counter bumped on every mutation.
///
/// Mutations are all-or-nothing: they run against a copy and are published
/// only when they succeed.
#[derive(Debug)]
pub struct CanonicalTree {
    state: RwLock<CanonicalState>,
}

impl Default for CanonicalTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalTree {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CanonicalState {
                dispatcher: Dispatcher::new(),
                generation: 0,
            }),
        }
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        TreeSnapshot {
            dispatcher: state.dispatcher.clone(),
            generation: state.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    pub(crate) fn mutate<R>(
        &self,
        f: impl FnOnce(&mut Dispatcher) -> Result<R, RegistrationError>,
    ) -> Result<R, RegistrationError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut working = state.dispatcher.clone();
        let result = f(&mut working)?;
        state.dispatcher = working;
        state.generation += 1;
        trace!(generation = state.generation, "canonical tree mutated");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::literal;

    #[test]
    fn test_failed_mutation_is_not_published() {
        let tree = CanonicalTree::new();
        tree.mutate(|d| d.register(literal("home")).map(|_| ()))
            .unwrap();
        assert_eq!(tree.generation(), 1);

        let result = tree.mutate(|d| {
            d.register(literal("warp"))?;
            d.register(literal("home"))?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(tree.generation(), 1);
        assert!(tree.snapshot().dispatcher.find_node(&["warp"]).is_none());
    }

    #[test]
    fn test_snapshot_is_stable() {
        let tree = CanonicalTree::new();
        let before = tree.snapshot();
        tree.mutate(|d| d.register(literal("home")).map(|_| ()))
            .unwrap();
        assert!(before.dispatcher.find_node(&["home"]).is_none());
        assert!(tree.snapshot().dispatcher.find_node(&["home"]).is_some());
    }
}
