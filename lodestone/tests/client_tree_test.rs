//! Per-client command trees

use std::collections::HashMap;
use std::sync::Arc;

use lodestone::{
    argument, literal, provider_fn, ArgKind, ArgSpec, ClientId, CommandCause, CommandManager,
    CommandNode, CommandResult, CommandSpec, ManagedCommand, NodeId, PluginId, StaticSubject, SuggestionNode,
};
use lodestone_api::wire::WireNodeKind;

fn player(name: &str, perms: &[&str]) -> CommandCause {
    CommandCause::new(Arc::new(StaticSubject::new(name, perms.iter().copied())))
}

fn index<'a>(node: &'a Arc<CommandNode>, out: &mut HashMap<NodeId, &'a Arc<CommandNode>>) {
    out.insert(node.id(), node);
    for child in node.children() {
        index(child, out);
    }
}

/// Every node handed to a client is usable by it and leads somewhere.
fn assert_sound(
    node: &SuggestionNode,
    canonical: &HashMap<NodeId, &Arc<CommandNode>>,
    cause: &CommandCause,
) {
    for child in node.children() {
        if let Some(id) = child.id() {
            let source = canonical.get(&id).expect("node comes from the canonical tree");
            assert!(source.can_use(cause), "{} is not usable", child.name());
            assert!(!source.is_hidden(), "{} is hidden", child.name());
        }
        assert!(
            child.is_executable() || child.redirect().is_some() || !child.is_empty(),
            "{} is a dead end",
            child.name()
        );
        assert_sound(child, canonical, cause);
    }
}

fn populated() -> CommandManager {
    let manager = CommandManager::new();
    let core = PluginId::new("core");
    manager
        .register_native(
            &core,
            literal("gamemode")
                .requires_permission("core.gamemode")
                .then(literal("creative").executes(|_| Ok(1)))
                .then(literal("survival").executes(|_| Ok(1))),
            &["gm"],
        )
        .unwrap();
    manager
        .register_native(
            &core,
            literal("spawn")
                .executes(|_| Ok(1))
                .then(literal("set").requires_permission("core.spawn.set").executes(|_| Ok(1)))
                .then(literal("debug").hidden().executes(|_| Ok(1))),
            &[],
        )
        .unwrap();
    manager
        .register_native(&core, literal("placeholder"), &[])
        .unwrap();

    let spec = CommandSpec::new("warp", "Teleport to a warp")
        .arg(ArgSpec::word("name").required().ask_server());
    manager
        .register_managed(
            &PluginId::new("warps"),
            ManagedCommand::new(spec).executor(|_| Ok(CommandResult::success())),
            "warp",
            &["w"],
        )
        .unwrap();
    manager
}

#[test]
fn test_pruned_tree_is_sound() {
    lodestone::init_for_tests();
    let manager = populated();
    let snapshot = manager.snapshot();
    let mut canonical = HashMap::new();
    index(snapshot.dispatcher.root(), &mut canonical);

    for (client, cause) in [
        (1, player("guest", &[])),
        (2, player("builder", &["core.gamemode"])),
        (3, player("admin", &["*"])),
    ] {
        let tree = manager.build_client_tree(ClientId::new(client), &cause);
        assert_sound(&tree, &canonical, &cause);
        assert!(tree.child("placeholder").is_none());
        assert!(tree.find(&["spawn", "debug"]).is_none());
    }

    let guest = manager.build_client_tree(ClientId::new(1), &player("guest", &[]));
    assert!(guest.child("gamemode").is_none());
    assert!(guest.child("gm").is_none());
    assert!(guest.find(&["spawn", "set"]).is_none());

    let builder = manager.build_client_tree(ClientId::new(2), &player("builder", &["core.gamemode"]));
    assert!(builder.find(&["gamemode", "creative"]).is_some());
    assert_eq!(builder.child("gm").unwrap().redirect(), Some(&["gamemode".to_string()][..]));
}

#[test]
fn test_secondary_alias_redirects_in_packet() {
    let manager = populated();
    let packet = manager.client_tree_packet(ClientId::new(1), &CommandCause::console());
    let warp = packet.find(&["warp"]).unwrap();
    let alias = packet.find(&["w"]).unwrap();
    assert_eq!(packet.get(alias).unwrap().redirect, Some(warp));
    assert!(packet.get(alias).unwrap().children.is_empty());

    let decoded = lodestone::TreePacket::decode(&packet.encode().unwrap()).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_redirect_to_denied_command_is_pruned() {
    let manager = CommandManager::new();
    let core = PluginId::new("core");
    manager
        .register_native(
            &core,
            literal("admin")
                .requires_permission("core.admin")
                .then(literal("reload").executes(|_| Ok(1))),
            &[],
        )
        .unwrap();
    manager
        .register_native(&core, literal("sudo").redirect(["admin"]), &[])
        .unwrap();
    manager
        .register_native(
            &core,
            literal("again").then(literal("sudo").redirect(["sudo"])),
            &[],
        )
        .unwrap();

    let guest = player("guest", &[]);
    let tree = manager.build_client_tree(ClientId::new(1), &guest);
    assert!(tree.child("sudo").is_none());
    assert!(tree.child("again").is_none());
    let packet = manager.client_tree_packet(ClientId::new(1), &guest);
    assert!(packet.find(&["sudo"]).is_none());
    assert!(packet.find(&["again"]).is_none());
    assert_eq!(packet.len(), 1);
    assert!(manager.process(&guest, "sudo reload").is_err());

    let admin = player("admin", &["core.admin"]);
    let packet = manager.client_tree_packet(ClientId::new(2), &admin);
    let sudo = packet.find(&["sudo"]).unwrap();
    assert_eq!(packet.get(sudo).unwrap().redirect, packet.find(&["admin"]));
    let nested = packet.find(&["again", "sudo"]).unwrap();
    assert_eq!(packet.get(nested).unwrap().redirect, Some(sudo));
    assert_eq!(manager.process(&admin, "sudo reload").unwrap().result(), 1);
}

#[test]
fn test_single_custom_suggestion_node() {
    let manager = CommandManager::new();
    let owner = PluginId::new("core");
    let names = provider_fn(|_, _| vec!["alice".to_string(), "bob".to_string()]);
    manager
        .register_native(
            &owner,
            literal("msg")
                .then(argument("player", ArgKind::Word).suggests(names.clone()).executes(|_| Ok(1)))
                .then(
                    argument("channel", ArgKind::Integer { min: Some(0), max: None })
                        .suggests(names.clone())
                        .executes(|_| Ok(1)),
                ),
            &[],
        )
        .unwrap();
    manager
        .register_native(
            &owner,
            literal("pay").then(argument("to", ArgKind::Word).suggests(names).executes(|_| Ok(1))),
            &[],
        )
        .unwrap();

    let cause = CommandCause::console();
    let packet = manager.client_tree_packet(ClientId::new(1), &cause);
    assert_eq!(packet.ask_server_count(), 1);
    let player = packet.find(&["msg", "player"]).unwrap();
    assert!(packet.get(player).unwrap().asks_server());
    let channel = packet.find(&["msg", "channel"]).unwrap();
    assert!(!packet.get(channel).unwrap().asks_server());
    let to = packet.find(&["pay", "to"]).unwrap();
    assert!(matches!(
        &packet.get(to).unwrap().kind,
        WireNodeKind::Argument { ask_server: false, .. }
    ));

    // The canonical tree keeps every provider
    let snapshot = manager.snapshot();
    assert!(snapshot
        .dispatcher
        .find_node(&["pay", "to"])
        .unwrap()
        .custom_suggestions()
        .is_some());
}

#[test]
fn test_cache_follows_canonical_changes() {
    let manager = populated();
    let client = ClientId::new(7);
    let cause = player("guest", &[]);
    let before = manager.build_client_tree(client, &cause);
    assert!(before.child("heal").is_none());

    let mapping = manager
        .register_native(&PluginId::new("core"), literal("heal").executes(|_| Ok(1)), &[])
        .unwrap();
    let during = manager.build_client_tree(client, &cause);
    assert!(during.child("heal").is_some());

    manager.unregister(&mapping);
    let after = manager.build_client_tree(client, &cause);
    assert!(after.child("heal").is_none());
    assert_eq!(after, before);
}

#[test]
fn test_cached_verdicts_survive_until_invalidated() {
    let manager = populated();
    let client = ClientId::new(3);
    let first = manager.build_client_tree(client, &player("guest", &[]));
    assert!(first.child("gamemode").is_none());

    // Permissions changed without telling the cache: the old verdict stands
    let promoted = player("guest", &["core.gamemode"]);
    let stale = manager.build_client_tree(client, &promoted);
    assert!(stale.child("gamemode").is_none());

    manager.invalidate_client(client);
    let fresh = manager.build_client_tree(client, &promoted);
    assert!(fresh.child("gamemode").is_some());

    manager.disconnect(client);
    assert!(!manager.permission_cache().is_tracking(client));
}

#[test]
fn test_per_client_predicates() {
    let manager = CommandManager::new();
    manager
        .register_native(
            &PluginId::new("core"),
            literal("secret")
                .requires(|cause| cause.identifier() == "alice")
                .executes(|_| Ok(1)),
            &[],
        )
        .unwrap();
    manager
        .register_native(&PluginId::new("core"), literal("public").executes(|_| Ok(1)), &[])
        .unwrap();

    let alice = player("alice", &[]);
    let bob = player("bob", &[]);
    let handles: Vec<SuggestionNode> = std::thread::scope(|scope| {
        let spawned: Vec<_> = [(1u64, alice), (2u64, bob)]
            .into_iter()
            .map(|(id, cause)| {
                let manager = &manager;
                scope.spawn(move || manager.build_client_tree(ClientId::new(id), &cause))
            })
            .collect();
        spawned.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(handles[0].child("secret").is_some());
    assert!(handles[1].child("secret").is_none());
    assert!(handles.iter().all(|t| t.child("public").is_some()));

    // Rebuilding after another client's build does not leak verdicts
    let again = manager.build_client_tree(ClientId::new(2), &player("bob", &[]));
    assert!(again.child("secret").is_none());
    assert_eq!(manager.permission_cache().client_count(), 2);
}

/// Subject that counts how often it is asked for a permission
struct CountingSubject {
    checks: std::sync::atomic::AtomicUsize,
}

impl lodestone::Subject for CountingSubject {
    fn identifier(&self) -> &str {
        "counter"
    }

    fn has_permission(&self, _permission: &str) -> bool {
        self.checks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        true
    }
}

#[test]
fn test_rebuild_does_not_requery_subject() {
    use std::sync::atomic::Ordering;

    let manager = populated();
    let subject = Arc::new(CountingSubject {
        checks: Default::default(),
    });
    let cause = CommandCause::new(subject.clone());
    let client = ClientId::new(9);

    let first = manager.build_client_tree(client, &cause);
    let asked = subject.checks.load(Ordering::SeqCst);
    assert!(asked > 0);

    let second = manager.build_client_tree(client, &cause);
    assert_eq!(first, second);
    assert_eq!(subject.checks.load(Ordering::SeqCst), asked);

    // A canonical change forces fresh verdicts
    manager
        .register_native(&PluginId::new("core"), literal("heal").executes(|_| Ok(1)), &[])
        .unwrap();
    manager.build_client_tree(client, &cause);
    assert!(subject.checks.load(Ordering::SeqCst) > asked);
}
