//! Sessions driving the engine end to end

use std::sync::{Arc, Mutex};

use lodestone::{
    ArgSpec, CommandCause, CommandError, CommandManager, CommandResult, CommandSpec,
    Key, ManagedCommand, PluginId, RawCommand, RegistrationError,
};
use lodestone_host::audit::{AuditEventType, MemoryAuditSink};
use lodestone_host::permission::{MemoryPermissionStore, PermissionStore};
use lodestone_host::{Host, HostConfigBuilder, HostPresets, MemoryTransport, SessionManager};

struct Homes {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RawCommand for Homes {
    fn process(&self, cause: &CommandCause, arguments: &str) -> Result<CommandResult, CommandError> {
        self.calls
            .lock()
            .unwrap()
            .push((cause.identifier().to_string(), arguments.to_string()));
        Ok(CommandResult::success())
    }

    fn suggestions(&self, _cause: &CommandCause, arguments: &str) -> Result<Vec<String>, CommandError> {
        Ok(["set", "delete"]
            .iter()
            .filter(|s| s.starts_with(arguments))
            .map(|s| s.to_string())
            .collect())
    }

    fn can_execute(&self, cause: &CommandCause) -> bool {
        cause.has_permission("homes.use")
    }
}

fn setup() -> (
    Arc<CommandManager>,
    Arc<Mutex<Vec<(String, String)>>>,
    Arc<MemoryPermissionStore>,
    Arc<MemoryAuditSink>,
) {
    let manager = Arc::new(CommandManager::new());
    let calls = Arc::new(Mutex::new(Vec::new()));
    manager
        .register_raw(
            &PluginId::new("homes"),
            Homes {
                calls: calls.clone(),
            },
            "home",
            &["h"],
        )
        .unwrap();
    let store = Arc::new(MemoryPermissionStore::with_grants([
        ("alice", &["homes.use"][..]),
        ("bob", &[][..]),
    ]));
    (manager, calls, store, Arc::new(MemoryAuditSink::new()))
}

#[tokio::test]
async fn test_raw_command_through_session() {
    lodestone::init_for_tests();
    let (manager, calls, store, audit) = setup();

    let spec = CommandSpec::new("home", "Competing homes").arg(ArgSpec::word("name"));
    let err = manager
        .register_managed(&PluginId::new("rival"), ManagedCommand::new(spec), "home", &[])
        .unwrap_err();
    assert!(matches!(err, RegistrationError::AliasCollision { .. }));

    let sessions = SessionManager::new(manager, store, audit.clone(), 8);
    let transport = Arc::new(MemoryTransport::new());
    let alice = sessions.connect("alice", transport.clone()).await;

    sessions.submit(alice, "home set base").await.unwrap();
    sessions.submit(alice, "/h delete old base").await.unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            ("alice".to_string(), "set base".to_string()),
            ("alice".to_string(), "delete old base".to_string()),
        ]
    );
    assert_eq!(
        sessions.suggest(alice, "home d", 6).await.unwrap(),
        vec!["delete"]
    );
    assert_eq!(audit.find_by_type(AuditEventType::CommandExecuted).len(), 2);
}

#[tokio::test]
async fn test_trees_follow_each_subject() {
    let (manager, _calls, store, audit) = setup();
    let sessions = SessionManager::new(manager, store, audit, 8);
    let transport = Arc::new(MemoryTransport::new());
    let alice = sessions.connect("alice", transport.clone()).await;
    let bob = sessions.connect("bob", transport.clone()).await;

    sessions.refresh_tree(alice).await.unwrap();
    sessions.refresh_tree(bob).await.unwrap();
    let alice_tree = transport.last_tree(alice).unwrap();
    let bob_tree = transport.last_tree(bob).unwrap();
    assert!(alice_tree.find(&["home", "arguments"]).is_some());
    assert!(alice_tree.find(&["h"]).is_some());
    assert!(bob_tree.find(&["home"]).is_none());
    assert!(bob_tree.find(&["h"]).is_none());

    let err = sessions.submit(bob, "home set base").await.unwrap_err();
    assert!(err.to_string().starts_with("Unknown or incomplete command"));

    // Granting pushes a new tree to bob only
    assert_eq!(sessions.grant("bob", "homes.*").await.unwrap(), 1);
    assert!(transport.last_tree(bob).unwrap().find(&["home"]).is_some());
    assert_eq!(transport.trees(alice).len(), 1);
    sessions.submit(bob, "home set base").await.unwrap();

    // An unchanged tree is not resent
    assert_eq!(sessions.subject_changed("bob").await, 0);
    assert_eq!(transport.trees(bob).len(), 2);
}

#[tokio::test]
async fn test_registration_resync() {
    let (manager, _calls, store, audit) = setup();
    let host = Host::start(
        manager.clone(),
        HostConfigBuilder::new()
            .app_name("resync")
            .store(store)
            .audit(audit.clone())
            .build()
            .unwrap(),
    )
    .await
    .unwrap();
    let transport = Arc::new(MemoryTransport::new());
    let alice = host.sessions().connect("alice", transport.clone()).await;
    let bob = host.sessions().connect("bob", transport.clone()).await;
    host.sessions().refresh_tree(alice).await.unwrap();

    const TARGET: Key<String> = Key::of("target");
    let spec = CommandSpec::new("spawn", "Return to spawn").arg(ArgSpec::word("target"));
    let mapping = manager
        .register_managed(
            &PluginId::new("core"),
            ManagedCommand::new(spec).executor(|ctx| {
                Ok(CommandResult::of(if ctx.get_one(&TARGET)?.is_some() { 2 } else { 1 }))
            }),
            "spawn",
            &[],
        )
        .unwrap();
    assert_eq!(host.commands_changed().await, 2);
    assert!(transport.last_tree(alice).unwrap().find(&["spawn", "target"]).is_some());
    assert_eq!(host.sessions().submit(bob, "spawn").await.unwrap().result(), 1);
    assert_eq!(host.sessions().submit(bob, "spawn steve").await.unwrap().result(), 2);

    manager.unregister(&mapping);
    assert_eq!(host.commands_changed().await, 2);
    assert!(transport.last_tree(bob).unwrap().find(&["spawn"]).is_none());

    host.shutdown().await;
    assert_eq!(
        audit.find_by_type(AuditEventType::SessionDisconnected).len(),
        2
    );
}

#[tokio::test]
async fn test_requests_keep_per_client_order() {
    let manager = Arc::new(CommandManager::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    const N: Key<i64> = Key::of("n");
    manager
        .register_managed(
            &PluginId::new("core"),
            ManagedCommand::new(
                CommandSpec::new("mark", "Record a number").arg(ArgSpec::integer("n").required()),
            )
            .executor(move |ctx| {
                let n = ctx.require_one(&N)?;
                sink.lock()
                    .unwrap()
                    .push((ctx.cause().identifier().to_string(), n));
                Ok(CommandResult::success())
            }),
            "mark",
            &[],
        )
        .unwrap();

    let config = HostPresets::testing();
    let sessions = SessionManager::new(manager, config.store, config.audit, 2);
    let transport = Arc::new(MemoryTransport::new());
    let alice = sessions.connect("alice", transport.clone()).await;
    let bob = sessions.connect("bob", transport.clone()).await;

    let mut tasks = Vec::new();
    for (client, name) in [(alice, "alice"), (bob, "bob")] {
        let sessions = sessions.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..20 {
                sessions.submit(client, format!("mark {}", n)).await.unwrap();
            }
            name
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let seen = seen.lock().unwrap();
    for name in ["alice", "bob"] {
        let order: Vec<i64> = seen
            .iter()
            .filter(|(who, _)| who == name)
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_read_only_store_rejects_grants() {
    let (manager, calls, _store, audit) = setup();
    let store = Arc::new(lodestone_host::permission::ReadOnlyPermissionStore::new(
        MemoryPermissionStore::with_grants([("alice", &["homes.use"][..])]),
    ));
    let sessions = SessionManager::new(manager, store.clone(), audit, 8);
    let alice = sessions
        .connect("alice", Arc::new(MemoryTransport::new()))
        .await;

    assert!(sessions.grant("alice", "homes.admin").await.is_err());
    assert!(store.has_permission("alice", "homes.use").unwrap());
    sessions.submit(alice, "home").await.unwrap();
    assert_eq!(calls.lock().unwrap().len(), 1);
}
