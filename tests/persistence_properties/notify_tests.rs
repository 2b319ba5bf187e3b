//! Ownership guard of the change-notification listener.

use crate::test_utils::*;
use std::sync::Arc;

fn follower(store: &MemoryStore, table: &Arc<CallTable>, port: u16) -> Persistence {
    let config = PersistConfig {
        notify: Some(NotifyConfig {
            store: StoreConfig::default(),
            keyspaces: vec![0],
        }),
        ..PersistConfig::default()
    };
    Persistence::connect(config, store.connector(), Arc::clone(table), interfaces(port)).unwrap()
}

#[test]
fn test_delete_of_own_call_is_ignored_and_foreign_is_destroyed() {
    init_tracing();
    let store = MemoryStore::new();

    let owner_intf = interfaces(39000);
    let owner_table = Arc::new(CallTable::new());
    let owner = open(&store, StorageMode::MultiKey, &owner_table, &owner_intf);

    let local_table = Arc::new(CallTable::new());
    let local = follower(&store, &local_table, 39000);
    let notifier = local.start_notifier().unwrap().unwrap();
    wait_for("subscription", || notifier.is_subscribed());

    // a peer call gets mirrored as foreign
    let peer = register(&owner_table, rich_call(&owner_intf, "peer", 39000, 1));
    assert!(owner.persist(&peer).is_written());
    wait_for("mirror", || local_table.lookup(&CallId::new("peer")).is_some());
    assert!(local_table.lookup(&CallId::new("peer")).unwrap().is_foreign());

    // a local own call shares an id with a peer call that gets deleted
    let mine_intf = interfaces(39300);
    let mine = register(&local_table, rich_call(&mine_intf, "mine", 39300, 1));
    let twin = register(&owner_table, rich_call(&owner_intf, "mine", 39010, 1));
    assert!(owner.persist(&twin).is_written());
    assert!(owner.delete(&twin).is_written());

    assert!(owner.delete(&peer).is_written());
    wait_for("foreign destroyed", || local_table.lookup(&CallId::new("peer")).is_none());

    // notifications are handled in order, so the own call has seen both
    let still = local_table.lookup(&CallId::new("mine")).unwrap();
    assert!(Arc::ptr_eq(&still, &mine));
    assert!(!mine.is_destroyed());
    assert_eq!(mine.state().read().num_sockets(), 2);
    notifier.shutdown();
}
