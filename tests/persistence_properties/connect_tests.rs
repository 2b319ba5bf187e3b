//! Role-aware connect.

use relaystate::store::testing::MemoryStore;
use relaystate::store::{ConnectOptions, Role, StoreConnection, StoreError};
use std::time::Duration;

fn options(role: Role, role_wait: u32) -> ConnectOptions {
    ConnectOptions {
        role,
        role_wait,
        retry_delay: Duration::from_millis(1),
        ..ConnectOptions::new("127.0.0.1", 6379)
    }
}

#[test]
fn test_replica_fails_after_wait_budget() {
    let store = MemoryStore::new();
    store.set_role(Role::Replica);
    let err = StoreConnection::connect(store.connector(), options(Role::Master, 3)).unwrap_err();
    assert!(matches!(err, StoreError::RoleMismatch { attempts: 4, .. }), "{}", err);
    assert_eq!(store.command_count("INFO"), 4);
}

#[test]
fn test_master_connects_first_attempt() {
    let store = MemoryStore::new();
    store.set_role(Role::Master);
    let conn = StoreConnection::connect(store.connector(), options(Role::Master, 3)).unwrap();
    assert!(conn.is_connected());
    assert_eq!(store.command_count("INFO"), 1);
}
