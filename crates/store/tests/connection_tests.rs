//! Store Connection Tests
//!
//! Handshake, role check, health check and pipelining against the
//! in-memory simulated store.

use relaystate_store::testing::{MemoryStore, StoredValue};
use relaystate_store::{
    Command, ConnectOptions, ConnectionState, Role, StoreConnection, StoreError, CALLS_KEY,
};
use std::collections::BTreeMap;
use std::time::Duration;

fn opts(role: Role, role_wait: u32) -> ConnectOptions {
    let mut o = ConnectOptions::new("127.0.0.1", 6379);
    o.role = role;
    o.role_wait = role_wait;
    o.retry_delay = Duration::from_millis(1);
    o
}

// ============================================================================
// Role-aware connect
// ============================================================================

#[test]
fn test_master_role_connects_first_attempt() {
    let store = MemoryStore::new();
    let conn = StoreConnection::connect(store.connector(), opts(Role::Master, 5)).unwrap();
    assert!(conn.is_connected());
    assert_eq!(store.command_count("INFO"), 1);
}

#[test]
fn test_replica_when_master_wanted_exhausts_retries() {
    let store = MemoryStore::new();
    store.set_role(Role::Replica);
    let err = StoreConnection::connect(store.connector(), opts(Role::Master, 3)).unwrap_err();
    match err {
        StoreError::RoleMismatch { wanted, attempts, .. } => {
            assert_eq!(wanted, Role::Master);
            assert_eq!(attempts, 4);
        }
        other => panic!("Wrong error variant: {other:?}"),
    }
    assert_eq!(store.command_count("INFO"), 4);
}

#[test]
fn test_any_role_accepts_replica() {
    let store = MemoryStore::new();
    store.set_role(Role::Replica);
    assert!(StoreConnection::connect(store.connector(), opts(Role::Any, 0)).is_ok());
    // no role wanted, so the role is never asked for
    assert_eq!(store.command_count("INFO"), 0);
}

#[test]
fn test_optional_store_starts_disconnected() {
    let store = MemoryStore::new();
    store.set_available(false);
    let mut o = opts(Role::Any, 0);
    assert!(StoreConnection::connect(store.connector(), o.clone()).is_err());

    o.optional = true;
    let conn = StoreConnection::connect(store.connector(), o).unwrap();
    assert!(!conn.is_connected());
    assert_eq!(conn.session().check_connection(), ConnectionState::Disconnected);

    store.set_available(true);
    assert_eq!(conn.session().check_connection(), ConnectionState::Reconnected);
    assert_eq!(conn.session().check_connection(), ConnectionState::Connected);
}

#[test]
fn test_auth_sent_when_configured() {
    let store = MemoryStore::new();
    store.require_password("secret");

    let mut o = opts(Role::Any, 0);
    assert!(matches!(
        StoreConnection::connect(store.connector(), o.clone()),
        Err(StoreError::Server(_))
    ));

    o.auth = Some("wrong".to_string());
    assert!(matches!(
        StoreConnection::connect(store.connector(), o.clone()),
        Err(StoreError::Auth { .. })
    ));

    o.auth = Some("secret".to_string());
    assert!(StoreConnection::connect(store.connector(), o).is_ok());
    assert_eq!(store.command_count("AUTH"), 2);
}

#[test]
fn test_handshake_selects_database() {
    let store = MemoryStore::new();
    let mut o = opts(Role::Any, 0);
    o.db = 4;
    let conn = StoreConnection::connect(store.connector(), o).unwrap();
    let mut s = conn.session();
    s.request(&Command::Set {
        key: "k".to_string(),
        value: b"v".to_vec(),
    })
    .unwrap();
    assert_eq!(s.db(), 4);
    assert!(store.exists(4, "k"));
}

#[test]
fn test_wrongly_typed_call_index_is_deleted() {
    let store = MemoryStore::new();
    store.put(0, CALLS_KEY, StoredValue::Hash(BTreeMap::new()));
    StoreConnection::connect(store.connector(), opts(Role::Any, 0)).unwrap();
    assert!(!store.exists(0, CALLS_KEY));

    store.put(0, CALLS_KEY, StoredValue::Set(["c1".to_string()].into_iter().collect()));
    StoreConnection::connect(store.connector(), opts(Role::Any, 0)).unwrap();
    assert!(store.exists(0, CALLS_KEY));
}

// ============================================================================
// Health check
// ============================================================================

#[test]
fn test_check_connection_transitions() {
    let store = MemoryStore::new();
    let conn = StoreConnection::connect(store.connector(), opts(Role::Any, 0)).unwrap();
    assert_eq!(conn.session().check_connection(), ConnectionState::Connected);

    store.drop_connections();
    assert_eq!(conn.session().check_connection(), ConnectionState::Reconnected);

    store.set_available(false);
    assert_eq!(conn.session().check_connection(), ConnectionState::Disconnected);
    assert_eq!(conn.session().check_connection(), ConnectionState::Disconnected);
    assert!(!conn.is_connected());

    store.set_available(true);
    assert_eq!(conn.session().check_connection(), ConnectionState::Reconnected);
}

// ============================================================================
// Pipelining
// ============================================================================

#[test]
fn test_pipeline_is_flushed_before_request() {
    let store = MemoryStore::new();
    let conn = StoreConnection::connect(store.connector(), opts(Role::Any, 0)).unwrap();
    let mut s = conn.session();
    s.pipe(Command::SAdd {
        key: "set".to_string(),
        members: vec!["a".to_string()],
    });
    s.pipe(Command::expire("set", 60));
    assert_eq!(s.pending(), 2);
    assert!(!store.exists(0, "set"));

    let members = s
        .request(&Command::SMembers("set".to_string()))
        .unwrap()
        .into_text_list()
        .unwrap();
    assert_eq!(members, vec!["a".to_string()]);
    assert_eq!(s.pending(), 0);
    assert_eq!(store.ttl(0, "set"), Some(60));
}

#[test]
fn test_pipeline_error_drops_transport() {
    let store = MemoryStore::new();
    let conn = StoreConnection::connect(store.connector(), opts(Role::Any, 0)).unwrap();
    let mut s = conn.session();
    s.pipe(Command::del("a"));
    s.pipe(Command::del("b"));
    store.fail_next("DEL");
    assert!(matches!(s.consume(), Err(StoreError::Server(_))));
    assert!(!s.is_connected());
    assert_eq!(s.pending(), 0);
    assert!(matches!(s.request(&Command::Ping), Err(StoreError::Disconnected)));
    assert_eq!(s.check_connection(), ConnectionState::Reconnected);
}

#[test]
fn test_duplicate_opens_new_transport() {
    let store = MemoryStore::new();
    let conn = StoreConnection::connect(store.connector(), opts(Role::Any, 0)).unwrap();
    let before = store.connections_opened();
    let other = conn.duplicate().unwrap();
    assert!(other.is_connected());
    assert_eq!(store.connections_opened(), before + 1);
}
