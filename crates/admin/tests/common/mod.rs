//! Shared fixture: a two-member topology (primary + secondary) backed by
//! mock instances and an in-memory metastore, plus a standalone candidate.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use uuid::Uuid;

use meridian_instance::{Credentials, Instance, ServerVersion};
use meridian_instance_mock::{MockConnector, MockInstance};
use meridian_metastore::{MetadataWrite, Metastore};
use meridian_metastore_memory::MemoryMetastore;
use meridian_topology::{
    NodeAddress, NodeId, NodeRecord, NodeRole, NodeState, ServerId, TransactionSet,
};

/// Source UUID used for all test transaction sets
pub const SRC: &str = "11111111-1111-1111-1111-111111111111";

pub fn addr(s: &str) -> NodeAddress {
    NodeAddress::parse(s).expect("test address must parse")
}

pub fn txset(s: &str) -> TransactionSet {
    s.parse().expect("test transaction set must parse")
}

pub fn credentials() -> Credentials {
    Credentials::with_password("admin", "secret")
}

pub struct Fixture {
    pub connector: MockConnector,
    pub store: MemoryMetastore,
    pub primary: MockInstance,
    pub secondary: MockInstance,
    pub candidate: MockInstance,
    pub primary_addr: NodeAddress,
    pub secondary_addr: NodeAddress,
    pub candidate_addr: NodeAddress,
}

/// Build the fixture: primary (server 1, writable, history 1-100),
/// secondary (server 2, read-only, same history), candidate (server 3,
/// standalone, history 1-50). All reachable.
pub async fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let connector = MockConnector::new();
    let store = MemoryMetastore::new();

    let primary_addr = addr("db1:7401");
    let secondary_addr = addr("db2:7401");
    let candidate_addr = addr("db3:7401");

    let primary = MockInstance::new(primary_addr.clone(), 1);
    primary.set_node_id(NodeId::new(Uuid::from_u128(1))).await;
    primary.set_applied(txset(&format!("{SRC}:1-100"))).await;

    let secondary = MockInstance::new(secondary_addr.clone(), 2);
    secondary.set_node_id(NodeId::new(Uuid::from_u128(2))).await;
    secondary
        .set_state(NodeState::Online { writable: false })
        .await;
    secondary.set_applied(txset(&format!("{SRC}:1-100"))).await;

    let candidate = MockInstance::new(candidate_addr.clone(), 3);
    candidate.set_node_id(NodeId::new(Uuid::from_u128(3))).await;
    candidate.set_applied(txset(&format!("{SRC}:1-50"))).await;

    connector.register(primary.clone()).await;
    connector.register(secondary.clone()).await;
    connector.register(candidate.clone()).await;

    register_member(&store, &primary, NodeRole::Member, true).await;
    register_member(&store, &secondary, NodeRole::Member, false).await;

    Fixture {
        connector,
        store,
        primary,
        secondary,
        candidate,
        primary_addr,
        secondary_addr,
        candidate_addr,
    }
}

pub async fn register_member(
    store: &MemoryMetastore,
    instance: &MockInstance,
    role: NodeRole,
    writable: bool,
) {
    let id = instance.node_id().await.unwrap();
    let server_id = instance.server_id().await.unwrap();
    let address = instance.canonical_address().await.unwrap();
    let mut record = NodeRecord::new(id, server_id, address, role);
    record.state = NodeState::Online { writable };
    store
        .apply(&[MetadataWrite::InsertNode(record)])
        .await
        .expect("fixture member must register");
}

/// A standalone server registered nowhere, with the given server id
pub async fn standalone(
    connector: &MockConnector,
    address: &NodeAddress,
    server_id: u32,
    id: u128,
) -> MockInstance {
    let instance = MockInstance::new(address.clone(), server_id);
    instance.set_node_id(NodeId::new(Uuid::from_u128(id))).await;
    connector.register(instance.clone()).await;
    instance
}

/// Convenience: does any executed statement on `instance` contain `needle`?
pub async fn executed_contains(instance: &MockInstance, needle: &str) -> bool {
    instance
        .executed_statements()
        .await
        .iter()
        .any(|sql| sql.contains(needle))
}

pub fn server_version(s: &str) -> ServerVersion {
    s.parse().expect("test version must parse")
}

pub fn node_id(n: u128) -> NodeId {
    NodeId::new(Uuid::from_u128(n))
}

pub fn server_id(n: u32) -> ServerId {
    ServerId(n)
}
