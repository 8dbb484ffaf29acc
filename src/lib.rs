pub mod algorithms;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod connections;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod handles;
pub mod invariants;
pub mod materializer;
pub mod memory;
pub mod models;
pub mod operations;
pub mod permissions;
pub mod projector;
pub mod registry;
pub mod store;
pub mod tree;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{FamilyTreeApp, HasStore, ResolvesIdentity};
    pub use crate::config::ServerConfig;
    pub use crate::connections::{
        create_connection, delete_connection, delete_node_with_connections, update_connection,
    };
    #[cfg(feature = "sqlx")]
    pub use crate::db::{PgFamilyStore, create_family_tables};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::invariants::{TreeInvariantViolation, tree_invariant_violations};
    pub use crate::materializer::ensure_nodes_for_family;
    pub use crate::memory::MemoryStore;
    pub use crate::models::{
        Connection, ConnectionId, Family, FamilyCode, FamilyId, FamilyTreeView, NodeId,
        RelationshipType, TreeNode, User, UserId,
    };
    pub use crate::operations::{FamilyTreeOperations, TreeOperation, TreeOperationResult};
    pub use crate::permissions::Identity;
    pub use crate::projector::refresh_member_array;
    pub use crate::registry::{
        leave_family, register_member, remove_member, set_verification_status, transfer_root,
    };
    pub use crate::store::FamilyStore;
    pub use crate::tree::{audit_family, get_family_tree, save_layout, search_nodes};
}
