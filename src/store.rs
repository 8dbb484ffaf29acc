use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Connection, ConnectionId, ConnectionKey, Family, FamilyCode, FamilyId, HydratedNode,
    MemberSnapshot, NodeId, NodeStyle, Position, TreeNode, User, UserId,
};

/// Repository boundary over the document store.
///
/// Every method is a single independent write or read; there are no
/// cross-collection transactions. Unique indexes are enforced here and
/// surface as `ErrorKind::Conflict`:
///
/// * users: `email`, `login_id`
/// * families: `code`
/// * nodes: `(family_id, user_id)`
/// * connections: `(family_id, source, target, type, label)`
#[async_trait]
pub trait FamilyStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;
    async fn update_user(&self, user: &User) -> Result<()>;
    /// Users carrying `code`, ordered by join time then insertion order.
    async fn list_family_users(&self, code: &FamilyCode) -> Result<Vec<User>>;

    async fn insert_family(&self, family: &Family) -> Result<()>;
    async fn get_family(&self, family_id: FamilyId) -> Result<Option<Family>>;
    async fn get_family_by_code(&self, code: &FamilyCode) -> Result<Option<Family>>;
    async fn update_family(&self, family: &Family) -> Result<()>;

    async fn insert_node(&self, node: &TreeNode) -> Result<()>;
    async fn get_node(&self, node_id: NodeId) -> Result<Option<TreeNode>>;
    /// Nodes of a family in insertion order.
    async fn list_nodes(&self, family_id: FamilyId) -> Result<Vec<TreeNode>>;
    /// Nodes of a family joined to their owning users, in insertion order.
    async fn list_hydrated_nodes(&self, family_id: FamilyId) -> Result<Vec<HydratedNode>>;
    /// Returns `false` when the node does not exist.
    async fn update_node_layout(
        &self,
        node_id: NodeId,
        position: Position,
        style: &NodeStyle,
    ) -> Result<bool>;
    async fn delete_nodes(&self, node_ids: &[NodeId]) -> Result<usize>;

    async fn insert_connection(&self, connection: &Connection) -> Result<()>;
    async fn get_connection(&self, connection_id: ConnectionId) -> Result<Option<Connection>>;
    async fn find_connection(&self, key: &ConnectionKey) -> Result<Option<Connection>>;
    async fn list_connections(&self, family_id: FamilyId) -> Result<Vec<Connection>>;
    async fn update_connection(&self, connection: &Connection) -> Result<()>;
    async fn delete_connection(&self, connection_id: ConnectionId) -> Result<bool>;
    /// Deletes every edge whose source or target is in `node_ids`.
    async fn delete_connections_touching(&self, node_ids: &[NodeId]) -> Result<usize>;

    async fn upsert_member_snapshot(&self, snapshot: &MemberSnapshot) -> Result<()>;
    async fn get_member_snapshot(&self, code: &FamilyCode) -> Result<Option<MemberSnapshot>>;
}
