use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{LibError, Result};
use crate::models::{
    Connection, ConnectionId, ConnectionKey, Family, FamilyCode, FamilyId, HydratedNode,
    MemberSnapshot, NodeId, NodeStyle, Position, TreeNode, User, UserId, now,
};
use crate::store::FamilyStore;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    families: Vec<Family>,
    nodes: Vec<TreeNode>,
    connections: Vec<Connection>,
    snapshots: HashMap<FamilyCode, MemberSnapshot>,
}

/// In-process store with the same unique-index semantics as the Postgres
/// schema. Vectors keep insertion order, which the root successor rule and
/// node listing rely on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(what: &'static str, id: impl std::fmt::Display) -> LibError {
    LibError::not_found(what, anyhow!("{} {} not found", what, id))
}

#[async_trait]
impl FamilyStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|existing| existing.id == user.id) {
            return Err(LibError::conflict(
                "User already exists",
                anyhow!("duplicate user id {}", user.id),
            ));
        }
        if tables.users.iter().any(|existing| existing.email == user.email) {
            return Err(LibError::conflict(
                "A user with this email already exists",
                anyhow!("duplicate email {}", user.email),
            ));
        }
        if tables
            .users
            .iter()
            .any(|existing| existing.login_id == user.login_id)
        {
            return Err(LibError::conflict(
                "A user with this login id already exists",
                anyhow!("duplicate login id {}", user.login_id),
            ));
        }
        tables.users.push(user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|user| user.id == user_id).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .iter()
            .any(|existing| existing.id != user.id && existing.email == user.email)
        {
            return Err(LibError::conflict(
                "A user with this email already exists",
                anyhow!("duplicate email {}", user.email),
            ));
        }
        let slot = tables
            .users
            .iter_mut()
            .find(|existing| existing.id == user.id)
            .ok_or_else(|| missing("User not found", user.id))?;
        *slot = user.clone();
        Ok(())
    }

    async fn list_family_users(&self, code: &FamilyCode) -> Result<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables
            .users
            .iter()
            .filter(|user| user.belongs_to(code))
            .cloned()
            .collect();
        // Stable sort: ties keep insertion order, unset join times go last.
        users.sort_by_key(|user| (user.joined_at.is_none(), user.joined_at));
        Ok(users)
    }

    async fn insert_family(&self, family: &Family) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .families
            .iter()
            .any(|existing| existing.id == family.id || existing.code == family.code)
        {
            return Err(LibError::conflict(
                "A family with this code already exists",
                anyhow!("duplicate family code {}", family.code),
            ));
        }
        tables.families.push(family.clone());
        Ok(())
    }

    async fn get_family(&self, family_id: FamilyId) -> Result<Option<Family>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .families
            .iter()
            .find(|family| family.id == family_id)
            .cloned())
    }

    async fn get_family_by_code(&self, code: &FamilyCode) -> Result<Option<Family>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .families
            .iter()
            .find(|family| &family.code == code)
            .cloned())
    }

    async fn update_family(&self, family: &Family) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let slot = tables
            .families
            .iter_mut()
            .find(|existing| existing.id == family.id)
            .ok_or_else(|| missing("Family not found", family.id))?;
        *slot = family.clone();
        Ok(())
    }

    async fn insert_node(&self, node: &TreeNode) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.nodes.iter().any(|existing| {
            existing.id == node.id
                || (existing.family_id == node.family_id && existing.user_id == node.user_id)
        }) {
            return Err(LibError::conflict(
                "A node for this member already exists",
                anyhow!(
                    "duplicate node for user {} in family {}",
                    node.user_id,
                    node.family_id
                ),
            ));
        }
        tables.nodes.push(node.clone());
        Ok(())
    }

    async fn get_node(&self, node_id: NodeId) -> Result<Option<TreeNode>> {
        let tables = self.tables.lock().await;
        Ok(tables.nodes.iter().find(|node| node.id == node_id).cloned())
    }

    async fn list_nodes(&self, family_id: FamilyId) -> Result<Vec<TreeNode>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .nodes
            .iter()
            .filter(|node| node.family_id == family_id)
            .cloned()
            .collect())
    }

    async fn list_hydrated_nodes(&self, family_id: FamilyId) -> Result<Vec<HydratedNode>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .nodes
            .iter()
            .filter(|node| node.family_id == family_id)
            .map(|node| HydratedNode {
                node: node.clone(),
                member: tables
                    .users
                    .iter()
                    .find(|user| user.id == node.user_id)
                    .cloned(),
            })
            .collect())
    }

    async fn update_node_layout(
        &self,
        node_id: NodeId,
        position: Position,
        style: &NodeStyle,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(node) = tables.nodes.iter_mut().find(|node| node.id == node_id) else {
            return Ok(false);
        };
        node.position = position;
        node.style = style.clone();
        node.updated_at = now();
        Ok(true)
    }

    async fn delete_nodes(&self, node_ids: &[NodeId]) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        if let Some(edge) = tables
            .connections
            .iter()
            .find(|edge| node_ids.iter().any(|id| edge.touches(*id)))
        {
            // Mirrors the foreign key on connections: edges must go first.
            return Err(LibError::database(
                "Failed to delete tree nodes",
                anyhow!("connection {} still references a deleted node", edge.id),
            ));
        }
        let before = tables.nodes.len();
        tables.nodes.retain(|node| !node_ids.contains(&node.id));
        Ok(before - tables.nodes.len())
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let key = connection.key();
        if tables.connections.iter().any(|existing| existing.key() == key) {
            return Err(LibError::conflict(
                "This relationship already exists",
                anyhow!("duplicate connection {:?}", key),
            ));
        }
        tables.connections.push(connection.clone());
        Ok(())
    }

    async fn get_connection(&self, connection_id: ConnectionId) -> Result<Option<Connection>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .connections
            .iter()
            .find(|edge| edge.id == connection_id)
            .cloned())
    }

    async fn find_connection(&self, key: &ConnectionKey) -> Result<Option<Connection>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .connections
            .iter()
            .find(|edge| &edge.key() == key)
            .cloned())
    }

    async fn list_connections(&self, family_id: FamilyId) -> Result<Vec<Connection>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .connections
            .iter()
            .filter(|edge| edge.family_id == family_id)
            .cloned()
            .collect())
    }

    async fn update_connection(&self, connection: &Connection) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let key = connection.key();
        if tables
            .connections
            .iter()
            .any(|existing| existing.id != connection.id && existing.key() == key)
        {
            return Err(LibError::conflict(
                "This relationship already exists",
                anyhow!("duplicate connection {:?}", key),
            ));
        }
        let slot = tables
            .connections
            .iter_mut()
            .find(|existing| existing.id == connection.id)
            .ok_or_else(|| missing("Connection not found", connection.id))?;
        *slot = connection.clone();
        Ok(())
    }

    async fn delete_connection(&self, connection_id: ConnectionId) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let before = tables.connections.len();
        tables.connections.retain(|edge| edge.id != connection_id);
        Ok(before != tables.connections.len())
    }

    async fn delete_connections_touching(&self, node_ids: &[NodeId]) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let before = tables.connections.len();
        tables
            .connections
            .retain(|edge| !node_ids.iter().any(|id| edge.touches(*id)));
        Ok(before - tables.connections.len())
    }

    async fn upsert_member_snapshot(&self, snapshot: &MemberSnapshot) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .snapshots
            .insert(snapshot.family_code.clone(), snapshot.clone());
        Ok(())
    }

    async fn get_member_snapshot(&self, code: &FamilyCode) -> Result<Option<MemberSnapshot>> {
        let tables = self.tables.lock().await;
        Ok(tables.snapshots.get(code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{LoginId, RelationshipType, Role, VerificationStatus};

    fn user(email: &str) -> User {
        let now = now();
        User {
            id: UserId::generate(),
            email: email.to_string(),
            login_id: LoginId::generate(),
            name: email.to_string(),
            family_code: None,
            verification_status: VerificationStatus::Pending,
            role: Role::Citizen,
            gender: None,
            date_of_birth: None,
            place_of_birth: None,
            father_name: None,
            mother_name: None,
            joined_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn node(family_id: FamilyId, user_id: UserId) -> TreeNode {
        let now = now();
        TreeNode {
            id: NodeId::generate(),
            family_id,
            user_id,
            position: Position::default(),
            style: NodeStyle::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = MemoryStore::new();
        store.insert_user(&user("a@x.io")).await.expect("first insert");
        let err = store
            .insert_user(&user("a@x.io"))
            .await
            .expect_err("duplicate email");
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn second_node_for_same_member_is_a_conflict() {
        let store = MemoryStore::new();
        let family_id = FamilyId::generate();
        let user_id = UserId::generate();
        store
            .insert_node(&node(family_id, user_id))
            .await
            .expect("first node");
        let err = store
            .insert_node(&node(family_id, user_id))
            .await
            .expect_err("duplicate node");
        assert!(err.is_conflict());

        store
            .insert_node(&node(FamilyId::generate(), user_id))
            .await
            .expect("same user in another family is a different key");
    }

    #[tokio::test]
    async fn nodes_with_edges_cannot_be_deleted_first() {
        let store = MemoryStore::new();
        let family_id = FamilyId::generate();
        let a = node(family_id, UserId::generate());
        let b = node(family_id, UserId::generate());
        store.insert_node(&a).await.expect("node a");
        store.insert_node(&b).await.expect("node b");
        let now = now();
        store
            .insert_connection(&Connection {
                id: ConnectionId::generate(),
                family_id,
                source_node_id: a.id,
                target_node_id: b.id,
                source_handle: None,
                target_handle: None,
                relationship_type: RelationshipType::Sibling,
                relationship_label: "Brother".to_string(),
                style: Default::default(),
                created_by: a.user_id,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("edge");

        let err = store.delete_nodes(&[a.id]).await.expect_err("dangling edge");
        assert_eq!(err.kind, ErrorKind::Database);

        assert_eq!(store.delete_connections_touching(&[a.id]).await.expect("edges"), 1);
        assert_eq!(store.delete_nodes(&[a.id]).await.expect("node"), 1);
    }

    #[tokio::test]
    async fn family_users_are_ordered_by_join_time() {
        let store = MemoryStore::new();
        let code = FamilyCode::parse("FTORDER1").expect("valid code");
        let joined = now();

        let mut late = user("late@x.io");
        late.family_code = Some(code.clone());
        late.joined_at = Some(joined + chrono::Duration::seconds(5));
        let mut first = user("first@x.io");
        first.family_code = Some(code.clone());
        first.joined_at = Some(joined);
        let mut tied = user("tied@x.io");
        tied.family_code = Some(code.clone());
        tied.joined_at = Some(joined);

        let mut unjoined = user("unjoined@x.io");
        unjoined.family_code = Some(code.clone());
        unjoined.joined_at = None;

        for member in [&unjoined, &late, &first, &tied] {
            store.insert_user(member).await.expect("insert");
        }

        let ordered = store.list_family_users(&code).await.expect("list");
        let ids: Vec<UserId> = ordered.iter().map(|user| user.id).collect();
        assert_eq!(ids, vec![first.id, tied.id, late.id, unjoined.id]);
    }
}
