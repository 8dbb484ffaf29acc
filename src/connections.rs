//! Relationship edges between member nodes.

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::handles;
use crate::models::{
    Connection, ConnectionId, ConnectionKey, CreateConnectionPayload, EdgeStyle, Family, FamilyId,
    MemberRemoval, NodeId, RelationshipType, TreeNode, UpdateConnectionPayload, now,
};
use crate::permissions::{Identity, ensure_tree_editor};
use crate::projector;
use crate::registry;
use crate::store::FamilyStore;

/// Validated connection input.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub family_id: FamilyId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub relationship_type: RelationshipType,
    pub relationship_label: String,
    pub style: EdgeStyle,
}

impl NewConnection {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            family_id: self.family_id,
            source_node_id: self.source_node_id,
            target_node_id: self.target_node_id,
            relationship_type: self.relationship_type,
            relationship_label: self.relationship_label.clone(),
        }
    }
}

/// Trims the label, falling back to the type's default label when blank.
pub fn relationship_label(kind: RelationshipType, raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| kind.default_label().to_string())
}

impl CreateConnectionPayload {
    pub fn normalize(self) -> Result<NewConnection> {
        if self.relationship_type.trim().is_empty() {
            return Err(LibError::invalid(
                "Relationship type is required",
                anyhow!("connection payload without relationship type"),
            ));
        }
        let relationship_type = RelationshipType::parse(&self.relationship_type)?;
        if self.source_node_id == self.target_node_id {
            return Err(LibError::invalid(
                "A member cannot be related to themselves",
                anyhow!("self-loop on node {}", self.source_node_id),
            ));
        }
        let (source_handle, target_handle) = handles::normalize_connection_handles(
            self.source_handle.as_deref(),
            self.target_handle.as_deref(),
        )?;

        Ok(NewConnection {
            family_id: self.family_tree_id,
            source_node_id: self.source_node_id,
            target_node_id: self.target_node_id,
            source_handle,
            target_handle,
            relationship_type,
            relationship_label: relationship_label(
                relationship_type,
                self.relationship_label.as_deref(),
            ),
            style: self.style.unwrap_or_default(),
        })
    }
}

fn duplicate_error(key: &ConnectionKey) -> LibError {
    LibError::conflict(
        format!(
            "A '{}' relationship labelled '{}' already exists between these members",
            key.relationship_type, key.relationship_label
        ),
        anyhow!("duplicate connection {:?}", key),
    )
}

pub(crate) async fn load_family(store: &dyn FamilyStore, family_id: FamilyId) -> Result<Family> {
    store.get_family(family_id).await?.ok_or_else(|| {
        LibError::not_found(
            "Family tree not found",
            anyhow!("family {} not found", family_id),
        )
    })
}

async fn load_family_node(
    store: &dyn FamilyStore,
    family: &Family,
    node_id: NodeId,
    public: &'static str,
) -> Result<TreeNode> {
    match store.get_node(node_id).await? {
        Some(node) if node.family_id == family.id => Ok(node),
        _ => Err(LibError::not_found(
            public,
            anyhow!("node {} not found in family {}", node_id, family.code),
        )),
    }
}

async fn load_connection(store: &dyn FamilyStore, connection_id: ConnectionId) -> Result<Connection> {
    store.get_connection(connection_id).await?.ok_or_else(|| {
        LibError::not_found(
            "Connection not found",
            anyhow!("connection {} not found", connection_id),
        )
    })
}

/// Adds one directed, labelled edge. No inverse edge is derived.
pub async fn create_connection(
    store: &dyn FamilyStore,
    identity: &Identity,
    payload: CreateConnectionPayload,
) -> Result<Connection> {
    let new = payload.normalize()?;
    let family = load_family(store, new.family_id).await?;
    ensure_tree_editor(identity, &family)?;

    load_family_node(store, &family, new.source_node_id, "Source node not found").await?;
    load_family_node(store, &family, new.target_node_id, "Target node not found").await?;

    let key = new.key();
    if store.find_connection(&key).await?.is_some() {
        return Err(duplicate_error(&key));
    }

    let now = now();
    let connection = Connection {
        id: ConnectionId::generate(),
        family_id: new.family_id,
        source_node_id: new.source_node_id,
        target_node_id: new.target_node_id,
        source_handle: new.source_handle,
        target_handle: new.target_handle,
        relationship_type: new.relationship_type,
        relationship_label: new.relationship_label,
        style: new.style,
        created_by: identity.user_id,
        created_at: now,
        updated_at: now,
    };
    store.insert_connection(&connection).await.map_err(|err| {
        if err.is_conflict() {
            duplicate_error(&key)
        } else {
            err
        }
    })?;

    tracing::info!(
        family = %family.code,
        connection = %connection.id,
        relationship = %connection.relationship_type,
        label = %connection.relationship_label,
        "connection created"
    );
    Ok(connection)
}

/// Changes type and label of an edge. A change that would duplicate another
/// edge's tuple is rejected.
pub async fn update_connection(
    store: &dyn FamilyStore,
    identity: &Identity,
    payload: UpdateConnectionPayload,
) -> Result<Connection> {
    let mut connection = load_connection(store, payload.connection_id).await?;
    let family = load_family(store, connection.family_id).await?;
    ensure_tree_editor(identity, &family)?;

    let relationship_type = RelationshipType::parse(&payload.relationship_type)?;
    connection.relationship_type = relationship_type;
    connection.relationship_label =
        relationship_label(relationship_type, payload.relationship_label.as_deref());
    connection.updated_at = now();

    let key = connection.key();
    let colliding = store.find_connection(&key).await?;
    if colliding.is_some_and(|existing| existing.id != connection.id) {
        return Err(duplicate_error(&key));
    }

    store.update_connection(&connection).await.map_err(|err| {
        if err.is_conflict() {
            duplicate_error(&key)
        } else {
            err
        }
    })?;
    tracing::info!(family = %family.code, connection = %connection.id, "connection updated");
    Ok(connection)
}

pub async fn delete_connection(
    store: &dyn FamilyStore,
    identity: &Identity,
    connection_id: ConnectionId,
) -> Result<()> {
    let connection = load_connection(store, connection_id).await?;
    let family = load_family(store, connection.family_id).await?;
    ensure_tree_editor(identity, &family)?;

    if !store.delete_connection(connection_id).await? {
        return Err(LibError::not_found(
            "Connection not found",
            anyhow!("connection {} vanished before delete", connection_id),
        ));
    }
    tracing::info!(family = %family.code, connection = %connection_id, "connection deleted");
    Ok(())
}

/// Deletes every edge touching `node_ids`, then the nodes. Returns the
/// number of edges removed.
pub(crate) async fn purge_nodes(store: &dyn FamilyStore, node_ids: &[NodeId]) -> Result<usize> {
    if node_ids.is_empty() {
        return Ok(0);
    }
    let removed_edges = store.delete_connections_touching(node_ids).await?;
    store.delete_nodes(node_ids).await?;
    Ok(removed_edges)
}

/// Removes a node together with all its edges.
///
/// A node stands for a member, so when its user still belongs to the family
/// this is a member removal and runs the root and activity transitions.
pub async fn delete_node_with_connections(
    store: &dyn FamilyStore,
    identity: &Identity,
    node_id: NodeId,
) -> Result<MemberRemoval> {
    let node = store.get_node(node_id).await?.ok_or_else(|| {
        LibError::not_found("Node not found", anyhow!("node {} not found", node_id))
    })?;
    let family = load_family(store, node.family_id).await?;
    ensure_tree_editor(identity, &family)?;

    let member = store
        .get_user(node.user_id)
        .await?
        .filter(|user| user.belongs_to(&family.code));
    if let Some(member) = member {
        return registry::detach_member(store, family, member).await;
    }

    let removed_connections = purge_nodes(store, &[node.id]).await?;
    tracing::info!(
        family = %family.code,
        node = %node.id,
        connections = removed_connections,
        "orphaned node deleted"
    );
    projector::refresh_member_array(store, &family.code).await?;
    Ok(MemberRemoval {
        user_id: node.user_id,
        removed_nodes: 1,
        removed_connections,
        root_user_id: family.root_user_id,
        family_active: family.is_active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryStore;
    use crate::models::{Role, RegisterMemberPayload};
    use crate::registry::register_member;

    struct Fixture {
        store: MemoryStore,
        family: Family,
        root: Identity,
        member: Identity,
        root_node: NodeId,
        member_node: NodeId,
    }

    fn registration(email: &str, family_code: Option<String>) -> RegisterMemberPayload {
        RegisterMemberPayload {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            gender: None,
            date_of_birth: None,
            place_of_birth: None,
            father_name: None,
            mother_name: None,
            family_code,
            family_name: None,
        }
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let root = register_member(&store, registration("ada@example.com", None))
            .await
            .expect("root registers");
        let member = register_member(
            &store,
            registration("bob@example.com", Some(root.family_code.to_string())),
        )
        .await
        .expect("member joins");

        let family = store
            .get_family_by_code(&root.family_code)
            .await
            .expect("read")
            .expect("family");
        let nodes = store.list_nodes(family.id).await.expect("nodes");
        let node_of = |user_id| {
            nodes
                .iter()
                .find(|node| node.user_id == user_id)
                .map(|node| node.id)
                .expect("member node")
        };

        Fixture {
            root_node: node_of(root.user.id),
            member_node: node_of(member.user.id),
            root: Identity::from_user(&root.user),
            member: Identity::from_user(&member.user),
            family,
            store,
        }
    }

    fn payload(fx: &Fixture, kind: &str, label: &str) -> CreateConnectionPayload {
        CreateConnectionPayload {
            family_tree_id: fx.family.id,
            source_node_id: fx.root_node,
            target_node_id: fx.member_node,
            source_handle: Some("bottom-target".to_string()),
            target_handle: Some("top".to_string()),
            relationship_type: kind.to_string(),
            relationship_label: Some(label.to_string()),
            style: None,
        }
    }

    #[tokio::test]
    async fn exact_duplicate_is_rejected_but_other_relationships_are_allowed() {
        let fx = fixture().await;

        let first = create_connection(&fx.store, &fx.root, payload(&fx, "parent-child", "Father"))
            .await
            .expect("first edge");
        assert_eq!(first.source_handle.as_deref(), Some("bottom-source"));
        assert_eq!(first.target_handle.as_deref(), Some("top-target"));

        let err = create_connection(&fx.store, &fx.root, payload(&fx, "parent-child", "Father"))
            .await
            .expect_err("duplicate tuple");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.public.contains("Father"));

        create_connection(&fx.store, &fx.root, payload(&fx, "spouse", "Husband"))
            .await
            .expect("different tuple between same nodes");
        create_connection(&fx.store, &fx.root, payload(&fx, "business", "Father"))
            .await
            .expect("same label with another type");

        let edges = fx.store.list_connections(fx.family.id).await.expect("edges");
        assert_eq!(edges.len(), 3);
    }

    #[tokio::test]
    async fn non_root_member_cannot_mutate_edges() {
        let fx = fixture().await;
        let err = create_connection(&fx.store, &fx.member, payload(&fx, "sibling", "Brother"))
            .await
            .expect_err("member is read-only");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let edge = create_connection(&fx.store, &fx.root, payload(&fx, "sibling", "Brother"))
            .await
            .expect("root can create");

        let err = update_connection(
            &fx.store,
            &fx.member,
            UpdateConnectionPayload {
                connection_id: edge.id,
                relationship_type: "cousin".to_string(),
                relationship_label: None,
            },
        )
        .await
        .expect_err("member cannot update");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let err = delete_connection(&fx.store, &fx.member, edge.id)
            .await
            .expect_err("member cannot delete");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let err = delete_node_with_connections(&fx.store, &fx.member, fx.root_node)
            .await
            .expect_err("member cannot delete nodes");
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn admin_can_edit_any_family() {
        let fx = fixture().await;
        let admin = Identity::new(crate::models::UserId::generate(), Role::Admin, None);
        create_connection(&fx.store, &admin, payload(&fx, "friend", "Friend"))
            .await
            .expect("admin may edit");
    }

    #[tokio::test]
    async fn unknown_type_and_foreign_nodes_are_rejected() {
        let fx = fixture().await;
        let err = create_connection(&fx.store, &fx.root, payload(&fx, "rival", "Rival"))
            .await
            .expect_err("closed enumeration");
        assert_eq!(err.kind, ErrorKind::InvalidInput);

        let mut foreign = payload(&fx, "sibling", "Sister");
        foreign.target_node_id = NodeId::generate();
        let err = create_connection(&fx.store, &fx.root, foreign)
            .await
            .expect_err("unknown node");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_rejects_collision_with_existing_edge() {
        let fx = fixture().await;
        create_connection(&fx.store, &fx.root, payload(&fx, "parent-child", "Father"))
            .await
            .expect("edge");
        let spouse = create_connection(&fx.store, &fx.root, payload(&fx, "spouse", "Husband"))
            .await
            .expect("edge");

        let err = update_connection(
            &fx.store,
            &fx.root,
            UpdateConnectionPayload {
                connection_id: spouse.id,
                relationship_type: "parent_child".to_string(),
                relationship_label: Some("Father".to_string()),
            },
        )
        .await
        .expect_err("collision");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let updated = update_connection(
            &fx.store,
            &fx.root,
            UpdateConnectionPayload {
                connection_id: spouse.id,
                relationship_type: "in-law".to_string(),
                relationship_label: None,
            },
        )
        .await
        .expect("non-colliding update");
        assert_eq!(updated.relationship_type, RelationshipType::InLaw);
        assert_eq!(updated.relationship_label, "In-law");
    }

    #[tokio::test]
    async fn delete_connection_removes_only_that_edge() {
        let fx = fixture().await;
        let father = create_connection(&fx.store, &fx.root, payload(&fx, "parent-child", "Father"))
            .await
            .expect("edge");
        create_connection(&fx.store, &fx.root, payload(&fx, "spouse", "Husband"))
            .await
            .expect("edge");

        delete_connection(&fx.store, &fx.root, father.id)
            .await
            .expect("delete");
        let edges = fx.store.list_connections(fx.family.id).await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relationship_type, RelationshipType::Spouse);

        let err = delete_connection(&fx.store, &fx.root, father.id)
            .await
            .expect_err("already gone");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deleting_a_node_cascades_to_its_edges() {
        let fx = fixture().await;
        create_connection(&fx.store, &fx.root, payload(&fx, "parent-child", "Father"))
            .await
            .expect("edge");
        create_connection(&fx.store, &fx.root, payload(&fx, "spouse", "Husband"))
            .await
            .expect("edge");

        let removal = delete_node_with_connections(&fx.store, &fx.root, fx.member_node)
            .await
            .expect("delete node");
        assert_eq!(removal.removed_connections, 2);
        assert_eq!(removal.removed_nodes, 1);

        assert!(fx.store.get_node(fx.member_node).await.expect("read").is_none());
        assert!(fx.store.list_connections(fx.family.id).await.expect("edges").is_empty());

        let family = load_family(&fx.store, fx.family.id).await.expect("family");
        assert_eq!(family.member_count, 1);
        assert!(family.is_active);
    }

    #[tokio::test]
    async fn deleting_the_last_members_node_deactivates_the_family() {
        let store = MemoryStore::new();
        let solo = register_member(&store, registration("solo@example.com", None))
            .await
            .expect("registers");
        let family = store
            .get_family_by_code(&solo.family_code)
            .await
            .expect("read")
            .expect("family");
        let nodes = store.list_nodes(family.id).await.expect("nodes");
        assert_eq!(nodes.len(), 1);

        let identity = Identity::from_user(&solo.user);
        let removal = delete_node_with_connections(&store, &identity, nodes[0].id)
            .await
            .expect("delete node");
        assert_eq!(removal.user_id, solo.user.id);
        assert_eq!(removal.root_user_id, None);
        assert!(!removal.family_active);

        let family = load_family(&store, family.id).await.expect("family");
        assert!(!family.is_active);
        assert_eq!(family.member_count, 0);
        assert_eq!(family.root_user_id, None);
        assert!(store.list_nodes(family.id).await.expect("nodes").is_empty());

        let user = store.get_user(solo.user.id).await.expect("read").expect("user");
        assert_eq!(user.family_code, None);
    }
}
