//! Keeps exactly one tree node per family member.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::models::{
    EnsureNodesOutcome, Family, FamilyCode, HydratedNode, NodeId, NodeStyle, Position, TreeNode,
    User, UserId, now,
};
use crate::projector;
use crate::store::FamilyStore;

pub const GRID_COLUMNS: usize = 4;
pub const GRID_ORIGIN: Position = Position { x: 100.0, y: 100.0 };
pub const GRID_SPACING_X: f64 = 240.0;
pub const GRID_SPACING_Y: f64 = 160.0;

pub const ROOT_NODE_COLOR: &str = "#f59e0b";
pub const MEMBER_NODE_COLOR: &str = "#3b82f6";

/// Grid slot for the `slot`-th node of a family.
pub fn grid_position(slot: usize) -> Position {
    let column = (slot % GRID_COLUMNS) as f64;
    let row = (slot / GRID_COLUMNS) as f64;
    Position {
        x: GRID_ORIGIN.x + column * GRID_SPACING_X,
        y: GRID_ORIGIN.y + row * GRID_SPACING_Y,
    }
}

pub fn node_color(is_root: bool) -> &'static str {
    if is_root {
        ROOT_NODE_COLOR
    } else {
        MEMBER_NODE_COLOR
    }
}

/// Result of classifying a family's current nodes against its members.
#[derive(Debug, Default, PartialEq)]
pub struct NodeClassification {
    /// Surviving node per member.
    pub kept: HashMap<UserId, NodeId>,
    /// Duplicates, orphans and nodes of users that left the family.
    pub doomed: Vec<NodeId>,
    /// Members that have no surviving node, in member order.
    pub missing: Vec<UserId>,
}

/// First node per member wins; everything else is scheduled for deletion.
pub fn classify_nodes(
    code: &FamilyCode,
    members: &[User],
    nodes: &[HydratedNode],
) -> NodeClassification {
    let mut classification = NodeClassification::default();

    for hydrated in nodes {
        let owner = hydrated
            .member
            .as_ref()
            .filter(|member| member.belongs_to(code));
        match owner {
            Some(member) if !classification.kept.contains_key(&member.id) => {
                classification.kept.insert(member.id, hydrated.node.id);
            }
            _ => classification.doomed.push(hydrated.node.id),
        }
    }

    let mut seen = HashSet::with_capacity(members.len());
    for member in members {
        if seen.insert(member.id) && !classification.kept.contains_key(&member.id) {
            classification.missing.push(member.id);
        }
    }

    classification
}

/// First grid slot at or after `slot` that no surviving node sits on.
fn next_open_slot(mut slot: usize, occupied: &[Position]) -> usize {
    while occupied.contains(&grid_position(slot)) {
        slot += 1;
    }
    slot
}

fn new_node(family: &Family, user_id: UserId, slot: usize) -> TreeNode {
    let now = now();
    TreeNode {
        id: NodeId::generate(),
        family_id: family.id,
        user_id,
        position: grid_position(slot),
        style: NodeStyle {
            color: node_color(family.is_root(user_id)).to_string(),
            ..NodeStyle::default()
        },
        created_at: now,
        updated_at: now,
    }
}

async fn load_or_create_family(
    store: &dyn FamilyStore,
    code: &FamilyCode,
    first_member: &User,
) -> Result<Family> {
    if let Some(family) = store.get_family_by_code(code).await? {
        return Ok(family);
    }

    let family = Family::new(
        code.clone(),
        format!("{} Family", first_member.name),
        first_member.id,
    );
    match store.insert_family(&family).await {
        Ok(()) => {
            tracing::info!(family = %code, root = %first_member.id, "created missing family record");
            Ok(family)
        }
        // Another request created it between our read and insert.
        Err(err) if err.is_conflict() => store
            .get_family_by_code(code)
            .await?
            .ok_or(err),
        Err(err) => Err(err),
    }
}

/// Repairs node state for the family identified by `code`.
///
/// Deletes edges of duplicate or orphaned nodes, then those nodes, then
/// creates nodes for members without one and refreshes the member array.
/// Safe to retry; a second call with no membership change is a no-op.
pub async fn ensure_nodes_for_family(
    store: &dyn FamilyStore,
    code: &FamilyCode,
) -> Result<EnsureNodesOutcome> {
    let members = store.list_family_users(code).await?;
    let Some(first_member) = members.first() else {
        tracing::debug!(family = %code, "no members carry this family code");
        return Ok(EnsureNodesOutcome::default());
    };

    let family = load_or_create_family(store, code, first_member).await?;
    let nodes = store.list_hydrated_nodes(family.id).await?;
    let classification = classify_nodes(code, &members, &nodes);

    let mut outcome = EnsureNodesOutcome::default();
    if !classification.doomed.is_empty() {
        // Any failure here aborts before creation.
        let removed_edges = store
            .delete_connections_touching(&classification.doomed)
            .await?;
        outcome.cleaned = store.delete_nodes(&classification.doomed).await?;
        tracing::info!(
            family = %code,
            nodes = outcome.cleaned,
            connections = removed_edges,
            "removed duplicate or orphaned nodes"
        );
    }

    let kept: HashSet<NodeId> = classification.kept.values().copied().collect();
    let occupied: Vec<Position> = nodes
        .iter()
        .filter(|hydrated| kept.contains(&hydrated.node.id))
        .map(|hydrated| hydrated.node.position)
        .collect();
    let mut slot = next_open_slot(0, &occupied);
    for user_id in &classification.missing {
        let node = new_node(&family, *user_id, slot);
        match store.insert_node(&node).await {
            Ok(()) => {
                outcome.created += 1;
                slot = next_open_slot(slot + 1, &occupied);
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(family = %code, user = %user_id, "node created concurrently");
            }
            Err(err) => {
                outcome.failed += 1;
                tracing::warn!(
                    family = %code,
                    user = %user_id,
                    error = %err.source,
                    "failed to create member node"
                );
            }
        }
    }

    if outcome.created > 0 {
        tracing::info!(family = %code, created = outcome.created, "created missing member nodes");
    }

    projector::refresh_member_array(store, code).await?;
    Ok(outcome)
}
