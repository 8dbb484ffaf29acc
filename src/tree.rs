//! Read-side tree operations plus layout saves.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;

use crate::algorithms;
use crate::connections::load_family;
use crate::error::{LibError, Result};
use crate::invariants::{self, TreeInvariantViolation};
use crate::materializer;
use crate::models::{
    FamilyCode, FamilyTreeSummary, FamilyTreeView, FlowEdge, FlowNode, FlowNodeData, Gender,
    MemberSnapshot, NodeId, NodeSearchHit, NodeStyle, SaveLayoutPayload, SearchNodesQuery,
    non_blank,
};
use crate::permissions::{Identity, ensure_tree_editor, ensure_tree_reader};
use crate::projector;
use crate::registry::load_family_by_code;
use crate::store::FamilyStore;

fn resolve_code(identity: &Identity, code: Option<FamilyCode>) -> Result<FamilyCode> {
    code.or_else(|| identity.family_code.clone()).ok_or_else(|| {
        LibError::invalid(
            "Family code is required",
            anyhow!("user {} has no family and gave no code", identity.user_id),
        )
    })
}

/// Loads the editor view of a family, repairing nodes first when the node
/// count has drifted from the member count.
pub async fn get_family_tree(
    store: &dyn FamilyStore,
    identity: &Identity,
    code: Option<FamilyCode>,
) -> Result<FamilyTreeView> {
    let code = resolve_code(identity, code)?;
    let mut family = load_family_by_code(store, &code).await?;
    ensure_tree_reader(identity, &family)?;

    let members = store.list_family_users(&code).await?;
    let mut nodes = store.list_hydrated_nodes(family.id).await?;
    if nodes.len() != members.len() {
        tracing::debug!(
            family = %code,
            nodes = nodes.len(),
            members = members.len(),
            "node count drifted, repairing"
        );
        materializer::ensure_nodes_for_family(store, &code).await?;
        family = load_family_by_code(store, &code).await?;
        nodes = store.list_hydrated_nodes(family.id).await?;
    }
    let connections = store.list_connections(family.id).await?;

    let root_component: HashSet<NodeId> = nodes
        .iter()
        .find(|hydrated| family.is_root(hydrated.node.user_id))
        .map(|root| algorithms::connected_nodes(root.node.id, &connections))
        .unwrap_or_default();

    let flow_nodes = nodes
        .into_iter()
        .filter_map(|hydrated| {
            let member = hydrated.member.filter(|member| member.belongs_to(&code))?;
            let node = hydrated.node;
            Some(FlowNode {
                id: node.id,
                kind: "member",
                position: node.position,
                data: FlowNodeData {
                    user_id: member.id,
                    is_root: family.is_root(member.id),
                    connected_to_root: root_component.contains(&node.id),
                    name: member.name,
                    login_id: member.login_id,
                    gender: member.gender,
                    date_of_birth: member.date_of_birth,
                    place_of_birth: member.place_of_birth,
                    verification_status: member.verification_status,
                    color: node.style.color,
                    visible: node.style.visible,
                    width: node.style.width,
                    height: node.style.height,
                },
            })
        })
        .collect();

    Ok(FamilyTreeView {
        family_tree: FamilyTreeSummary {
            id: family.id,
            code: family.code.clone(),
            name: family.name.clone(),
            root_user_id: family.root_user_id,
            is_user_root: family.is_root(identity.user_id),
            member_count: family.member_count,
            is_active: family.is_active,
            settings: family.settings.clone(),
        },
        nodes: flow_nodes,
        edges: connections.into_iter().map(FlowEdge::from).collect(),
    })
}

/// Persists node positions and display data. Every node is validated before
/// anything is written.
pub async fn save_layout(
    store: &dyn FamilyStore,
    identity: &Identity,
    payload: SaveLayoutPayload,
) -> Result<usize> {
    let family = load_family(store, payload.family_tree_id).await?;
    ensure_tree_editor(identity, &family)?;

    let existing: HashMap<NodeId, NodeStyle> = store
        .list_nodes(family.id)
        .await?
        .into_iter()
        .map(|node| (node.id, node.style))
        .collect();

    let mut updates = Vec::with_capacity(payload.nodes.len());
    for layout in payload.nodes {
        let Some(current) = existing.get(&layout.id) else {
            return Err(LibError::not_found(
                "Node not found in this family tree",
                anyhow!("node {} is not part of family {}", layout.id, family.code),
            ));
        };
        if !layout.position.x.is_finite() || !layout.position.y.is_finite() {
            return Err(LibError::invalid(
                "Node position must be finite",
                anyhow!("node {} position {:?}", layout.id, layout.position),
            ));
        }

        let mut style = current.clone();
        if let Some(data) = layout.data {
            if let Some(color) = non_blank(data.color) {
                style.color = color;
            }
            if let Some(visible) = data.visible {
                style.visible = visible;
            }
            if let Some(width) = data.width.filter(|w| w.is_finite() && *w > 0.0) {
                style.width = width;
            }
            if let Some(height) = data.height.filter(|h| h.is_finite() && *h > 0.0) {
                style.height = height;
            }
        }
        updates.push((layout.id, layout.position, style));
    }

    let mut saved = 0;
    for (node_id, position, style) in &updates {
        if store.update_node_layout(*node_id, *position, style).await? {
            saved += 1;
        }
    }
    tracing::info!(family = %family.code, nodes = saved, "layout saved");
    Ok(saved)
}

/// Searches members of the caller's family.
pub async fn search_nodes(
    store: &dyn FamilyStore,
    identity: &Identity,
    query: SearchNodesQuery,
) -> Result<Vec<NodeSearchHit>> {
    let code = resolve_code(identity, query.family_code)?;
    let family = load_family_by_code(store, &code).await?;
    ensure_tree_reader(identity, &family)?;

    let text = non_blank(query.q).map(|q| q.to_lowercase());
    let location = non_blank(query.location).map(|l| l.to_lowercase());
    let relationship = non_blank(query.relationship);
    let gender = match non_blank(query.gender).map(|raw| raw.to_lowercase()) {
        Some(raw) => Some(Gender::from_db_value(&raw).ok_or_else(|| {
            LibError::invalid(
                "Unknown gender filter",
                anyhow!("gender filter '{}'", raw),
            )
        })?),
        None => None,
    };

    let nodes = store.list_hydrated_nodes(family.id).await?;
    let connections = store.list_connections(family.id).await?;
    let incident = algorithms::incident_connections(&connections);

    let mut hits = Vec::new();
    for hydrated in nodes {
        let Some(member) = hydrated.member.filter(|m| m.belongs_to(&code)) else {
            continue;
        };
        if let Some(text) = &text {
            let matched = member.name.to_lowercase().contains(text)
                || member.login_id.as_str().to_lowercase().contains(text)
                || member.email.contains(text);
            if !matched {
                continue;
            }
        }
        if gender.is_some() && member.gender != gender {
            continue;
        }
        if let Some(location) = &location {
            let matched = member
                .place_of_birth
                .as_ref()
                .is_some_and(|place| place.to_lowercase().contains(location));
            if !matched {
                continue;
            }
        }

        let edges = incident
            .get(&hydrated.node.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let related = relationship.as_deref().is_none_or(|relationship| {
            edges
                .iter()
                .any(|edge| algorithms::matches_relationship(edge, relationship))
        });
        if !related {
            continue;
        }

        hits.push(NodeSearchHit {
            node_id: hydrated.node.id,
            user_id: member.id,
            name: member.name,
            login_id: member.login_id,
            gender: member.gender,
            place_of_birth: member.place_of_birth,
            position: hydrated.node.position,
            relationships: algorithms::relationship_labels(edges),
        });
    }

    hits.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(hits)
}

/// Read-only consistency report for a family.
pub async fn audit_family(
    store: &dyn FamilyStore,
    identity: &Identity,
    code: &FamilyCode,
) -> Result<Vec<TreeInvariantViolation>> {
    let family = load_family_by_code(store, code).await?;
    ensure_tree_reader(identity, &family)?;

    let members = store.list_family_users(code).await?;
    let nodes = store.list_nodes(family.id).await?;
    let connections = store.list_connections(family.id).await?;
    let violations = invariants::tree_invariant_violations(&family, &members, &nodes, &connections);
    if !violations.is_empty() {
        tracing::warn!(family = %code, count = violations.len(), "tree audit found violations");
    }
    Ok(violations)
}

/// Stored member snapshot, recomputed when none exists yet.
pub async fn get_member_snapshot(
    store: &dyn FamilyStore,
    identity: &Identity,
    code: &FamilyCode,
) -> Result<MemberSnapshot> {
    let family = load_family_by_code(store, code).await?;
    ensure_tree_reader(identity, &family)?;

    match store.get_member_snapshot(code).await? {
        Some(snapshot) => Ok(snapshot),
        None => projector::refresh_member_array(store, code).await,
    }
}
