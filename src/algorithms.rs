use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Connection, NodeId, RelationshipType};

/// Edges touching each node, in either direction.
pub fn incident_connections(connections: &[Connection]) -> HashMap<NodeId, Vec<&Connection>> {
    let mut incident: HashMap<NodeId, Vec<&Connection>> = HashMap::new();
    for edge in connections {
        incident.entry(edge.source_node_id).or_default().push(edge);
        if edge.target_node_id != edge.source_node_id {
            incident.entry(edge.target_node_id).or_default().push(edge);
        }
    }
    incident
}

/// Matches a relationship filter against an edge's type or label.
///
/// The filter is compared case-insensitively; `_` and `-` are interchangeable
/// when matching types.
pub fn matches_relationship(edge: &Connection, filter: &str) -> bool {
    let filter = filter.trim().to_ascii_lowercase();
    if filter.is_empty() {
        return true;
    }
    let as_type = filter.replace('_', "-");
    RelationshipType::from_db_value(&as_type) == Some(edge.relationship_type)
        || edge.relationship_label.to_ascii_lowercase() == filter
}

/// Distinct relationship labels on a node's edges, sorted.
pub fn relationship_labels(edges: &[&Connection]) -> Vec<String> {
    let mut labels: Vec<String> = edges
        .iter()
        .map(|edge| edge.relationship_label.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    labels.sort();
    labels
}

/// Nodes reachable from `start` over edges of any direction.
pub fn connected_nodes(start: NodeId, connections: &[Connection]) -> HashSet<NodeId> {
    let incident = incident_connections(connections);
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    reachable.insert(start);
    queue.push_back(start);

    while let Some(node_id) = queue.pop_front() {
        let Some(edges) = incident.get(&node_id) else {
            continue;
        };
        for edge in edges {
            let other = if edge.source_node_id == node_id {
                edge.target_node_id
            } else {
                edge.source_node_id
            };
            if reachable.insert(other) {
                queue.push_back(other);
            }
        }
    }

    reachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionId, EdgeStyle, FamilyId, UserId, now};

    fn edge(from: NodeId, to: NodeId, kind: RelationshipType, label: &str) -> Connection {
        let now = now();
        Connection {
            id: ConnectionId::generate(),
            family_id: FamilyId::generate(),
            source_node_id: from,
            target_node_id: to,
            source_handle: None,
            target_handle: None,
            relationship_type: kind,
            relationship_label: label.to_string(),
            style: EdgeStyle::default(),
            created_by: UserId::generate(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn incident_edges_cover_both_ends() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        let edges = vec![
            edge(a, b, RelationshipType::ParentChild, "Father"),
            edge(a, b, RelationshipType::Business, "Business Partner"),
        ];
        let incident = incident_connections(&edges);
        assert_eq!(incident[&a].len(), 2);
        assert_eq!(incident[&b].len(), 2);
        assert_eq!(
            relationship_labels(&incident[&b]),
            vec!["Business Partner".to_string(), "Father".to_string()]
        );
    }

    #[test]
    fn relationship_filter_matches_type_or_label() {
        let e = edge(
            NodeId::generate(),
            NodeId::generate(),
            RelationshipType::ParentChild,
            "Mother",
        );
        assert!(matches_relationship(&e, "parent_child"));
        assert!(matches_relationship(&e, "MOTHER"));
        assert!(!matches_relationship(&e, "spouse"));
    }

    #[test]
    fn connected_nodes_ignores_direction() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        let c = NodeId::generate();
        let d = NodeId::generate();
        let edges = vec![
            edge(a, b, RelationshipType::Sibling, "Brother"),
            edge(c, b, RelationshipType::Spouse, "Wife"),
        ];
        let reachable = connected_nodes(a, &edges);
        assert!(reachable.contains(&c));
        assert!(!reachable.contains(&d));
    }
}
