use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use serde::Serialize;

use crate::error::{LibError, Result};
use crate::models::{
    Connection, ConnectionId, ConnectionKey, Family, NodeId, TreeNode, User, UserId,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeInvariantViolation {
    MissingNode {
        user_id: UserId,
    },
    DuplicateNode {
        user_id: UserId,
        node_ids: Vec<NodeId>,
    },
    OrphanNode {
        node_id: NodeId,
        user_id: UserId,
    },
    DanglingConnection {
        connection_id: ConnectionId,
        missing_node_id: NodeId,
    },
    DuplicateConnection {
        connection_ids: Vec<ConnectionId>,
    },
    RootNotMember {
        root_user_id: UserId,
    },
    MissingRoot,
    InactiveWithMembers {
        member_count: usize,
    },
    MemberCountMismatch {
        recorded: u32,
        actual: usize,
    },
}

impl TreeInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            TreeInvariantViolation::MissingNode { .. } => "tree_missing_node",
            TreeInvariantViolation::DuplicateNode { .. } => "tree_duplicate_node",
            TreeInvariantViolation::OrphanNode { .. } => "tree_orphan_node",
            TreeInvariantViolation::DanglingConnection { .. } => "tree_dangling_connection",
            TreeInvariantViolation::DuplicateConnection { .. } => "tree_duplicate_connection",
            TreeInvariantViolation::RootNotMember { .. } => "tree_root_not_member",
            TreeInvariantViolation::MissingRoot => "tree_missing_root",
            TreeInvariantViolation::InactiveWithMembers { .. } => "tree_inactive_with_members",
            TreeInvariantViolation::MemberCountMismatch { .. } => "tree_member_count_mismatch",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            TreeInvariantViolation::MissingNode { .. } => "A family member has no tree node",
            TreeInvariantViolation::DuplicateNode { .. } => {
                "A family member has more than one tree node"
            }
            TreeInvariantViolation::OrphanNode { .. } => {
                "A tree node references a user outside the family"
            }
            TreeInvariantViolation::DanglingConnection { .. } => {
                "A connection references a node that does not exist"
            }
            TreeInvariantViolation::DuplicateConnection { .. } => {
                "The same relationship is recorded more than once"
            }
            TreeInvariantViolation::RootNotMember { .. } => {
                "The family root is not a member of the family"
            }
            TreeInvariantViolation::MissingRoot => "An active family has no root member",
            TreeInvariantViolation::InactiveWithMembers { .. } => {
                "An inactive family still has members"
            }
            TreeInvariantViolation::MemberCountMismatch { .. } => {
                "The recorded member count is out of date"
            }
        }
    }

    /// Violations the node materializer repairs on its own.
    pub const fn is_repairable(&self) -> bool {
        matches!(
            self,
            TreeInvariantViolation::MissingNode { .. }
                | TreeInvariantViolation::DuplicateNode { .. }
                | TreeInvariantViolation::OrphanNode { .. }
                | TreeInvariantViolation::MemberCountMismatch { .. }
        )
    }
}

/// Checks a family's stored state against the tree consistency rules.
pub fn tree_invariant_violations(
    family: &Family,
    members: &[User],
    nodes: &[TreeNode],
    connections: &[Connection],
) -> Vec<TreeInvariantViolation> {
    let member_ids: HashSet<UserId> = members
        .iter()
        .filter(|member| member.belongs_to(&family.code))
        .map(|member| member.id)
        .collect();
    let node_ids: HashSet<NodeId> = nodes.iter().map(|node| node.id).collect();

    let mut violations = Vec::new();

    let mut nodes_by_user: HashMap<UserId, Vec<NodeId>> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if member_ids.contains(&node.user_id) {
            nodes_by_user.entry(node.user_id).or_default().push(node.id);
        } else {
            violations.push(TreeInvariantViolation::OrphanNode {
                node_id: node.id,
                user_id: node.user_id,
            });
        }
    }

    for member in members.iter().filter(|m| member_ids.contains(&m.id)) {
        match nodes_by_user.get(&member.id) {
            None => violations.push(TreeInvariantViolation::MissingNode { user_id: member.id }),
            Some(ids) if ids.len() > 1 => {
                violations.push(TreeInvariantViolation::DuplicateNode {
                    user_id: member.id,
                    node_ids: ids.clone(),
                })
            }
            Some(_) => {}
        }
    }

    let mut edges_by_key: HashMap<ConnectionKey, Vec<ConnectionId>> = HashMap::new();
    for edge in connections {
        for endpoint in [edge.source_node_id, edge.target_node_id] {
            if !node_ids.contains(&endpoint) {
                violations.push(TreeInvariantViolation::DanglingConnection {
                    connection_id: edge.id,
                    missing_node_id: endpoint,
                });
            }
        }
        edges_by_key.entry(edge.key()).or_default().push(edge.id);
    }
    let mut duplicates: Vec<Vec<ConnectionId>> = edges_by_key
        .into_values()
        .filter(|ids| ids.len() > 1)
        .collect();
    duplicates.sort();
    for connection_ids in duplicates {
        violations.push(TreeInvariantViolation::DuplicateConnection { connection_ids });
    }

    if family.is_active {
        match family.root_user_id {
            Some(root) if !member_ids.contains(&root) => {
                violations.push(TreeInvariantViolation::RootNotMember { root_user_id: root })
            }
            None => violations.push(TreeInvariantViolation::MissingRoot),
            Some(_) => {}
        }
    } else if !member_ids.is_empty() {
        violations.push(TreeInvariantViolation::InactiveWithMembers {
            member_count: member_ids.len(),
        });
    }

    if family.member_count as usize != member_ids.len() {
        violations.push(TreeInvariantViolation::MemberCountMismatch {
            recorded: family.member_count,
            actual: member_ids.len(),
        });
    }

    violations
}

pub fn ensure_tree_invariants(
    family: &Family,
    members: &[User],
    nodes: &[TreeNode],
    connections: &[Connection],
) -> Result<()> {
    let violations = tree_invariant_violations(family, members, nodes, connections);
    if let Some(first) = violations.first() {
        return Err(LibError::invalid_with_code(
            first.error_code(),
            first.public_message(),
            anyhow!(
                "tree invariant validation failed for family {}: {:?}",
                family.code,
                violations
            ),
        ));
    }

    Ok(())
}
