//! Member array projection: the denormalized membership summary kept on the
//! family record and in the per-family snapshot.

use std::collections::HashMap;

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{
    Family, FamilyCode, Gender, MemberBasic, MemberCounts, MemberDetail, MemberSnapshot, TreeNode,
    User, UserId, VerificationStatus, now,
};
use crate::store::FamilyStore;

/// Builds both projections from source records. Pure.
pub fn project_members(
    family: &Family,
    users: &[User],
    nodes: &[TreeNode],
) -> (Vec<MemberBasic>, MemberSnapshot) {
    let node_by_user: HashMap<UserId, &TreeNode> =
        nodes.iter().map(|node| (node.user_id, node)).collect();

    let mut counts = MemberCounts::default();
    let mut basics = Vec::with_capacity(users.len());
    let mut details = Vec::with_capacity(users.len());

    for user in users {
        counts.total += 1;
        match user.verification_status {
            VerificationStatus::Verified => counts.verified += 1,
            VerificationStatus::Pending => counts.pending += 1,
            VerificationStatus::Rejected => counts.rejected += 1,
        }
        match user.gender {
            Some(Gender::Male) => counts.male += 1,
            Some(Gender::Female) => counts.female += 1,
            Some(Gender::Other) => counts.other_gender += 1,
            None => counts.unspecified_gender += 1,
        }

        let is_root = family.is_root(user.id);
        let node = node_by_user.get(&user.id);
        basics.push(MemberBasic {
            user_id: user.id,
            login_id: user.login_id.clone(),
            name: user.name.clone(),
            verification_status: user.verification_status,
            is_root,
        });
        details.push(MemberDetail {
            user_id: user.id,
            login_id: user.login_id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            gender: user.gender,
            date_of_birth: user.date_of_birth,
            place_of_birth: user.place_of_birth.clone(),
            verification_status: user.verification_status,
            role: user.role,
            is_root,
            node_id: node.map(|node| node.id),
            position: node.map(|node| node.position),
            joined_at: user.joined_at,
        });
    }

    let snapshot = MemberSnapshot {
        family_code: family.code.clone(),
        family_id: family.id,
        members: details,
        counts,
        updated_at: now(),
    };
    (basics, snapshot)
}

/// Recomputes and persists the member array for `code`.
///
/// Callers must have written their own changes to the family first; this
/// re-reads the family and overwrites its member list and count.
pub async fn refresh_member_array(
    store: &dyn FamilyStore,
    code: &FamilyCode,
) -> Result<MemberSnapshot> {
    let mut family = store.get_family_by_code(code).await?.ok_or_else(|| {
        LibError::not_found(
            "Family not found",
            anyhow!("no family for code {} during projection", code),
        )
    })?;
    let users = store.list_family_users(code).await?;
    let nodes = store.list_nodes(family.id).await?;

    let (basics, snapshot) = project_members(&family, &users, &nodes);
    family.member_count = snapshot.counts.total;
    family.members = basics;
    family.updated_at = snapshot.updated_at;
    store.update_family(&family).await?;
    store.upsert_member_snapshot(&snapshot).await?;

    tracing::debug!(
        family = %code,
        total = snapshot.counts.total,
        verified = snapshot.counts.verified,
        "member array refreshed"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FamilyId, LoginId, NodeId, NodeStyle, Position, Role, UserId, VerificationStatus,
    };

    fn member(code: &FamilyCode, status: VerificationStatus, gender: Option<Gender>) -> User {
        let now = now();
        let id = UserId::generate();
        User {
            id,
            email: format!("{}@example.com", id),
            login_id: LoginId::generate(),
            name: "Member".to_string(),
            family_code: Some(code.clone()),
            verification_status: status,
            role: Role::Citizen,
            gender,
            date_of_birth: None,
            place_of_birth: None,
            father_name: None,
            mother_name: None,
            joined_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn counts_and_positions_are_projected() {
        let code = FamilyCode::parse("FTPROJ01").expect("valid code");
        let root = member(&code, VerificationStatus::Verified, Some(Gender::Male));
        let second = member(&code, VerificationStatus::Pending, Some(Gender::Female));
        let third = member(&code, VerificationStatus::Rejected, None);
        let mut family = Family::new(code.clone(), "Proj".to_string(), root.id);
        family.id = FamilyId::generate();

        let now = now();
        let root_node = TreeNode {
            id: NodeId::generate(),
            family_id: family.id,
            user_id: root.id,
            position: Position { x: 10.0, y: 20.0 },
            style: NodeStyle::default(),
            created_at: now,
            updated_at: now,
        };

        let (basics, snapshot) = project_members(
            &family,
            &[root.clone(), second.clone(), third],
            std::slice::from_ref(&root_node),
        );

        assert_eq!(basics.len(), 3);
        assert!(basics[0].is_root);
        assert!(!basics[1].is_root);
        assert_eq!(
            snapshot.counts,
            MemberCounts {
                total: 3,
                verified: 1,
                pending: 1,
                rejected: 1,
                male: 1,
                female: 1,
                other_gender: 0,
                unspecified_gender: 1,
            }
        );
        assert_eq!(snapshot.members[0].node_id, Some(root_node.id));
        assert_eq!(snapshot.members[0].position, Some(Position { x: 10.0, y: 20.0 }));
        assert_eq!(snapshot.members[1].node_id, None);
    }
}
