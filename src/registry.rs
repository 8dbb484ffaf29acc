//! Family lifecycle: registration, leaving, removal and root changes.

use anyhow::anyhow;

use crate::connections;
use crate::error::{LibError, Result};
use crate::materializer::{self, node_color};
use crate::models::{
    Family, FamilyCode, FamilyId, LoginId, MemberRemoval, RegisterMemberPayload,
    RegisteredMember, Role, User, UserId, VerificationStatus, now,
};
use crate::permissions::{Identity, ensure_admin, ensure_tree_editor, ensure_verified_admin};
use crate::projector;
use crate::store::FamilyStore;

const CODE_GENERATION_ATTEMPTS: usize = 5;

pub(crate) async fn load_family_by_code(
    store: &dyn FamilyStore,
    code: &FamilyCode,
) -> Result<Family> {
    store.get_family_by_code(code).await?.ok_or_else(|| {
        LibError::not_found(
            "Family code not found",
            anyhow!("no family with code {}", code),
        )
    })
}

async fn load_user(store: &dyn FamilyStore, user_id: UserId) -> Result<User> {
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| LibError::not_found("User not found", anyhow!("user {} not found", user_id)))
}

async fn unused_family_code(store: &dyn FamilyStore) -> Result<FamilyCode> {
    for _ in 0..CODE_GENERATION_ATTEMPTS {
        let code = FamilyCode::generate();
        if store.get_family_by_code(&code).await?.is_none() {
            return Ok(code);
        }
    }
    Err(LibError::message("Could not allocate a family code"))
}

/// Picks the next root: the earliest-joined member other than `leaving`.
/// `members` must already be in join order.
pub fn choose_successor(members: &[User], leaving: UserId) -> Option<UserId> {
    members
        .iter()
        .find(|member| member.id != leaving)
        .map(|member| member.id)
}

/// Creates a user, and a new family rooted at them when no code is given.
pub async fn register_member(
    store: &dyn FamilyStore,
    payload: RegisterMemberPayload,
) -> Result<RegisteredMember> {
    let new = payload.normalize()?;
    let now = now();
    let mut user = User {
        id: UserId::generate(),
        email: new.email,
        login_id: LoginId::generate(),
        name: new.name,
        family_code: None,
        verification_status: VerificationStatus::Pending,
        role: Role::Citizen,
        gender: new.gender,
        date_of_birth: new.date_of_birth,
        place_of_birth: new.place_of_birth,
        father_name: new.father_name,
        mother_name: new.mother_name,
        joined_at: Some(now),
        created_at: now,
        updated_at: now,
    };

    let (code, family_created) = match new.family_code {
        None => {
            let code = unused_family_code(store).await?;
            user.family_code = Some(code.clone());
            // User first: if the family insert fails, the materializer
            // recreates the family from the user's code.
            store.insert_user(&user).await?;
            let name = new
                .family_name
                .unwrap_or_else(|| format!("{} Family", user.name));
            let family = Family::new(code.clone(), name, user.id);
            store.insert_family(&family).await?;
            tracing::info!(family = %code, root = %user.id, "family created");
            (code, true)
        }
        Some(code) => {
            let mut family = load_family_by_code(store, &code).await?;
            user.family_code = Some(code.clone());
            store.insert_user(&user).await?;
            if !family.is_active || family.root_user_id.is_none() {
                family.is_active = true;
                family.root_user_id = Some(user.id);
                family.updated_at = now;
                store.update_family(&family).await?;
                tracing::info!(family = %code, root = %user.id, "inactive family reactivated");
            }
            tracing::info!(family = %code, user = %user.id, "member joined family");
            (code, false)
        }
    };

    materializer::ensure_nodes_for_family(store, &code).await?;
    let family = load_family_by_code(store, &code).await?;
    Ok(RegisteredMember {
        is_root: family.is_root(user.id),
        user,
        family_code: code,
        family_created,
    })
}

async fn recolor_root_nodes(
    store: &dyn FamilyStore,
    family_id: FamilyId,
    previous: Option<UserId>,
    current: Option<UserId>,
) -> Result<()> {
    for node in store.list_nodes(family_id).await? {
        let is_root = Some(node.user_id) == current;
        if !is_root && Some(node.user_id) != previous {
            continue;
        }
        let mut style = node.style.clone();
        style.color = node_color(is_root).to_string();
        store
            .update_node_layout(node.id, node.position, &style)
            .await?;
    }
    Ok(())
}

/// Takes `member` out of `family`: edges, node, family code, then the root
/// and activity transitions and a projection refresh.
pub(crate) async fn detach_member(
    store: &dyn FamilyStore,
    family: Family,
    mut member: User,
) -> Result<MemberRemoval> {
    let node_ids: Vec<_> = store
        .list_nodes(family.id)
        .await?
        .into_iter()
        .filter(|node| node.user_id == member.id)
        .map(|node| node.id)
        .collect();
    let removed_connections = connections::purge_nodes(store, &node_ids).await?;

    let now = now();
    member.family_code = None;
    member.joined_at = None;
    member.updated_at = now;
    store.update_user(&member).await?;

    let mut family = store.get_family(family.id).await?.unwrap_or(family);
    let remaining = store.list_family_users(&family.code).await?;
    let previous_root = family.root_user_id;

    if remaining.is_empty() {
        family.root_user_id = None;
        family.is_active = false;
        family.member_count = 0;
        family.members.clear();
        tracing::info!(family = %family.code, "last member left, family deactivated");
    } else if previous_root.is_none() || previous_root == Some(member.id) {
        family.root_user_id = choose_successor(&remaining, member.id);
        tracing::info!(
            family = %family.code,
            previous = ?previous_root,
            root = ?family.root_user_id,
            "root transferred to earliest member"
        );
    }
    family.updated_at = now;
    store.update_family(&family).await?;

    if family.root_user_id != previous_root {
        recolor_root_nodes(store, family.id, previous_root, family.root_user_id).await?;
    }
    projector::refresh_member_array(store, &family.code).await?;

    tracing::info!(
        family = %family.code,
        user = %member.id,
        nodes = node_ids.len(),
        connections = removed_connections,
        "member detached"
    );
    Ok(MemberRemoval {
        user_id: member.id,
        removed_nodes: node_ids.len(),
        removed_connections,
        root_user_id: family.root_user_id,
        family_active: family.is_active,
    })
}

/// The calling user leaves their own family.
pub async fn leave_family(store: &dyn FamilyStore, identity: &Identity) -> Result<MemberRemoval> {
    let user = load_user(store, identity.user_id).await?;
    let Some(code) = user.family_code.clone() else {
        return Err(LibError::invalid(
            "You are not a member of any family",
            anyhow!("user {} has no family code", user.id),
        ));
    };
    let family = load_family_by_code(store, &code).await?;
    detach_member(store, family, user).await
}

/// Root or admin removes another member (or themselves) from the family.
pub async fn remove_member(
    store: &dyn FamilyStore,
    identity: &Identity,
    code: &FamilyCode,
    user_id: UserId,
) -> Result<MemberRemoval> {
    let family = load_family_by_code(store, code).await?;
    ensure_tree_editor(identity, &family)?;
    let member = store
        .get_user(user_id)
        .await?
        .filter(|user| user.belongs_to(code))
        .ok_or_else(|| {
            LibError::not_found(
                "Member not found in this family",
                anyhow!("user {} is not in family {}", user_id, code),
            )
        })?;
    detach_member(store, family, member).await
}

/// Administrative root override. The only human-triggered root change.
pub async fn transfer_root(
    store: &dyn FamilyStore,
    identity: &Identity,
    code: &FamilyCode,
    new_root: UserId,
) -> Result<Family> {
    let actor = load_user(store, identity.user_id).await?;
    ensure_verified_admin(&actor)?;

    let mut family = load_family_by_code(store, code).await?;
    let candidate = load_user(store, new_root).await?;
    if !candidate.belongs_to(code) {
        return Err(LibError::invalid(
            "New root must be a member of this family",
            anyhow!("user {} does not carry code {}", new_root, code),
        ));
    }

    let previous = family.root_user_id;
    if previous == Some(new_root) {
        return Ok(family);
    }
    family.root_user_id = Some(new_root);
    family.is_active = true;
    family.updated_at = now();
    store.update_family(&family).await?;
    recolor_root_nodes(store, family.id, previous, Some(new_root)).await?;
    projector::refresh_member_array(store, code).await?;

    tracing::info!(
        family = %code,
        previous = ?previous,
        root = %new_root,
        admin = %actor.id,
        "root reassigned by admin"
    );
    load_family_by_code(store, code).await
}

/// Admin verification decision on a user's identity documents.
pub async fn set_verification_status(
    store: &dyn FamilyStore,
    identity: &Identity,
    user_id: UserId,
    status: VerificationStatus,
) -> Result<User> {
    ensure_admin(identity)?;
    let mut user = load_user(store, user_id).await?;
    user.verification_status = status;
    user.updated_at = now();
    store.update_user(&user).await?;
    tracing::info!(user = %user_id, status = status.as_db_value(), "verification status changed");

    if let Some(code) = &user.family_code {
        projector::refresh_member_array(store, code).await?;
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::materializer::{MEMBER_NODE_COLOR, ROOT_NODE_COLOR};
    use crate::memory::MemoryStore;
    use crate::models::{CreateConnectionPayload, Gender};

    fn registration(email: &str, family_code: Option<&FamilyCode>) -> RegisterMemberPayload {
        RegisterMemberPayload {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            gender: Some(Gender::Female),
            date_of_birth: None,
            place_of_birth: None,
            father_name: None,
            mother_name: None,
            family_code: family_code.map(|code| code.to_string().to_ascii_lowercase()),
            family_name: None,
        }
    }

    async fn node_of(store: &MemoryStore, family: &Family, user_id: UserId) -> Option<crate::models::TreeNode> {
        store
            .list_nodes(family.id)
            .await
            .expect("nodes")
            .into_iter()
            .find(|node| node.user_id == user_id)
    }

    #[tokio::test]
    async fn end_to_end_membership_flow() {
        let store = MemoryStore::new();

        let a = register_member(&store, registration("a@example.com", None))
            .await
            .expect("A registers");
        assert!(a.family_created);
        assert!(a.is_root);
        let code = a.family_code.clone();
        let family = load_family_by_code(&store, &code).await.expect("family");
        assert_eq!(family.root_user_id, Some(a.user.id));
        let node_a = node_of(&store, &family, a.user.id).await.expect("node(F,A)");

        let b = register_member(&store, registration("b@example.com", Some(&code)))
            .await
            .expect("B joins");
        assert!(!b.is_root);
        let family = load_family_by_code(&store, &code).await.expect("family");
        assert_eq!(family.member_count, 2);
        let node_b = node_of(&store, &family, b.user.id).await.expect("node(F,B)");
        assert!(store.list_connections(family.id).await.expect("edges").is_empty());

        let root = Identity::from_user(&a.user);
        let father = || CreateConnectionPayload {
            family_tree_id: family.id,
            source_node_id: node_a.id,
            target_node_id: node_b.id,
            source_handle: None,
            target_handle: None,
            relationship_type: "parent-child".to_string(),
            relationship_label: Some("Father".to_string()),
            style: None,
        };
        connections::create_connection(&store, &root, father())
            .await
            .expect("edge created");
        let err = connections::create_connection(&store, &root, father())
            .await
            .expect_err("duplicate rejected");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let removal = leave_family(&store, &Identity::from_user(&b.user))
            .await
            .expect("B leaves");
        assert_eq!(removal.removed_connections, 1);
        assert_eq!(removal.root_user_id, Some(a.user.id));

        let family = load_family_by_code(&store, &code).await.expect("family");
        assert_eq!(family.member_count, 1);
        assert!(node_of(&store, &family, b.user.id).await.is_none());
        assert!(store.list_connections(family.id).await.expect("edges").is_empty());
        let b_after = store.get_user(b.user.id).await.expect("read").expect("user kept");
        assert_eq!(b_after.family_code, None);
    }

    #[tokio::test]
    async fn root_leaving_hands_over_to_earliest_member() {
        let store = MemoryStore::new();
        let a = register_member(&store, registration("a@example.com", None))
            .await
            .expect("A");
        let code = a.family_code.clone();
        let b = register_member(&store, registration("b@example.com", Some(&code)))
            .await
            .expect("B");
        register_member(&store, registration("c@example.com", Some(&code)))
            .await
            .expect("C");

        let removal = leave_family(&store, &Identity::from_user(&a.user))
            .await
            .expect("root leaves");
        assert_eq!(removal.root_user_id, Some(b.user.id));
        assert!(removal.family_active);

        let family = load_family_by_code(&store, &code).await.expect("family");
        assert_eq!(family.root_user_id, Some(b.user.id));
        assert_eq!(family.member_count, 2);
        let root = store.get_user(b.user.id).await.expect("read").expect("user");
        assert!(root.belongs_to(&family.code));

        let node = node_of(&store, &family, b.user.id).await.expect("node");
        assert_eq!(node.style.color, ROOT_NODE_COLOR);
    }

    #[tokio::test]
    async fn last_member_leaving_deactivates_family() {
        let store = MemoryStore::new();
        let a = register_member(&store, registration("a@example.com", None))
            .await
            .expect("A");
        let code = a.family_code.clone();

        let removal = remove_member(&store, &Identity::from_user(&a.user), &code, a.user.id)
            .await
            .expect("root removes self");
        assert!(!removal.family_active);

        let family = load_family_by_code(&store, &code).await.expect("family");
        assert!(!family.is_active);
        assert_eq!(family.member_count, 0);
        assert_eq!(family.root_user_id, None);
        assert!(store.list_nodes(family.id).await.expect("nodes").is_empty());

        let c = register_member(&store, registration("c@example.com", Some(&code)))
            .await
            .expect("join inactive family");
        assert!(c.is_root);
        let family = load_family_by_code(&store, &code).await.expect("family");
        assert!(family.is_active);
    }

    #[tokio::test]
    async fn joining_unknown_family_fails_and_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let missing = FamilyCode::parse("FTNOPE99").expect("valid code");
        let err = register_member(&store, registration("a@example.com", Some(&missing)))
            .await
            .expect_err("unknown code");
        assert_eq!(err.kind, ErrorKind::NotFound);

        register_member(&store, registration("a@example.com", None))
            .await
            .expect("first");
        let err = register_member(&store, registration("a@example.com", None))
            .await
            .expect_err("same email");
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn only_verified_admins_can_override_root() {
        let store = MemoryStore::new();
        let a = register_member(&store, registration("a@example.com", None))
            .await
            .expect("A");
        let code = a.family_code.clone();
        let b = register_member(&store, registration("b@example.com", Some(&code)))
            .await
            .expect("B");

        let mut admin = register_member(&store, registration("admin@example.com", None))
            .await
            .expect("admin")
            .user;
        admin.role = Role::Admin;
        store.update_user(&admin).await.expect("promote");
        let admin_identity = Identity::from_user(&admin);

        let err = transfer_root(&store, &admin_identity, &code, b.user.id)
            .await
            .expect_err("unverified admin");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let err = transfer_root(&store, &Identity::from_user(&a.user), &code, b.user.id)
            .await
            .expect_err("root is not admin");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        admin.verification_status = VerificationStatus::Verified;
        store.update_user(&admin).await.expect("verify");

        let err = transfer_root(&store, &admin_identity, &code, admin.id)
            .await
            .expect_err("admin is not a member of this family");
        assert_eq!(err.kind, ErrorKind::InvalidInput);

        let family = transfer_root(&store, &admin_identity, &code, b.user.id)
            .await
            .expect("override");
        assert_eq!(family.root_user_id, Some(b.user.id));
        let old_root_node = node_of(&store, &family, a.user.id).await.expect("node");
        assert_eq!(old_root_node.style.color, MEMBER_NODE_COLOR);
    }

    #[tokio::test]
    async fn verification_changes_refresh_counts() {
        let store = MemoryStore::new();
        let a = register_member(&store, registration("a@example.com", None))
            .await
            .expect("A");
        let admin = Identity::new(UserId::generate(), Role::Admin, None);

        set_verification_status(&store, &admin, a.user.id, VerificationStatus::Verified)
            .await
            .expect("verify");
        let snapshot = store
            .get_member_snapshot(&a.family_code)
            .await
            .expect("read")
            .expect("snapshot");
        assert_eq!(snapshot.counts.verified, 1);
        assert_eq!(snapshot.counts.pending, 0);

        let err = set_verification_status(
            &store,
            &Identity::from_user(&a.user),
            a.user.id,
            VerificationStatus::Rejected,
        )
        .await
        .expect_err("citizen cannot verify");
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[test]
    fn successor_skips_leaving_member() {
        let now = now();
        let make = |email: &str| User {
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
            joined_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let members = vec![make("a"), make("b")];
        assert_eq!(choose_successor(&members, members[0].id), Some(members[1].id));
        assert_eq!(choose_successor(&members[..1], members[0].id), None);
    }
}
