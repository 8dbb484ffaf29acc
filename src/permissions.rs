use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::models::{Family, FamilyCode, Role, User, UserId, VerificationStatus};

/// Caller identity as resolved by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
    pub family_code: Option<FamilyCode>,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role, family_code: Option<FamilyCode>) -> Self {
        Self {
            user_id,
            role,
            family_code,
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self::new(user.id, user.role, user.family_code.clone())
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_member_of(&self, family: &Family) -> bool {
        self.family_code.as_ref() == Some(&family.code)
    }
}

/// Tree structure may only be changed by the family's root or an admin.
pub fn can_edit_tree(identity: &Identity, family: &Family) -> bool {
    identity.is_admin() || family.is_root(identity.user_id)
}

pub fn ensure_tree_editor(identity: &Identity, family: &Family) -> Result<()> {
    if can_edit_tree(identity, family) {
        Ok(())
    } else {
        Err(LibError::forbidden(
            "Permission denied: only the family root can modify the tree",
            anyhow!(
                "user {} is not root of family {}",
                identity.user_id,
                family.code
            ),
        ))
    }
}

pub fn ensure_tree_reader(identity: &Identity, family: &Family) -> Result<()> {
    if identity.is_admin() || identity.is_member_of(family) {
        Ok(())
    } else {
        Err(LibError::forbidden(
            "Permission denied: you are not a member of this family",
            anyhow!(
                "user {} attempted to read family {}",
                identity.user_id,
                family.code
            ),
        ))
    }
}

pub fn ensure_admin(identity: &Identity) -> Result<()> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(LibError::forbidden(
            "Permission denied: administrator access required",
            anyhow!("user {} is not an admin", identity.user_id),
        ))
    }
}

/// Root overrides need an admin whose own account has been verified.
pub fn ensure_verified_admin(actor: &User) -> Result<()> {
    if actor.role == Role::Admin && actor.verification_status == VerificationStatus::Verified {
        Ok(())
    } else {
        Err(LibError::forbidden(
            "Permission denied: verified administrator access required",
            anyhow!("user {} is not a verified admin", actor.id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn family(root: UserId) -> Family {
        Family::new(
            FamilyCode::parse("FTTEST01").expect("valid code"),
            "Test".to_string(),
            root,
        )
    }

    #[test]
    fn root_and_admin_can_edit() {
        let root = UserId::generate();
        let fam = family(root);

        let root_identity = Identity::new(root, Role::Citizen, Some(fam.code.clone()));
        assert!(ensure_tree_editor(&root_identity, &fam).is_ok());

        let admin = Identity::new(UserId::generate(), Role::Admin, None);
        assert!(ensure_tree_editor(&admin, &fam).is_ok());
    }

    #[test]
    fn plain_member_cannot_edit_but_can_read() {
        let fam = family(UserId::generate());
        let member = Identity::new(UserId::generate(), Role::Citizen, Some(fam.code.clone()));

        let err = ensure_tree_editor(&member, &fam).expect_err("member is read-only");
        assert_eq!(err.kind, ErrorKind::Forbidden);
        assert!(ensure_tree_reader(&member, &fam).is_ok());
    }

    #[test]
    fn outsider_cannot_read() {
        let fam = family(UserId::generate());
        let outsider = Identity::new(
            UserId::generate(),
            Role::Citizen,
            Some(FamilyCode::parse("FTOTHER1").expect("valid code")),
        );
        let err = ensure_tree_reader(&outsider, &fam).expect_err("cross-family read");
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
