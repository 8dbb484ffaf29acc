use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::connections;
use crate::error::{LibError, Result};
use crate::invariants::TreeInvariantViolation;
use crate::materializer;
use crate::models::{
    Connection, ConnectionId, CreateConnectionPayload, EnsureNodesOutcome, Family, FamilyCode,
    FamilyTreeView, MemberRemoval, MemberSnapshot, NodeId, NodeSearchHit, RegisterMemberPayload,
    RegisteredMember, SaveLayoutPayload, SearchNodesQuery, UpdateConnectionPayload, User, UserId,
    VerificationStatus,
};
use crate::permissions::{Identity, ensure_tree_reader};
use crate::registry;
use crate::store::FamilyStore;
use crate::tree;

/// High-level tree actions for tool-style callers.
///
/// The `identity` passed to [`FamilyTreeOperations::execute`] must come from
/// validated session state, never from operation arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TreeOperation {
    GetTree {
        #[serde(default)]
        family_code: Option<FamilyCode>,
    },
    SaveLayout {
        payload: SaveLayoutPayload,
    },
    SearchNodes {
        #[serde(default)]
        query: SearchNodesQuery,
    },
    CreateConnection {
        payload: CreateConnectionPayload,
    },
    UpdateConnection {
        payload: UpdateConnectionPayload,
    },
    DeleteConnection {
        connection_id: ConnectionId,
    },
    DeleteNode {
        node_id: NodeId,
    },
    EnsureNodes {
        #[serde(default)]
        family_code: Option<FamilyCode>,
    },
    Audit {
        family_code: FamilyCode,
    },
    LeaveFamily,
    RemoveMember {
        family_code: FamilyCode,
        user_id: UserId,
    },
    TransferRoot {
        family_code: FamilyCode,
        new_root_user_id: UserId,
    },
    Members {
        family_code: FamilyCode,
    },
    SetVerification {
        user_id: UserId,
        status: VerificationStatus,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TreeOperationResult {
    Tree { tree: FamilyTreeView },
    LayoutSaved { saved: usize },
    SearchHits { hits: Vec<NodeSearchHit> },
    Connection { connection: Connection },
    NodesEnsured { outcome: EnsureNodesOutcome },
    Audit { violations: Vec<TreeInvariantViolation> },
    MemberRemoved { removal: MemberRemoval },
    Family { family: Family },
    Members { snapshot: MemberSnapshot },
    User { user: User },
    Deleted,
}

#[derive(Clone)]
pub struct FamilyTreeOperations {
    store: Arc<dyn FamilyStore>,
}

impl FamilyTreeOperations {
    pub fn new(store: Arc<dyn FamilyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn FamilyStore> {
        Arc::clone(&self.store)
    }

    pub async fn execute(
        &self,
        identity: &Identity,
        operation: TreeOperation,
    ) -> Result<TreeOperationResult> {
        match operation {
            TreeOperation::GetTree { family_code } => {
                let tree = self.get_family_tree(identity, family_code).await?;
                Ok(TreeOperationResult::Tree { tree })
            }
            TreeOperation::SaveLayout { payload } => {
                let saved = self.save_layout(identity, payload).await?;
                Ok(TreeOperationResult::LayoutSaved { saved })
            }
            TreeOperation::SearchNodes { query } => {
                let hits = self.search_nodes(identity, query).await?;
                Ok(TreeOperationResult::SearchHits { hits })
            }
            TreeOperation::CreateConnection { payload } => {
                let connection = self.create_connection(identity, payload).await?;
                Ok(TreeOperationResult::Connection { connection })
            }
            TreeOperation::UpdateConnection { payload } => {
                let connection = self.update_connection(identity, payload).await?;
                Ok(TreeOperationResult::Connection { connection })
            }
            TreeOperation::DeleteConnection { connection_id } => {
                self.delete_connection(identity, connection_id).await?;
                Ok(TreeOperationResult::Deleted)
            }
            TreeOperation::DeleteNode { node_id } => {
                let removal = self.delete_node(identity, node_id).await?;
                Ok(TreeOperationResult::MemberRemoved { removal })
            }
            TreeOperation::EnsureNodes { family_code } => {
                let outcome = self.ensure_nodes(identity, family_code).await?;
                Ok(TreeOperationResult::NodesEnsured { outcome })
            }
            TreeOperation::Audit { family_code } => {
                let violations = self.audit_family(identity, &family_code).await?;
                Ok(TreeOperationResult::Audit { violations })
            }
            TreeOperation::LeaveFamily => {
                let removal = self.leave_family(identity).await?;
                Ok(TreeOperationResult::MemberRemoved { removal })
            }
            TreeOperation::RemoveMember {
                family_code,
                user_id,
            } => {
                let removal = self.remove_member(identity, &family_code, user_id).await?;
                Ok(TreeOperationResult::MemberRemoved { removal })
            }
            TreeOperation::TransferRoot {
                family_code,
                new_root_user_id,
            } => {
                let family = self
                    .transfer_root(identity, &family_code, new_root_user_id)
                    .await?;
                Ok(TreeOperationResult::Family { family })
            }
            TreeOperation::Members { family_code } => {
                let snapshot = self.member_snapshot(identity, &family_code).await?;
                Ok(TreeOperationResult::Members { snapshot })
            }
            TreeOperation::SetVerification { user_id, status } => {
                let user = self.set_verification_status(identity, user_id, status).await?;
                Ok(TreeOperationResult::User { user })
            }
        }
    }

    pub async fn register_member(&self, payload: RegisterMemberPayload) -> Result<RegisteredMember> {
        registry::register_member(self.store.as_ref(), payload).await
    }

    pub async fn get_family_tree(
        &self,
        identity: &Identity,
        family_code: Option<FamilyCode>,
    ) -> Result<FamilyTreeView> {
        tree::get_family_tree(self.store.as_ref(), identity, family_code).await
    }

    pub async fn save_layout(&self, identity: &Identity, payload: SaveLayoutPayload) -> Result<usize> {
        tree::save_layout(self.store.as_ref(), identity, payload).await
    }

    pub async fn search_nodes(
        &self,
        identity: &Identity,
        query: SearchNodesQuery,
    ) -> Result<Vec<NodeSearchHit>> {
        tree::search_nodes(self.store.as_ref(), identity, query).await
    }

    pub async fn create_connection(
        &self,
        identity: &Identity,
        payload: CreateConnectionPayload,
    ) -> Result<Connection> {
        connections::create_connection(self.store.as_ref(), identity, payload).await
    }

    pub async fn update_connection(
        &self,
        identity: &Identity,
        payload: UpdateConnectionPayload,
    ) -> Result<Connection> {
        connections::update_connection(self.store.as_ref(), identity, payload).await
    }

    pub async fn delete_connection(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
    ) -> Result<()> {
        connections::delete_connection(self.store.as_ref(), identity, connection_id).await
    }

    pub async fn delete_node(&self, identity: &Identity, node_id: NodeId) -> Result<MemberRemoval> {
        connections::delete_node_with_connections(self.store.as_ref(), identity, node_id).await
    }

    /// Repairs nodes for the caller's family, or for `family_code` when the
    /// caller may read it.
    pub async fn ensure_nodes(
        &self,
        identity: &Identity,
        family_code: Option<FamilyCode>,
    ) -> Result<EnsureNodesOutcome> {
        let store = self.store.as_ref();
        let code = family_code
            .or_else(|| identity.family_code.clone())
            .ok_or_else(|| {
                LibError::invalid(
                    "Family code is required",
                    anyhow!("user {} asked to ensure nodes without a family", identity.user_id),
                )
            })?;
        if let Some(family) = store.get_family_by_code(&code).await? {
            ensure_tree_reader(identity, &family)?;
        }
        materializer::ensure_nodes_for_family(store, &code).await
    }

    pub async fn audit_family(
        &self,
        identity: &Identity,
        family_code: &FamilyCode,
    ) -> Result<Vec<TreeInvariantViolation>> {
        tree::audit_family(self.store.as_ref(), identity, family_code).await
    }

    pub async fn leave_family(&self, identity: &Identity) -> Result<MemberRemoval> {
        registry::leave_family(self.store.as_ref(), identity).await
    }

    pub async fn remove_member(
        &self,
        identity: &Identity,
        family_code: &FamilyCode,
        user_id: UserId,
    ) -> Result<MemberRemoval> {
        registry::remove_member(self.store.as_ref(), identity, family_code, user_id).await
    }

    pub async fn transfer_root(
        &self,
        identity: &Identity,
        family_code: &FamilyCode,
        new_root_user_id: UserId,
    ) -> Result<Family> {
        registry::transfer_root(self.store.as_ref(), identity, family_code, new_root_user_id).await
    }

    pub async fn member_snapshot(
        &self,
        identity: &Identity,
        family_code: &FamilyCode,
    ) -> Result<MemberSnapshot> {
        tree::get_member_snapshot(self.store.as_ref(), identity, family_code).await
    }

    pub async fn set_verification_status(
        &self,
        identity: &Identity,
        user_id: UserId,
        status: VerificationStatus,
    ) -> Result<User> {
        registry::set_verification_status(self.store.as_ref(), identity, user_id, status).await
    }
}
