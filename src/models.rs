use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{LibError, Result};

pub const FAMILY_CODE_PREFIX: &str = "FT";
pub const FAMILY_CODE_MIN_SUFFIX_LEN: usize = 6;
pub const LOGIN_ID_PREFIX: &str = "GN";
pub const LOGIN_ID_SUFFIX_LEN: usize = 8;

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(
    /// Identifier of a family record. The editor calls this the family tree id.
    FamilyId
);
uuid_id!(NodeId);
uuid_id!(ConnectionId);

/// Uppercase family code: `FT` followed by at least six ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FamilyCode(String);

impl FamilyCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let valid = normalized
            .strip_prefix(FAMILY_CODE_PREFIX)
            .is_some_and(|suffix| {
                suffix.len() >= FAMILY_CODE_MIN_SUFFIX_LEN
                    && suffix.chars().all(|c| c.is_ascii_alphanumeric())
            });
        if !valid {
            return Err(LibError::invalid_with_code(
                "invalid_family_code",
                "Family code is invalid",
                anyhow!("malformed family code '{}'", raw),
            ));
        }
        Ok(Self(normalized))
    }

    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            FAMILY_CODE_PREFIX,
            random_suffix(FAMILY_CODE_MIN_SUFFIX_LEN)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FamilyCode {
    type Err = LibError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for FamilyCode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(|err| serde::de::Error::custom(err.public))
    }
}

/// Login identifier handed to members at registration, e.g. `GN4F2A91C0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginId(pub String);

impl LoginId {
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            LOGIN_ID_PREFIX,
            random_suffix(LOGIN_ID_SUFFIX_LEN)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_suffix(len: usize) -> String {
    let mut suffix = String::with_capacity(len);
    while suffix.len() < len {
        let chunk = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        suffix.extend(chunk.chars().take(len - suffix.len()));
    }
    suffix
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Citizen,
}

impl Role {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Citizen => "citizen",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Role::Admin),
            "citizen" => Some(Role::Citizen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VerificationStatus::Pending),
            "verified" => Some(VerificationStatus::Verified),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const fn as_db_value(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

/// Closed set of relationship kinds an edge may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    ParentChild,
    Spouse,
    Sibling,
    GrandparentGrandchild,
    UncleNephew,
    Cousin,
    InLaw,
    StepFamily,
    Adopted,
    GuardianWard,
    Friend,
    Business,
    Other,
}

impl RelationshipType {
    pub const ALL: &'static [RelationshipType] = &[
        RelationshipType::ParentChild,
        RelationshipType::Spouse,
        RelationshipType::Sibling,
        RelationshipType::GrandparentGrandchild,
        RelationshipType::UncleNephew,
        RelationshipType::Cousin,
        RelationshipType::InLaw,
        RelationshipType::StepFamily,
        RelationshipType::Adopted,
        RelationshipType::GuardianWard,
        RelationshipType::Friend,
        RelationshipType::Business,
        RelationshipType::Other,
    ];

    pub const fn as_db_value(self) -> &'static str {
        match self {
            RelationshipType::ParentChild => "parent-child",
            RelationshipType::Spouse => "spouse",
            RelationshipType::Sibling => "sibling",
            RelationshipType::GrandparentGrandchild => "grandparent-grandchild",
            RelationshipType::UncleNephew => "uncle-nephew",
            RelationshipType::Cousin => "cousin",
            RelationshipType::InLaw => "in-law",
            RelationshipType::StepFamily => "step-family",
            RelationshipType::Adopted => "adopted",
            RelationshipType::GuardianWard => "guardian-ward",
            RelationshipType::Friend => "friend",
            RelationshipType::Business => "business",
            RelationshipType::Other => "other",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_db_value() == value)
    }

    /// Lenient parse for request payloads: trims, lowercases and accepts `_`
    /// in place of `-`.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        Self::from_db_value(&normalized).ok_or_else(|| {
            LibError::invalid_with_code(
                "invalid_relationship_type",
                format!("Unknown relationship type '{}'", raw.trim()),
                anyhow!("relationship type '{}' is not in the allowed set", raw),
            )
        })
    }

    /// Label used when a caller leaves the relationship label blank.
    pub const fn default_label(self) -> &'static str {
        match self {
            RelationshipType::ParentChild => "Parent",
            RelationshipType::Spouse => "Spouse",
            RelationshipType::Sibling => "Sibling",
            RelationshipType::GrandparentGrandchild => "Grandparent",
            RelationshipType::UncleNephew => "Uncle",
            RelationshipType::Cousin => "Cousin",
            RelationshipType::InLaw => "In-law",
            RelationshipType::StepFamily => "Step-family",
            RelationshipType::Adopted => "Adopted",
            RelationshipType::GuardianWard => "Guardian",
            RelationshipType::Friend => "Friend",
            RelationshipType::Business => "Business Partner",
            RelationshipType::Other => "Other",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_value())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub login_id: LoginId,
    pub name: String,
    pub family_code: Option<FamilyCode>,
    pub verification_status: VerificationStatus,
    pub role: Role,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    /// Set when the user joins a family, cleared when they leave.
    pub joined_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn belongs_to(&self, code: &FamilyCode) -> bool {
        self.family_code.as_ref() == Some(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TreeLayout {
    #[default]
    Vertical,
    Horizontal,
    Radial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSettings {
    pub layout: TreeLayout,
    pub show_avatars: bool,
    pub show_lineage: bool,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            layout: TreeLayout::Vertical,
            show_avatars: true,
            show_lineage: true,
        }
    }
}

/// Basic member info kept on the family record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBasic {
    pub user_id: UserId,
    pub login_id: LoginId,
    pub name: String,
    pub verification_status: VerificationStatus,
    pub is_root: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: FamilyId,
    pub code: FamilyCode,
    pub name: String,
    pub root_user_id: Option<UserId>,
    pub member_count: u32,
    pub members: Vec<MemberBasic>,
    pub is_active: bool,
    pub settings: TreeSettings,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Family {
    pub fn new(code: FamilyCode, name: String, root: UserId) -> Self {
        let now = now();
        Self {
            id: FamilyId::generate(),
            code,
            name,
            root_user_id: Some(root),
            member_count: 0,
            members: Vec::new(),
            is_active: true,
            settings: TreeSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self, user_id: UserId) -> bool {
        self.root_user_id == Some(user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStyle {
    pub color: String,
    pub visible: bool,
    pub width: f64,
    pub height: f64,
}

impl Default for NodeStyle {
    fn default() -> Self {
        Self {
            color: "#3b82f6".to_string(),
            visible: true,
            width: 180.0,
            height: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: NodeId,
    pub family_id: FamilyId,
    pub user_id: UserId,
    pub position: Position,
    pub style: NodeStyle,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A node joined to its owning user. `member` is `None` when the user record
/// no longer resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct HydratedNode {
    pub node: TreeNode,
    pub member: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStyle {
    pub color: String,
    pub stroke_width: f64,
    pub animated: bool,
    pub line_type: String,
}

impl Default for EdgeStyle {
    fn default() -> Self {
        Self {
            color: "#64748b".to_string(),
            stroke_width: 2.0,
            animated: false,
            line_type: "smoothstep".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub family_id: FamilyId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub relationship_type: RelationshipType,
    pub relationship_label: String,
    pub style: EdgeStyle,
    pub created_by: UserId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Connection {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            family_id: self.family_id,
            source_node_id: self.source_node_id,
            target_node_id: self.target_node_id,
            relationship_type: self.relationship_type,
            relationship_label: self.relationship_label.clone(),
        }
    }

    pub fn touches(&self, node_id: NodeId) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// The uniqueness tuple for edges. Two edges with the same key are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub family_id: FamilyId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub relationship_type: RelationshipType,
    pub relationship_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCounts {
    pub total: u32,
    pub verified: u32,
    pub pending: u32,
    pub rejected: u32,
    pub male: u32,
    pub female: u32,
    pub other_gender: u32,
    pub unspecified_gender: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetail {
    pub user_id: UserId,
    pub login_id: LoginId,
    pub name: String,
    pub email: String,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub verification_status: VerificationStatus,
    pub role: Role,
    pub is_root: bool,
    pub node_id: Option<NodeId>,
    pub position: Option<Position>,
    pub joined_at: Option<NaiveDateTime>,
}

/// Derived summary of a family's membership. Recomputable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub family_code: FamilyCode,
    pub family_id: FamilyId,
    pub members: Vec<MemberDetail>,
    pub counts: MemberCounts,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMemberPayload {
    pub email: String,
    pub name: String,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    pub family_code: Option<String>,
    pub family_name: Option<String>,
}

/// Registration input after trimming and validation.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub email: String,
    pub name: String,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    pub family_code: Option<FamilyCode>,
    pub family_name: Option<String>,
}

impl RegisterMemberPayload {
    pub fn normalize(self) -> Result<NewMember> {
        let email = self.email.trim().to_ascii_lowercase();
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(LibError::invalid(
                "A valid email address is required",
                anyhow!("malformed email '{}'", self.email),
            ));
        }

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LibError::invalid(
                "Name is required",
                anyhow!("empty member name"),
            ));
        }

        let family_code = match non_blank(self.family_code) {
            Some(raw) => Some(FamilyCode::parse(&raw)?),
            None => None,
        };

        Ok(NewMember {
            email,
            name,
            gender: self.gender,
            date_of_birth: self.date_of_birth,
            place_of_birth: non_blank(self.place_of_birth),
            father_name: non_blank(self.father_name),
            mother_name: non_blank(self.mother_name),
            family_code,
            family_name: non_blank(self.family_name),
        })
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredMember {
    pub user: User,
    pub family_code: FamilyCode,
    pub family_created: bool,
    pub is_root: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLayoutData {
    pub color: Option<String>,
    pub visible: Option<bool>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLayout {
    pub id: NodeId,
    pub position: Position,
    pub data: Option<NodeLayoutData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveLayoutPayload {
    pub family_tree_id: FamilyId,
    pub nodes: Vec<NodeLayout>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionPayload {
    pub family_tree_id: FamilyId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub relationship_type: String,
    pub relationship_label: Option<String>,
    pub style: Option<EdgeStyle>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionPayload {
    pub connection_id: ConnectionId,
    pub relationship_type: String,
    pub relationship_label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuery {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeQuery {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyTreeQuery {
    pub family_code: Option<FamilyCode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureNodesPayload {
    #[serde(default)]
    pub family_code: Option<FamilyCode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyCodePayload {
    pub family_code: FamilyCode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberQuery {
    pub family_code: FamilyCode,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRootPayload {
    pub family_code: FamilyCode,
    pub new_root_user_id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationPayload {
    pub status: VerificationStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchNodesQuery {
    /// Falls back to the caller's own family when absent.
    pub family_code: Option<FamilyCode>,
    pub q: Option<String>,
    pub relationship: Option<String>,
    pub gender: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureNodesOutcome {
    pub created: usize,
    pub cleaned: usize,
    pub failed: usize,
}

impl EnsureNodesOutcome {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.cleaned == 0 && self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRemoval {
    pub user_id: UserId,
    pub removed_nodes: usize,
    pub removed_connections: usize,
    pub root_user_id: Option<UserId>,
    pub family_active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyTreeSummary {
    pub id: FamilyId,
    pub code: FamilyCode,
    pub name: String,
    pub root_user_id: Option<UserId>,
    pub is_user_root: bool,
    pub member_count: u32,
    pub is_active: bool,
    pub settings: TreeSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNodeData {
    pub user_id: UserId,
    pub name: String,
    pub login_id: LoginId,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub place_of_birth: Option<String>,
    pub verification_status: VerificationStatus,
    pub is_root: bool,
    /// Whether any chain of relationships links this member to the root.
    pub connected_to_root: bool,
    pub color: String,
    pub visible: bool,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub position: Position,
    pub data: FlowNodeData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdgeData {
    pub relationship_type: RelationshipType,
    pub relationship_label: String,
    pub style: EdgeStyle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: ConnectionId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    pub label: String,
    pub data: FlowEdgeData,
}

impl From<Connection> for FlowEdge {
    fn from(value: Connection) -> Self {
        Self {
            id: value.id,
            source: value.source_node_id,
            target: value.target_node_id,
            source_handle: value.source_handle,
            target_handle: value.target_handle,
            label: value.relationship_label.clone(),
            data: FlowEdgeData {
                relationship_type: value.relationship_type,
                relationship_label: value.relationship_label,
                style: value.style,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyTreeView {
    pub family_tree: FamilyTreeSummary,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSearchHit {
    pub node_id: NodeId,
    pub user_id: UserId,
    pub name: String,
    pub login_id: LoginId,
    pub gender: Option<Gender>,
    pub place_of_birth: Option<String>,
    pub position: Position,
    pub relationships: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn family_code_is_trimmed_and_uppercased() {
        let code = FamilyCode::parse("  ftab12cd ").expect("code should parse");
        assert_eq!(code.as_str(), "FTAB12CD");
    }

    #[test]
    fn family_code_rejects_short_or_foreign_codes() {
        for raw in ["FT123", "XX123456", "FT12-456", ""] {
            let err = FamilyCode::parse(raw).expect_err("code should be rejected");
            assert_eq!(err.code, "invalid_family_code");
        }
    }

    #[test]
    fn generated_codes_are_valid() {
        let code = FamilyCode::generate();
        assert_eq!(FamilyCode::parse(code.as_str()).expect("valid"), code);

        let login = LoginId::generate();
        assert!(login.as_str().starts_with(LOGIN_ID_PREFIX));
        assert_eq!(login.as_str().len(), LOGIN_ID_PREFIX.len() + LOGIN_ID_SUFFIX_LEN);
    }

    #[test]
    fn family_code_deserializes_through_validation() {
        let payload: FamilyCodePayload =
            serde_json::from_value(json!({"familyCode": "ftzz9999"})).expect("valid payload");
        assert_eq!(payload.family_code.as_str(), "FTZZ9999");

        let err = serde_json::from_value::<FamilyCodePayload>(json!({"familyCode": "nope"}));
        assert!(err.is_err());
    }

    #[test]
    fn relationship_type_parse_is_lenient_but_closed() {
        assert_eq!(
            RelationshipType::parse(" Parent_Child ").expect("parses"),
            RelationshipType::ParentChild
        );
        assert_eq!(
            RelationshipType::parse("in-law").expect("parses"),
            RelationshipType::InLaw
        );
        let err = RelationshipType::parse("nemesis").expect_err("unknown type");
        assert_eq!(err.code, "invalid_relationship_type");
    }

    #[test]
    fn relationship_type_round_trips_db_values() {
        for kind in RelationshipType::ALL {
            assert_eq!(RelationshipType::from_db_value(kind.as_db_value()), Some(*kind));
        }
        assert_eq!(
            serde_json::to_value(RelationshipType::GuardianWard).expect("serializes"),
            json!("guardian-ward")
        );
    }

    #[test]
    fn register_payload_normalizes_fields() {
        let payload = RegisterMemberPayload {
            email: " Ada@Example.COM ".to_string(),
            name: "  Ada  ".to_string(),
            gender: Some(Gender::Female),
            date_of_birth: None,
            place_of_birth: Some("   ".to_string()),
            father_name: Some(" Byron ".to_string()),
            mother_name: None,
            family_code: Some("ftabc123".to_string()),
            family_name: None,
        };

        let member = payload.normalize().expect("payload should normalize");
        assert_eq!(member.email, "ada@example.com");
        assert_eq!(member.name, "Ada");
        assert_eq!(member.place_of_birth, None);
        assert_eq!(member.father_name.as_deref(), Some("Byron"));
        assert_eq!(
            member.family_code.as_ref().map(FamilyCode::as_str),
            Some("FTABC123")
        );
    }

    #[test]
    fn register_payload_rejects_bad_email() {
        let payload = RegisterMemberPayload {
            email: "not-an-email".to_string(),
            name: "Ada".to_string(),
            gender: None,
            date_of_birth: None,
            place_of_birth: None,
            father_name: None,
            mother_name: None,
            family_code: None,
            family_name: None,
        };

        let err = payload.normalize().expect_err("email should be rejected");
        assert_eq!(err.public, "A valid email address is required");
    }
}
