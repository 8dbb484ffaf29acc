use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::models::{
    Connection, ConnectionId, ConnectionKey, EdgeStyle, Family, FamilyCode, FamilyId, Gender,
    HydratedNode, LoginId, MemberBasic, MemberCounts, MemberDetail, MemberSnapshot, NodeId,
    NodeStyle, Position, RelationshipType, Role, TreeNode, TreeSettings, User, UserId,
    VerificationStatus, now,
};
use crate::store::FamilyStore;

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_family_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

const USER_COLUMNS: &str = r#"
    id, email, login_id, name, family_code, verification_status, role, gender,
    date_of_birth, place_of_birth, father_name, mother_name, joined_at,
    created_at, updated_at
"#;

const FAMILY_COLUMNS: &str = r#"
    id, code, name, root_user_id, member_count, members, is_active, settings,
    created_at, updated_at
"#;

const NODE_COLUMNS: &str = r#"
    id, family_id, user_id, position_x, position_y, style, created_at, updated_at
"#;

const CONNECTION_COLUMNS: &str = r#"
    id, family_id, source_node_id, target_node_id, source_handle, target_handle,
    relationship_type, relationship_label, style, created_by, created_at, updated_at
"#;

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    login_id: String,
    name: String,
    family_code: Option<String>,
    verification_status: String,
    role: String,
    gender: Option<String>,
    date_of_birth: Option<NaiveDate>,
    place_of_birth: Option<String>,
    father_name: Option<String>,
    mother_name: Option<String>,
    joined_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct FamilyRow {
    id: Uuid,
    code: String,
    name: String,
    root_user_id: Option<Uuid>,
    member_count: i32,
    members: Json<Vec<MemberBasic>>,
    is_active: bool,
    settings: Json<TreeSettings>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct NodeRow {
    id: Uuid,
    family_id: Uuid,
    user_id: Uuid,
    position_x: f64,
    position_y: f64,
    style: Json<NodeStyle>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct ConnectionRow {
    id: Uuid,
    family_id: Uuid,
    source_node_id: Uuid,
    target_node_id: Uuid,
    source_handle: Option<String>,
    target_handle: Option<String>,
    relationship_type: String,
    relationship_label: String,
    style: Json<EdgeStyle>,
    created_by: Uuid,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    family_code: String,
    family_id: Uuid,
    members: Json<Vec<MemberDetail>>,
    counts: Json<MemberCounts>,
    updated_at: NaiveDateTime,
}

fn corrupt(column: &'static str, value: &str) -> LibError {
    LibError::database(
        "Stored family data is invalid",
        anyhow!("unexpected value '{}' in column {}", value, column),
    )
}

impl TryFrom<UserRow> for User {
    type Error = LibError;

    fn try_from(row: UserRow) -> Result<Self> {
        let family_code = row
            .family_code
            .as_deref()
            .map(FamilyCode::parse)
            .transpose()?;
        let verification_status = VerificationStatus::from_db_value(&row.verification_status)
            .ok_or_else(|| corrupt("users.verification_status", &row.verification_status))?;
        let role =
            Role::from_db_value(&row.role).ok_or_else(|| corrupt("users.role", &row.role))?;
        let gender = match row.gender.as_deref() {
            Some(raw) => Some(Gender::from_db_value(raw).ok_or_else(|| corrupt("users.gender", raw))?),
            None => None,
        };

        Ok(Self {
            id: UserId(row.id),
            email: row.email,
            login_id: LoginId(row.login_id),
            name: row.name,
            family_code,
            verification_status,
            role,
            gender,
            date_of_birth: row.date_of_birth,
            place_of_birth: row.place_of_birth,
            father_name: row.father_name,
            mother_name: row.mother_name,
            joined_at: row.joined_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<FamilyRow> for Family {
    type Error = LibError;

    fn try_from(row: FamilyRow) -> Result<Self> {
        Ok(Self {
            id: FamilyId(row.id),
            code: FamilyCode::parse(&row.code)?,
            name: row.name,
            root_user_id: row.root_user_id.map(UserId),
            member_count: u32::try_from(row.member_count)
                .map_err(|_| corrupt("families.member_count", &row.member_count.to_string()))?,
            members: row.members.0,
            is_active: row.is_active,
            settings: row.settings.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<NodeRow> for TreeNode {
    fn from(row: NodeRow) -> Self {
        Self {
            id: NodeId(row.id),
            family_id: FamilyId(row.family_id),
            user_id: UserId(row.user_id),
            position: Position {
                x: row.position_x,
                y: row.position_y,
            },
            style: row.style.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<ConnectionRow> for Connection {
    type Error = LibError;

    fn try_from(row: ConnectionRow) -> Result<Self> {
        let relationship_type = RelationshipType::from_db_value(&row.relationship_type)
            .ok_or_else(|| corrupt("connections.relationship_type", &row.relationship_type))?;
        Ok(Self {
            id: ConnectionId(row.id),
            family_id: FamilyId(row.family_id),
            source_node_id: NodeId(row.source_node_id),
            target_node_id: NodeId(row.target_node_id),
            source_handle: row.source_handle,
            target_handle: row.target_handle,
            relationship_type,
            relationship_label: row.relationship_label,
            style: row.style.0,
            created_by: UserId(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<SnapshotRow> for MemberSnapshot {
    type Error = LibError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(Self {
            family_code: FamilyCode::parse(&row.family_code)?,
            family_id: FamilyId(row.family_id),
            members: row.members.0,
            counts: row.counts.0,
            updated_at: row.updated_at,
        })
    }
}

/// Unique violations surface as conflicts so callers can treat a lost race
/// as benign. Everything else is a database failure.
fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation());
    if unique_violation {
        LibError::conflict("Record already exists", anyhow!(err))
    } else {
        LibError::database(public, anyhow!(err))
    }
}

fn member_count_column(count: u32) -> Result<i32> {
    i32::try_from(count).map_err(|_| {
        LibError::invalid(
            "Member count is out of range",
            anyhow!("member count {} does not fit in INTEGER", count),
        )
    })
}

fn node_uuids(node_ids: &[NodeId]) -> Vec<Uuid> {
    node_ids.iter().map(|id| id.0).collect()
}

/// Postgres-backed store. Single-statement writes only; the unique indexes in
/// the migration are the guard against concurrent duplicates.
#[derive(Clone)]
pub struct PgFamilyStore {
    pool: Arc<PgPool>,
}

impl PgFamilyStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn from_pool(pool: &PgPool) -> Self {
        Self {
            pool: Arc::new(pool.clone()),
        }
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    async fn users_by_id(&self, user_ids: &[Uuid]) -> Result<HashMap<UserId, User>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM family.users WHERE id = ANY($1)"
        ))
        .bind(user_ids)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load node members", err))?;

        rows.into_iter()
            .map(|row| User::try_from(row).map(|user| (user.id, user)))
            .collect()
    }
}

#[async_trait]
impl FamilyStore for PgFamilyStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO family.users (
                id, email, login_id, name, family_code, verification_status, role, gender,
                date_of_birth, place_of_birth, father_name, mother_name, joined_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(user.login_id.as_str())
        .bind(&user.name)
        .bind(user.family_code.as_ref().map(FamilyCode::as_str))
        .bind(user.verification_status.as_db_value())
        .bind(user.role.as_db_value())
        .bind(user.gender.map(Gender::as_db_value))
        .bind(user.date_of_birth)
        .bind(&user.place_of_birth)
        .bind(&user.father_name)
        .bind(&user.mother_name)
        .bind(user.joined_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to create user", err))?;
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM family.users WHERE id = $1"
        ))
        .bind(user_id.0)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load user", err))?;
        row.map(User::try_from).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE family.users
            SET email = $2,
                name = $3,
                family_code = $4,
                verification_status = $5,
                role = $6,
                gender = $7,
                date_of_birth = $8,
                place_of_birth = $9,
                father_name = $10,
                mother_name = $11,
                joined_at = $12,
                updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.family_code.as_ref().map(FamilyCode::as_str))
        .bind(user.verification_status.as_db_value())
        .bind(user.role.as_db_value())
        .bind(user.gender.map(Gender::as_db_value))
        .bind(user.date_of_birth)
        .bind(&user.place_of_birth)
        .bind(&user.father_name)
        .bind(&user.mother_name)
        .bind(user.joined_at)
        .bind(user.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to update user", err))?;

        if result.rows_affected() == 0 {
            return Err(LibError::not_found(
                "User not found",
                anyhow!("user {} not found for update", user.id),
            ));
        }
        Ok(())
    }

    async fn list_family_users(&self, code: &FamilyCode) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM family.users
            WHERE family_code = $1
            ORDER BY joined_at ASC NULLS LAST, seq ASC
            "#
        ))
        .bind(code.as_str())
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to list family members", err))?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn insert_family(&self, family: &Family) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO family.families (
                id, code, name, root_user_id, member_count, members, is_active, settings,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(family.id.0)
        .bind(family.code.as_str())
        .bind(&family.name)
        .bind(family.root_user_id.map(|id| id.0))
        .bind(member_count_column(family.member_count)?)
        .bind(Json(&family.members))
        .bind(family.is_active)
        .bind(Json(&family.settings))
        .bind(family.created_at)
        .bind(family.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to create family", err))?;
        Ok(())
    }

    async fn get_family(&self, family_id: FamilyId) -> Result<Option<Family>> {
        let row = sqlx::query_as::<_, FamilyRow>(&format!(
            "SELECT {FAMILY_COLUMNS} FROM family.families WHERE id = $1"
        ))
        .bind(family_id.0)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load family", err))?;
        row.map(Family::try_from).transpose()
    }

    async fn get_family_by_code(&self, code: &FamilyCode) -> Result<Option<Family>> {
        let row = sqlx::query_as::<_, FamilyRow>(&format!(
            "SELECT {FAMILY_COLUMNS} FROM family.families WHERE code = $1"
        ))
        .bind(code.as_str())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load family", err))?;
        row.map(Family::try_from).transpose()
    }

    async fn update_family(&self, family: &Family) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE family.families
            SET name = $2,
                root_user_id = $3,
                member_count = $4,
                members = $5,
                is_active = $6,
                settings = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(family.id.0)
        .bind(&family.name)
        .bind(family.root_user_id.map(|id| id.0))
        .bind(member_count_column(family.member_count)?)
        .bind(Json(&family.members))
        .bind(family.is_active)
        .bind(Json(&family.settings))
        .bind(family.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to update family", err))?;

        if result.rows_affected() == 0 {
            return Err(LibError::not_found(
                "Family tree not found",
                anyhow!("family {} not found for update", family.id),
            ));
        }
        Ok(())
    }

    async fn insert_node(&self, node: &TreeNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO family.nodes (
                id, family_id, user_id, position_x, position_y, style, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(node.id.0)
        .bind(node.family_id.0)
        .bind(node.user_id.0)
        .bind(node.position.x)
        .bind(node.position.y)
        .bind(Json(&node.style))
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to create tree node", err))?;
        Ok(())
    }

    async fn get_node(&self, node_id: NodeId) -> Result<Option<TreeNode>> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM family.nodes WHERE id = $1"
        ))
        .bind(node_id.0)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load tree node", err))?;
        Ok(row.map(TreeNode::from))
    }

    async fn list_nodes(&self, family_id: FamilyId) -> Result<Vec<TreeNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM family.nodes WHERE family_id = $1 ORDER BY seq ASC"
        ))
        .bind(family_id.0)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to list tree nodes", err))?;
        Ok(rows.into_iter().map(TreeNode::from).collect())
    }

    async fn list_hydrated_nodes(&self, family_id: FamilyId) -> Result<Vec<HydratedNode>> {
        let nodes = self.list_nodes(family_id).await?;
        let user_ids: Vec<Uuid> = nodes.iter().map(|node| node.user_id.0).collect();
        let mut users = self.users_by_id(&user_ids).await?;

        Ok(nodes
            .into_iter()
            .map(|node| {
                let member = users.remove(&node.user_id);
                HydratedNode { node, member }
            })
            .collect())
    }

    async fn update_node_layout(
        &self,
        node_id: NodeId,
        position: Position,
        style: &NodeStyle,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE family.nodes
            SET position_x = $2,
                position_y = $3,
                style = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(node_id.0)
        .bind(position.x)
        .bind(position.y)
        .bind(Json(style))
        .bind(now())
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to save node layout", err))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_nodes(&self, node_ids: &[NodeId]) -> Result<usize> {
        if node_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM family.nodes WHERE id = ANY($1)")
            .bind(node_uuids(node_ids))
            .execute(self.pool.as_ref())
            .await
            .map_err(|err| db_err("Failed to delete tree nodes", err))?;
        Ok(result.rows_affected() as usize)
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO family.connections (
                id, family_id, source_node_id, target_node_id, source_handle, target_handle,
                relationship_type, relationship_label, style, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(connection.id.0)
        .bind(connection.family_id.0)
        .bind(connection.source_node_id.0)
        .bind(connection.target_node_id.0)
        .bind(&connection.source_handle)
        .bind(&connection.target_handle)
        .bind(connection.relationship_type.as_db_value())
        .bind(&connection.relationship_label)
        .bind(Json(&connection.style))
        .bind(connection.created_by.0)
        .bind(connection.created_at)
        .bind(connection.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to create connection", err))?;
        Ok(())
    }

    async fn get_connection(&self, connection_id: ConnectionId) -> Result<Option<Connection>> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM family.connections WHERE id = $1"
        ))
        .bind(connection_id.0)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load connection", err))?;
        row.map(Connection::try_from).transpose()
    }

    async fn find_connection(&self, key: &ConnectionKey) -> Result<Option<Connection>> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            r#"
            SELECT {CONNECTION_COLUMNS}
            FROM family.connections
            WHERE family_id = $1
              AND source_node_id = $2
              AND target_node_id = $3
              AND relationship_type = $4
              AND relationship_label = $5
            LIMIT 1
            "#
        ))
        .bind(key.family_id.0)
        .bind(key.source_node_id.0)
        .bind(key.target_node_id.0)
        .bind(key.relationship_type.as_db_value())
        .bind(&key.relationship_label)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to query connections", err))?;
        row.map(Connection::try_from).transpose()
    }

    async fn list_connections(&self, family_id: FamilyId) -> Result<Vec<Connection>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM family.connections WHERE family_id = $1 ORDER BY seq ASC"
        ))
        .bind(family_id.0)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to list connections", err))?;
        rows.into_iter().map(Connection::try_from).collect()
    }

    async fn update_connection(&self, connection: &Connection) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE family.connections
            SET relationship_type = $2,
                relationship_label = $3,
                source_handle = $4,
                target_handle = $5,
                style = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(connection.id.0)
        .bind(connection.relationship_type.as_db_value())
        .bind(&connection.relationship_label)
        .bind(&connection.source_handle)
        .bind(&connection.target_handle)
        .bind(Json(&connection.style))
        .bind(connection.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to update connection", err))?;

        if result.rows_affected() == 0 {
            return Err(LibError::not_found(
                "Connection not found",
                anyhow!("connection {} not found for update", connection.id),
            ));
        }
        Ok(())
    }

    async fn delete_connection(&self, connection_id: ConnectionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM family.connections WHERE id = $1")
            .bind(connection_id.0)
            .execute(self.pool.as_ref())
            .await
            .map_err(|err| db_err("Failed to delete connection", err))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_connections_touching(&self, node_ids: &[NodeId]) -> Result<usize> {
        if node_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM family.connections
            WHERE source_node_id = ANY($1)
               OR target_node_id = ANY($1)
            "#,
        )
        .bind(node_uuids(node_ids))
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to delete node connections", err))?;
        Ok(result.rows_affected() as usize)
    }

    async fn upsert_member_snapshot(&self, snapshot: &MemberSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO family.member_snapshots (family_code, family_id, members, counts, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (family_code) DO UPDATE
            SET family_id = EXCLUDED.family_id,
                members = EXCLUDED.members,
                counts = EXCLUDED.counts,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(snapshot.family_code.as_str())
        .bind(snapshot.family_id.0)
        .bind(Json(&snapshot.members))
        .bind(Json(&snapshot.counts))
        .bind(snapshot.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to save member snapshot", err))?;
        Ok(())
    }

    async fn get_member_snapshot(&self, code: &FamilyCode) -> Result<Option<MemberSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT family_code, family_id, members, counts, updated_at
            FROM family.member_snapshots
            WHERE family_code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to load member snapshot", err))?;
        row.map(MemberSnapshot::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_enums_must_be_known() {
        let now = now();
        let row = UserRow {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            login_id: "GN12345678".to_string(),
            name: "A".to_string(),
            family_code: Some("ftabc123".to_string()),
            verification_status: "verified".to_string(),
            role: "citizen".to_string(),
            gender: Some("Female".to_string()),
            date_of_birth: None,
            place_of_birth: None,
            father_name: None,
            mother_name: None,
            joined_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let user = User::try_from(row.clone()).expect("row should convert");
        assert_eq!(user.family_code.as_ref().map(FamilyCode::as_str), Some("FTABC123"));
        assert_eq!(user.gender, Some(Gender::Female));
        assert_eq!(user.verification_status, VerificationStatus::Verified);

        let err = User::try_from(UserRow {
            role: "overlord".to_string(),
            ..row
        })
        .expect_err("unknown role");
        assert_eq!(err.kind, crate::error::ErrorKind::Database);
    }

    #[test]
    fn connection_rows_reject_unknown_relationship_types() {
        let now = now();
        let row = ConnectionRow {
            id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
            source_node_id: Uuid::new_v4(),
            target_node_id: Uuid::new_v4(),
            source_handle: Some("bottom-source".to_string()),
            target_handle: Some("top-target".to_string()),
            relationship_type: "parent-child".to_string(),
            relationship_label: "Mother".to_string(),
            style: Json(EdgeStyle::default()),
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        let edge = Connection::try_from(row.clone()).expect("row should convert");
        assert_eq!(edge.relationship_type, RelationshipType::ParentChild);

        assert!(
            Connection::try_from(ConnectionRow {
                relationship_type: "rival".to_string(),
                ..row
            })
            .is_err()
        );
    }
}
