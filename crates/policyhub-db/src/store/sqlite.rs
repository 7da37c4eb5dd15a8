use super::PolicyStore;
use crate::{DbError, SqlitePool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use policyhub_types::{HousePolicy, NewUser, Policy, PolicyType, User, UserWithPolicies};
use rusqlite::{params, Connection, Row};

const LIST_USERS: &str = "SELECT id, full_name, role FROM users ORDER BY id";

const INSERT_USER: &str =
    "INSERT INTO users (full_name, role) VALUES (?1, ?2) RETURNING id, full_name, role";

const LIST_HOUSE_POLICIES: &str = "SELECT id, policy_id, address, year_built, rebuild_value_cents
     FROM house_policies ORDER BY id";

const LIST_POLICIES: &str = "SELECT id, user_id, policy_type, policy_number, premium_cents,
            start_date, end_date, status
     FROM policies ORDER BY id";

const LIST_USERS_WITH_POLICIES: &str = "SELECT u.id, u.full_name, u.role,
            COALESCE(MAX(p.policy_type = 'HOUSE'), 0) AS has_house,
            COALESCE(MAX(p.policy_type = 'MOTOR'), 0) AS has_motor
     FROM users u
     LEFT JOIN policies p ON p.user_id = u.id
     GROUP BY u.id, u.full_name, u.role
     ORDER BY u.id";

/// Runs `f` on a pooled connection off the async executor.
async fn with_conn<T, F>(pool: &SqlitePool, f: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await?
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        full_name: row.get("full_name")?,
        role: row.get("role")?,
    })
}

fn house_policy_from_row(row: &Row<'_>) -> rusqlite::Result<HousePolicy> {
    Ok(HousePolicy {
        id: row.get("id")?,
        policy_id: row.get("policy_id")?,
        address: row.get("address")?,
        year_built: row.get("year_built")?,
        rebuild_value_cents: row.get("rebuild_value_cents")?,
    })
}

/// Raw policy row; the type label is validated after the query finishes.
struct PolicyRow {
    policy: Policy,
    policy_type: String,
}

fn policy_row(row: &Row<'_>) -> rusqlite::Result<PolicyRow> {
    Ok(PolicyRow {
        policy: Policy {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            policy_type: PolicyType::House,
            policy_number: row.get("policy_number")?,
            premium_cents: row.get("premium_cents")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            status: row.get("status")?,
        },
        policy_type: row.get("policy_type")?,
    })
}

#[async_trait]
impl PolicyStore for SqlitePool {
    async fn list_users(&self) -> Result<Vec<User>, DbError> {
        with_conn(self, |conn| {
            let mut stmt = conn.prepare(LIST_USERS)?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    async fn create_user(&self, new_user: &NewUser) -> Result<User, DbError> {
        let new_user = new_user.clone();
        with_conn(self, move |conn| {
            let user = conn.query_row(
                INSERT_USER,
                params![new_user.full_name, new_user.role],
                user_from_row,
            )?;
            Ok(user)
        })
        .await
    }

    async fn list_house_policies(&self) -> Result<Vec<HousePolicy>, DbError> {
        with_conn(self, |conn| {
            let mut stmt = conn.prepare(LIST_HOUSE_POLICIES)?;
            let policies = stmt
                .query_map([], house_policy_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(policies)
        })
        .await
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, DbError> {
        with_conn(self, |conn| {
            let mut stmt = conn.prepare(LIST_POLICIES)?;
            let rows = stmt
                .query_map([], policy_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|row| {
                    let policy_type = row
                        .policy_type
                        .parse::<PolicyType>()
                        .map_err(|e| DbError::Decode(e.to_string()))?;
                    Ok(Policy {
                        policy_type,
                        ..row.policy
                    })
                })
                .collect()
        })
        .await
    }

    async fn list_users_with_policies(&self) -> Result<Vec<UserWithPolicies>, DbError> {
        with_conn(self, |conn| {
            let mut stmt = conn.prepare(LIST_USERS_WITH_POLICIES)?;
            let users = stmt
                .query_map([], |row| {
                    Ok(UserWithPolicies {
                        id: row.get("id")?,
                        full_name: row.get("full_name")?,
                        role: row.get("role")?,
                        has_house: row.get("has_house")?,
                        has_motor: row.get("has_motor")?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    async fn ping(&self) -> Result<DateTime<Utc>, DbError> {
        with_conn(self, |conn| {
            let now: DateTime<Utc> =
                conn.query_row("SELECT datetime('now')", [], |row| row.get(0))?;
            Ok(now)
        })
        .await
    }

    async fn close(&self) {
        // r2d2 has no explicit shutdown; idle connections close when the
        // last pool handle is dropped.
        tracing::debug!(
            idle = self.state().idle_connections,
            "sqlite store released"
        );
    }
}
