use super::PolicyStore;
use crate::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use policyhub_types::{HousePolicy, NewUser, Policy, PolicyType, User, UserWithPolicies};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const LIST_USERS: &str = "SELECT id, full_name, role FROM users ORDER BY id";

const INSERT_USER: &str =
    "INSERT INTO users (full_name, role) VALUES ($1, $2) RETURNING id, full_name, role";

const LIST_HOUSE_POLICIES: &str = "SELECT id, policy_id, address, year_built, rebuild_value_cents
     FROM house_policies ORDER BY id";

// policy_type is an enum column; cast so it decodes as text.
const LIST_POLICIES: &str = "SELECT id, user_id, policy_type::text AS policy_type, policy_number,
            premium_cents, start_date, end_date, status
     FROM policies ORDER BY id";

const LIST_USERS_WITH_POLICIES: &str = "SELECT u.id, u.full_name, u.role,
            COALESCE(BOOL_OR(p.policy_type::text = 'HOUSE'), FALSE) AS has_house,
            COALESCE(BOOL_OR(p.policy_type::text = 'MOTOR'), FALSE) AS has_motor
     FROM users u
     LEFT JOIN policies p ON p.user_id = u.id
     GROUP BY u.id, u.full_name, u.role
     ORDER BY u.id";

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        role: row.try_get("role")?,
    })
}

fn policy_from_row(row: &PgRow) -> Result<Policy, DbError> {
    let policy_type: String = row.try_get("policy_type")?;
    let policy_type = policy_type
        .parse::<PolicyType>()
        .map_err(|e| DbError::Decode(e.to_string()))?;

    Ok(Policy {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        policy_type,
        policy_number: row.try_get("policy_number")?,
        premium_cents: row.try_get("premium_cents")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        status: row.try_get("status")?,
    })
}

fn house_policy_from_row(row: &PgRow) -> Result<HousePolicy, sqlx::Error> {
    Ok(HousePolicy {
        id: row.try_get("id")?,
        policy_id: row.try_get("policy_id")?,
        address: row.try_get("address")?,
        year_built: row.try_get("year_built")?,
        rebuild_value_cents: row.try_get("rebuild_value_cents")?,
    })
}

#[async_trait]
impl PolicyStore for PgPool {
    async fn list_users(&self) -> Result<Vec<User>, DbError> {
        let rows = sqlx::query(LIST_USERS).fetch_all(self).await?;
        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    async fn create_user(&self, new_user: &NewUser) -> Result<User, DbError> {
        let row = sqlx::query(INSERT_USER)
            .bind(&new_user.full_name)
            .bind(&new_user.role)
            .fetch_one(self)
            .await?;
        Ok(user_from_row(&row)?)
    }

    async fn list_house_policies(&self) -> Result<Vec<HousePolicy>, DbError> {
        let rows = sqlx::query(LIST_HOUSE_POLICIES).fetch_all(self).await?;
        let policies = rows
            .iter()
            .map(house_policy_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(policies)
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, DbError> {
        let rows = sqlx::query(LIST_POLICIES).fetch_all(self).await?;
        rows.iter().map(policy_from_row).collect()
    }

    async fn list_users_with_policies(&self) -> Result<Vec<UserWithPolicies>, DbError> {
        let rows = sqlx::query(LIST_USERS_WITH_POLICIES)
            .fetch_all(self)
            .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(UserWithPolicies {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                role: row.try_get("role")?,
                has_house: row.try_get("has_house")?,
                has_motor: row.try_get("has_motor")?,
            });
        }
        Ok(users)
    }

    async fn ping(&self) -> Result<DateTime<Utc>, DbError> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()").fetch_one(self).await?;
        Ok(now)
    }

    async fn close(&self) {
        sqlx::Pool::close(self).await;
    }
}
