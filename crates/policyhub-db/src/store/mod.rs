//! Queries behind the HTTP routes.
//!
//! Each method is a single SQL statement. Both pool types implement
//! [`PolicyStore`] so the server can hold either behind a trait object.

mod postgres;
mod sqlite;

use crate::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use policyhub_types::{HousePolicy, NewUser, Policy, User, UserWithPolicies};

/// Read/create access to the policy desk tables.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All users, without sensitive columns.
    async fn list_users(&self) -> Result<Vec<User>, DbError>;

    /// Inserts a user and returns the stored row.
    async fn create_user(&self, new_user: &NewUser) -> Result<User, DbError>;

    /// All house-policy detail rows.
    async fn list_house_policies(&self) -> Result<Vec<HousePolicy>, DbError>;

    /// All policies.
    async fn list_policies(&self) -> Result<Vec<Policy>, DbError>;

    /// Every user with flags for the policy types they hold.
    async fn list_users_with_policies(&self) -> Result<Vec<UserWithPolicies>, DbError>;

    /// Round-trips to the database and returns its clock.
    async fn ping(&self) -> Result<DateTime<Utc>, DbError>;

    /// Shuts the store down. Postgres pools close their connections here;
    /// SQLite pools close theirs when the last handle is dropped.
    async fn close(&self);
}
