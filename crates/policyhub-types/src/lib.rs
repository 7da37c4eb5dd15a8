//! Shared domain records for the policyhub backend.
//!
//! These are the shapes the HTTP service reads from and writes to the
//! database. They carry no persistence logic; row decoding lives in
//! `policyhub-db` so this crate stays free of driver dependencies.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A user of the policy desk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Database identifier.
    pub id: i64,
    /// Display name.
    pub full_name: String,
    /// Role or policy discriminator (free-form, e.g. `"customer"`).
    pub role: String,
}

/// Fields required to create a [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub full_name: String,
    pub role: String,
}

/// Kind of insurance cover a [`Policy`] provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyType {
    /// Home and contents cover.
    House,
    /// Vehicle cover.
    Motor,
}

impl PolicyType {
    /// Returns the label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::House => "HOUSE",
            Self::Motor => "MOTOR",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored policy type label is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown policy type: {0}")]
pub struct UnknownPolicyType(pub String);

impl FromStr for PolicyType {
    type Err = UnknownPolicyType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOUSE" => Ok(Self::House),
            "MOTOR" => Ok(Self::Motor),
            other => Err(UnknownPolicyType(other.to_string())),
        }
    }
}

/// An insurance policy held by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    /// Owning [`User::id`].
    pub user_id: i64,
    pub policy_type: PolicyType,
    /// Human-facing policy reference.
    pub policy_number: String,
    /// Premium in minor currency units.
    pub premium_cents: i64,
    pub start_date: NaiveDate,
    /// `None` for open-ended cover.
    pub end_date: Option<NaiveDate>,
    /// Lifecycle status label (e.g. `"ACTIVE"`, `"CANCELLED"`).
    pub status: String,
}

/// House-specific details attached to a [`Policy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousePolicy {
    pub id: i64,
    /// The [`Policy::id`] these details extend.
    pub policy_id: i64,
    pub address: String,
    pub year_built: Option<i32>,
    /// Rebuild valuation in minor currency units.
    pub rebuild_value_cents: i64,
}

/// A user together with flags for the kinds of cover they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithPolicies {
    pub id: i64,
    pub full_name: String,
    pub role: String,
    pub has_house: bool,
    pub has_motor: bool,
}
