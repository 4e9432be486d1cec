// User records - clients and staff members

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::Role;

/// A registered user: a client or a staff member.
///
/// Phones are stored normalised (`+998XXXXXXXXX`) and unique; the dynamic
/// access checks and the client resolver both look users up here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub phone_normalised: String,
    pub full_name: String,
    pub role: Role,
    /// Preferred language tag, `uz` or `ru`.
    pub language: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new_client(
        id: i64,
        phone_normalised: impl Into<String>,
        full_name: impl Into<String>,
        language: impl Into<String>,
        address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        User {
            id,
            phone_normalised: phone_normalised.into(),
            full_name: full_name.into(),
            role: Role::Client,
            language: language.into(),
            address,
            created_at: now,
            updated_at: now,
        }
    }
}
