//! Read-only participant lookups.
//!
//! The `User` table is owned by an identity collaborator outside this
//! engine's scope (§1); this store only resolves ids to role/timezone for
//! admission checks and authorization re-validation.

use crate::data::models::{Role, User};
use sqlx::PgPool;

pub struct UserStore<'a> {
    pool: &'a PgPool,
}

impl<'a> UserStore<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT id, display_name, timezone, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
    }

    /// Resolve `id` and assert it has `expected_role`. Returns `Ok(None)` if
    /// the id doesn't resolve or resolves to a different role -- the caller
    /// maps both to `participant_not_found` (§4.C check 3).
    pub async fn find_with_role(&self, id: &str, expected_role: Role) -> Result<Option<User>, sqlx::Error> {
        Ok(self.find_by_id(id).await?.filter(|u| u.role == expected_role))
    }
}
