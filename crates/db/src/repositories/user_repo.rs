//! Queries on the `users` collection.

use occtrack_core::user::normalize_email;

use crate::error::DbResult;
use crate::models::User;

use super::Repository;

impl Repository<User> {
    /// Case-insensitive lookup by email.
    pub async fn find_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let email = normalize_email(email);
        Ok(self.list(|u| u.email == email).await?.into_iter().next())
    }
}
