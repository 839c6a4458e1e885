//! User entity and DTOs.

use occtrack_core::error::CoreError;
use occtrack_core::types::Timestamp;
use occtrack_core::user::{normalize_email, validate_email, validate_username};
use serde::{Deserialize, Serialize};

use super::record::{Entity, RecordMeta, UniqueKey};

/// A record in the `users` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub username: String,
    /// Stored lowercased.
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// DTO for creating a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// DTO for updating a user. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Entity for User {
    const COLLECTION: &'static str = "users";
    const ENTITY: &'static str = "user";

    type Create = CreateUser;
    type Patch = UpdateUser;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn build(meta: RecordMeta, input: CreateUser) -> Result<Self, CoreError> {
        validate_username(&input.username)?;
        validate_email(input.email.trim())?;
        Ok(Self {
            meta,
            username: input.username,
            email: normalize_email(&input.email),
            display_name: input.display_name.filter(|n| !n.trim().is_empty()),
        })
    }

    fn patched(&self, patch: UpdateUser, _now: Timestamp) -> Result<Self, CoreError> {
        let mut next = self.clone();
        if let Some(email) = patch.email {
            validate_email(email.trim())?;
            next.email = normalize_email(&email);
        }
        if let Some(name) = patch.display_name {
            next.display_name = Some(name).filter(|n| !n.trim().is_empty());
        }
        Ok(next)
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        vec![
            UniqueKey::new("email", self.email.clone()),
            UniqueKey::new("username", self.username.clone()),
        ]
    }
}
