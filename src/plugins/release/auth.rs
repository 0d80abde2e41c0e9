//! Users allowed to vote on and publish release posts.

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{JsonStore, StoreError};

/// Namespace of the authorised users (user id string → display name).
pub const NAMESPACE: &str = "rm6785:auth";

/// Users that may change the authorised list. Also the initial list.
pub const SUPERUSERS: [(&str, &str); 2] = [("1024853832", "hakimi"), ("1138003186", "samar")];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user is already in authorised users list")]
    AlreadyAuthorised,

    #[error("user is not in authorised users list")]
    NotAuthorised,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[must_use]
pub fn is_superuser(user_id: i64) -> bool {
    let id = user_id.to_string();
    SUPERUSERS.iter().any(|(superuser, _)| *superuser == id)
}

/// The persisted list of authorised users.
#[derive(Debug)]
pub struct AuthList {
    store: JsonStore,
}

impl AuthList {
    /// Opens the list, seeding it with the superusers when empty.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let mut store = JsonStore::open(dir, NAMESPACE)?;
        if store.is_empty() {
            info!("seeding authorised users with superusers");
            for (id, name) in SUPERUSERS {
                store.set(id, name)?;
            }
            store.save()?;
        }
        Ok(Self { store })
    }

    #[must_use]
    pub fn is_authorised(&self, user_id: i64) -> bool {
        self.store.contains(&user_id.to_string())
    }

    pub fn authorise(&mut self, name: &str, user_id: i64) -> Result<(), AuthError> {
        let key = user_id.to_string();
        if self.store.contains(&key) {
            warn!(
                "user [name: '{}', id: '{}'] is already in authorised users list",
                name, user_id
            );
            return Err(AuthError::AlreadyAuthorised);
        }

        info!(
            "adding user [name: '{}', id: '{}'] to authorised users list",
            name, user_id
        );
        self.store.set(&key, name)?;
        self.store.save()?;
        Ok(())
    }

    pub fn deauthorise(&mut self, user_id: i64) -> Result<(), AuthError> {
        let key = user_id.to_string();
        if !self.store.contains(&key) {
            warn!("user [id: '{}'] not in authorised users list", user_id);
            return Err(AuthError::NotAuthorised);
        }

        let name: String = self.store.get(&key).unwrap_or_default();
        info!(
            "removing user [name: '{}', id: '{}'] from authorised users list",
            name, user_id
        );
        self.store.remove(&key);
        self.store.save()?;
        Ok(())
    }
}
