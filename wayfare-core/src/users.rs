use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;
use wayfare_shared::pii::Masked;

use crate::repository::StoreResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Driver,
    Passenger,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

/// Account snapshot the engines read through the directory. Identity
/// management itself (signup, document checks, email flows) lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub role: UserRole,
    pub gender: Option<Gender>,
    pub email: Option<Masked<String>>,
    pub is_verified: bool,
    pub email_confirmed: bool,
}

impl UserAccount {
    /// An eligible account; tests flip individual gates off as needed.
    pub fn new(id: Uuid, role: UserRole) -> Self {
        Self {
            id,
            role,
            gender: None,
            email: None,
            is_verified: true,
            email_confirmed: true,
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserAccount>>;
}

/// In-memory directory used by tests and local runs.
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, UserAccount>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, user: UserAccount) {
        self.users.write().await.insert(user.id, user);
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserAccount>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}
