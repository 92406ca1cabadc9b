use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use wayfare_core::repository::{StoreError, StoreResult};
use wayfare_core::users::{UserAccount, UserDirectory, UserRole};
use wayfare_shared::pii::Masked;

use crate::trip_repo::parse_gender;

pub struct PostgresUserDirectory {
    pub pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    role: String,
    gender: Option<String>,
    email: Option<String>,
    is_verified: bool,
    email_confirmed: bool,
}

impl UserRow {
    fn into_account(self) -> StoreResult<UserAccount> {
        let role = match self.role.as_str() {
            "DRIVER" => UserRole::Driver,
            "PASSENGER" => UserRole::Passenger,
            other => {
                return Err(
                    <StoreError>::from(format!("unknown user role in store: {other}"))
                )
            }
        };
        let gender = self.gender.as_deref().map(parse_gender).transpose()?;
        Ok(UserAccount {
            id: self.id,
            role,
            gender,
            email: self.email.map(Masked),
            is_verified: self.is_verified,
            email_confirmed: self.email_confirmed,
        })
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, role, gender, email, is_verified, email_confirmed \
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_account).transpose()
    }
}
