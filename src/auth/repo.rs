use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::Database;

/// Account role; decides which portal surfaces a user may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::Patient
    }
}

/// User record in the database. The password hash and reset state never leave
/// the server.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub policy_number: Option<String>,
    pub insurance_provider: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code_expiry: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Fields required to create a record; the store assigns id and created_at.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Field-wise profile update; `None` keeps the stored value.
#[derive(Debug, Default, Clone)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub policy_number: Option<String>,
    pub insurance_provider: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("store unavailable")]
    Unavailable,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence contract for credential records. Email uniqueness and the
/// exactly-once consumption of reset codes are guaranteed here, not in the
/// service layer.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn insert(&self, new: NewUser) -> Result<User, StoreError>;
    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, StoreError>;
    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
    async fn set_reset_code(
        &self,
        id: Uuid,
        code: &str,
        expiry: OffsetDateTime,
    ) -> Result<(), StoreError>;
    /// Atomically installs the new hash and clears the reset state, guarded on
    /// the stored code still matching. Returns false when another caller
    /// consumed the code first.
    async fn consume_reset_code(
        &self,
        id: Uuid,
        code: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError>;
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, first_name, last_name, phone, \
     address, date_of_birth, gender, policy_number, insurance_provider, city, state, zip_code, \
     reset_code, reset_code_expiry, created_at";

/// Postgres-backed store. Fails fast with `Unavailable` while the database
/// watcher reports the connection down.
pub struct PgCredentialStore {
    db: Database,
}

impl PgCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.db.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Unavailable,
        _ => StoreError::Other(e.into()),
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.guard()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = lower($1)");
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.guard()?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx)
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        self.guard()?;
        let sql = format!(
            "INSERT INTO users (name, email, password_hash, role) \
             VALUES ($1, lower($2), $3, $4) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.role)
            .fetch_one(self.db.pool())
            .await
            .map_err(map_sqlx)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, StoreError> {
        self.guard()?;
        let sql = format!(
            "UPDATE users SET \
                name = COALESCE($2, name), \
                email = COALESCE(lower($3), email), \
                first_name = COALESCE($4, first_name), \
                last_name = COALESCE($5, last_name), \
                phone = COALESCE($6, phone), \
                address = COALESCE($7, address), \
                date_of_birth = COALESCE($8, date_of_birth), \
                gender = COALESCE($9, gender), \
                policy_number = COALESCE($10, policy_number), \
                insurance_provider = COALESCE($11, insurance_provider), \
                city = COALESCE($12, city), \
                state = COALESCE($13, state), \
                zip_code = COALESCE($14, zip_code) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.email)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.phone)
            .bind(changes.address)
            .bind(changes.date_of_birth)
            .bind(changes.gender)
            .bind(changes.policy_number)
            .bind(changes.insurance_provider)
            .bind(changes.city)
            .bind(changes.state)
            .bind(changes.zip_code)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx)
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        self.guard()?;
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(self.db.pool())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn set_reset_code(
        &self,
        id: Uuid,
        code: &str,
        expiry: OffsetDateTime,
    ) -> Result<(), StoreError> {
        self.guard()?;
        sqlx::query("UPDATE users SET reset_code = $2, reset_code_expiry = $3 WHERE id = $1")
            .bind(id)
            .bind(code)
            .bind(expiry)
            .execute(self.db.pool())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn consume_reset_code(
        &self,
        id: Uuid,
        code: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        self.guard()?;
        // Single conditional UPDATE: of two concurrent callers with the same
        // code, exactly one row-matches and wins.
        let result = sqlx::query(
            "UPDATE users SET password_hash = $3, reset_code = NULL, reset_code_expiry = NULL \
             WHERE id = $1 AND reset_code = $2",
        )
        .bind(id)
        .bind(code)
        .bind(password_hash)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }
}

/// In-memory store backing `AppState::fake()` and the service tests. Same
/// contract as the Postgres store, including atomic code consumption.
#[derive(Default)]
pub struct MemoryStore {
    users: std::sync::Mutex<Vec<User>>,
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email.to_lowercase(),
            password_hash: new.password_hash,
            role: new.role,
            first_name: None,
            last_name: None,
            phone: None,
            address: None,
            date_of_birth: None,
            gender: None,
            policy_number: None,
            insurance_provider: None,
            city: None,
            state: None,
            zip_code: None,
            reset_code: None,
            reset_code_expiry: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = &changes.email {
            if users
                .iter()
                .any(|u| u.id != id && u.email.eq_ignore_ascii_case(email))
            {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email.to_lowercase();
        }
        if let Some(v) = changes.first_name {
            user.first_name = Some(v);
        }
        if let Some(v) = changes.last_name {
            user.last_name = Some(v);
        }
        if let Some(v) = changes.phone {
            user.phone = Some(v);
        }
        if let Some(v) = changes.address {
            user.address = Some(v);
        }
        if let Some(v) = changes.date_of_birth {
            user.date_of_birth = Some(v);
        }
        if let Some(v) = changes.gender {
            user.gender = Some(v);
        }
        if let Some(v) = changes.policy_number {
            user.policy_number = Some(v);
        }
        if let Some(v) = changes.insurance_provider {
            user.insurance_provider = Some(v);
        }
        if let Some(v) = changes.city {
            user.city = Some(v);
        }
        if let Some(v) = changes.state {
            user.state = Some(v);
        }
        if let Some(v) = changes.zip_code {
            user.zip_code = Some(v);
        }
        Ok(Some(user.clone()))
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn set_reset_code(
        &self,
        id: Uuid,
        code: &str,
        expiry: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == id) {
            user.reset_code = Some(code.to_string());
            user.reset_code_expiry = Some(expiry);
        }
        Ok(())
    }

    async fn consume_reset_code(
        &self,
        id: Uuid,
        code: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(false);
        };
        if user.reset_code.as_deref() != Some(code) {
            return Ok(false);
        }
        user.password_hash = password_hash.to_string();
        user.reset_code = None;
        user.reset_code_expiry = None;
        Ok(true)
    }
}
