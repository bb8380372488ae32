//! User repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the account persistence operations the auth core touches:
//!   lookup by email, create, store refresh token, confirm email, avatar.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate `NewUser` before SQL mutations.
//! - Lookups use the normalized (trimmed, lowercase) email.
//! - Read paths reject invalid persisted state instead of masking it.
//! - The repository never commits; the surrounding scope decides.

use crate::db::DbError;
use crate::model::user::{normalize_email, NewUser, User, UserValidationError};
use rusqlite::{params, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const USER_SELECT_SQL: &str = "SELECT
    id,
    username,
    email,
    password_hash,
    avatar,
    refresh_token,
    confirmed,
    created_at
FROM users";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for account persistence and queries.
#[derive(Debug)]
pub enum RepoError {
    Validation(UserValidationError),
    Db(DbError),
    NotFound(String),
    EmailTaken(String),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(email) => write!(f, "user not found: {email}"),
            Self::EmailTaken(email) => write!(f, "account already exists: {email}"),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::EmailTaken(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<UserValidationError> for RepoError {
    fn from(value: UserValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for account operations.
pub trait UserRepository {
    /// Finds one account by email; `None` when absent.
    fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    /// Inserts a new account and returns the stored record.
    fn create_user(&self, user: &NewUser) -> RepoResult<User>;
    /// Stores (or clears) the latest refresh token for an account.
    fn update_token(&self, email: &str, refresh_token: Option<&str>) -> RepoResult<()>;
    /// Marks an account's email as confirmed.
    fn confirmed_email(&self, email: &str) -> RepoResult<()>;
    /// Replaces the avatar URL and returns the updated record.
    fn update_avatar(&self, email: &str, avatar_url: &str) -> RepoResult<User>;
}

/// SQLite-backed account repository over a borrowed connection.
///
/// Pass a `ScopedSession` (it derefs to `Connection`) so every call runs
/// inside the caller's unit-of-work.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{USER_SELECT_SQL} WHERE email = ?1;"))?;
        let mut rows = stmt.query([normalize_email(email)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_user_row(row)?));
        }
        Ok(None)
    }

    fn create_user(&self, user: &NewUser) -> RepoResult<User> {
        user.validate()?;

        let id = Uuid::new_v4();
        let inserted = self.conn.execute(
            "INSERT INTO users (
                id,
                username,
                email,
                password_hash,
                avatar
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                id.to_string(),
                user.username.as_str(),
                user.email.as_str(),
                user.password_hash.as_str(),
                user.avatar.as_deref(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(RepoError::EmailTaken(user.email.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        self.get_user_by_email(&user.email)?.ok_or_else(|| {
            RepoError::InvalidData(format!("created user `{}` not found in read-back", user.email))
        })
    }

    fn update_token(&self, email: &str, refresh_token: Option<&str>) -> RepoResult<()> {
        let email = normalize_email(email);
        let changed = self.conn.execute(
            "UPDATE users
             SET
                refresh_token = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE email = ?1;",
            params![email.as_str(), refresh_token],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(email));
        }
        Ok(())
    }

    fn confirmed_email(&self, email: &str) -> RepoResult<()> {
        let email = normalize_email(email);
        let changed = self.conn.execute(
            "UPDATE users
             SET
                confirmed = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE email = ?1;",
            [email.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(email));
        }
        Ok(())
    }

    fn update_avatar(&self, email: &str, avatar_url: &str) -> RepoResult<User> {
        let email = normalize_email(email);
        let changed = self.conn.execute(
            "UPDATE users
             SET
                avatar = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE email = ?1;",
            params![email.as_str(), avatar_url],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(email));
        }
        self.get_user_by_email(&email)?
            .ok_or(RepoError::NotFound(email))
    }
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in users.id"))
    })?;

    let confirmed = match row.get::<_, i64>("confirmed")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid confirmed value `{other}` in users.confirmed"
            )));
        }
    };

    Ok(User {
        id,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        avatar: row.get("avatar")?,
        refresh_token: row.get("refresh_token")?,
        confirmed,
        created_at: row.get("created_at")?,
    })
}
