use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::UserId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserError {
    #[error("name cannot be empty")]
    EmptyName,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("password must be between {min} and {max} characters")]
    InvalidPasswordLength { min: usize, max: usize },

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

pub const PASSWORD_MIN_LEN: usize = 6;
pub const PASSWORD_MAX_LEN: usize = 128;

//
// ─── ROLE ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            other => Err(UserError::UnknownRole(other.to_owned())),
        }
    }
}

//
// ─── PROFILE ───────────────────────────────────────────────────────────────────
//

/// Optional, free-form profile fields shown on dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub bio: Option<String>,
    pub institution: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Trims every field and turns blank strings into `None`.
    #[must_use]
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        }
        Self {
            bio: clean(self.bio),
            institution: clean(self.institution),
            avatar_url: clean(self.avatar_url),
        }
    }
}

//
// ─── USER ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: UserId,
    name: String,
    email: String,
    #[serde(skip)]
    password_hash: String,
    role: Role,
    profile: Profile,
    created_at: DateTime<Utc>,
}

impl User {
    /// Builds a validated user. The email is normalized to lower case.
    ///
    /// # Errors
    ///
    /// Returns `UserError::EmptyName` or `UserError::InvalidEmail`.
    pub fn new(
        id: UserId,
        name: impl Into<String>,
        email: &str,
        password_hash: impl Into<String>,
        role: Role,
        profile: Profile,
        created_at: DateTime<Utc>,
    ) -> Result<Self, UserError> {
        let name = validate_name(name.into())?;
        let email = normalize_email(email)?;
        Ok(Self {
            id,
            name,
            email,
            password_hash: password_hash.into(),
            role,
            profile: profile.normalized(),
            created_at,
        })
    }

    /// Rehydrate a user from storage without re-running validation.
    #[must_use]
    pub fn from_persisted(
        id: UserId,
        name: String,
        email: String,
        password_hash: String,
        role: Role,
        profile: Profile,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            email,
            password_hash,
            role,
            profile,
            created_at,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_faculty(&self) -> bool {
        self.role == Role::Faculty
    }

    /// Replace the display name and profile fields.
    ///
    /// # Errors
    ///
    /// Returns `UserError::EmptyName` when a blank name is supplied.
    pub fn update_profile(
        &mut self,
        name: Option<String>,
        profile: Profile,
    ) -> Result<(), UserError> {
        if let Some(name) = name {
            self.name = validate_name(name)?;
        }
        self.profile = profile.normalized();
        Ok(())
    }

    pub fn set_password_hash(&mut self, hash: impl Into<String>) {
        self.password_hash = hash.into();
    }
}

fn validate_name(name: String) -> Result<String, UserError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(UserError::EmptyName);
    }
    Ok(trimmed.to_owned())
}

/// Lower-cases and sanity-checks an email address.
///
/// # Errors
///
/// Returns `UserError::InvalidEmail` unless the value has a non-empty local
/// part and a dotted domain.
pub fn normalize_email(email: &str) -> Result<String, UserError> {
    let email = email.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(UserError::InvalidEmail);
    };
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(UserError::InvalidEmail);
    }
    Ok(email)
}

/// # Errors
///
/// Returns `UserError::InvalidPasswordLength` outside the accepted range.
pub fn validate_password(password: &str) -> Result<(), UserError> {
    let len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(UserError::InvalidPasswordLength {
            min: PASSWORD_MIN_LEN,
            max: PASSWORD_MAX_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn user() -> User {
        User::new(
            UserId::new(1),
            "  Ada  ",
            "Ada@Example.COM",
            "hash",
            Role::Student,
            Profile::default(),
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn new_user_normalizes_name_and_email() {
        let user = user();
        assert_eq!(user.name(), "Ada");
        assert_eq!(user.email(), "ada@example.com");
    }

    #[test]
    fn rejects_bad_emails() {
        for bad in ["", "ada", "@example.com", "ada@", "ada@localhost", "a b@x.io", "a@b@c.io"] {
            assert_eq!(normalize_email(bad), Err(UserError::InvalidEmail), "{bad}");
        }
    }

    #[test]
    fn password_length_bounds() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn role_round_trips() {
        assert_eq!("Faculty".parse::<Role>().unwrap(), Role::Faculty);
        assert_eq!(Role::Student.to_string(), "student");
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let json = serde_json::to_value(user()).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "student");
    }

    #[test]
    fn profile_update_blanks_become_none() {
        let mut user = user();
        user.update_profile(
            Some("Ada L".into()),
            Profile {
                bio: Some("  ".into()),
                institution: Some(" MIT ".into()),
                avatar_url: None,
            },
        )
        .unwrap();
        assert_eq!(user.name(), "Ada L");
        assert_eq!(user.profile().bio, None);
        assert_eq!(user.profile().institution.as_deref(), Some("MIT"));
        assert!(user.update_profile(Some(" ".into()), Profile::default()).is_err());
    }
}
