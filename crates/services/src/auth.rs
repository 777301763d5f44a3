use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use learnsy_core::model::{
    Profile, Role, Subscription, User, UserId, normalize_email, validate_password,
};
use storage::repository::{StorageError, SubscriptionRepository, UserRepository};

use crate::Clock;
use crate::access::{Actor, FoundExt};
use crate::error::{AuthError, TokenError};

/// Default lifetime of an access token.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// JWT payload: subject is the user id as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 access tokens.
///
/// Expiry is checked against the service clock rather than the system time.
#[derive(Clone)]
pub struct TokenService {
    clock: Clock,
    ttl: Duration,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    #[must_use]
    pub fn new(clock: Clock, secret: &[u8], ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// # Errors
    ///
    /// Returns `TokenError::Signing` if the token cannot be encoded.
    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user.id().to_string(),
            role: user.role(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Decode a bearer token into the caller it was issued to.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Invalid` for malformed or tampered tokens and
    /// `TokenError::Expired` once `exp` has passed.
    pub fn verify(&self, token: &str) -> Result<Actor, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| TokenError::Invalid)?;
        let claims = data.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }
        let id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| TokenError::Invalid)?;
        Ok(Actor::new(id, claims.role))
    }
}

/// Checked in place of a stored hash when no account matches, so unknown
/// emails cost as much as wrong passwords. Uses the default argon2 parameters.
const DUMMY_PASSWORD_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$bGVhcm5zeWR1bW15c2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Argon2 on the blocking pool.
///
/// # Errors
///
/// Returns `AuthError::Hashing` if argon2 rejects the input.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// False for a wrong password and for an unparseable hash alike.
pub async fn verify_password(password: &str, hash: &str) -> bool {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || {
        PasswordHash::new(&hash).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    })
    .await
    .unwrap_or(false)
}

/// A signed-in user together with a fresh access token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

/// Account registration, login and profile maintenance.
#[derive(Clone)]
pub struct AuthService {
    clock: Clock,
    users: Arc<dyn UserRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    tokens: TokenService,
}

impl AuthService {
    #[must_use]
    pub fn new(
        clock: Clock,
        users: Arc<dyn UserRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        tokens: TokenService,
    ) -> Self {
        Self {
            clock,
            users,
            subscriptions,
            tokens,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create an account on the free plan and sign it in.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::EmailTaken` for a registered email,
    /// `AuthError::User` for invalid fields, or storage/token errors.
    pub async fn register(
        &self,
        name: String,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email)?;
        validate_password(password)?;
        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let now = self.clock.now();
        let hash = hash_password(password).await?;
        let user = User::new(UserId::new(0), name, &email, hash, role, Profile::default(), now)?;
        let id = match self.users.insert_user(&user).await {
            Ok(id) => id,
            Err(StorageError::Conflict) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        };
        let user = user.with_id(id);
        self.subscriptions
            .save_subscription(&Subscription::free(id, now))
            .await?;

        info!(user = %id, role = %role, "registered account");
        let token = self.tokens.issue(&user)?;
        Ok(AuthSession { user, token })
    }

    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` for an unknown email or a
    /// wrong password alike.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let Ok(email) = normalize_email(email) else {
            return Err(AuthError::InvalidCredentials);
        };
        let found = self.users.find_user_by_email(&email).await?;
        let hash = found
            .as_ref()
            .map_or(DUMMY_PASSWORD_HASH, User::password_hash);
        let verified = verify_password(password, hash).await;
        let user = match found {
            Some(user) if verified => user,
            _ => {
                warn!("rejected login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };
        info!(user = %user.id(), "signed in");
        let token = self.tokens.issue(&user)?;
        Ok(AuthSession { user, token })
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotFound` if the account no longer exists.
    pub async fn current_user(&self, id: UserId) -> Result<User, AuthError> {
        debug!(user = %id, "loading current user");
        Ok(self.users.get_user(id).await.or_missing("user")?)
    }

    /// # Errors
    ///
    /// Returns `AuthError::User` when the new name is blank.
    pub async fn update_profile(
        &self,
        id: UserId,
        name: Option<String>,
        profile: Profile,
    ) -> Result<User, AuthError> {
        let mut user = self.users.get_user(id).await.or_missing("user")?;
        user.update_profile(name, profile)?;
        self.users.update_user(&user).await?;
        info!(user = %id, "updated profile");
        Ok(user)
    }

    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if `current` does not match and
    /// `AuthError::User` if `new` is out of the accepted length range.
    pub async fn change_password(
        &self,
        id: UserId,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        let mut user = self.users.get_user(id).await.or_missing("user")?;
        if !verify_password(current, user.password_hash()).await {
            warn!(user = %id, "rejected password change");
            return Err(AuthError::InvalidCredentials);
        }
        validate_password(new)?;
        user.set_password_hash(hash_password(new).await?);
        self.users.update_user(&user).await?;
        info!(user = %id, "changed password");
        Ok(())
    }
}
