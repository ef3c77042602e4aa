//! Session identity and derived resource names.
//!
//! Every remote resource a session owns is named deterministically from the
//! user's identity, so a controller can always find (or recreate) its own
//! resources without persisting anything. The naming scheme must stay stable
//! across releases for compatibility with already-deployed groups.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for compute group names.
pub const GROUP_NAME_PREFIX: &str = "z-session-";

/// Prefix for the container inside a group.
pub const CONTAINER_NAME_PREFIX: &str = "session-";

/// Prefix for per-user storage shares.
pub const SHARE_NAME_PREFIX: &str = "vol-";

/// Group names must remain valid DNS labels (63 chars max).
const MAX_USERNAME_LEN: usize = 63 - GROUP_NAME_PREFIX.len();

/// Errors raised when constructing a session identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The username cannot be used to derive resource names.
    #[error("invalid username {name:?}: {reason}")]
    InvalidUsername { name: String, reason: String },
}

/// Stable per-user key from which all resource names derive.
///
/// Two identities with the same username are interchangeable; two identities
/// with different usernames can never collide on a derived name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    username: String,
    user_id: i64,
}

impl SessionIdentity {
    /// Create an identity, validating that the username is safe to embed in
    /// remote resource names.
    pub fn new(username: impl Into<String>, user_id: i64) -> Result<Self, IdentityError> {
        let username = username.into();
        validate_username(&username)?;
        Ok(Self { username, user_id })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Name of the compute group owning this session.
    pub fn group_name(&self) -> String {
        format!("{GROUP_NAME_PREFIX}{}", self.username)
    }

    /// Name of the container inside the compute group.
    pub fn container_name(&self) -> String {
        format!("{CONTAINER_NAME_PREFIX}{}", self.username)
    }

    /// Name of the user's persistent storage share.
    pub fn share_name(&self) -> String {
        format!("{SHARE_NAME_PREFIX}{}", self.username)
    }

    /// Expand `{USERNAME}` and `{USERID}` placeholders against this identity.
    pub fn expand_placeholders(&self, input: &str) -> String {
        input
            .replace("{USERNAME}", &self.username)
            .replace("{USERID}", &self.user_id.to_string())
    }
}

/// Validate a username for embedding in group/container/share names.
///
/// Resource names are DNS-label shaped: lowercase alphanumeric with hyphens,
/// starting and ending alphanumeric.
fn validate_username(name: &str) -> Result<(), IdentityError> {
    let invalid = |reason: &str| IdentityError::InvalidUsername {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("username cannot be empty"));
    }

    if name.len() > MAX_USERNAME_LEN {
        return Err(invalid(&format!(
            "username exceeds maximum length of {MAX_USERNAME_LEN} characters"
        )));
    }

    let valid_chars = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    if !name.chars().all(valid_chars) {
        return Err(invalid(
            "only lowercase alphanumeric characters and '-' are allowed",
        ));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid(
            "username must start and end with an alphanumeric character",
        ));
    }

    Ok(())
}
