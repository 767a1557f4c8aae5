/// Access token claims and the identity derived from them
///
/// Only the fields the client consumes are modelled; every other claim the
/// server adds is ignored.

use serde::{Deserialize, Deserializer, Serialize};

/// Platform role carried in the `role` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Reader,
    Author,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "READER",
            Role::Author => "AUTHOR",
        }
    }
}

/// JWT Claims read from an access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// User primary key. The server may encode it as a number or a numeric string.
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Author pen name, shown instead of the username when present
    #[serde(default)]
    pub pen_name: Option<String>,
    /// Expiration time (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl AccessClaims {
    /// Check if token has expired. A token without `exp` is treated as expired.
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        match self.exp {
            Some(exp) => exp <= now,
            None => true,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            username: self.username.clone(),
            role: self.role,
            avatar: self.avatar.clone(),
            display_name: self.pen_name.clone(),
        }
    }
}

fn deserialize_user_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawUserId {
        Number(i64),
        Text(String),
    }

    match RawUserId::deserialize(deserializer)? {
        RawUserId::Number(id) => Ok(id),
        RawUserId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("user_id is not numeric: {:?}", text))),
    }
}

/// The authenticated user as seen by the client.
///
/// Only produced by decoding an access token; there is no public constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    user_id: i64,
    username: String,
    role: Role,
    avatar: Option<String>,
    display_name: Option<String>,
}

impl Identity {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub(crate) fn apply(&mut self, update: IdentityUpdate) {
        if let Some(avatar) = update.avatar {
            self.avatar = avatar;
        }
        if let Some(display_name) = update.display_name {
            self.display_name = display_name;
        }
    }
}

/// Profile fields a user can edit without a new token.
///
/// `None` leaves a field unchanged; `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    pub avatar: Option<Option<String>>,
    pub display_name: Option<Option<String>>,
}
