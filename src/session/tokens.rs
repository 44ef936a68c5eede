use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Access token, refresh token and expiry, always held together.
///
/// "Not authenticated" is `Option<TokenTriple>::None`; there is no partially
/// populated triple. Fresh triples always carry an expiry; an unknown expiry
/// only shows up in token files written by hand and counts as expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTriple {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenTriple {
    pub fn new(access_token: &str, refresh_token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A partial update of the editable profile fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }

    /// Overlay the fields this patch sets onto `profile`.
    pub fn apply_to(&self, profile: &mut UserProfile) {
        if let Some(ref v) = self.first_name {
            profile.first_name = Some(v.clone());
        }
        if let Some(ref v) = self.last_name {
            profile.last_name = Some(v.clone());
        }
        if let Some(ref v) = self.email {
            profile.email = Some(v.clone());
        }
        if let Some(ref v) = self.phone {
            profile.phone = Some(v.clone());
        }
    }
}

/// Body returned by both the login and the refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_dto: Option<UserProfile>,
}

impl AuthResponse {
    /// Split into the token triple and the optional profile, rejecting empty
    /// tokens and a missing expiry.
    pub fn into_parts(self) -> Result<(TokenTriple, Option<UserProfile>), String> {
        if self.access_token.is_empty() {
            return Err("accessToken is empty".into());
        }
        if self.refresh_token.is_empty() {
            return Err("refreshToken is empty".into());
        }
        let Some(expires_at) = self.expires_at else {
            return Err("expiresAt is missing".into());
        };
        let tokens = TokenTriple {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Some(expires_at),
        };
        Ok((tokens, self.user_dto))
    }
}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Millis(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("timestamp {ms} out of range"))),
        Some(Raw::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{s}': {e}"))),
    }
}
