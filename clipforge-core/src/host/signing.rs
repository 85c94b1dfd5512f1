use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::types::PlaybackId;

/// Tokens become valid slightly in the past to absorb clock skew.
const NOT_BEFORE_SKEW_SECS: i64 = 30;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub key_id: String,
    /// Base64 of a PEM-encoded RSA private key (PKCS#1 or PKCS#8).
    pub private_key_base64: String,
    pub token_ttl_secs: i64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            private_key_base64: String::new(),
            token_ttl_secs: 900,
        }
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("key_id", &self.key_id)
            .field("private_key_base64", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

/// What a playback token grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackAudience {
    #[serde(rename = "v")]
    Video,
    #[serde(rename = "t")]
    Thumbnail,
    #[serde(rename = "s")]
    Storyboard,
}

impl PlaybackAudience {
    pub fn as_claim(&self) -> &'static str {
        match self {
            PlaybackAudience::Video => "v",
            PlaybackAudience::Thumbnail => "t",
            PlaybackAudience::Storyboard => "s",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaybackClaims {
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub kid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<String>,
}

/// Signs time-limited playback tokens for signed playback ids.
pub struct PlaybackSigner {
    key_id: String,
    key: EncodingKey,
    ttl_secs: i64,
}

impl fmt::Debug for PlaybackSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSigner")
            .field("key_id", &self.key_id)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl PlaybackSigner {
    /// `Ok(None)` when signing is not configured.
    pub fn from_config(config: &SigningConfig) -> Result<Option<Self>, HostError> {
        if config.key_id.trim().is_empty() || config.private_key_base64.trim().is_empty() {
            return Ok(None);
        }
        let pem = STANDARD
            .decode(config.private_key_base64.trim())
            .map_err(|e| HostError::Signing(format!("signing key is not valid base64: {e}")))?;
        Self::from_pem(config.key_id.clone(), &pem, config.token_ttl_secs).map(Some)
    }

    pub fn from_pem(key_id: String, pem: &[u8], ttl_secs: i64) -> Result<Self, HostError> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| HostError::Signing(format!("invalid RSA signing key: {e}")))?;
        Ok(Self {
            key_id,
            key,
            ttl_secs,
        })
    }

    pub fn claims(
        &self,
        playback_id: &PlaybackId,
        audience: PlaybackAudience,
        max_resolution: Option<&str>,
    ) -> PlaybackClaims {
        let now = Utc::now().timestamp();
        PlaybackClaims {
            sub: playback_id.to_string(),
            aud: audience.as_claim().to_string(),
            exp: now + self.ttl_secs,
            iat: now,
            nbf: now - NOT_BEFORE_SKEW_SECS,
            kid: self.key_id.clone(),
            max_resolution: max_resolution
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        }
    }

    pub fn sign(
        &self,
        playback_id: &PlaybackId,
        audience: PlaybackAudience,
        max_resolution: Option<&str>,
    ) -> Result<String, HostError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        let claims = self.claims(playback_id, audience, max_resolution);
        encode(&header, &claims, &self.key).map_err(|e| HostError::Signing(e.to_string()))
    }
}
