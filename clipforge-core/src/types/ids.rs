use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::error::ValidationError;

/// Strongly typed ID for ingest records
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordId {
    pub fn new() -> Self {
        RecordId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RecordId)
    }
}

/// Strongly typed ID for the parent collection (event) a record belongs to
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct CollectionId(pub Uuid);

impl CollectionId {
    pub fn new() -> Self {
        CollectionId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse an optional, possibly blank form value.
    pub fn parse_required(raw: Option<&str>) -> Result<Self, ValidationError> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingCollection)?;
        Uuid::parse_str(raw)
            .map(CollectionId)
            .map_err(|_| ValidationError::MissingCollection)
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! opaque_host_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a host-issued identifier; blank input yields `None`.
            pub fn new(raw: impl Into<String>) -> Option<Self> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    None
                } else {
                    Some(Self(raw))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_host_id!(
    /// Token identifying an in-flight upload on the streaming host.
    UploadHandle
);
opaque_host_id!(
    /// The streaming host's durable identifier for an ingested asset.
    AssetId
);
opaque_host_id!(
    /// Identifier used to build signed playback references.
    PlaybackId
);
