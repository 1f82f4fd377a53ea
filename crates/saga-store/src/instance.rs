use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::CorrelationId;

/// Version number of a stored saga instance, used for optimistic concurrency control.
///
/// Version 0 means "never persisted". The first insert writes version 1 and
/// every successful update increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an instance that is not stored yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) written by the first insert.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// The persisted form of one saga instance.
///
/// `current_state` is duplicated out of `data` so stores can index and query
/// it without decoding the business fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInstance {
    /// Correlation key, unique per live instance.
    pub correlation_id: CorrelationId,

    /// Name of the state the instance is in.
    pub current_state: String,

    /// Version of this record. Assigned by the store on write.
    pub version: Version,

    /// The serialized instance, business fields included.
    pub data: serde_json::Value,

    /// When the record was first inserted.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredInstance {
    /// Creates an unversioned record from raw JSON data.
    pub fn new(
        correlation_id: CorrelationId,
        current_state: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            current_state: current_state.into(),
            version: Version::initial(),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an unversioned record from a serializable instance.
    pub fn from_instance<T: Serialize>(
        correlation_id: CorrelationId,
        current_state: impl Into<String>,
        instance: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            correlation_id,
            current_state,
            serde_json::to_value(instance)?,
        ))
    }

    /// Deserializes the stored data back into an instance.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
