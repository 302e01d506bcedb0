//! Serde helpers for durations written as whole seconds in config files.
//!
//! ```
//! # use serde::Deserialize;
//! # use std::time::Duration;
//! #[derive(Deserialize)]
//! struct Settings {
//!     #[serde(with = "kiln_cache::serde_secs")]
//!     interval: Duration,
//! }
//! let s: Settings = serde_json::from_str(r#"{"interval": 90}"#).unwrap();
//! assert_eq!(s.interval, Duration::from_secs(90));
//! ```

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Serialize a duration as whole seconds.
pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

/// Deserialize whole seconds into a duration.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Same encoding for `Option<Duration>`.
pub mod option {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serialize an optional duration as whole seconds.
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional whole seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_secs))
    }
}
