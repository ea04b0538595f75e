//! Peer payload types for the Lifeline messenger.
//!
//! A [`PeerPayload`] is the structured record exchanged over an open peer
//! connection. It is serialized with postcard by [`crate::codec`] and carried
//! opaquely by whichever connection provider is in use.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed payload text size in bytes (16 KB).
pub const MAX_TEXT_SIZE: usize = 16 * 1024;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// What a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Free text typed by the user.
    Text,
    /// A shared position: map link or raw coordinates, plus the coordinate pair.
    Location,
    /// A request for help in one of the [`RequestCategory`] categories.
    Request,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Location => write!(f, "location"),
            Self::Request => write!(f, "request"),
        }
    }
}

/// The fixed set of things a person can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestCategory {
    /// Medical supplies or attention.
    Medicine,
    /// Food.
    Food,
    /// Drinking water.
    Water,
    /// Immediate danger.
    Sos,
    /// Somewhere safe to stay.
    Shelter,
}

impl RequestCategory {
    /// Every category, in display order.
    pub const ALL: [Self; 5] = [
        Self::Medicine,
        Self::Food,
        Self::Water,
        Self::Sos,
        Self::Shelter,
    ];

    /// Human-readable label shown to users.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Medicine => "Medicine",
            Self::Food => "Food",
            Self::Water => "Water",
            Self::Sos => "SOS",
            Self::Shelter => "Shelter",
        }
    }
}

impl std::fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a string names no [`RequestCategory`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request category '{0}' (expected one of Medicine, Food, Water, SOS, Shelter)")]
pub struct UnknownCategory(pub String);

impl std::str::FromStr for RequestCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCategory(wanted.to_string()))
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude, -90 to 90.
    pub lat: f64,
    /// Longitude, -180 to 180.
    pub lng: f64,
}

impl Coordinates {
    /// Creates a coordinate pair without checking its range.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Returns `true` if both components are finite and within range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.lat, self.lng)
    }
}

/// The record sent over an open peer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPayload {
    /// Name the sender claims. Receivers tag history with the connection's
    /// peer name instead.
    pub from: String,
    /// What the payload carries.
    pub kind: PayloadKind,
    /// Free text, map link, or request label.
    pub text: String,
    /// Set for [`PayloadKind::Request`].
    pub category: Option<RequestCategory>,
    /// Set for [`PayloadKind::Location`].
    pub coords: Option<Coordinates>,
    /// When the sender created the payload.
    pub sent_at: Timestamp,
}

/// Error returned when a payload fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Payload text is empty.
    #[error("message content is empty")]
    Empty,
    /// Payload text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// A request payload has no category.
    #[error("request payload has no category")]
    MissingCategory,
    /// A location payload has no coordinates, or they are out of range.
    #[error("location payload has missing or invalid coordinates")]
    InvalidCoordinates,
}

impl PeerPayload {
    /// Validates this payload for sending or rendering.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] for blank text,
    /// [`ValidationError::TooLarge`] past [`MAX_TEXT_SIZE`], and the
    /// kind-specific errors for requests without a category and locations
    /// without valid coordinates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.text.len();
        if size > MAX_TEXT_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_TEXT_SIZE,
            });
        }
        match self.kind {
            PayloadKind::Text => {}
            PayloadKind::Request if self.category.is_none() => {
                return Err(ValidationError::MissingCategory);
            }
            PayloadKind::Request => {}
            PayloadKind::Location => {
                if !self.coords.is_some_and(|c| c.is_valid()) {
                    return Err(ValidationError::InvalidCoordinates);
                }
            }
        }
        Ok(())
    }
}
