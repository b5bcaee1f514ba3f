//! Domain entities and strongly-typed identifiers.
//!
//! Defines destinations, activity events, delivery records, and newtype ID
//! wrappers for compile-time type safety. Includes database serialization
//! traits and the delivery state machine for the outbound webhook pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed organization identifier.
    ///
    /// Every destination and activity event is scoped to an organization;
    /// discovery never crosses organization boundaries.
    OrgId
}

uuid_id! {
    /// Strongly-typed webhook destination identifier.
    DestinationId
}

uuid_id! {
    /// Strongly-typed activity event identifier.
    ///
    /// Events are immutable once persisted; this ID follows them through
    /// discovery and every delivery attempt.
    EventId
}

uuid_id! {
    /// Strongly-typed delivery record identifier.
    ///
    /// Also sent to the remote endpoint in the correlation header so
    /// receivers can deduplicate re-deliveries.
    DeliveryId
}

/// Authentication applied to outbound webhook requests.
///
/// Constructed once at the store boundary from the persisted `auth_type`
/// discriminant and JSON config blob. Missing or malformed fields degrade
/// to `None` so a misconfigured destination fails at the remote endpoint
/// with a 401 instead of inside the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication headers.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// Token placed after the `Bearer ` prefix.
        token: String,
    },
    /// A single custom header name/value pair.
    Header {
        /// Header name.
        name: String,
        /// Header value.
        value: String,
    },
    /// HTTP basic authentication.
    Basic {
        /// Basic auth username.
        username: String,
        /// Basic auth password.
        password: String,
    },
}

impl AuthConfig {
    /// Builds an `AuthConfig` from the persisted discriminant and config
    /// blob.
    ///
    /// Unknown auth types and incomplete configs yield `AuthConfig::None`
    /// rather than an error; configuration problems must never block the
    /// dispatch of other records.
    pub fn from_parts(auth_type: &str, config: Option<&serde_json::Value>) -> Self {
        let Some(config) = config else {
            return Self::None;
        };
        let field = |key: &str| config.get(key).and_then(|v| v.as_str()).map(str::to_owned);

        match auth_type {
            "bearer" => match field("token") {
                Some(token) => Self::Bearer { token },
                None => Self::None,
            },
            "header" => match (field("header_name"), field("header_value")) {
                (Some(name), Some(value)) => Self::Header { name, value },
                _ => Self::None,
            },
            "basic" => match (field("username"), field("password")) {
                (Some(username), Some(password)) => Self::Basic { username, password },
                _ => Self::None,
            },
            _ => Self::None,
        }
    }

    /// Returns the persisted discriminant for this config.
    pub fn auth_type(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer { .. } => "bearer",
            Self::Header { .. } => "header",
            Self::Basic { .. } => "basic",
        }
    }

    /// Returns the JSON config blob for persistence, if any.
    pub fn to_config_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::None => None,
            Self::Bearer { token } => Some(serde_json::json!({ "token": token })),
            Self::Header { name, value } => {
                Some(serde_json::json!({ "header_name": name, "header_value": value }))
            },
            Self::Basic { username, password } => {
                Some(serde_json::json!({ "username": username, "password": password }))
            },
        }
    }
}

/// A configured outbound webhook destination.
///
/// Describes where activity events are forwarded and under what delivery
/// policy. Pure configuration; all delivery state lives on
/// [`DeliveryRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    /// Unique identifier for this destination.
    pub id: DestinationId,

    /// Organization that owns this destination.
    pub org_id: OrgId,

    /// Human-readable name, unique within the organization.
    pub name: String,

    /// Target URL; must be a well-formed absolute http(s) URL.
    pub url: String,

    /// Event-type allow list. Empty means every event type matches.
    pub event_types: Vec<String>,

    /// Authentication attached to outbound requests.
    pub auth: AuthConfig,

    /// Shared secret for HMAC-SHA256 request signing.
    ///
    /// Absent means requests are sent unsigned.
    pub signing_secret: Option<String>,

    /// Whether discovery considers this destination at all.
    pub enabled: bool,

    /// Maximum events considered per discovery pass.
    pub batch_size: i32,

    /// Per-attempt HTTP timeout in milliseconds.
    pub timeout_ms: i32,

    /// Maximum delivery attempts before a record is exhausted.
    pub retry_max: i32,

    /// Base backoff unit for exponential retry scheduling.
    pub retry_backoff_ms: i32,

    /// User that created the destination, when known.
    pub created_by: Option<Uuid>,

    /// When this destination was created.
    pub created_at: DateTime<Utc>,

    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// Validates the configuration invariants: non-empty name and a
    /// well-formed absolute http(s) URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` describing the first violation.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::CoreError;

        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("destination name must not be empty".into()));
        }
        let url = url::Url::parse(&self.url)
            .map_err(|e| CoreError::InvalidInput(format!("invalid destination URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CoreError::InvalidInput(format!(
                "destination URL must be http or https, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Destination {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        // auth_type + auth_config columns collapse into the tagged enum here,
        // at the store boundary.
        let auth_type: String = row.try_get("auth_type")?;
        let auth_config: Option<serde_json::Value> = row.try_get("auth_config")?;
        let auth = AuthConfig::from_parts(&auth_type, auth_config.as_ref());

        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            event_types: row.try_get("event_types")?,
            auth,
            signing_secret: row.try_get("signing_secret")?,
            enabled: row.try_get("enabled")?,
            batch_size: row.try_get("batch_size")?,
            timeout_ms: row.try_get("timeout_ms")?,
            retry_max: row.try_get("retry_max")?,
            retry_backoff_ms: row.try_get("retry_backoff_ms")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// An organization activity event, read-only to this subsystem.
///
/// Produced and persisted elsewhere; the delivery pipeline only reads
/// events by ID or time window and never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Organization the event belongs to.
    pub org_id: OrgId,

    /// Event type string, e.g. `agent.installed`.
    pub event_type: String,

    /// Broad event category for receiver-side routing.
    pub event_category: String,

    /// Employee the event relates to, when applicable.
    pub employee_id: Option<Uuid>,

    /// Session the event was recorded under, when applicable.
    pub session_id: Option<Uuid>,

    /// Reporting client name, when applicable.
    pub client_name: Option<String>,

    /// Reporting client version, when applicable.
    pub client_version: Option<String>,

    /// Human-readable event summary.
    pub content: Option<String>,

    /// Arbitrary structured payload.
    pub payload: Option<serde_json::Value>,

    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

/// Delivery lifecycle status.
///
/// ```text
/// Pending --success--------------------> Delivered (terminal)
/// Pending --failure, attempts < max----> Pending (next_retry_at set)
/// Pending --failure, attempts == max---> Exhausted (terminal)
/// ```
///
/// No transition ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for dispatch (fresh, or scheduled for retry).
    Pending,

    /// Successfully delivered. Terminal.
    Delivered,

    /// Retry budget spent without a 2xx response. Terminal.
    Exhausted,
}

impl DeliveryStatus {
    /// Returns true for states the dispatcher never selects again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Exhausted)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Delivered => write!(f, "delivered"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// The per-(destination, event) delivery ledger entry.
///
/// At most one record exists per (destination, event) pair; this uniqueness
/// is what makes discovery idempotent. Created Pending by the discovery
/// worker, mutated only by the dispatcher, never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    /// Unique identifier, also used as the delivery-correlation header.
    pub id: DeliveryId,

    /// Destination this record delivers to.
    pub destination_id: DestinationId,

    /// Event being delivered.
    pub event_id: EventId,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Attempts made so far. Starts at zero.
    pub attempts: i32,

    /// Timestamp of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the record next becomes eligible for dispatch.
    ///
    /// Null means immediately eligible.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Last HTTP status observed, if a response was received.
    pub response_status: Option<i32>,

    /// Truncated capture of the last response body (at most 1 KiB).
    pub response_body: Option<String>,

    /// Last transport-level or formatted HTTP error.
    pub error_message: Option<String>,

    /// Set only on successful delivery.
    pub delivered_at: Option<DateTime<Utc>>,

    /// When the discovery worker created this record.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_display_matches_storage_form() {
        assert_eq!(DeliveryStatus::Pending.to_string(), "pending");
        assert_eq!(DeliveryStatus::Delivered.to_string(), "delivered");
        assert_eq!(DeliveryStatus::Exhausted.to_string(), "exhausted");
    }

    #[test]
    fn terminal_states_identified() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Exhausted.is_terminal());
    }

    #[test]
    fn auth_config_parses_bearer() {
        let config = serde_json::json!({ "token": "abc" });
        let auth = AuthConfig::from_parts("bearer", Some(&config));
        assert_eq!(auth, AuthConfig::Bearer { token: "abc".into() });
    }

    #[test]
    fn auth_config_missing_fields_degrade_to_none() {
        let config = serde_json::json!({ "unrelated": true });
        assert_eq!(AuthConfig::from_parts("bearer", Some(&config)), AuthConfig::None);
        assert_eq!(AuthConfig::from_parts("header", Some(&config)), AuthConfig::None);
        assert_eq!(AuthConfig::from_parts("basic", Some(&config)), AuthConfig::None);
        assert_eq!(AuthConfig::from_parts("bearer", None), AuthConfig::None);
    }

    #[test]
    fn auth_config_unknown_type_degrades_to_none() {
        let config = serde_json::json!({ "token": "abc" });
        assert_eq!(AuthConfig::from_parts("oauth2", Some(&config)), AuthConfig::None);
    }

    #[test]
    fn auth_config_round_trips_through_parts() {
        let auth = AuthConfig::Header { name: "X-Api-Key".into(), value: "k1".into() };
        let json = auth.to_config_json();
        let parsed = AuthConfig::from_parts(auth.auth_type(), json.as_ref());
        assert_eq!(parsed, auth);
    }

    fn destination_fixture() -> Destination {
        Destination {
            id: DestinationId::new(),
            org_id: OrgId::new(),
            name: "audit-sink".into(),
            url: "https://hooks.example.com/audit".into(),
            event_types: Vec::new(),
            auth: AuthConfig::None,
            signing_secret: None,
            enabled: true,
            batch_size: 100,
            timeout_ms: 30_000,
            retry_max: 3,
            retry_backoff_ms: 60_000,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn destination_validation_accepts_https() {
        assert!(destination_fixture().validate().is_ok());
    }

    #[test]
    fn destination_validation_rejects_bad_url() {
        let mut dest = destination_fixture();
        dest.url = "not a url".into();
        assert!(dest.validate().is_err());

        dest.url = "ftp://example.com/hook".into();
        assert!(dest.validate().is_err());
    }

    #[test]
    fn destination_validation_rejects_empty_name() {
        let mut dest = destination_fixture();
        dest.name = "  ".into();
        assert!(dest.validate().is_err());
    }
}
