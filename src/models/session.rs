use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sonic_rs::Value;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Prefix of the hash holding one session record.
pub const SESSION_KEY_PREFIX: &str = "session:";
/// Prefix of the set holding one user's live session ids.
pub const USER_SESSIONS_KEY_PREFIX: &str = "user_sessions:";

pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_LAST_ACCESSED: &str = "last_accessed";
pub const FIELD_DATA: &str = "data";

/// Returns the backend key of a session record.
pub fn session_key(session_id: &Uuid) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

/// Returns the backend key of a user's session index.
pub fn user_sessions_key(user_id: &str) -> String {
    format!("{}{}", USER_SESSIONS_KEY_PREFIX, user_id)
}

/// Represents a user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The opaque identifier of this session.
    pub session_id: Uuid,
    /// The ID of the user this session belongs to.
    pub user_id: String,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last successful read.
    pub last_accessed: DateTime<Utc>,
    /// Caller-defined data attached to the session.
    pub payload: Value,
}

impl Session {
    /// Encodes the session as the field/value pairs of its backend hash.
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            (FIELD_USER_ID.to_string(), self.user_id.clone()),
            (FIELD_CREATED_AT.to_string(), format_timestamp(&self.created_at)),
            (FIELD_LAST_ACCESSED.to_string(), format_timestamp(&self.last_accessed)),
            (FIELD_DATA.to_string(), encode_payload(&self.payload)?),
        ])
    }

    /// Decodes a session from the fields of its backend hash.
    ///
    /// A record written by an older client may lack `last_accessed`; in that
    /// case it falls back to `created_at`.
    pub fn from_fields(session_id: Uuid, fields: &HashMap<String, String>) -> Result<Self> {
        let user_id = required(fields, FIELD_USER_ID)?.to_string();
        let created_at = parse_timestamp(required(fields, FIELD_CREATED_AT)?)?;
        let last_accessed = match fields.get(FIELD_LAST_ACCESSED) {
            Some(raw) => parse_timestamp(raw)?,
            None => created_at,
        };
        let payload = decode_payload(required(fields, FIELD_DATA)?)?;

        Ok(Self {
            session_id,
            user_id,
            created_at,
            last_accessed,
            payload,
        })
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::Serialization(format!("Session record is missing '{}'", name)))
}

/// Formats a timestamp the way it is stored in a session record.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Serialization(format!("Invalid timestamp '{}': {}", raw, e)))
}

/// Serializes a payload into the opaque string stored in the `data` field.
pub fn encode_payload(payload: &Value) -> Result<String> {
    sonic_rs::to_string(payload)
        .map_err(|e| AppError::Serialization(format!("Payload serialization failed: {}", e)))
}

/// Parses the `data` field back into a payload.
pub fn decode_payload(raw: &str) -> Result<Value> {
    sonic_rs::from_str(raw)
        .map_err(|e| AppError::Serialization(format!("Payload deserialization failed: {}", e)))
}
