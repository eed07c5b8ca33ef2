//! Corruption guard — shape validation of persisted snapshots.
//!
//! DESIGN
//! ======
//! Persisted state is validated as raw JSON before any of it is trusted.
//! The only normalization applied is converting an object-shaped
//! `conversations` field into the explicit `[id, record]` pair list. Any
//! other deviation is reported as a `Corruption`, and the caller resets the
//! whole working set instead of attempting a partial repair.
//!
//! Counts above the configured limits are corruption too: they indicate a
//! runaway write loop rather than real use.

use serde_json::Value;

/// Snapshot schema written by this engine.
pub const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardLimits {
    pub max_conversations: usize,
    pub max_messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("payload is not valid JSON: {0}")]
    Unparseable(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u64),
    #[error("conversations field missing")]
    MissingConversations,
    #[error("conversations field is neither a pair list nor an object")]
    ConversationsWrongType,
    #[error("conversation entry {0} is not an [id, record] pair")]
    MalformedPair(usize),
    #[error("conversation entry {index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: &'static str },
    #[error("conversation entry {index} has a non-list {field}")]
    FieldNotList { index: usize, field: &'static str },
    #[error("{count} conversations exceeds the limit of {max}")]
    TooManyConversations { count: usize, max: usize },
    #[error("conversation entry {index} has {count} messages, limit {max}")]
    TooManyMessages { index: usize, count: usize, max: usize },
    #[error("active conversation id is not a string")]
    ActiveIdWrongType,
    #[error("record decode failed: {0}")]
    Decode(String),
}

/// A snapshot whose shape passed validation. Records are still raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSnapshot {
    pub conversations: Vec<(String, Value)>,
    pub active_conversation_id: Option<String>,
}

/// Validate a raw persisted snapshot.
///
/// # Errors
///
/// Returns the first [`Corruption`] found.
pub fn validate(raw: &str, limits: GuardLimits) -> Result<ValidatedSnapshot, Corruption> {
    let root: Value = serde_json::from_str(raw).map_err(|e| Corruption::Unparseable(e.to_string()))?;
    let Value::Object(mut root) = root else {
        return Err(Corruption::NotAnObject);
    };

    if let Some(version) = root.get("schemaVersion") {
        match version.as_u64() {
            Some(v) if v <= SCHEMA_VERSION => {}
            Some(v) => return Err(Corruption::UnsupportedSchema(v)),
            None => return Err(Corruption::UnsupportedSchema(0)),
        }
    }

    let conversations = match root.remove("conversations") {
        Some(Value::Array(items)) => pairs_from_list(items)?,
        // EDGE: older writers stored the map as an object keyed by id.
        Some(Value::Object(map)) => map.into_iter().collect(),
        Some(_) => return Err(Corruption::ConversationsWrongType),
        None => return Err(Corruption::MissingConversations),
    };

    if conversations.len() > limits.max_conversations {
        return Err(Corruption::TooManyConversations {
            count: conversations.len(),
            max: limits.max_conversations,
        });
    }

    for (index, (_, record)) in conversations.iter().enumerate() {
        check_record(index, record, limits)?;
    }

    let active_conversation_id = match root.get("activeConversationId") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err(Corruption::ActiveIdWrongType),
    };

    Ok(ValidatedSnapshot { conversations, active_conversation_id })
}

fn pairs_from_list(items: Vec<Value>) -> Result<Vec<(String, Value)>, Corruption> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Array(mut pair) = item else {
                return Err(Corruption::MalformedPair(index));
            };
            if pair.len() != 2 {
                return Err(Corruption::MalformedPair(index));
            }
            let record = pair.pop().unwrap_or(Value::Null);
            match pair.pop() {
                Some(Value::String(id)) => Ok((id, record)),
                _ => Err(Corruption::MalformedPair(index)),
            }
        })
        .collect()
}

fn check_record(index: usize, record: &Value, limits: GuardLimits) -> Result<(), Corruption> {
    let Value::Object(fields) = record else {
        return Err(Corruption::MalformedRecord { index, reason: "record is not an object" });
    };
    if !fields.get("id").is_some_and(Value::is_string) {
        return Err(Corruption::MalformedRecord { index, reason: "id is not a string" });
    }
    if !fields.get("title").is_some_and(Value::is_string) {
        return Err(Corruption::MalformedRecord { index, reason: "title is not a string" });
    }

    // EDGE: a non-list value here breaks every downstream iteration.
    for field in ["messages", "canvasElements"] {
        match fields.get(field) {
            None | Some(Value::Array(_)) => {}
            Some(_) => return Err(Corruption::FieldNotList { index, field }),
        }
    }

    let message_count = fields.get("messages").and_then(Value::as_array).map_or(0, Vec::len);
    if message_count > limits.max_messages {
        return Err(Corruption::TooManyMessages { index, count: message_count, max: limits.max_messages });
    }
    Ok(())
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
