//! Event topic validation and translation to MQTT topic filters
//!
//! Event topics use `*` as a trailing wildcard. The MQTT syntax characters
//! `#`, `+` and `$` are reserved and never accepted from callers.

use thiserror::Error;

/// Longest accepted topic pattern, in bytes
pub const MAX_TOPIC_LEN: usize = 1024;

const RESERVED_CHARS: [char; 3] = ['#', '+', '$'];

/// Topic validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic is {0} bytes long, maximum is 1024")]
    TooLong(usize),
    #[error("Topic contains reserved character: '{0}'")]
    ReservedChar(char),
}

/// Check a subscription pattern without translating it
pub fn validate_pattern(pattern: &str) -> Result<(), TopicError> {
    if pattern.is_empty() {
        return Err(TopicError::Empty);
    }
    if pattern.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(pattern.len()));
    }
    if let Some(ch) = pattern.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(TopicError::ReservedChar(ch));
    }
    Ok(())
}

/// Translate an event topic pattern into an MQTT topic filter.
///
/// A trailing `*` becomes the multi-level wildcard `#`.
pub fn to_mqtt_filter(pattern: &str) -> Result<String, TopicError> {
    validate_pattern(pattern)?;
    match pattern.strip_suffix('*') {
        Some(prefix) => Ok(format!("{prefix}#")),
        None => Ok(pattern.to_string()),
    }
}

/// Check a topic used for publishing: non-empty and free of MQTT wildcards
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if let Some(ch) = topic.chars().find(|c| *c == '#' || *c == '+') {
        return Err(TopicError::ReservedChar(ch));
    }
    Ok(())
}
