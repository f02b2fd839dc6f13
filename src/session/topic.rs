//! Topic name and filter validation
//!
//! Publish topics are concrete names. Subscribe filters may carry the `+`
//! and `#` wildcards under the usual MQTT level rules.

use crate::error::{ClientError, ClientResult};

/// Longest topic the protocol can encode
pub const MAX_TOPIC_LEN: usize = 65_535;

fn check_common(topic: &str) -> ClientResult<()> {
    if topic.is_empty() {
        return Err(ClientError::invalid_topic(topic, "topic is empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ClientError::invalid_topic(
            truncate(topic),
            format!("topic exceeds {} bytes", MAX_TOPIC_LEN),
        ));
    }
    if topic.contains('\0') {
        return Err(ClientError::invalid_topic(topic, "topic contains NUL"));
    }
    Ok(())
}

fn truncate(topic: &str) -> String {
    topic.chars().take(32).collect::<String>() + "..."
}

/// Validate a topic used for publishing
pub fn validate_publish_topic(topic: &str) -> ClientResult<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(ClientError::invalid_topic(
            topic,
            "wildcards are not allowed when publishing",
        ));
    }
    Ok(())
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> ClientResult<()> {
    check_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(ClientError::invalid_topic(
                filter,
                "'#' must occupy the whole last level",
            ));
        }
        if level.contains('+') && *level != "+" {
            return Err(ClientError::invalid_topic(
                filter,
                "'+' must occupy a whole level",
            ));
        }
    }
    Ok(())
}
