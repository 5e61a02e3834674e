//! # Topic Grammar
//!
//! Every topic is `{instanceName}/{domain}/{...path}`:
//!
//! | domain | path |
//! |--------|------|
//! | `online` | (none) |
//! | `metadata` | `plugins/{id}`, `components/{id}`, `instance-info` |
//! | `components` | `{componentId}/{memberName}` |
//! | `rpc/services` | `{address}` |
//! | `rpc/replies` | `{randomId}` |
//! | `logger` | (none) |
//!
//! Filters use the broker wildcards `+` (one level) and `#` (rest).

use crate::error::TopicError;

/// Top-level topic namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Online,
    Metadata,
    Components,
    RpcServices,
    RpcReplies,
    Logger,
}

impl Domain {
    const ALL: [Domain; 6] = [
        Domain::Online,
        Domain::Metadata,
        Domain::Components,
        Domain::RpcServices,
        Domain::RpcReplies,
        Domain::Logger,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Metadata => "metadata",
            Self::Components => "components",
            Self::RpcServices => "rpc/services",
            Self::RpcReplies => "rpc/replies",
            Self::Logger => "logger",
        }
    }
}

/// Build `{instance}/{domain}[/{path...}]`.
#[must_use]
pub fn build_topic(instance: &str, domain: Domain, path: &[&str]) -> String {
    let mut topic = format!("{}/{}", instance, domain.as_str());
    for part in path {
        topic.push('/');
        topic.push_str(part);
    }
    topic
}

/// A topic split into its grammar parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    pub instance: &'a str,
    pub domain: Domain,
    /// Remaining path after the domain; empty for `online`/`logger`.
    pub path: &'a str,
}

/// Split a concrete topic. Wildcards are not accepted.
pub fn parse_topic(topic: &str) -> Result<ParsedTopic<'_>, TopicError> {
    if topic.contains(['+', '#']) {
        return Err(TopicError::Malformed(topic.to_string()));
    }
    let (instance, rest) = topic
        .split_once('/')
        .ok_or_else(|| TopicError::Malformed(topic.to_string()))?;
    if instance.is_empty() {
        return Err(TopicError::Malformed(topic.to_string()));
    }

    for domain in Domain::ALL {
        let name = domain.as_str();
        let Some(after) = rest.strip_prefix(name) else {
            continue;
        };
        if after.is_empty() {
            return Ok(ParsedTopic {
                instance,
                domain,
                path: "",
            });
        }
        if let Some(path) = after.strip_prefix('/') {
            if path.is_empty() {
                return Err(TopicError::Malformed(topic.to_string()));
            }
            return Ok(ParsedTopic {
                instance,
                domain,
                path,
            });
        }
    }

    Err(TopicError::UnknownDomain(topic.to_string()))
}

/// Broker-style filter matching with `+` and `#`.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
