//! Resource pattern matching.
//!
//! Resources and patterns are `:`-separated segment lists such as
//! `org:42:space:7`. A pattern segment is either a literal, `*` (exactly one
//! segment) or, as the final segment only, `**` (one or more segments).
//!
//! ```text
//! org:*   matches org:42            but not org:42:space:1
//! org:**  matches org:42            and     org:42:space:1
//! org:42  matches org:42 only
//! ```

use std::fmt;

use crate::error::{StorageError, StorageResult};

/// Segment separator for resources and patterns.
pub const SEPARATOR: char = ':';

/// Maximum length of resource identifiers and patterns, in bytes.
pub const MAX_RESOURCE_LENGTH: usize = 1024;

const SINGLE: &str = "*";
const TRAILING: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Trailing,
}

/// A validated resource pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl ResourcePattern {
    /// Parses and validates a pattern.
    pub fn parse(pattern: &str) -> StorageResult<Self> {
        validate_text("resource pattern", pattern)?;

        let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => {
                    return Err(StorageError::invalid(format!(
                        "resource pattern '{pattern}' has an empty segment"
                    )))
                }
                SINGLE => Segment::Single,
                TRAILING if i == last => Segment::Trailing,
                TRAILING => {
                    return Err(StorageError::invalid(format!(
                        "resource pattern '{pattern}' uses '**' before the final segment"
                    )))
                }
                literal if literal.contains('*') => {
                    return Err(StorageError::invalid(format!(
                        "resource pattern '{pattern}' mixes '*' with literal text"
                    )))
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern contains no wildcard segments.
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Literal text preceding the first wildcard, including its trailing
    /// separator. Every matching resource starts with this prefix.
    pub fn literal_prefix(&self) -> String {
        let mut prefix = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    prefix.push_str(literal);
                    prefix.push(SEPARATOR);
                }
                Segment::Single | Segment::Trailing => return prefix,
            }
        }
        // Exact pattern: the prefix is the whole pattern.
        prefix.pop();
        prefix
    }

    /// Matches a validated resource identifier.
    pub fn matches(&self, resource: &str) -> bool {
        let mut parts = resource.split(SEPARATOR);
        for segment in &self.segments {
            match segment {
                Segment::Trailing => return parts.next().is_some(),
                Segment::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(literal) => match parts.next() {
                    Some(part) if part == literal => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Validates a concrete resource identifier used in a permission check.
pub fn validate_resource_id(resource: &str) -> StorageResult<()> {
    validate_text("resource id", resource)?;
    if resource.contains('*') {
        return Err(StorageError::invalid(format!(
            "resource id '{resource}' cannot contain wildcards"
        )));
    }
    if resource.split(SEPARATOR).any(str::is_empty) {
        return Err(StorageError::invalid(format!(
            "resource id '{resource}' has an empty segment"
        )));
    }
    Ok(())
}

/// Rejects empty, oversized and control-character input. PostgreSQL cannot
/// store NUL in text, so this keeps both backends in agreement.
fn validate_text(field: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::invalid(format!("{field} cannot be empty")));
    }
    if value.len() > MAX_RESOURCE_LENGTH {
        return Err(StorageError::invalid(format!(
            "{field} exceeds maximum length of {MAX_RESOURCE_LENGTH} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(StorageError::invalid(format!(
            "{field} cannot contain control characters"
        )));
    }
    Ok(())
}
