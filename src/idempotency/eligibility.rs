use http::{HeaderMap, Method};
use std::str::FromStr;

use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*`: exactly one segment
    Any,
    /// `**`: whatever remains
    Rest,
}

/// A slash-separated path glob such as `/accounts/*/withdraw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(AppError::Validation(format!(
                "path pattern '{}' must start with '/'",
                raw
            )));
        }

        let segments: Vec<Segment> = split_segments(raw)
            .map(|segment| match segment {
                "*" => Segment::Any,
                "**" => Segment::Rest,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        if let Some(position) = segments.iter().position(|s| *s == Segment::Rest) {
            if position + 1 != segments.len() {
                return Err(AppError::Validation(format!(
                    "path pattern '{}' may only use '**' as its last segment",
                    raw
                )));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_segments(path);

        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match parts.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }
}

impl FromStr for PathPattern {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Decides which requests go through idempotency mediation.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    methods: Vec<Method>,
    patterns: Vec<PathPattern>,
}

impl EligibilityFilter {
    pub fn new(methods: Vec<Method>, patterns: Vec<PathPattern>) -> Self {
        Self { methods, patterns }
    }

    pub fn from_settings(settings: &IdempotencySettings) -> Result<Self> {
        let methods = settings
            .protected_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                    AppError::Validation(format!("invalid protected method '{}'", m))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let patterns = settings
            .protected_paths
            .iter()
            .map(|p| PathPattern::parse(p.trim()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(methods, patterns))
    }

    /// Returns true if the request must carry an idempotency key.
    pub fn classify(&self, method: &Method, path: &str) -> bool {
        self.methods.contains(method) && self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Reads and validates the `Idempotency-Key` header.
///
/// A blank header counts as missing. Keys must be visible ASCII and no longer
/// than `max_length`.
pub fn extract_key(headers: &HeaderMap, max_length: usize) -> Result<String> {
    let value = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or(AppError::MissingIdempotencyKey)?;

    let key = value
        .to_str()
        .map_err(|_| AppError::InvalidIdempotencyKey("key must be visible ASCII".to_string()))?
        .trim();

    if key.is_empty() {
        return Err(AppError::MissingIdempotencyKey);
    }
    if key.len() > max_length {
        return Err(AppError::InvalidIdempotencyKey(format!(
            "key exceeds {} characters",
            max_length
        )));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(AppError::InvalidIdempotencyKey(
            "key must not contain whitespace or control characters".to_string(),
        ));
    }

    Ok(key.to_string())
}
