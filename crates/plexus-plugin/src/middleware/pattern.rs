//! Route scope patterns.

use std::fmt;

/// One compiled route pattern.
///
/// Segments match literally, `*` matches exactly one segment and a trailing
/// `**` matches any (possibly empty) suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Rest,
}

impl RoutePattern {
    /// Parses `pattern`, returning a description of the problem on failure.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if !pattern.starts_with('/') {
            return Err(format!("pattern '{pattern}' must start with '/'"));
        }
        let parts: Vec<&str> = split(pattern).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" if i + 1 == parts.len() => Segment::Rest,
                "**" => return Err(format!("'**' must be the last segment in '{pattern}'")),
                "*" => Segment::Any,
                p if p.contains('*') => {
                    return Err(format!("partial wildcard '{p}' in '{pattern}'"));
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Returns whether `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Where a middleware applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteScope {
    /// Every route.
    Global,
    /// Routes matching any of the patterns.
    Routes(Vec<RoutePattern>),
}

impl RouteScope {
    /// Builds a route-scoped scope from pattern strings.
    pub fn routes<I, S>(patterns: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| RoutePattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if compiled.is_empty() {
            return Err("a route scope needs at least one pattern".to_string());
        }
        Ok(Self::Routes(compiled))
    }

    /// Returns whether this scope covers `path`.
    pub fn applies_to(&self, path: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Routes(patterns) => patterns.iter().any(|p| p.matches(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_wildcards() {
        let exact = RoutePattern::parse("/api/files").expect("valid");
        assert!(exact.matches("/api/files"));
        assert!(exact.matches("/api/files/"));
        assert!(!exact.matches("/api/files/1"));

        let one = RoutePattern::parse("/api/*/meta").expect("valid");
        assert!(one.matches("/api/42/meta"));
        assert!(!one.matches("/api/meta"));

        let rest = RoutePattern::parse("/admin/**").expect("valid");
        assert!(rest.matches("/admin"));
        assert!(rest.matches("/admin/users/7"));
        assert!(!rest.matches("/api/admin"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(RoutePattern::parse("api").is_err());
        assert!(RoutePattern::parse("/a/**/b").is_err());
        assert!(RoutePattern::parse("/a/b*").is_err());
        assert!(RouteScope::routes(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_scope_applies() {
        let scope = RouteScope::routes(["/upload", "/files/**"]).expect("valid");
        assert!(scope.applies_to("/files/a/b"));
        assert!(!scope.applies_to("/download"));
        assert!(RouteScope::Global.applies_to("/anything"));
    }
}
