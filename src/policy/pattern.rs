//! Compiled path patterns shared by permission rules and the route table.
//!
//! ## Syntax
//!
//! | Segment | Matches |
//! |---------|---------|
//! | `samples` | the literal segment `samples` |
//! | `{id:int}` | one segment of ASCII digits, captured as `id` |
//! | `{login}` / `{login:str}` | any one non-empty segment, captured as `login` |
//!
//! Empty segments are ignored, so `/samples/` and `/samples` are the same path.
//! Patterns are parsed once; matching never re-parses the template.

use serde::Serialize;
use std::fmt;

/// Type of a placeholder segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// ASCII digits only.
    Int,
    /// Any non-empty segment.
    Str,
}

impl ParamKind {
    /// Whether `segment` is acceptable for this placeholder type.
    pub fn accepts(&self, segment: &str) -> bool {
        match self {
            ParamKind::Int => !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()),
            ParamKind::Str => !segment.is_empty(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::Str => "str",
        }
    }
}

/// One compiled segment of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Literal text.
    Literal(String),
    /// Typed placeholder.
    Param {
        /// Capture name.
        name: String,
        /// Placeholder type.
        kind: ParamKind,
    },
}

/// Errors raised while compiling a pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Pattern does not start with `/`.
    #[error("Pattern must start with '/': {0}")]
    NotAbsolute(String),

    /// Placeholder with no name, e.g. `{}` or `{:int}`.
    #[error("Placeholder without a name in segment: {0}")]
    EmptyName(String),

    /// Placeholder type other than `int` or `str`.
    #[error("Unknown placeholder type '{kind}' in segment: {segment}")]
    UnknownKind {
        /// Offending segment.
        segment: String,
        /// Unrecognised type.
        kind: String,
    },

    /// Braces that do not form a whole-segment placeholder.
    #[error("Malformed segment: {0}")]
    MalformedSegment(String),

    /// Two placeholders with the same name.
    #[error("Duplicate placeholder name: {0}")]
    DuplicateParam(String),
}

/// Captured placeholder values, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    /// Create an empty set of params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a captured value.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Get a captured value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a captured value parsed as an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    /// Iterate over (name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of captured values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split a request path into non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    literal_prefix: usize,
}

impl PathPattern {
    /// Compile a pattern.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::NotAbsolute(raw.to_string()));
        }

        let mut segments = Vec::new();
        for part in split_path(raw) {
            let segment = parse_segment(part)?;
            if let Segment::Param { name, .. } = &segment {
                let duplicate = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param { name: other, .. } if other == name));
                if duplicate {
                    return Err(PatternError::DuplicateParam(name.clone()));
                }
            }
            segments.push(segment);
        }

        Ok(Self::from_segments(segments))
    }

    fn from_segments(segments: Vec<Segment>) -> Self {
        let literal_prefix = segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count();
        let raw = render_segments(&segments);
        Self {
            raw,
            segments,
            literal_prefix,
        }
    }

    /// Normalised source text of the pattern.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compiled segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of leading literal segments; the specificity measure for rules.
    pub fn literal_prefix_len(&self) -> usize {
        self.literal_prefix
    }

    /// Routing shape: literals verbatim, placeholders by type only.
    ///
    /// `/samples/{id:int}` and `/samples/{sample_id:int}` share the shape
    /// `/samples/{int}` and therefore collide in the route table.
    pub fn shape(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param { kind, .. } => {
                    out.push('{');
                    out.push_str(kind.as_str());
                    out.push('}');
                }
            }
        }
        out
    }

    /// Match a request path, returning the captured params on success.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(text) => {
                    if text != part {
                        return None;
                    }
                }
                Segment::Param { name, kind } => {
                    if !kind.accepts(part) {
                        return None;
                    }
                    params.push(name.clone(), part);
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }

    /// Substitute captured params back into the pattern.
    ///
    /// Returns `None` if a placeholder has no value or the value does not fit
    /// its type.
    pub fn render(&self, params: &PathParams) -> Option<String> {
        if self.segments.is_empty() {
            return Some("/".to_string());
        }
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Param { name, kind } => {
                    let value = params.get(name)?;
                    if !kind.accepts(value) {
                        return None;
                    }
                    out.push_str(value);
                }
            }
        }
        Some(out)
    }

    /// Mount this pattern under `prefix` (e.g. `/legacy`).
    pub fn prefixed(&self, prefix: &PathPattern) -> PathPattern {
        let segments = prefix
            .segments
            .iter()
            .chain(self.segments.iter())
            .cloned()
            .collect();
        Self::from_segments(segments)
    }

    /// Names of all placeholders.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segment(part: &str) -> Result<Segment, PatternError> {
    let is_placeholder = part.starts_with('{') && part.ends_with('}') && part.len() >= 2;
    if !is_placeholder {
        if part.contains('{') || part.contains('}') {
            return Err(PatternError::MalformedSegment(part.to_string()));
        }
        return Ok(Segment::Literal(part.to_string()));
    }

    let inner = &part[1..part.len() - 1];
    if inner.contains('{') || inner.contains('}') {
        return Err(PatternError::MalformedSegment(part.to_string()));
    }
    let (name, kind) = match inner.split_once(':') {
        Some((name, kind)) => (name.trim(), kind.trim()),
        None => (inner.trim(), "str"),
    };
    if name.is_empty() {
        return Err(PatternError::EmptyName(part.to_string()));
    }
    let kind = match kind {
        "int" => ParamKind::Int,
        "str" | "string" => ParamKind::Str,
        other => {
            return Err(PatternError::UnknownKind {
                segment: part.to_string(),
                kind: other.to_string(),
            })
        }
    };
    Ok(Segment::Param {
        name: name.to_string(),
        kind,
    })
}

fn render_segments(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Param { name, kind: ParamKind::Str } => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
            Segment::Param { name, kind } => {
                out.push('{');
                out.push_str(name);
                out.push(':');
                out.push_str(kind.as_str());
                out.push('}');
            }
        }
    }
    out
}
