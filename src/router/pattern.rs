//! Route path patterns.
//!
//! A pattern is a `/`-separated list of segments. Each segment is either a
//! literal or a single placeholder:
//!
//! | Syntax | Binds | Matches |
//! |---|---|---|
//! | `{name}`, `{name:str}` | `ParamValue::Str` | one segment |
//! | `{name:int}` | `ParamValue::Int` | one segment parsing as `i64` |
//! | `{name:float}` | `ParamValue::Float` | one segment parsing as `f64` |
//! | `{name:path}` | `ParamValue::Str` | the rest of the path; last segment only |
//!
//! Empty segments are ignored on both sides, so `/items/`, `/items` and
//! `//items` are the same path.

use std::cmp::Ordering;
use std::fmt;

use crate::request::{ParamValue, Params};

/// Type annotation of a placeholder.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Path,
}

impl ParamKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "str"   => Some(Self::Str),
            "int"   => Some(Self::Int),
            "float" => Some(Self::Float),
            "path"  => Some(Self::Path),
            _       => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Str   => "str",
            Self::Int   => "int",
            Self::Float => "float",
            Self::Path  => "path",
        }
    }

    /// Coerces one raw segment; `None` means the route does not match.
    fn coerce(self, raw: &str) -> Option<ParamValue> {
        match self {
            Self::Str | Self::Path => Some(ParamValue::Str(raw.to_owned())),
            Self::Int => raw.parse().ok().map(ParamValue::Int),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Param { name: String, kind: ParamKind },
}

impl Segment {
    /// Priority at one position: literal > parameter > rest-of-path capture.
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 2,
            Self::Param { kind: ParamKind::Path, .. } => 0,
            Self::Param { .. } => 1,
        }
    }
}

/// Why a pattern was rejected.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("unbalanced or misplaced braces in segment `{0}`")]
    Unbalanced(String),
    #[error("empty parameter name in segment `{0}`")]
    EmptyName(String),
    #[error("invalid parameter name `{0}`")]
    InvalidName(String),
    #[error("unknown parameter type `{0}` (expected int, float, str or path)")]
    UnknownType(String),
    #[error("parameter `{0}` appears more than once")]
    DuplicateName(String),
    #[error("`{{{0}:path}}` must be the last segment")]
    PathNotLast(String),
}

/// A parsed route pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        for raw_segment in raw.split('/').filter(|s| !s.is_empty()) {
            segments.push(parse_segment(raw_segment)?);
        }

        let mut seen: Vec<&str> = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if let Segment::Param { name, kind } = segment {
                if seen.contains(&name.as_str()) {
                    return Err(PatternError::DuplicateName(name.clone()));
                }
                if *kind == ParamKind::Path && i + 1 != segments.len() {
                    return Err(PatternError::PathNotLast(name.clone()));
                }
                seen.push(name);
            }
        }

        Ok(Self { segments })
    }

    /// Identity used for duplicate detection: parameter names are erased,
    /// `{x}` and `{x:str}` are the same, other types stay distinct.
    pub(crate) fn key(&self) -> String {
        let mut key = String::new();
        for segment in &self.segments {
            key.push('/');
            match segment {
                Segment::Literal(lit) => key.push_str(lit),
                Segment::Param { kind, .. } => {
                    key.push('{');
                    key.push_str(kind.as_str());
                    key.push('}');
                }
            }
        }
        if key.is_empty() {
            key.push('/');
        }
        key
    }

    /// The pattern with parameter types erased: `/items/{id}`.
    pub fn openapi_path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Literal(lit) => path.push_str(lit),
                Segment::Param { name, .. } => {
                    path.push('{');
                    path.push_str(name);
                    path.push('}');
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }

    /// Placeholders in order of appearance.
    pub fn params(&self) -> impl Iterator<Item = (&str, ParamKind)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, kind } => Some((name.as_str(), *kind)),
            Segment::Literal(_) => None,
        })
    }

    /// Tests already-split, percent-decoded path segments against the
    /// pattern. Returns the bound parameters on success.
    pub(crate) fn matches(&self, path: &[String]) -> Option<Params> {
        let mut params = Params::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if path.get(i)? != lit {
                        return None;
                    }
                }
                Segment::Param { name, kind: ParamKind::Path } => {
                    let rest = path.get(i..).filter(|r| !r.is_empty())?;
                    params.insert(name.clone(), ParamValue::Str(rest.join("/")));
                    return Some(params);
                }
                Segment::Param { name, kind } => {
                    let value = kind.coerce(path.get(i)?)?;
                    params.insert(name.clone(), value);
                }
            }
        }
        (path.len() == self.segments.len()).then_some(params)
    }

    /// Orders two patterns that matched the same path: the first position
    /// where they differ decides, literal over parameter over path capture.
    pub(crate) fn specificity_cmp(&self, other: &Self) -> Ordering {
        let lhs = self.segments.iter().map(Segment::rank);
        let rhs = other.segments.iter().map(Segment::rank);
        lhs.cmp(rhs)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => write!(f, "/{lit}")?,
                Segment::Param { name, kind: ParamKind::Str } => write!(f, "/{{{name}}}")?,
                Segment::Param { name, kind } => write!(f, "/{{{name}:{}}}", kind.as_str())?,
            }
        }
        Ok(())
    }
}

fn parse_segment(raw: &str) -> Result<Segment, PatternError> {
    if !raw.contains(['{', '}']) {
        return Ok(Segment::Literal(raw.to_owned()));
    }

    let inner = raw
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|s| !s.contains(['{', '}']))
        .ok_or_else(|| PatternError::Unbalanced(raw.to_owned()))?;

    let (name, kind) = match inner.split_once(':') {
        Some((name, ty)) => {
            let kind = ParamKind::parse(ty).ok_or_else(|| PatternError::UnknownType(ty.to_owned()))?;
            (name, kind)
        }
        None => (inner, ParamKind::Str),
    };

    if name.is_empty() {
        return Err(PatternError::EmptyName(raw.to_owned()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PatternError::InvalidName(name.to_owned()));
    }

    Ok(Segment::Param { name: name.to_owned(), kind })
}
