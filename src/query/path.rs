use std::fmt;
use std::str::FromStr;

use super::ExtractError;

/// The JSON type a caller expects a path to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    String,
    Number,
    Bool,
    Strings,
    Numbers,
    Any,
}

impl Shape {
    pub fn is_list(self) -> bool {
        matches!(self, Shape::Strings | Shape::Numbers)
    }

    pub fn name(self) -> &'static str {
        match self {
            Shape::String => "string",
            Shape::Number => "number",
            Shape::Bool => "bool",
            Shape::Strings => "list of strings",
            Shape::Numbers => "list of numbers",
            Shape::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Segment {
    Field(String),
    Index(i64),
    Wildcard,
    Slice(Option<i64>, Option<i64>),
}

impl Segment {
    fn fans_out(&self) -> bool {
        matches!(self, Segment::Wildcard | Segment::Slice(..))
    }
}

/// A path expression into a JSON document, paired with the shape of the value
/// it should find.
///
/// Supported syntax: `$.metadata.name`, `.items[0]`, `.items[-1]`,
/// `.items[*]`, `.items[:]`, `.items[1:3]`, `.labels['app.kubernetes.io/name']`.
/// The leading `$` is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    expr: String,
    segments: Vec<Segment>,
    shape: Shape,
}

impl FieldPath {
    pub fn parse(expr: &str, shape: Shape) -> Result<Self, ExtractError> {
        let segments = parse_segments(expr).map_err(|reason| ExtractError::InvalidPath {
            path: expr.to_string(),
            reason,
        })?;
        Ok(Self {
            expr: expr.to_string(),
            segments,
            shape,
        })
    }

    pub fn string(expr: &str) -> Result<Self, ExtractError> {
        Self::parse(expr, Shape::String)
    }

    pub fn number(expr: &str) -> Result<Self, ExtractError> {
        Self::parse(expr, Shape::Number)
    }

    pub fn bool(expr: &str) -> Result<Self, ExtractError> {
        Self::parse(expr, Shape::Bool)
    }

    pub fn strings(expr: &str) -> Result<Self, ExtractError> {
        Self::parse(expr, Shape::Strings)
    }

    pub fn numbers(expr: &str) -> Result<Self, ExtractError> {
        Self::parse(expr, Shape::Numbers)
    }

    pub fn any(expr: &str) -> Result<Self, ExtractError> {
        Self::parse(expr, Shape::Any)
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Whether the path can match more than one value.
    pub fn is_multi(&self) -> bool {
        self.segments.iter().any(Segment::fans_out)
    }

    pub(super) fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

/// Parses with [`Shape::Any`].
impl FromStr for FieldPath {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, Shape::Any)
    }
}

fn parse_segments(expr: &str) -> Result<Vec<Segment>, String> {
    let expr = expr.trim();
    let rest = expr.strip_prefix('$').unwrap_or(expr);
    let chars: Vec<char> = rest.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    // A bare leading name, as in `metadata.name`.
    if i < chars.len() && chars[i] != '.' && chars[i] != '[' {
        let (name, next) = read_name(&chars, i);
        segments.push(Segment::Field(name));
        i = next;
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                let (name, next) = read_name(&chars, i + 1);
                if name.is_empty() {
                    return Err(format!("empty field name at offset {i}"));
                }
                segments.push(if name == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Field(name)
                });
                i = next;
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&c| c == ']')
                    .map(|p| i + p)
                    .ok_or_else(|| format!("unclosed '[' at offset {i}"))?;
                let inner: String = chars[i + 1..close].iter().collect();
                segments.push(parse_bracket(inner.trim())?);
                i = close + 1;
            }
            c => return Err(format!("unexpected {c:?} at offset {i}")),
        }
    }

    Ok(segments)
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let end = chars[start..]
        .iter()
        .position(|&c| c == '.' || c == '[')
        .map_or(chars.len(), |p| start + p);
    (chars[start..end].iter().collect(), end)
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }

    for quote in ['\'', '"'] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return Ok(Segment::Field(name.to_string()));
        }
    }

    if let Some((start, end)) = inner.split_once(':') {
        return Ok(Segment::Slice(parse_bound(start)?, parse_bound(end)?));
    }

    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| format!("invalid index {inner:?}"))
}

fn parse_bound(bound: &str) -> Result<Option<i64>, String> {
    let bound = bound.trim();
    if bound.is_empty() {
        return Ok(None);
    }
    bound
        .parse::<i64>()
        .map(Some)
        .map_err(|_| format!("invalid slice bound {bound:?}"))
}
