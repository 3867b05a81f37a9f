//! Dotted/bracketed key paths into value trees.
//!
//! Grammar: `path := segment ('.' segment)*` and
//! `segment := identifier ('[' integer ']')*`, where identifiers are made of
//! word characters and dashes. The same parsed path is used for reads and
//! writes.

use std::fmt;

use crate::error::{OpsResult, ResolutionError};
use crate::value::{Value, ValueMap};

/// Longest element rendering included in path error messages.
const MAX_ELEMENT_DISPLAY: usize = 1000;

/// One step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A dict key.
    Key(String),
    /// A list index.
    Index(usize),
}

/// A parsed key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<PathSegment>,
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl KeyPath {
    /// Parses a key path.
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` for empty paths, empty segments, unclosed
    /// brackets and non-integer indices.
    pub fn parse(text: &str) -> OpsResult<Self> {
        let fail = |reason: &str| -> OpsResult<Self> { Err(ResolutionError::wrong_path(text, reason).into()) };
        if text.is_empty() {
            return fail("Key path is empty");
        }

        let chars: Vec<char> = text.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;
        loop {
            let start = i;
            while i < chars.len() && is_identifier_char(chars[i]) {
                i += 1;
            }
            if i == start {
                return fail("Expected an identifier");
            }
            segments.push(PathSegment::Key(chars[start..i].iter().collect()));

            while i < chars.len() && chars[i] == '[' {
                let digits_start = i + 1;
                let mut j = digits_start;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                if j == digits_start || j >= chars.len() || chars[j] != ']' {
                    return fail("Expected an integer index followed by ']'");
                }
                let digits: String = chars[digits_start..j].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| ResolutionError::wrong_path(text, format!("Invalid index: {e}")))?;
                segments.push(PathSegment::Index(index));
                i = j + 1;
            }

            if i == chars.len() {
                break;
            }
            if chars[i] != '.' {
                return fail(&format!("Unexpected character '{}'", chars[i]));
            }
            i += 1;
        }

        Ok(Self { segments })
    }

    /// Builds a path from already-split segments.
    #[must_use]
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Returns the segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the path has no segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the first segment when it is a dict key.
    #[must_use]
    pub fn root_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// Returns the path made of the segments after the first one.
    #[must_use]
    pub fn tail(&self) -> Self {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    fn prefix(&self, count: usize) -> Self {
        Self {
            segments: self.segments[..count].to_vec(),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

fn element_display(value: &Value) -> String {
    let text = value.repr();
    if text.chars().count() > MAX_ELEMENT_DISPLAY {
        let truncated: String = text.chars().take(MAX_ELEMENT_DISPLAY).collect();
        format!("{truncated}...")
    } else {
        text
    }
}

fn wrong_path(path: &KeyPath, upto: usize, reason: String) -> ResolutionError {
    ResolutionError::wrong_path(path.prefix(upto + 1).to_string(), reason)
}

fn type_mismatch(path: &KeyPath, upto: usize, expected: &str, found: &Value) -> ResolutionError {
    wrong_path(
        path,
        upto,
        format!(
            "Expected a {expected} but found a {}: {}",
            found.type_name(),
            element_display(found)
        ),
    )
}

/// Index a list with a key segment that spells an integer. Reads only.
fn list_index(segment: &PathSegment) -> Option<usize> {
    match segment {
        PathSegment::Index(i) => Some(*i),
        PathSegment::Key(k) => k.parse().ok(),
    }
}

/// Dict key for a segment; indices address stringified integer keys. Reads only.
fn map_key(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Key(k) => k.clone(),
        PathSegment::Index(i) => i.to_string(),
    }
}

/// Reads the element at `path` inside `root`.
///
/// # Errors
///
/// Returns `WrongDataKeyPath` carrying the failing sub-path when a key is
/// missing, an index is out of range, or a container has the wrong kind.
pub fn get_value<'a>(root: &'a Value, path: &KeyPath) -> OpsResult<&'a Value> {
    if path.is_empty() {
        return Err(ResolutionError::wrong_path("", "Key path is empty").into());
    }
    let mut current = root;
    for (i, segment) in path.segments().iter().enumerate() {
        current = match current {
            Value::Map(map) => {
                let key = map_key(segment);
                map.get(&key).ok_or_else(|| {
                    wrong_path(
                        path,
                        i,
                        format!("Key '{key}' not found in {}", element_display(current)),
                    )
                })?
            }
            Value::List(items) => {
                let Some(index) = list_index(segment) else {
                    return Err(type_mismatch(path, i, "dict", current).into());
                };
                items.get(index).ok_or_else(|| {
                    wrong_path(
                        path,
                        i,
                        format!("Index {index} out of range for a list of length {}", items.len()),
                    )
                })?
            }
            other => {
                let expected = match segment {
                    PathSegment::Key(_) => "dict",
                    PathSegment::Index(_) => "list",
                };
                return Err(type_mismatch(path, i, expected, other).into());
            }
        };
    }
    Ok(current)
}

fn empty_container_for(next: &PathSegment) -> Value {
    match next {
        PathSegment::Index(_) => Value::List(Vec::new()),
        PathSegment::Key(_) => Value::Map(ValueMap::new()),
    }
}

fn set_at(container: &mut Value, path: &KeyPath, depth: usize, value: Value) -> OpsResult<()> {
    let segments = path.segments();
    let segment = &segments[depth];
    let next = segments.get(depth + 1);

    match container {
        Value::Map(map) => {
            let PathSegment::Key(key) = segment else {
                let found = Value::Map(map.clone());
                return Err(type_mismatch(path, depth, "list", &found).into());
            };
            let key = key.clone();
            match next {
                None => {
                    map.insert(key, value);
                    Ok(())
                }
                Some(next) => {
                    let child = map.entry(key).or_insert_with(|| empty_container_for(next));
                    set_at(child, path, depth + 1, value)
                }
            }
        }
        Value::List(items) => {
            let &PathSegment::Index(index) = segment else {
                let found = Value::List(items.clone());
                return Err(type_mismatch(path, depth, "dict", &found).into());
            };
            let len = items.len();
            if index > len {
                return Err(wrong_path(
                    path,
                    depth,
                    format!("Index {index} out of range for a list of length {len}; only appending at index {len} is allowed"),
                )
                .into());
            }
            match next {
                None if index == len => items.push(value),
                None => items[index] = value,
                Some(next) => {
                    if index == len {
                        items.push(empty_container_for(next));
                    }
                    return set_at(&mut items[index], path, depth + 1, value);
                }
            }
            Ok(())
        }
        other => {
            let expected = match segment {
                PathSegment::Key(_) => "dict",
                PathSegment::Index(_) => "list",
            };
            Err(type_mismatch(path, depth, expected, other).into())
        }
    }
}

/// Writes `value` at `path` inside `root`, creating missing intermediate
/// containers with the kind of the following segment.
///
/// # Errors
///
/// Returns `WrongDataKeyPath` on container kind mismatches and on sparse
/// list writes.
pub fn set_value(root: &mut Value, path: &KeyPath, value: Value) -> OpsResult<()> {
    if path.is_empty() {
        return Err(ResolutionError::wrong_path("", "Key path is empty").into());
    }
    set_at(root, path, 0, value)
}
