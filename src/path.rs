//! Dot-notation and slash-notation path expressions used by data-model
//! bindings (`form.items[0].name` / `/form/items/0/name`).

/// A parsed path: an ordered sequence of segments plus whether the path
/// is absolute (slash-rooted).
///
/// Numeric segments denote array indices and round-trip through
/// dot-notation with bracket syntax (`items[0]`), and through
/// slash-notation as plain path components (`items/0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PathExpr {
    segments: Vec<String>,
    is_absolute: bool,
}

impl PathExpr {
    /// The empty path: no segments, not absolute.
    pub fn empty() -> Self {
        PathExpr {
            segments: Vec::new(),
            is_absolute: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.is_absolute
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Parse dot-notation: `form.items[0].name`. `fromDotNotation("")`
    /// yields the empty path.
    pub fn from_dot_notation(s: &str) -> Self {
        if s.is_empty() {
            return Self::empty();
        }

        let mut segments = Vec::new();
        for dot_part in s.split('.') {
            let mut rest = dot_part;
            // Pull out any number of trailing `[idx]` groups.
            loop {
                if let Some(open) = rest.find('[') {
                    if rest.ends_with(']') {
                        let (head, bracket) = rest.split_at(open);
                        if !head.is_empty() {
                            segments.push(head.to_string());
                        }
                        let idx = &bracket[1..bracket.len() - 1];
                        segments.push(idx.to_string());
                        break;
                    }
                }
                if !rest.is_empty() {
                    segments.push(rest.to_string());
                }
                break;
            }
        }

        PathExpr {
            segments,
            is_absolute: false,
        }
    }

    /// Parse slash-notation: `/form/items/0/name`. `fromSlashNotation("")`
    /// yields the empty path with `isAbsolute = false`.
    pub fn from_slash_notation(s: &str) -> Self {
        if s.is_empty() {
            return Self::empty();
        }

        let is_absolute = s.starts_with('/');
        let trimmed = s.trim_start_matches('/');
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').map(|p| p.to_string()).collect()
        };

        PathExpr {
            segments,
            is_absolute,
        }
    }

    /// Render as dot-notation, e.g. `form.items[0].name`.
    pub fn to_dot_notation(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if is_numeric(seg) {
                out.push('[');
                out.push_str(seg);
                out.push(']');
            } else {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(seg);
            }
        }
        out
    }

    /// Render as slash-notation, e.g. `/form/items/0/name`.
    pub fn to_slash_notation(&self) -> String {
        let body = self.segments.join("/");
        if self.is_absolute {
            format!("/{body}")
        } else {
            body
        }
    }

    /// The final segment, or `None` for the empty path.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// The path with its final segment removed. Undefined (returns
    /// `None`) for single-segment or empty paths.
    pub fn parent(&self) -> Option<PathExpr> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(PathExpr {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            is_absolute: self.is_absolute,
        })
    }

    /// Concatenate `other`'s segments onto `self`, preserving `self`'s
    /// absoluteness.
    pub fn join(&self, other: &PathExpr) -> PathExpr {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        PathExpr {
            segments,
            is_absolute: self.is_absolute,
        }
    }

    /// Append a single segment.
    pub fn join_segment(&self, segment: impl Into<String>) -> PathExpr {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        PathExpr {
            segments,
            is_absolute: self.is_absolute,
        }
    }

    /// Whether `self`'s segments begin with `prefix`'s segments.
    pub fn starts_with(&self, prefix: &PathExpr) -> bool {
        if prefix.segments.len() > self.segments.len() {
            return false;
        }
        self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
