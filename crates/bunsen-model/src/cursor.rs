//! Cursors: stable references to line ranges inside stored log files.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ModelError;

static CURSOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<commit>[0-9A-Fa-f]+):)?(?P<path>.+):(?P<start>[0-9]+)(?:-(?P<end>[0-9]+))?$")
        .expect("cursor regex")
});

/// A reference to lines `start..=end` (1-indexed, inclusive) of the log
/// blob at `path` under a testlogs commit.
///
/// Textual form: `[<commit_id>:]<path>:<start>[-<end>]`. The commit id is
/// omitted when context (the enclosing testrun) supplies it; the end line
/// is omitted for single-line cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub commit_id: Option<String>,
    pub path: String,
    pub start: u32,
    pub end: u32,
}

/// Result of resolving a cursor against log contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCursor {
    pub text: String,
    /// Set when the requested range was clamped to the file.
    pub truncated: bool,
}

impl Cursor {
    pub fn new(path: impl Into<String>, start: u32, end: u32) -> Result<Self, ModelError> {
        let path = path.into();
        if start == 0 || end < start {
            return Err(ModelError::InvalidCursor(format!("{path}:{start}-{end}")));
        }
        Ok(Cursor {
            commit_id: None,
            path,
            start,
            end,
        })
    }

    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    pub fn single_line(&self) -> bool {
        self.start == self.end
    }

    /// Extract the cursor's line range from the raw bytes of its log file.
    ///
    /// Lines are split on `\n` and a single trailing empty line is
    /// dropped. An out-of-range start or end clamps to the file and sets
    /// `truncated`.
    pub fn resolve(&self, contents: &[u8]) -> ResolvedCursor {
        let text = String::from_utf8_lossy(contents);
        let mut lines: Vec<&str> = text.split('\n').collect();
        if lines.last() == Some(&"") {
            lines.pop();
        }

        let total = lines.len() as u32;
        if total == 0 {
            return ResolvedCursor {
                text: String::new(),
                truncated: true,
            };
        }

        let start = self.start.min(total);
        let end = self.end.min(total);
        let truncated = start != self.start || end != self.end;

        let mut out = String::new();
        for line in &lines[(start - 1) as usize..end as usize] {
            out.push_str(line);
            out.push('\n');
        }
        ResolvedCursor {
            text: out,
            truncated,
        }
    }
}

impl FromStr for Cursor {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = CURSOR_RE
            .captures(s)
            .ok_or_else(|| ModelError::InvalidCursor(s.to_string()))?;
        let start: u32 = caps["start"]
            .parse()
            .map_err(|_| ModelError::InvalidCursor(s.to_string()))?;
        let end: u32 = match caps.name("end") {
            Some(end) => end
                .as_str()
                .parse()
                .map_err(|_| ModelError::InvalidCursor(s.to_string()))?,
            None => start,
        };
        if start == 0 || end < start {
            return Err(ModelError::InvalidCursor(s.to_string()));
        }
        Ok(Cursor {
            commit_id: caps.name("commit").map(|c| c.as_str().to_string()),
            path: caps["path"].to_string(),
            start,
            end,
        })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(commit) = &self.commit_id {
            write!(f, "{commit}:")?;
        }
        write!(f, "{}:{}", self.path, self.start)?;
        if !self.single_line() {
            write!(f, "-{}", self.end)?;
        }
        Ok(())
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
