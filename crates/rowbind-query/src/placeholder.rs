//! Parameter placeholder syntax.

use serde::{Deserialize, Serialize};

/// How positional parameters are written into SQL text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?` (MySQL)
    #[default]
    Question,
    /// `$1, $2` (PostgreSQL)
    Dollar,
    /// `?1, ?2` (SQLite)
    NumberedQuestion,
}

impl PlaceholderStyle {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${index}"),
            PlaceholderStyle::NumberedQuestion => format!("?{index}"),
        }
    }

    /// Rewrite `?` markers in a raw fragment, numbering from `start + 1`.
    ///
    /// Markers inside single-quoted literals are left alone. Returns the
    /// rewritten fragment and the number of markers replaced.
    pub fn rewrite(self, fragment: &str, start: usize) -> (String, usize) {
        let mut out = String::with_capacity(fragment.len());
        let mut count = 0;
        let mut in_literal = false;

        for ch in fragment.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '?' if !in_literal => {
                    count += 1;
                    out.push_str(&self.placeholder(start + count));
                }
                _ => out.push(ch),
            }
        }

        (out, count)
    }
}
