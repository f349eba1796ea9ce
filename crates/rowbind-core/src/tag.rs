//! Field annotation parsing.
//!
//! A field annotation is a comma-separated list of directives. Each
//! directive is a bare keyword (`readonly`, `pk`) or a `key:value` pair
//! (`column:custom_name`). Unknown keys and malformed pairs are ignored;
//! a repeated `column` directive overrides the earlier one.

use std::fmt;

/// Recognized directive keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKey {
    /// `column:<name>` overrides the derived column name
    Column,
    /// `readonly` excludes the column from inserts and model updates
    ReadOnly,
    /// `pk` marks a primary-key column
    PrimaryKey,
}

impl TagKey {
    /// Keyword as written in an annotation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TagKey::Column => "column",
            TagKey::ReadOnly => "readonly",
            TagKey::PrimaryKey => "pk",
        }
    }

    /// Look up a keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "column" => Some(TagKey::Column),
            "readonly" => Some(TagKey::ReadOnly),
            "pk" => Some(TagKey::PrimaryKey),
            _ => None,
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a field annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDirective {
    /// Whether a `column` override was given
    pub has_column: bool,
    /// The override, empty unless `has_column`
    pub column: String,
    /// Read back from rows but never written by inserts or updates
    pub read_only: bool,
    /// Marks the primary key used by key lookups and model updates
    pub primary_key: bool,
}

impl TagDirective {
    /// Parse a raw annotation. Never fails; an absent annotation yields
    /// the default directive.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut directive = TagDirective::default();
        let Some(raw) = raw else {
            return directive;
        };

        for item in raw.split(',') {
            let parts: Vec<&str> = item.split(':').map(str::trim).collect();
            match TagKey::from_keyword(parts[0]) {
                Some(TagKey::Column) => {
                    if let [_, name] = parts.as_slice() {
                        directive.has_column = true;
                        directive.column = (*name).to_string();
                    }
                }
                Some(TagKey::ReadOnly) => directive.read_only = true,
                Some(TagKey::PrimaryKey) => directive.primary_key = true,
                None => {}
            }
        }

        directive
    }

    /// Resolve the column name, falling back to `derived` when no override
    /// was given.
    pub fn column_or(&self, derived: impl FnOnce() -> String) -> String {
        if self.has_column {
            self.column.clone()
        } else {
            derived()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_annotation_is_default() {
        assert_eq!(TagDirective::parse(None), TagDirective::default());
        assert_eq!(TagDirective::parse(Some("")), TagDirective::default());
    }

    #[test]
    fn parses_all_directives() {
        let d = TagDirective::parse(Some("column:basicla,readonly,pk"));
        assert!(d.has_column);
        assert_eq!(d.column, "basicla");
        assert!(d.read_only);
        assert!(d.primary_key);
    }

    #[test]
    fn last_column_wins() {
        let d = TagDirective::parse(Some("column:first,column:second"));
        assert_eq!(d.column, "second");
    }

    #[test]
    fn malformed_and_unknown_directives_are_ignored() {
        let d = TagDirective::parse(Some("column,column:a:b,unique,size:10"));
        assert!(!d.has_column);
        assert!(!d.read_only);
        assert!(!d.primary_key);
    }

    #[test]
    fn whitespace_around_directives_is_tolerated() {
        let d = TagDirective::parse(Some("pk, readonly , column: user_id"));
        assert!(d.primary_key);
        assert!(d.read_only);
        assert_eq!(d.column_or(|| "ignored".into()), "user_id");
    }

    #[test]
    fn keyword_round_trip() {
        for key in [TagKey::Column, TagKey::ReadOnly, TagKey::PrimaryKey] {
            assert_eq!(TagKey::from_keyword(key.as_str()), Some(key));
        }
        assert_eq!(TagKey::PrimaryKey.to_string(), "pk");
    }
}
