//! Field-name to column-name transforms.

use serde::{Deserialize, Serialize};

/// A naming transform from a declared field name to a column name.
pub type NamingFn = fn(&str) -> String;

/// Convert a camel-case identifier to snake case.
///
/// A run of consecutive uppercase letters stays one token, so acronyms
/// are not split; an underscore is inserted only where an uppercase
/// letter follows a lowercase one. The first character never gets a
/// separator. Already snake-cased input is returned unchanged.
pub fn hump_to_underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut last_upper = 0usize;

    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i - last_upper > 1 {
                out.push('_');
            }
            last_upper = i;
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }

    out
}

/// Keep the declared name unchanged.
pub fn verbatim(name: &str) -> String {
    name.to_string()
}

/// Named naming transforms selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    #[default]
    HumpToUnderscore,
    Verbatim,
}

impl NamingStrategy {
    /// The transform function for this strategy.
    pub fn naming_fn(self) -> NamingFn {
        match self {
            NamingStrategy::HumpToUnderscore => hump_to_underscore,
            NamingStrategy::Verbatim => verbatim,
        }
    }
}
