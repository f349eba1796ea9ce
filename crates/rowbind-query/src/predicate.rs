//! WHERE predicates and ORDER BY terms.

use crate::placeholder::PlaceholderStyle;
use rowbind_core::Value;

/// A single condition; multiple predicates on a statement are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = ?`, or `column IS NULL` for a NULL value
    Eq(String, Value),
    /// `column IN (?, ...)`; an empty list matches nothing
    In(String, Vec<Value>),
    /// Raw fragment with `?` markers bound to the given values
    Raw(String, Vec<Value>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn raw(fragment: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::Raw(fragment.into(), values)
    }

    /// Render this predicate, appending bound values to `params`.
    pub(crate) fn render(&self, style: PlaceholderStyle, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::Eq(column, Value::Null) => format!("{column} IS NULL"),
            Predicate::Eq(column, value) => {
                params.push(value.clone());
                format!("{column} = {}", style.placeholder(params.len()))
            }
            Predicate::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Predicate::In(column, values) => {
                let marks: Vec<String> = values
                    .iter()
                    .map(|value| {
                        params.push(value.clone());
                        style.placeholder(params.len())
                    })
                    .collect();
                format!("{column} IN ({})", marks.join(", "))
            }
            Predicate::Raw(fragment, values) => {
                let (sql, _) = style.rewrite(fragment, params.len());
                params.extend(values.iter().cloned());
                format!("({sql})")
            }
        }
    }
}

/// Render a list of predicates as a WHERE clause (with leading space).
pub(crate) fn render_where(
    predicates: &[Predicate],
    style: PlaceholderStyle,
    params: &mut Vec<Value>,
) -> String {
    if predicates.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = predicates.iter().map(|p| p.render(style, params)).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    column: String,
    descending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    pub(crate) fn to_sql(&self) -> String {
        if self.descending {
            format!("{} DESC", self.column)
        } else {
            format!("{} ASC", self.column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_null() {
        let mut params = Vec::new();
        let sql = render_where(
            &[Predicate::eq("id", 7_i64), Predicate::eq("deleted_at", Value::Null)],
            PlaceholderStyle::Dollar,
            &mut params,
        );
        assert_eq!(sql, " WHERE id = $1 AND deleted_at IS NULL");
        assert_eq!(params, vec![Value::BigInt(7)]);
    }

    #[test]
    fn in_list_numbering_continues() {
        let mut params = vec![Value::Int(0)];
        let sql = Predicate::in_list("id", [1_i64, 2, 3]).render(PlaceholderStyle::Dollar, &mut params);
        assert_eq!(sql, "id IN ($2, $3, $4)");
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn empty_in_matches_nothing() {
        let mut params = Vec::new();
        let sql = Predicate::in_list("id", Vec::<i64>::new())
            .render(PlaceholderStyle::Question, &mut params);
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn raw_fragment_is_renumbered() {
        let mut params = vec![Value::Int(1)];
        let sql = Predicate::raw("age > ? OR age < ?", vec![Value::Int(60), Value::Int(18)])
            .render(PlaceholderStyle::NumberedQuestion, &mut params);
        assert_eq!(sql, "(age > ?2 OR age < ?3)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn order_terms() {
        assert_eq!(Order::asc("name").to_sql(), "name ASC");
        assert_eq!(Order::desc("id").to_sql(), "id DESC");
    }
}
