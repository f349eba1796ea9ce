//! Scanning result rows into records.

use crate::error::Result;
use crate::mapper::{FieldInfo, SchemaMapper};
use crate::record::Record;
use crate::row::{Row, RowCursor, with_column};

/// Where scanned rows go.
#[derive(Debug)]
pub enum Destination<'a, R> {
    /// Fill one record from the first row, if any.
    One(&'a mut R),
    /// Append one record per row.
    Many(&'a mut Vec<R>),
    /// Append one boxed record per row.
    Boxed(&'a mut Vec<Box<R>>),
}

impl<R> Destination<'_, R> {
    /// Whether this destination takes a sequence of rows.
    pub fn is_sequence(&self) -> bool {
        !matches!(self, Destination::One(_))
    }
}

/// Closes the cursor when dropped, logging a failed close.
struct CloseGuard<'c, C: RowCursor + ?Sized> {
    cursor: &'c mut C,
}

impl<C: RowCursor + ?Sized> Drop for CloseGuard<'_, C> {
    fn drop(&mut self) {
        if let Err(err) = self.cursor.close() {
            tracing::error!(error = %err, "failed to close result cursor");
        }
    }
}

/// Scan a cursor into `dest` using the column metadata `mapper` holds
/// for `R`.
///
/// Every result column must map to a field of `R`. A single-record
/// destination is left untouched when the cursor yields no rows. The
/// cursor is closed on every path.
pub fn scan<R, C>(mapper: &SchemaMapper, dest: Destination<'_, R>, cursor: &mut C) -> Result<()>
where
    R: Record,
    C: RowCursor + ?Sized,
{
    let guard = CloseGuard { cursor };
    let structure = mapper.load::<R>()?;
    let fields = structure.resolve(guard.cursor.columns())?;

    match dest {
        Destination::One(record) => {
            if let Some(row) = guard.cursor.next_row()? {
                fill(record, &fields, &row)?;
            }
        }
        Destination::Many(records) => {
            while let Some(row) = guard.cursor.next_row()? {
                let mut record = R::default();
                fill(&mut record, &fields, &row)?;
                records.push(record);
            }
        }
        Destination::Boxed(records) => {
            while let Some(row) = guard.cursor.next_row()? {
                let mut record = Box::<R>::default();
                fill(record.as_mut(), &fields, &row)?;
                records.push(record);
            }
        }
    }

    Ok(())
}

fn fill<R: Record>(record: &mut R, fields: &[&FieldInfo], row: &Row) -> Result<()> {
    for (value, field) in row.values().zip(fields) {
        record
            .set_field(&field.index, value)
            .map_err(|e| with_column(e, &field.name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, MappingErrorKind};
    use crate::record::{FieldShape, RecordShape, invalid_path};
    use crate::row::{FromValue, Rows};
    use crate::value::Value;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Point {
        id: i64,
        label: String,
    }

    impl Record for Point {
        fn shape() -> &'static RecordShape {
            static SHAPE: RecordShape = RecordShape {
                name: "Point",
                fields: &[
                    FieldShape::leaf("id", Some("pk"), true),
                    FieldShape::leaf("label", None, true),
                ],
            };
            &SHAPE
        }

        fn get_field(&self, path: &[usize]) -> Result<Value> {
            match path {
                [0] => Ok(Value::from(self.id)),
                [1] => Ok(Value::from(self.label.clone())),
                _ => Err(invalid_path::<Self>(path)),
            }
        }

        fn set_field(&mut self, path: &[usize], value: &Value) -> Result<()> {
            match path {
                [0] => self.id = i64::from_value(value)?,
                [1] => self.label = String::from_value(value)?,
                _ => return Err(invalid_path::<Self>(path)),
            }
            Ok(())
        }
    }

    fn rows(data: &[(i64, &str)]) -> Rows {
        let columns = vec!["label".to_string(), "id".to_string()];
        let rows = data
            .iter()
            .map(|(id, label)| {
                Row::new(
                    columns.clone(),
                    vec![Value::Text((*label).to_string()), Value::BigInt(*id)],
                )
            })
            .collect();
        Rows::new(columns, rows)
    }

    /// A cursor that counts closes and can fail them.
    struct Tracked {
        inner: Rows,
        closes: usize,
        fail_close: bool,
    }

    impl RowCursor for Tracked {
        fn columns(&self) -> &[String] {
            self.inner.columns()
        }

        fn next_row(&mut self) -> Result<Option<Row>> {
            self.inner.next_row()
        }

        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            if self.fail_close {
                return Err(Error::Custom("close failed".into()));
            }
            self.inner.close()
        }
    }

    #[test]
    fn single_record_takes_first_row() {
        let mapper = SchemaMapper::new("default");
        let mut point = Point::default();
        let mut cursor = rows(&[(1, "a"), (2, "b")]);
        scan(&mapper, Destination::One(&mut point), &mut cursor).unwrap();
        assert_eq!(point, Point { id: 1, label: "a".into() });
    }

    #[test]
    fn zero_rows_leave_destinations_untouched() {
        let mapper = SchemaMapper::new("default");
        let mut point = Point { id: 9, label: "keep".into() };
        scan(&mapper, Destination::One(&mut point), &mut rows(&[])).unwrap();
        assert_eq!(point, Point { id: 9, label: "keep".into() });

        let mut points: Vec<Point> = Vec::new();
        scan(&mapper, Destination::Many(&mut points), &mut rows(&[])).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn sequences_keep_cursor_order() {
        let mapper = SchemaMapper::new("default");
        let mut points: Vec<Point> = Vec::new();
        scan(
            &mapper,
            Destination::Many(&mut points),
            &mut rows(&[(3, "c"), (1, "a")]),
        )
        .unwrap();
        assert_eq!(points.iter().map(|p| p.id).collect::<Vec<_>>(), vec![3, 1]);

        let mut boxed: Vec<Box<Point>> = Vec::new();
        scan(&mapper, Destination::Boxed(&mut boxed), &mut rows(&[(5, "e")])).unwrap();
        assert_eq!(boxed[0].label, "e");
    }

    #[test]
    fn unknown_column_fails_and_still_closes() {
        let mapper = SchemaMapper::new("default");
        let columns = vec!["id".to_string(), "extra".to_string()];
        let mut cursor = Tracked {
            inner: Rows::new(
                columns.clone(),
                vec![Row::new(columns, vec![Value::BigInt(1), Value::Null])],
            ),
            closes: 0,
            fail_close: false,
        };
        let mut points: Vec<Point> = Vec::new();
        let err = scan(&mapper, Destination::Many(&mut points), &mut cursor).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::UnknownColumn));
        assert!(points.is_empty());
        assert_eq!(cursor.closes, 1);
    }

    #[test]
    fn close_failure_is_not_propagated() {
        let mapper = SchemaMapper::new("default");
        let mut cursor = Tracked {
            inner: rows(&[(4, "d")]),
            closes: 0,
            fail_close: true,
        };
        let mut point = Point::default();
        scan(&mapper, Destination::One(&mut point), &mut cursor).unwrap();
        assert_eq!(point.id, 4);
        assert_eq!(cursor.closes, 1);
    }

    #[test]
    fn conversion_errors_name_the_column() {
        let mapper = SchemaMapper::new("default");
        let columns = vec!["id".to_string()];
        let mut cursor = Rows::new(
            columns.clone(),
            vec![Row::new(columns, vec![Value::Text("x".into())])],
        );
        let mut point = Point::default();
        let err = scan(&mapper, Destination::One(&mut point), &mut cursor).unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("id")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn destination_shape() {
        let mut point = Point::default();
        let mut points = Vec::new();
        assert!(!Destination::One(&mut point).is_sequence());
        assert!(Destination::<Point>::Many(&mut points).is_sequence());
    }
}
