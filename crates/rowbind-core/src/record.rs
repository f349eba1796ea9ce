//! Record descriptors for struct mapping.
//!
//! A [`Record`] describes its own field layout through a static
//! [`RecordShape`] and exposes its leaf fields through index paths, the
//! same paths the schema mapper records in [`FieldInfo`](crate::FieldInfo).
//! Implementations are normally generated with `#[derive(Record)]` from
//! `rowbind-macros`.

use crate::Result;
use crate::value::Value;

/// Static description of one declared field.
#[derive(Debug, Clone, Copy)]
pub struct FieldShape {
    /// Declared field name
    pub name: &'static str,
    /// Raw `orm` annotation, if the field carries one
    pub tag: Option<&'static str>,
    /// Whether the field is visible outside its module
    pub exported: bool,
    /// Shape of the embedded record, for embedded fields
    pub embedded: Option<fn() -> &'static RecordShape>,
}

impl FieldShape {
    /// A plain value field.
    pub const fn leaf(name: &'static str, tag: Option<&'static str>, exported: bool) -> Self {
        Self {
            name,
            tag,
            exported,
            embedded: None,
        }
    }

    /// A field whose own fields are flattened into the containing record.
    pub const fn embedded(
        name: &'static str,
        exported: bool,
        shape: fn() -> &'static RecordShape,
    ) -> Self {
        Self {
            name,
            tag: None,
            exported,
            embedded: Some(shape),
        }
    }

    /// Shape of the embedded record, if this field embeds one.
    pub fn embedded_shape(&self) -> Option<&'static RecordShape> {
        self.embedded.map(|shape| shape())
    }
}

/// Static description of a record type, in declaration order.
#[derive(Debug)]
pub struct RecordShape {
    /// Type name, used in error messages
    pub name: &'static str,
    /// Declared fields in source order
    pub fields: &'static [FieldShape],
}

impl RecordShape {
    /// Walk a field path, returning the shape of the addressed field.
    pub fn field_at(&'static self, path: &[usize]) -> Option<&'static FieldShape> {
        let (first, rest) = path.split_first()?;
        let field = self.fields.get(*first)?;
        if rest.is_empty() {
            return Some(field);
        }
        field.embedded_shape()?.field_at(rest)
    }
}

/// A structured record that can be mapped to columns.
///
/// `get_field` and `set_field` address leaf fields by the index path the
/// schema mapper derives: one declaration index per level of embedding.
/// Paths that do not end at a mapped leaf field are shape errors.
pub trait Record: Default + Send + Sync + 'static {
    /// Static field layout of this type.
    fn shape() -> &'static RecordShape;

    /// Read the leaf field at `path`.
    fn get_field(&self, path: &[usize]) -> Result<Value>;

    /// Write the leaf field at `path`, converting from `value`.
    fn set_field(&mut self, path: &[usize], value: &Value) -> Result<()>;
}

/// A record bound to a database table.
///
/// # Example
///
/// ```ignore
/// use rowbind::Record;
///
/// #[derive(Record, Default)]
/// #[orm(table = "users")]
/// pub struct User {
///     #[orm("pk")]
///     pub id: i64,
///     pub name: String,
///     #[orm("readonly")]
///     pub updated_at: i64,
/// }
/// ```
pub trait Model: Record {
    /// The name of the database table.
    const TABLE_NAME: &'static str;
}

/// Error for a path that does not address a mapped leaf of `R`.
pub fn invalid_path<R: Record>(path: &[usize]) -> crate::Error {
    crate::Error::shape(
        R::shape().name,
        format!("index path {path:?} does not address a mapped field"),
    )
}
