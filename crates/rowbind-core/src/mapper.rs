//! Column metadata derived from record shapes.
//!
//! A [`SchemaMapper`] belongs to one storage and caches a [`StructMapper`]
//! per record type. Derivation walks the record's declared fields depth
//! first, flattening embedded records and applying the storage's naming
//! transform to every leaf without a `column` override.

use crate::error::{Error, MappingError, MappingErrorKind, Result};
use crate::naming::{NamingFn, hump_to_underscore};
use crate::record::{Record, RecordShape};
use crate::tag::TagDirective;
use serde::Serialize;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Metadata for one mapped leaf field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    /// Column name
    pub name: String,
    /// Declaration index at each level of embedding
    pub index: Vec<usize>,
    pub primary_key: bool,
    pub read_only: bool,
}

/// Ordered column metadata for one record type.
#[derive(Debug, Clone, Default)]
pub struct StructMapper {
    record: &'static str,
    columns: Vec<FieldInfo>,
    column_map: HashMap<String, usize>,
}

impl StructMapper {
    /// Derive the mapper for a record shape.
    pub fn derive(shape: &'static RecordShape, naming: NamingFn) -> Result<Self> {
        let mut mapper = StructMapper {
            record: shape.name,
            ..StructMapper::default()
        };
        mapper.walk(shape, naming, &[])?;
        Ok(mapper)
    }

    fn walk(&mut self, shape: &'static RecordShape, naming: NamingFn, prefix: &[usize]) -> Result<()> {
        for (i, field) in shape.fields.iter().enumerate() {
            let mut index = prefix.to_vec();
            index.push(i);

            if let Some(embedded) = field.embedded_shape() {
                self.walk(embedded, naming, &index)?;
                continue;
            }
            if !field.exported {
                continue;
            }

            let directive = TagDirective::parse(field.tag);
            self.push(FieldInfo {
                name: directive.column_or(|| naming(field.name)),
                index,
                primary_key: directive.primary_key,
                read_only: directive.read_only,
            })?;
        }
        Ok(())
    }

    fn push(&mut self, column: FieldInfo) -> Result<()> {
        if self.column_map.contains_key(&column.name) {
            return Err(Error::Mapping(MappingError {
                kind: MappingErrorKind::DuplicateColumn,
                record: self.record,
                column: Some(column.name),
                message: "more than one field maps to this column".to_string(),
            }));
        }
        self.column_map.insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    /// Name of the record type this mapper describes.
    pub fn record(&self) -> &'static str {
        self.record
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[FieldInfo] {
        &self.columns
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a column by name.
    pub fn field(&self, column: &str) -> Option<&FieldInfo> {
        self.column_map.get(column).map(|&i| &self.columns[i])
    }

    /// Primary-key columns in declaration order.
    pub fn primary_keys(&self) -> impl Iterator<Item = &FieldInfo> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// The single primary-key column used for by-key lookups.
    pub fn primary_key(&self) -> Result<&FieldInfo> {
        self.primary_keys().next().ok_or_else(|| {
            Error::Mapping(MappingError {
                kind: MappingErrorKind::MissingPrimaryKey,
                record: self.record,
                column: None,
                message: "no field is tagged as primary key".to_string(),
            })
        })
    }

    /// Resolve result column names to fields, failing on the first
    /// column that has no mapped field.
    pub fn resolve(&self, columns: &[String]) -> Result<Vec<&FieldInfo>> {
        columns
            .iter()
            .map(|name| {
                self.field(name).ok_or_else(|| {
                    Error::Mapping(MappingError {
                        kind: MappingErrorKind::UnknownColumn,
                        record: self.record,
                        column: Some(name.clone()),
                        message: "no field is mapped to this column".to_string(),
                    })
                })
            })
            .collect()
    }
}

/// Per-storage cache of derived column metadata.
pub struct SchemaMapper {
    storage: String,
    naming: NamingFn,
    cache: RwLock<HashMap<TypeId, Arc<StructMapper>>>,
}

impl std::fmt::Debug for SchemaMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("SchemaMapper")
            .field("storage", &self.storage)
            .field("cached", &cached)
            .finish_non_exhaustive()
    }
}

impl SchemaMapper {
    /// Create a mapper using the hump-to-underscore naming transform.
    pub fn new(storage: impl Into<String>) -> Self {
        Self::with_naming(storage, hump_to_underscore)
    }

    /// Create a mapper with a custom naming transform.
    pub fn with_naming(storage: impl Into<String>, naming: NamingFn) -> Self {
        Self {
            storage: storage.into(),
            naming,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Storage this mapper belongs to.
    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Load (deriving on first use) the metadata for `R`.
    pub fn load<R: Record>(&self) -> Result<Arc<StructMapper>> {
        let key = TypeId::of::<R>();
        if let Some(found) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(found));
        }

        // Derived outside the lock; a racing loader may overwrite this entry
        // with an identical mapper.
        let derived = Arc::new(StructMapper::derive(R::shape(), self.naming)?);
        tracing::debug!(
            storage = %self.storage,
            record = R::shape().name,
            columns = derived.columns().len(),
            "derived column mapping"
        );
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&derived));
        Ok(derived)
    }

    /// Column names for `R`.
    pub fn columns<R: Record>(&self) -> Result<Vec<String>> {
        Ok(self.load::<R>()?.column_names())
    }
}
