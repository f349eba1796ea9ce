//! Parsing logic for the Record derive macro.
//!
//! This module extracts struct-level and field-level `#[orm(...)]`
//! attributes from the derive input to build `RecordDef` and `FieldDef`
//! structures used for code generation.

use proc_macro2::Span;
use syn::ext::IdentExt;
use syn::{Attribute, Data, DeriveInput, Error, Fields, Ident, LitStr, Result, Type, Visibility};

/// Parsed record definition from a struct with `#[derive(Record)]`.
#[derive(Debug)]
pub struct RecordDef {
    /// The struct name (e.g., `User`).
    pub name: Ident,
    /// Table name from `#[orm(table = "...")]`, if given.
    pub table: Option<String>,
    /// Fields in declaration order.
    pub fields: Vec<FieldDef>,
}

/// Parsed field definition.
#[derive(Debug)]
pub struct FieldDef {
    /// Field identifier.
    pub ident: Ident,
    /// Declared name with any raw-identifier prefix removed.
    pub name: String,
    pub ty: Type,
    /// Raw annotation string from `#[orm("...")]`.
    pub tag: Option<String>,
    /// Field has some `pub` visibility.
    pub exported: bool,
    /// Field is marked `#[orm(embed)]`.
    pub embed: bool,
}

impl FieldDef {
    /// Whether the mapper can address this field as a leaf column.
    pub fn is_mapped_leaf(&self) -> bool {
        self.exported && !self.embed
    }
}

pub fn parse_record(input: &DeriveInput) -> Result<RecordDef> {
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Record cannot be derived for generic structs",
        ));
    }

    let table = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Record can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Record can only be derived for structs, not unions",
            ));
        }
    };

    Ok(RecordDef {
        name: input.ident.clone(),
        table,
        fields,
    })
}

/// Parse struct-level `#[orm(table = "name")]`.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut table: Option<String> = None;

    for attr in attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table.is_some() {
                    return Err(meta.error("duplicate orm attribute: table"));
                }
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(Error::new_spanned(value, "table name cannot be empty"));
                }
                table = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown orm struct attribute, expected `table = \"...\"`"))
            }
        })?;
    }

    Ok(table)
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .map(|field| {
                let ident = field
                    .ident
                    .clone()
                    .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
                let (tag, embed) = parse_field_attrs(&field.attrs)?;
                Ok(FieldDef {
                    name: ident.unraw().to_string(),
                    ident,
                    ty: field.ty.clone(),
                    tag,
                    exported: !matches!(field.vis, Visibility::Inherited),
                    embed,
                })
            })
            .collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Record requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Record requires a struct with fields, not a unit struct",
        )),
    }
}

/// Parse `#[orm("...")]` and `#[orm(embed)]` on a field.
fn parse_field_attrs(attrs: &[Attribute]) -> Result<(Option<String>, bool)> {
    let mut tag: Option<String> = None;
    let mut embed = false;

    for attr in attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }

        if let Ok(lit) = attr.parse_args::<LitStr>() {
            if tag.is_some() {
                return Err(Error::new_spanned(lit, "duplicate orm annotation string"));
            }
            tag = Some(lit.value());
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("embed") {
                embed = true;
                Ok(())
            } else {
                Err(meta.error(
                    "unknown orm field attribute, expected `embed` or an annotation string",
                ))
            }
        })?;
    }

    if embed && tag.is_some() {
        return Err(Error::new(
            Span::call_site(),
            "an embedded field cannot carry a column annotation",
        ));
    }

    Ok((tag, embed))
}
