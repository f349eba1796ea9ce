//! Procedural macros for rowbind.
//!
//! `#[derive(Record)]` turns a struct into a mappable record: it builds
//! the static field layout the schema mapper walks and the index-path
//! accessors the scanner and statement filling use. With
//! `#[orm(table = "...")]` it also implements `Model`.

use proc_macro::TokenStream;
use quote::quote;

mod parse;

use parse::{RecordDef, parse_record};

/// Derive macro for the `Record` trait.
///
/// # Attributes
///
/// - `#[orm(table = "name")]` on the struct - also implement `Model`
/// - `#[orm("column:name,readonly,pk")]` on a field - the field's annotation
/// - `#[orm(embed)]` on a field - flatten an embedded `Record` into this one
///
/// Only `pub` leaf fields are mapped. Embedded fields are flattened
/// whatever their visibility.
///
/// # Example
///
/// ```ignore
/// use rowbind::Record;
///
/// #[derive(Record, Default)]
/// pub struct Audit {
///     #[orm("readonly")]
///     pub updated_at: i64,
/// }
///
/// #[derive(Record, Default)]
/// #[orm(table = "users")]
/// pub struct User {
///     #[orm("pk")]
///     pub id: i64,
///     #[orm("column:display_name")]
///     pub name: String,
///     #[orm(embed)]
///     audit: Audit,
/// }
/// ```
#[proc_macro_derive(Record, attributes(orm))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let record = match parse_record(&input) {
        Ok(r) => r,
        Err(e) => return e.to_compile_error().into(),
    };

    let record_impl = generate_record_impl(&record);
    let model_impl = generate_model_impl(&record);
    quote! {
        #record_impl
        #model_impl
    }
    .into()
}

fn generate_record_impl(record: &RecordDef) -> proc_macro2::TokenStream {
    let name = &record.name;
    let name_lit = name.to_string();

    let shapes = record.fields.iter().map(|field| {
        let field_name = &field.name;
        let exported = field.exported;
        if field.embed {
            let ty = &field.ty;
            quote! {
                ::rowbind_core::FieldShape::embedded(
                    #field_name,
                    #exported,
                    <#ty as ::rowbind_core::Record>::shape,
                )
            }
        } else {
            let tag = match &field.tag {
                Some(tag) => quote! { ::core::option::Option::Some(#tag) },
                None => quote! { ::core::option::Option::None },
            };
            quote! { ::rowbind_core::FieldShape::leaf(#field_name, #tag, #exported) }
        }
    });

    let mut get_arms = Vec::new();
    let mut set_arms = Vec::new();
    for (index, field) in record.fields.iter().enumerate() {
        let ident = &field.ident;
        let ty = &field.ty;
        if field.embed {
            get_arms.push(quote! {
                [#index, rest @ ..] => ::rowbind_core::Record::get_field(&self.#ident, rest),
            });
            set_arms.push(quote! {
                [#index, rest @ ..] => ::rowbind_core::Record::set_field(&mut self.#ident, rest, value),
            });
        } else if field.is_mapped_leaf() {
            get_arms.push(quote! {
                [#index] => ::core::result::Result::Ok(::rowbind_core::Value::from(
                    ::core::clone::Clone::clone(&self.#ident),
                )),
            });
            set_arms.push(quote! {
                [#index] => {
                    self.#ident = <#ty as ::rowbind_core::FromValue>::from_value(value)?;
                    ::core::result::Result::Ok(())
                }
            });
        }
    }

    quote! {
        impl ::rowbind_core::Record for #name {
            fn shape() -> &'static ::rowbind_core::RecordShape {
                static SHAPE: ::rowbind_core::RecordShape = ::rowbind_core::RecordShape {
                    name: #name_lit,
                    fields: &[#(#shapes),*],
                };
                &SHAPE
            }

            #[allow(clippy::match_single_binding)]
            fn get_field(
                &self,
                path: &[usize],
            ) -> ::rowbind_core::Result<::rowbind_core::Value> {
                match path {
                    #(#get_arms)*
                    _ => ::core::result::Result::Err(::rowbind_core::invalid_path::<Self>(path)),
                }
            }

            #[allow(clippy::match_single_binding, unused_variables)]
            fn set_field(
                &mut self,
                path: &[usize],
                value: &::rowbind_core::Value,
            ) -> ::rowbind_core::Result<()> {
                match path {
                    #(#set_arms)*
                    _ => ::core::result::Result::Err(::rowbind_core::invalid_path::<Self>(path)),
                }
            }
        }
    }
}

fn generate_model_impl(record: &RecordDef) -> proc_macro2::TokenStream {
    let Some(table) = &record.table else {
        return proc_macro2::TokenStream::new();
    };
    let name = &record.name;
    quote! {
        impl ::rowbind_core::Model for #name {
            const TABLE_NAME: &'static str = #table;
        }
    }
}
