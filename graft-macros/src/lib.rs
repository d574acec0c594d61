use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Field, Fields, GenericArgument, Ident, LitStr, PathArguments,
    Token, Type, parse_macro_input, punctuated::Punctuated,
};

mod relations;

use relations::{
    Kind, RelationField, associated_arm, check_shared_keys, eager_arm, parse_relation,
    relation_descriptor,
};

#[proc_macro_derive(Model, attributes(has_many, has_one, belongs_to, many_to_many, graft))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_model_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

/// A scalar field that maps to a column.
struct Column<'a> {
    ident: &'a Ident,
    name: String,
    ddl: String,
}

/// A `Vec<T>` of scalars stored in its own table.
struct CollectionField<'a> {
    ident: &'a Ident,
    name: String,
    element: &'a Type,
    sql_type: &'static str,
}

fn derive_model_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;
    let all_fields = if let Data::Struct(data) = &input.data {
        if let Fields::Named(fields) = &data.fields {
            &fields.named
        } else {
            return Err(syn::Error::new_spanned(
                &data.fields,
                "Graft Model only supports structs with named fields",
            ));
        }
    } else {
        return Err(syn::Error::new_spanned(
            input,
            "Graft Model only supports structs",
        ));
    };

    let snake = to_snake_case(&struct_name.to_string());
    let table_name = match table_override(&input.attrs)? {
        Some(table) => table,
        None => format!("{}s", snake),
    };
    let foreign_key = format!("{}_id", snake);

    let mut has_id = false;
    let mut columns = Vec::new();
    let mut collections = Vec::new();
    let mut relations: Vec<RelationField> = Vec::new();
    let mut skipped = Vec::new();

    for field in all_fields {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        if let Some(relation) = parse_relation(field)? {
            if !graft_flags(field)?.is_empty() {
                return Err(syn::Error::new_spanned(
                    field,
                    "association fields cannot carry #[graft(...)] options",
                ));
            }
            relations.push(relation);
            continue;
        }
        let flags = graft_flags(field)?;
        if flags.iter().any(|flag| flag == "ignore") {
            skipped.push(ident);
            continue;
        }
        if ident == "id" {
            if !is_i64(&field.ty) {
                return Err(syn::Error::new_spanned(&field.ty, "`id` must be an i64"));
            }
            has_id = true;
            continue;
        }
        if let Some((element, sql_type)) = collection_element(&field.ty) {
            if !flags.is_empty() {
                return Err(syn::Error::new_spanned(
                    field,
                    "collection fields only accept #[graft(ignore)]",
                ));
            }
            collections.push(CollectionField {
                ident,
                name: ident.to_string(),
                element,
                sql_type,
            });
            continue;
        }
        columns.push(Column {
            ident,
            name: ident.to_string(),
            ddl: column_ddl(field, &flags)?,
        });
    }

    if !has_id {
        return Err(syn::Error::new_spanned(
            struct_name,
            "Graft Model needs an `id: i64` field",
        ));
    }

    check_shared_keys(&relations, struct_name)?;
    for relation in relations.iter().filter(|relation| relation.kind == Kind::BelongsTo) {
        let key = format!("{}_id", to_snake_case(&relation.target_name(struct_name)));
        let clash = columns
            .iter()
            .map(|column| (column.ident, &column.name))
            .chain(collections.iter().map(|collection| (collection.ident, &collection.name)))
            .find(|(_, name)| **name == key);
        if let Some((ident, _)) = clash {
            return Err(syn::Error::new_spanned(
                ident,
                format!(
                    "`{}` is the foreign key of `{}`; it is written through the association, not as a field",
                    key, relation.name
                ),
            ));
        }
    }

    let create_table_sql = {
        let mut parts = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_owned()];
        parts.extend(columns.iter().map(|column| column.ddl.clone()));
        format!("CREATE TABLE IF NOT EXISTS {} ({})", table_name, parts.join(", "))
    };

    let column_idents: Vec<_> = columns.iter().map(|column| column.ident).collect();
    let column_names: Vec<_> = columns.iter().map(|column| column.name.as_str()).collect();
    let relation_idents: Vec<_> = relations.iter().map(|relation| &relation.ident).collect();
    let descriptors: Vec<_> = relations.iter().map(relation_descriptor).collect();
    let associated_arms: Vec<_> = relations.iter().map(associated_arm).collect();
    let eager_arms: Vec<_> = relations.iter().map(eager_arm).collect();

    let collection_idents: Vec<_> = collections.iter().map(|c| c.ident).collect();
    let collection_elements: Vec<_> = collections.iter().map(|c| c.element).collect();
    let collection_descriptors: Vec<_> = collections
        .iter()
        .map(|c| {
            let name = &c.name;
            let sql_type = c.sql_type;
            quote! { ::graft_orm::Collection::new(#name, #table_name, #foreign_key, #sql_type) }
        })
        .collect();
    let (collection_record, collection_model) = if collections.is_empty() {
        (quote! {}, quote! {})
    } else {
        (
            quote! {
                fn collection_values(&self) -> Vec<(::graft_orm::Collection, Vec<::graft_orm::BindValue>)> {
                    let collections = vec![ #( #collection_descriptors ),* ];
                    let values: Vec<Vec<::graft_orm::BindValue>> = vec![
                        #(
                            self.#collection_idents.iter().cloned().map(::graft_orm::BindValue::from).collect::<Vec<_>>(),
                        )*
                    ];
                    collections.into_iter().zip(values).collect()
                }
            },
            quote! {
                fn collections() -> Vec<::graft_orm::Collection> {
                    vec![ #( #collection_descriptors ),* ]
                }

                fn load_collections<'c>(
                    models: &'c mut [Self],
                    conn: &'c mut ::graft_orm::sqlx::SqliteConnection,
                ) -> ::graft_orm::__private::BoxFuture<'c, ::graft_orm::GraftResult<()>> {
                    Box::pin(async move {
                        let ids: Vec<i64> = models
                            .iter()
                            .map(|model| model.id)
                            .filter(|id| *id > 0)
                            .collect();
                        if ids.is_empty() {
                            return Ok(());
                        }
                        #(
                            let mut loaded = ::graft_orm::collection::load::<#collection_elements>(
                                &mut *conn,
                                &#collection_descriptors,
                                &ids,
                            )
                            .await?;
                            for model in models.iter_mut() {
                                model.#collection_idents = loaded.remove(&model.id).unwrap_or_default();
                            }
                        )*
                        Ok(())
                    })
                }
            },
        )
    };

    Ok(quote! {
        impl<'r> ::graft_orm::sqlx::FromRow<'r, ::graft_orm::sqlx::sqlite::SqliteRow> for #struct_name {
            fn from_row(row: &'r ::graft_orm::sqlx::sqlite::SqliteRow) -> Result<Self, ::graft_orm::sqlx::Error> {
                Ok(Self {
                    id: ::graft_orm::__private::column(row, "id")?,
                    #(
                        #column_idents: ::graft_orm::__private::column(row, #column_names)?,
                    )*
                    #(
                        #relation_idents: ::std::default::Default::default(),
                    )*
                    #(
                        #collection_idents: ::std::default::Default::default(),
                    )*
                    #(
                        #skipped: ::std::default::Default::default(),
                    )*
                })
            }
        }

        impl ::graft_orm::Record for #struct_name {
            fn table(&self) -> &'static str {
                #table_name
            }

            fn id(&self) -> i64 {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = id;
            }

            fn column_values(&self) -> Vec<(&'static str, ::graft_orm::BindValue)> {
                vec![
                    #(
                        (#column_names, ::graft_orm::BindValue::from(::std::clone::Clone::clone(&self.#column_idents))),
                    )*
                ]
            }

            fn default_values(&self) -> Vec<(&'static str, ::graft_orm::BindValue)> {
                let defaults = <Self as ::std::default::Default>::default();
                ::graft_orm::Record::column_values(&defaults)
            }

            fn associations(&self) -> Vec<::graft_orm::Relation> {
                <Self as ::graft_orm::Model>::relations()
            }

            #collection_record

            #[allow(unused_variables)]
            fn associated_mut(&mut self, field: &str) -> Option<Vec<&mut dyn ::graft_orm::Record>> {
                match field {
                    #( #associated_arms )*
                    _ => None,
                }
            }
        }

        impl ::graft_orm::Model for #struct_name {
            fn table_name() -> &'static str {
                #table_name
            }

            fn foreign_key() -> &'static str {
                #foreign_key
            }

            fn create_table_sql() -> String {
                #create_table_sql.to_owned()
            }

            fn list_columns() -> Vec<&'static str> {
                vec!["id", #( #column_names ),*]
            }

            fn relations() -> Vec<::graft_orm::Relation> {
                vec![ #( #descriptors ),* ]
            }

            #collection_model

            #[allow(unused_variables)]
            fn eager_load<'c>(
                models: &'c mut [Self],
                field: &'c str,
                conn: &'c mut ::graft_orm::sqlx::SqliteConnection,
            ) -> ::graft_orm::__private::BoxFuture<'c, ::graft_orm::GraftResult<()>> {
                Box::pin(async move {
                    let ids: Vec<i64> = models.iter().map(|model| model.id).collect();
                    match field {
                        #( #eager_arms )*
                        _ => Err(::graft_orm::GraftError::ModelShape(format!(
                            "{} has no association named {}",
                            #table_name,
                            field
                        ))),
                    }
                })
            }
        }
    })
}

/// `#[graft(table = "...")]` on the struct.
fn table_override(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    for attr in attrs {
        if !attr.path().is_ident("graft") {
            continue;
        }
        let mut table = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                table = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported graft option; expected `table = \"...\"`"))
            }
        })?;
        if table.is_some() {
            return Ok(table);
        }
    }
    Ok(None)
}

/// Flags of `#[graft(...)]` on a field: `ignore`, `unique`, `not_null`.
fn graft_flags(field: &Field) -> syn::Result<Vec<Ident>> {
    let mut flags = Vec::new();
    for attr in &field.attrs {
        if !attr.path().is_ident("graft") {
            continue;
        }
        let args = attr.parse_args_with(Punctuated::<Ident, Token![,]>::parse_terminated)?;
        for flag in args {
            if flag != "ignore" && flag != "unique" && flag != "not_null" {
                return Err(syn::Error::new_spanned(
                    &flag,
                    "expected `ignore`, `unique` or `not_null`",
                ));
            }
            flags.push(flag);
        }
    }
    Ok(flags)
}

fn column_ddl(field: &Field, flags: &[Ident]) -> syn::Result<String> {
    let name = field
        .ident
        .as_ref()
        .map(Ident::to_string)
        .unwrap_or_default();
    let (inner, optional) = match option_inner(&field.ty) {
        Some(inner) => (inner, true),
        None => (&field.ty, false),
    };
    let sql_type = sql_type(inner)
        .ok_or_else(|| syn::Error::new_spanned(&field.ty, "unsupported column type"))?;
    let mut ddl = format!("{} {}", name, sql_type);
    if !optional || flags.iter().any(|flag| flag == "not_null") {
        ddl.push_str(" NOT NULL");
    }
    if flags.iter().any(|flag| flag == "unique") {
        ddl.push_str(" UNIQUE");
    }
    Ok(ddl)
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(path) if path.qself.is_none() => path.path.segments.last(),
        _ => None,
    }
}

fn first_generic(segment: &syn::PathSegment) -> Option<&Type> {
    if let PathArguments::AngleBracketed(args) = &segment.arguments {
        args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        })
    } else {
        None
    }
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let segment = last_segment(ty)?;
    if segment.ident == "Option" {
        first_generic(segment)
    } else {
        None
    }
}

/// Element type and SQL type of a `Vec<T>` collection field. `Vec<u8>`
/// is a blob column, not a collection.
fn collection_element(ty: &Type) -> Option<(&Type, &'static str)> {
    let segment = last_segment(ty)?;
    if segment.ident != "Vec" {
        return None;
    }
    let element = first_generic(segment)?;
    let sql_type = match last_segment(element)?.ident.to_string().as_str() {
        "i8" | "i16" | "i32" | "i64" | "u16" | "u32" | "bool" => "INTEGER",
        "f32" | "f64" => "REAL",
        "String" => "TEXT",
        _ => return None,
    };
    Some((element, sql_type))
}

fn is_i64(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "i64")
}

fn sql_type(ty: &Type) -> Option<&'static str> {
    let segment = last_segment(ty)?;
    let ident = segment.ident.to_string();
    match ident.as_str() {
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "bool" => Some("INTEGER"),
        "f32" | "f64" => Some("REAL"),
        "String" => Some("TEXT"),
        "DateTime" | "NaiveDateTime" => Some("TEXT"),
        "Uuid" => Some("BLOB"),
        "Vec" => {
            let inner = first_generic(segment)?;
            last_segment(inner)
                .filter(|inner| inner.ident == "u8")
                .map(|_| "BLOB")
        }
        _ => None,
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
