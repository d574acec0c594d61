use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Field, Ident, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    HasMany,
    HasOne,
    BelongsTo,
    ManyToMany,
}

impl Kind {
    fn from_attr(name: &str) -> Option<Self> {
        match name {
            "has_many" => Some(Kind::HasMany),
            "has_one" => Some(Kind::HasOne),
            "belongs_to" => Some(Kind::BelongsTo),
            "many_to_many" => Some(Kind::ManyToMany),
            _ => None,
        }
    }

    fn is_to_one(self) -> bool {
        matches!(self, Kind::HasOne | Kind::BelongsTo)
    }
}

/// `#[has_many(Student, on_delete = cascade)]` and friends.
struct RelationArgs {
    model: syn::Path,
    on_delete: Option<Ident>,
}

impl Parse for RelationArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let model: syn::Path = input.parse()?;
        let mut on_delete = None;
        while input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let value: Ident = input.parse()?;
            if key != "on_delete" {
                return Err(syn::Error::new_spanned(key, "unknown association option"));
            }
            if value != "cascade" && value != "set_null" {
                return Err(syn::Error::new_spanned(
                    value,
                    "on_delete must be `cascade` or `set_null`",
                ));
            }
            on_delete = Some(value);
        }
        Ok(Self { model, on_delete })
    }
}

/// One association field of the derived struct.
pub struct RelationField {
    pub ident: Ident,
    pub name: String,
    pub kind: Kind,
    pub model: syn::Path,
    on_delete: Option<Ident>,
}

impl RelationField {
    /// Name of the associated struct, with `Self` resolved to `owner`.
    pub fn target_name(&self, owner: &Ident) -> String {
        match self.model.segments.last() {
            Some(segment) if segment.ident != "Self" => segment.ident.to_string(),
            _ => owner.to_string(),
        }
    }
}

/// Refuses associations that would write the same foreign key.
///
/// Two `belongs_to` to one model share `<model>_id` on our table, two
/// `has_many`/`has_one` to one model share our key on theirs, and two
/// `many_to_many` to one other model share the join table. Self-referencing
/// many-to-many fields get a join table per field and never clash.
pub fn check_shared_keys(relations: &[RelationField], owner: &Ident) -> syn::Result<()> {
    let owner_name = owner.to_string();
    let mut seen: Vec<(u8, String)> = Vec::new();
    for relation in relations {
        let target = relation.target_name(owner);
        let slot = match relation.kind {
            Kind::BelongsTo => (0, target),
            Kind::HasMany | Kind::HasOne => (1, target),
            Kind::ManyToMany if target == owner_name => continue,
            Kind::ManyToMany => (2, target),
        };
        if seen.contains(&slot) {
            return Err(syn::Error::new_spanned(
                &relation.ident,
                format!(
                    "`{}` would share its foreign key with another association to `{}`",
                    relation.name, slot.1
                ),
            ));
        }
        seen.push(slot);
    }
    Ok(())
}

/// Reads the association attribute of `field`, if it has one.
pub fn parse_relation(field: &Field) -> syn::Result<Option<RelationField>> {
    let mut found: Option<RelationField> = None;
    for attr in &field.attrs {
        let Some(kind) = attr.path().get_ident().and_then(|ident| Kind::from_attr(&ident.to_string()))
        else {
            continue;
        };
        if found.is_some() {
            return Err(syn::Error::new_spanned(
                attr,
                "a field can hold only one association",
            ));
        }
        let args: RelationArgs = attr.parse_args()?;
        match kind {
            Kind::HasMany | Kind::HasOne if args.on_delete.is_none() => {
                return Err(syn::Error::new_spanned(
                    attr,
                    "has_many and has_one need an explicit `on_delete = cascade` or `on_delete = set_null`",
                ));
            }
            Kind::BelongsTo | Kind::ManyToMany if args.on_delete.is_some() => {
                return Err(syn::Error::new_spanned(
                    attr,
                    "on_delete only applies to has_many and has_one",
                ));
            }
            _ => {}
        }
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new_spanned(field, "associations need a named field"))?;
        found = Some(RelationField {
            name: ident.to_string(),
            ident,
            kind,
            model: args.model,
            on_delete: args.on_delete,
        });
    }
    Ok(found)
}

/// `Relation` constructor call describing `relation` from the deriving model's side.
pub fn relation_descriptor(relation: &RelationField) -> TokenStream {
    let name = &relation.name;
    let model = &relation.model;
    let other_table = quote! { <#model as ::graft_orm::Model>::table_name() };
    let own_key = quote! { <Self as ::graft_orm::Model>::foreign_key() };
    let on_delete = match relation.on_delete.as_ref().map(Ident::to_string).as_deref() {
        Some("set_null") => quote! { ::graft_orm::OnDelete::SetNull },
        _ => quote! { ::graft_orm::OnDelete::Cascade },
    };
    match relation.kind {
        Kind::HasMany => quote! {
            ::graft_orm::Relation::has_many(#name, #other_table, #own_key, #on_delete)
        },
        Kind::HasOne => quote! {
            ::graft_orm::Relation::has_one(#name, #other_table, #own_key, #on_delete)
        },
        Kind::BelongsTo => quote! {
            ::graft_orm::Relation::belongs_to(
                #name,
                #other_table,
                <#model as ::graft_orm::Model>::foreign_key(),
            )
        },
        Kind::ManyToMany => {
            let partner_column = format!("{}_id", name);
            quote! {
                if <Self as ::graft_orm::Model>::table_name() == #other_table {
                    ::graft_orm::Relation::self_many_to_many(
                        #name,
                        #other_table,
                        #own_key,
                        #partner_column,
                    )
                } else {
                    ::graft_orm::Relation::many_to_many(
                        #name,
                        <Self as ::graft_orm::Model>::table_name(),
                        #own_key,
                        #other_table,
                        <#model as ::graft_orm::Model>::foreign_key(),
                    )
                }
            }
        }
    }
}

/// Match arm handing out the live instances of `relation` as records.
pub fn associated_arm(relation: &RelationField) -> TokenStream {
    let name = &relation.name;
    let ident = &relation.ident;
    let model = &relation.model;
    if relation.kind.is_to_one() {
        quote! {
            #name => ::graft_orm::to_one_records::<#model, _>(&mut self.#ident),
        }
    } else {
        quote! {
            #name => ::graft_orm::to_many_records(&mut self.#ident),
        }
    }
}

/// Match arm of the generated `eager_load` for `relation`.
pub fn eager_arm(relation: &RelationField) -> TokenStream {
    let name = &relation.name;
    let ident = &relation.ident;
    let model = &relation.model;
    let lookup = quote! {
        let relation = ::graft_orm::eager::relation_for::<Self>(field)?;
    };
    if relation.kind.is_to_one() {
        quote! {
            #name => {
                #lookup
                let mut loaded = ::graft_orm::eager::load_one::<#model>(
                    conn,
                    <Self as ::graft_orm::Model>::table_name(),
                    &relation,
                    &ids,
                )
                .await?;
                for model in models.iter_mut() {
                    ::graft_orm::ToOne::<#model>::put(&mut model.#ident, loaded.remove(&model.id));
                }
                Ok(())
            }
        }
    } else {
        quote! {
            #name => {
                #lookup
                let mut loaded = ::graft_orm::eager::load_many::<#model>(
                    conn,
                    <Self as ::graft_orm::Model>::table_name(),
                    &relation,
                    &ids,
                )
                .await?;
                for model in models.iter_mut() {
                    model.#ident = Some(loaded.remove(&model.id).unwrap_or_default());
                }
                Ok(())
            }
        }
    }
}
