//! `#[derive(In)]` / `#[derive(Out)]`: generates the field-by-field
//! `FromScope` / `IntoResults` impls an aggregate record needs to stand in
//! for several individually-resolved parameters or results, mirroring the
//! hand-written blanket impls for bare `Arc<T>` in `dig`'s own crate root.

use proc_macro::TokenStream;
use proc_macro_error::{abort, proc_macro_error};
use quote::quote;
use syn::{
    parse_macro_input, punctuated::Punctuated, Data, DeriveInput, Field, Fields, GenericArgument,
    Meta, NestedMeta, PathArguments, Token, Type,
};

#[derive(Default)]
struct FieldDirectives {
    name: Option<String>,
    group: Option<String>,
    flatten: bool,
}

fn field_directives(field: &Field) -> FieldDirectives {
    let mut directives = FieldDirectives::default();
    for attr in &field.attrs {
        if !attr.path.is_ident("dig") {
            continue;
        }
        let meta = match attr.parse_meta() {
            Ok(meta) => meta,
            Err(err) => abort!(attr, "invalid `dig` attribute: {}", err),
        };
        let list = match meta {
            Meta::List(list) => list,
            _ => abort!(attr, "expected `#[dig(...)]`"),
        };
        for nested in list.nested {
            match nested {
                NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("name") => {
                    directives.name = Some(lit_str(&nv.lit));
                }
                NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("group") => {
                    directives.group = Some(lit_str(&nv.lit));
                }
                NestedMeta::Meta(Meta::Path(path)) if path.is_ident("flatten") => {
                    directives.flatten = true;
                }
                other => abort!(other, "unrecognized `dig` field directive"),
            }
        }
    }
    directives
}

fn lit_str(lit: &syn::Lit) -> String {
    match lit {
        syn::Lit::Str(s) => s.value(),
        other => abort!(other, "expected a string literal"),
    }
}

fn named_fields(data: &Data, span: proc_macro2::Span) -> Punctuated<Field, Token![,]> {
    match data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => named.named.clone(),
            _ => abort!(span, "`dig`'s derive macros only support structs with named fields"),
        },
        _ => abort!(span, "`dig`'s derive macros only support structs"),
    }
}

/// The inner `T` of an `Arc<T>` type, or aborts with a helpful message.
fn arc_inner(ty: &Type) -> Type {
    generic_inner(ty, "Arc")
}

/// The inner `T` of a `Vec<T>` type, or aborts with a helpful message.
fn vec_inner(ty: &Type) -> Type {
    generic_inner(ty, "Vec")
}

fn generic_inner(ty: &Type, wrapper: &str) -> Type {
    try_generic_inner(ty, wrapper).unwrap_or_else(|| abort!(ty, "expected `{}<T>`", wrapper))
}

fn try_generic_inner(ty: &Type, wrapper: &str) -> Option<Type> {
    if let Type::Path(path) = ty {
        if let Some(segment) = path.path.segments.last() {
            if segment.ident == wrapper {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return Some(inner.clone());
                    }
                }
            }
        }
    }
    None
}

/// `true` if `ty` is literally `Option<...>`.
fn is_option(ty: &Type) -> bool {
    try_generic_inner(ty, "Option").is_some()
}

/// Derives `dig::FromScope` for a struct whose fields are each individually
/// resolvable: plain `Arc<T>`, `Option<Arc<T>>`, or — annotated with
/// `#[dig(group = "name")]` — `Vec<Arc<T>>` collecting every contributor to
/// a group.
#[proc_macro_error]
#[proc_macro_derive(In, attributes(dig))]
pub fn derive_in(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = &input.ident;
    let fields = named_fields(&input.data, ident.span());

    let mut describe_stmts = Vec::new();
    let mut resolve_exprs = Vec::new();
    let mut field_idents = Vec::new();
    let mut field_assigns = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let directives = field_directives(field);
        let field_ident = field.ident.clone().expect("named field");
        let field_ty = &field.ty;
        field_idents.push(field_ident.clone());

        if directives.name.is_some() && directives.group.is_some() {
            abort!(field, "`name` and `group` directives are mutually exclusive");
        }

        if let Some(group) = &directives.group {
            let inner = vec_inner(field_ty);
            describe_stmts.push(quote! {
                out.push(dig::ParamSpec::Group(dig::Key::group::<#inner>(#group)));
            });
            resolve_exprs.push(quote! {
                dig::derive_support::erase_value(dig::group_field::<#inner>(ctx, #group))
            });
            field_assigns.push(quote! {
                #field_ident: (*__parts[#index].downcast::<Vec<std::sync::Arc<#inner>>>()
                    .expect("group field type mismatch"))
                    .clone()
            });
        } else if let Some(name) = &directives.name {
            if is_option(field_ty) {
                let inner = arc_inner(&generic_inner(field_ty, "Option"));
                describe_stmts.push(quote! {
                    out.push(dig::ParamSpec::OptionalValue(dig::Key::named::<#inner>(#name)));
                });
                resolve_exprs.push(quote! {
                    dig::derive_support::erase_value(
                        dig::derive_support::resolve_optional_named::<#inner>(ctx, #name),
                    )
                });
                field_assigns.push(quote! {
                    #field_ident: (*__parts[#index].downcast::<Option<std::sync::Arc<#inner>>>()
                        .expect("named optional field type mismatch"))
                        .clone()
                });
            } else {
                let inner = arc_inner(field_ty);
                describe_stmts.push(quote! {
                    out.push(dig::ParamSpec::Value(dig::Key::named::<#inner>(#name)));
                });
                resolve_exprs.push(quote! {
                    dig::derive_support::erase_value(
                        dig::derive_support::resolve_named::<#inner>(ctx, #name),
                    )
                });
                field_assigns.push(quote! {
                    #field_ident: (*__parts[#index].downcast::<std::sync::Arc<#inner>>()
                        .expect("named field type mismatch"))
                        .clone()
                });
            }
        } else {
            describe_stmts.push(quote! {
                <#field_ty as dig::FromScope>::describe(out);
            });
            resolve_exprs.push(quote! {
                <#field_ty as dig::FromScope>::resolve_erased(ctx)
            });
            field_assigns.push(quote! {
                #field_ident: (*__parts[#index].downcast::<#field_ty>()
                    .expect("field type mismatch"))
                    .clone()
            });
        }
    }

    let expanded = quote! {
        impl dig::FromScope for #ident {
            fn describe(out: &mut Vec<dig::ParamSpec>) {
                #(#describe_stmts)*
            }

            fn resolve_erased(
                ctx: &dig::derive_support::ResolveCtx,
            ) -> dig::Deferred<dig::derive_support::AnyValue> {
                let __members = vec![#(#resolve_exprs),*];
                let __joined = dig::join_values(__members);
                __joined.then(move |__parts| {
                    dig::Deferred::settled(dig::derive_support::AnyValue::new(#ident {
                        #(#field_assigns),*
                    }))
                })
            }
        }
    };
    expanded.into()
}

/// Derives `dig::IntoResults` for a struct whose fields each contribute one
/// result: plain `Arc<T>` (the sole unnamed value), `#[dig(name = "...")]`
/// for a named value, `#[dig(group = "...")]` for a single group
/// contribution, or `#[dig(group = "...", flatten)]` on a `Vec<Arc<T>>` to
/// expand it element-wise into the group.
#[proc_macro_error]
#[proc_macro_derive(Out, attributes(dig))]
pub fn derive_out(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = &input.ident;
    let fields = named_fields(&input.data, ident.span());

    let mut describe_stmts = Vec::new();
    let mut store_stmts = Vec::new();

    for field in fields.iter() {
        let directives = field_directives(field);
        let field_ident = field.ident.clone().expect("named field");
        let field_ty = &field.ty;

        match (&directives.name, &directives.group, directives.flatten) {
            (Some(name), None, false) => {
                let inner = arc_inner(field_ty);
                describe_stmts.push(quote! {
                    out.push(dig::ResultSpec::Value(dig::Key::named::<#inner>(#name)));
                });
                store_stmts.push(quote! {
                    ctx.store_named::<#inner>(#name, self.#field_ident);
                });
            }
            (None, Some(group), false) => {
                let inner = arc_inner(field_ty);
                describe_stmts.push(quote! {
                    out.push(dig::ResultSpec::GroupItem(dig::Key::group::<#inner>(#group)));
                });
                store_stmts.push(quote! {
                    ctx.store_group_item::<#inner>(#group, self.#field_ident);
                });
            }
            (None, Some(group), true) => {
                let arc_ty = vec_inner(field_ty);
                let inner = arc_inner(&arc_ty);
                describe_stmts.push(quote! {
                    out.push(dig::ResultSpec::GroupFlatten(dig::Key::group::<#inner>(#group)));
                });
                store_stmts.push(quote! {
                    ctx.store_group_flatten::<#inner>(#group, self.#field_ident);
                });
            }
            (None, None, false) => {
                let inner = arc_inner(field_ty);
                describe_stmts.push(quote! {
                    out.push(dig::ResultSpec::Value(dig::Key::value::<#inner>()));
                });
                store_stmts.push(quote! {
                    ctx.store_value::<#inner>(self.#field_ident);
                });
            }
            _ => abort!(field, "`name` and `group` directives are mutually exclusive"),
        }
    }

    let expanded = quote! {
        impl dig::IntoResults for #ident {
            fn describe(out: &mut Vec<dig::ResultSpec>) {
                #(#describe_stmts)*
            }

            fn store(self, ctx: &dig::derive_support::StoreCtx, _specs: &[dig::ResultSpec]) {
                #(#store_stmts)*
            }
        }
    };
    expanded.into()
}
