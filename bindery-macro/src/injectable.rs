use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::parse::{ParseStream, Parser};
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Token, parse_macro_input};

pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate_injectable_impl(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

/// How one field is injected, as written in `#[inject(...)]`.
enum InjectKind {
    Key(LitStr),
    Getter(LitStr),
    View(LitStr),
    Tag(LitStr),
    TagOne(LitStr),
    Context,
    Session,
    Config(LitStr),
}

struct FieldInjection {
    kind: InjectKind,
    optional: bool,
}

fn generate_injectable_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let target = struct_name.to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "#[derive(Injectable)] can only be applied to structs",
            ));
        }
    };

    let mut declarations = Vec::new();
    let construct = match &data.fields {
        Fields::Named(fields) => {
            let mut inits = Vec::new();
            for field in &fields.named {
                let Some(field_name) = field.ident.as_ref() else {
                    return Err(syn::Error::new_spanned(field, "named field without a name"));
                };
                match parse_field_injection(&field.attrs)? {
                    Some(injection) => {
                        let property = field_name.to_string();
                        let tokens = injection_tokens(&injection);
                        declarations.push(quote!(.property(#property, #tokens)));
                        inits.push(quote!(#field_name: args.property(#property)?));
                    }
                    None => inits.push(quote!(#field_name: ::core::default::Default::default())),
                }
            }
            quote!(Self { #(#inits),* })
        }
        Fields::Unnamed(fields) => {
            let mut inits = Vec::new();
            let mut param = 0usize;
            for field in &fields.unnamed {
                match parse_field_injection(&field.attrs)? {
                    Some(injection) => {
                        let tokens = injection_tokens(&injection);
                        declarations.push(quote!(.param(#param, #tokens)));
                        inits.push(quote!(args.param(#param)?));
                        param += 1;
                    }
                    None => inits.push(quote!(::core::default::Default::default())),
                }
            }
            quote!(Self(#(#inits),*))
        }
        Fields::Unit => quote!(Self),
    };

    Ok(quote! {
        impl #impl_generics ::bindery::Injectable for #struct_name #ty_generics #where_clause {
            fn metadata() -> ::bindery::Result<::bindery::InjectionMetadata> {
                ::bindery::InjectionMetadata::builder(#target)
                    #(#declarations)*
                    .build()
            }

            #[allow(unused_variables)]
            fn construct(
                args: ::bindery::InjectedArgs
            ) -> ::bindery::Result<Self> {
                Ok(#construct)
            }
        }
    })
}

fn injection_tokens(injection: &FieldInjection) -> TokenStream2 {
    let base = match &injection.kind {
        InjectKind::Key(key) => quote!(::bindery::Injection::key(#key)),
        InjectKind::Getter(key) => quote!(::bindery::Injection::getter(#key)),
        InjectKind::View(tag) => {
            quote!(::bindery::Injection::view(::bindery::filter_by_tag(#tag)))
        }
        InjectKind::Tag(tag) => quote!(::bindery::Injection::tag(#tag)),
        InjectKind::TagOne(tag) => quote!(::bindery::Injection::tag_one(#tag)),
        InjectKind::Context => quote!(::bindery::Injection::context()),
        InjectKind::Session => quote!(::bindery::Injection::session()),
        InjectKind::Config(path) => quote!(::bindery::Injection::config(#path)),
    };
    if injection.optional {
        quote!(#base.optional())
    } else {
        base
    }
}

/// Read the `#[inject(...)]` attribute of a field, if any.
///
/// Accepted forms:
/// - `#[inject("key")]`, `#[inject("key", optional)]`
/// - `#[inject(key = "key")]`
/// - `#[inject(getter = "key")]`
/// - `#[inject(view = "tag")]`, `#[inject(tag = "tag")]`, `#[inject(tag_one = "tag")]`
/// - `#[inject(context)]`, `#[inject(session)]`
/// - `#[inject(config)]`, `#[inject(config = "path")]`
fn parse_field_injection(attrs: &[Attribute]) -> syn::Result<Option<FieldInjection>> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("inject")) else {
        return Ok(None);
    };
    let parser = |input: ParseStream| parse_inject_args(input, attr);
    parser.parse2(attr.meta.require_list()?.tokens.clone()).map(Some)
}

fn parse_inject_args(input: ParseStream, attr: &Attribute) -> syn::Result<FieldInjection> {
    let mut kind = None;
    let mut optional = false;

    if input.peek(LitStr) {
        kind = Some(InjectKind::Key(input.parse()?));
        if !input.is_empty() {
            input.parse::<Token![,]>()?;
        }
    }

    while !input.is_empty() {
        let ident: Ident = input.parse()?;
        let value: Option<LitStr> = if input.peek(Token![=]) {
            input.parse::<Token![=]>()?;
            Some(input.parse()?)
        } else {
            None
        };

        let parsed = match (ident.to_string().as_str(), value) {
            ("optional", None) => {
                optional = true;
                None
            }
            ("key", Some(v)) => Some(InjectKind::Key(v)),
            ("getter", Some(v)) => Some(InjectKind::Getter(v)),
            ("view", Some(v)) => Some(InjectKind::View(v)),
            ("tag", Some(v)) => Some(InjectKind::Tag(v)),
            ("tag_one", Some(v)) => Some(InjectKind::TagOne(v)),
            ("context", None) => Some(InjectKind::Context),
            ("session", None) => Some(InjectKind::Session),
            ("config", v) => Some(InjectKind::Config(
                v.unwrap_or_else(|| LitStr::new("", Span::call_site())),
            )),
            (other, _) => {
                return Err(syn::Error::new_spanned(
                    &ident,
                    format!("unsupported injection form `{other}`"),
                ));
            }
        };
        if let Some(parsed) = parsed {
            if kind.is_some() {
                return Err(syn::Error::new_spanned(
                    &ident,
                    "a field can only have one injection source",
                ));
            }
            kind = Some(parsed);
        }

        if !input.is_empty() {
            input.parse::<Token![,]>()?;
        }
    }

    match kind {
        Some(kind) => Ok(FieldInjection { kind, optional }),
        None => Err(syn::Error::new_spanned(
            attr,
            "#[inject] needs a key, e.g. #[inject(\"services.Foo\")]",
        )),
    }
}
