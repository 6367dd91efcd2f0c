use docpad::Result;
use proc_macro2::{Ident, TokenStream};
use quote::quote;

use crate::type_utils::{type_path_tokens, DOCUMENT_TYPE};

/// Element type of one generated accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    /// A declared type, by normalized path.
    Declared(String),
    /// The untyped document fallback.
    Document,
}

impl ElementType {
    pub fn path(&self) -> &str {
        match self {
            ElementType::Declared(path) => path,
            ElementType::Document => DOCUMENT_TYPE,
        }
    }

    fn tokens(&self) -> Result<TokenStream> {
        match self {
            ElementType::Declared(path) => type_path_tokens(path),
            ElementType::Document => Ok(quote! { Document }),
        }
    }
}

/// One accessor method of the generated context.
#[derive(Debug, Clone)]
pub struct Accessor {
    pub collection: String,
    pub ident: Ident,
    pub element: ElementType,
}

/// Names the context unit imports into the module that declares the context.
pub const CONTEXT_IMPORTS: &[&str] = &["Arc", "BaseContext", "Document", "StoreConnection", "TypedCollection"];

/// Generate the context type for one database, nested inside `namespace`.
pub fn generate_context(
    database: &str,
    namespace: &[Ident],
    context: &Ident,
    accessors: &[Accessor],
) -> Result<TokenStream> {
    let mut methods = Vec::new();
    let mut instantiations = Vec::new();
    let mut seen_types = Vec::new();

    for accessor in accessors {
        let method_ident = &accessor.ident;
        let element = accessor.element.tokens()?;
        let collection_lit = accessor.collection.as_str();
        let doc = match &accessor.element {
            ElementType::Declared(path) => format!(" The `{collection_lit}` collection, typed as `{path}`."),
            ElementType::Document => format!(" The untyped `{collection_lit}` collection."),
        };

        methods.push(quote! {
            #[doc = #doc]
            pub fn #method_ident(&self) -> TypedCollection<#element> {
                self.base.collection(#collection_lit)
            }
        });

        if !seen_types.contains(&accessor.element) {
            seen_types.push(accessor.element.clone());
            instantiations.push(quote! { assert_entity::<#element>(); });
        }
    }

    let collection_names = accessors.iter().map(|a| a.collection.as_str());
    let context_doc = format!(" Typed access layer for the `{database}` database.");

    let mut body = quote! {
        #[allow(unused_imports)]
        use crate::BaseContext;
        #[allow(unused_imports)]
        use ::docpad::{Document, StoreConnection, TypedCollection};
        use std::sync::Arc;

        #[doc = #context_doc]
        #[allow(non_camel_case_types)]
        pub struct #context {
            base: BaseContext,
        }

        impl #context {
            pub const DATABASE: &'static str = #database;
            pub const COLLECTIONS: &'static [&'static str] = &[#(#collection_names),*];

            pub fn new(connection: Arc<dyn StoreConnection>) -> Self {
                Self {
                    base: BaseContext::new(connection, Self::DATABASE),
                }
            }

            pub fn base(&self) -> &BaseContext {
                &self.base
            }

            #(#methods)*
        }

        // Every element type must be usable as an interceptor parameter.
        #[allow(dead_code)]
        const _: () = {
            fn assert_entity<T: ::docpad::Entity>() {}
            fn instantiate_all() {
                #(#instantiations)*
            }
        };
    };

    for module in namespace.iter().rev() {
        body = quote! {
            pub mod #module {
                #body
            }
        };
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::format_ident;

    fn accessors() -> Vec<Accessor> {
        vec![
            Accessor {
                collection: "collection".into(),
                ident: format_ident!("collection"),
                element: ElementType::Declared("models::StringEntity".into()),
            },
            Accessor {
                collection: "untyped".into(),
                ident: format_ident!("untyped"),
                element: ElementType::Document,
            },
        ]
    }

    #[test]
    fn test_generate_context_basic() {
        let tokens = generate_context(
            "db",
            &[format_ident!("testns")],
            &format_ident!("driver"),
            &accessors(),
        )
        .unwrap();
        let code = tokens.to_string();

        assert!(code.contains("pub mod testns"));
        assert!(code.contains("pub struct driver"));
        assert!(code.contains("fn collection (& self) -> TypedCollection < :: models :: StringEntity >"));
        assert!(code.contains("fn untyped (& self) -> TypedCollection < Document >"));
        assert!(code.contains("assert_entity :: < Document >"));
        assert!(syn::parse2::<syn::File>(tokens).is_ok());
    }

    #[test]
    fn test_nested_namespace() {
        let tokens = generate_context(
            "db",
            &[format_ident!("company"), format_ident!("data")],
            &format_ident!("Ctx"),
            &[],
        )
        .unwrap();
        let file: syn::File = syn::parse2(tokens).unwrap();

        let syn::Item::Mod(outer) = &file.items[0] else {
            panic!("expected module");
        };
        assert_eq!(outer.ident, "company");
        let (_, inner) = outer.content.as_ref().unwrap();
        assert!(matches!(&inner[0], syn::Item::Mod(m) if m.ident == "data"));
    }

    #[test]
    fn test_instantiation_check_is_deduplicated() {
        let mut list = accessors();
        list.push(Accessor {
            collection: "archive".into(),
            ident: format_ident!("archive"),
            element: ElementType::Document,
        });
        let code = generate_context("db", &[], &format_ident!("Ctx"), &list)
            .unwrap()
            .to_string();
        assert_eq!(code.matches("assert_entity :: < Document >").count(), 1);
    }
}
