use docpad::{DriverError, Result};
use heck::ToSnakeCase;
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};
use std::collections::BTreeSet;
use syn::ext::IdentExt;
use syn::parse::Parser;

/// Accessor names that would shadow members of the generated context.
const RESERVED_ACCESSORS: &[&str] = &["new", "base"];

/// Rust path of the untyped fallback element type.
pub const DOCUMENT_TYPE: &str = "docpad::Document";

/// Normalize a declared type name: `.` separators become `::`, whitespace
/// and a leading `::` are dropped.
/// e.g. "models.StringEntity" -> "models::StringEntity"
pub fn normalize_type_path(declared: &str) -> String {
    let compact: String = declared.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split("::")
        .flat_map(|part| part.split('.'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("::")
}

/// Tokens for an absolute path to a type, e.g. `::models::StringEntity`.
pub fn type_path_tokens(path: &str) -> Result<TokenStream> {
    let parsed: syn::Path = syn::parse_str(&format!("::{path}")).map_err(|e| {
        DriverError::InvalidMapping(format!("`{path}` is not a valid type path: {e}"))
    })?;
    Ok(quote! { #parsed })
}

/// Turn a crate name into the identifier it is imported under.
/// e.g. "my-models" -> "my_models"
pub fn crate_ident_name(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}

/// Parse a plain identifier supplied by the host (context or module name).
pub fn parse_ident(name: &str, what: &str) -> Result<Ident> {
    syn::parse_str::<Ident>(name)
        .map_err(|_| DriverError::InvalidMapping(format!("{what} `{name}` is not a valid identifier")))
}

/// Split a namespace like "a.b" or "a::b" into validated module identifiers.
/// An empty namespace places the context at the crate root.
pub fn namespace_idents(namespace: &str) -> Result<Vec<Ident>> {
    let normalized = normalize_type_path(namespace);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }
    normalized
        .split("::")
        .map(|segment| parse_ident(segment, "namespace segment"))
        .collect()
}

/// Whether `candidate` lexes as one identifier. Keywords count; [`safe_ident`]
/// makes them raw.
fn is_identifier(candidate: &str) -> bool {
    Ident::parse_any.parse_str(candidate).is_ok()
}

/// Convert a collection name into a method identifier.
/// e.g. "user-events" -> "user_events", "type" -> "r#type", "2024" -> "c_2024",
/// "level²" -> "level"
pub fn accessor_base_name(collection_name: &str) -> String {
    // Characters that cannot continue an identifier become separators.
    let snake: String = collection_name
        .to_snake_case()
        .chars()
        .map(|c| if c == '_' || is_identifier(&format!("x{c}")) { c } else { '_' })
        .collect();
    let snake = snake.trim_matches('_');
    let snake = if snake.is_empty() { "collection".to_string() } else { snake.to_string() };
    // Digits of any script cannot start an identifier.
    let snake = if is_identifier(&snake) { snake } else { format!("c_{snake}") };
    if RESERVED_ACCESSORS.contains(&snake.as_str()) {
        format!("{snake}_collection")
    } else {
        snake
    }
}

/// Accessor identifiers for collections in the given (sorted) order.
/// Names that collide after snake-casing get a numeric suffix, assigned in
/// input order so the result is deterministic.
pub fn accessor_idents(collection_names: &[&str]) -> Vec<Ident> {
    let mut taken = BTreeSet::new();
    collection_names
        .iter()
        .map(|name| {
            let base = accessor_base_name(name);
            let mut candidate = base.clone();
            let mut n = 2;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            safe_ident(&candidate)
        })
        .collect()
}

/// Check if a name is a Rust keyword and needs raw identifier syntax.
pub fn safe_ident(name: &str) -> Ident {
    match name {
        "type" | "struct" | "enum" | "fn" | "let" | "mut" | "ref" | "mod" | "use" | "pub"
        | "impl" | "trait" | "for" | "loop" | "while" | "if" | "else" | "match" | "return"
        | "break" | "continue" | "as" | "in" | "where" | "async" | "await" | "dyn" | "move"
        | "static" | "const" | "unsafe" | "extern" | "true" | "false" | "abstract" | "become"
        | "box" | "do" | "final" | "macro" | "override" | "priv" | "typeof" | "unsized"
        | "virtual" | "yield" | "try" | "gen" => {
            format_ident!("r#{}", name)
        }
        // These cannot be raw identifiers.
        "self" | "super" | "crate" | "Self" => format_ident!("{}_", name),
        _ => format_ident!("{}", name),
    }
}
