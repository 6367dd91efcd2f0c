//! Static source units shipped with every generated access layer.

use crate::{SourceUnit, UnitKind};

const PRELUDE: &str = include_str!("../support/prelude.rs");
const CONTEXT_BASE: &str = include_str!("../support/context_base.rs");

/// Unit names of the static sources, in emission order.
pub const STATIC_UNIT_NAMES: &[&str] = &["prelude", "context_base"];

/// Public items the static units export at the crate root of a built unit.
pub const ROOT_EXPORTS: &[&str] = &[
    "BaseContext",
    "Document",
    "Entity",
    "Fingerprint",
    "Identifier",
    "Interceptor",
    "StoreConnection",
    "Tracked",
    "TrackingState",
    "TypedCollection",
];

/// The fixed support units. Their text only changes with the driver version.
pub fn static_units() -> Vec<SourceUnit> {
    [PRELUDE, CONTEXT_BASE]
        .iter()
        .zip(STATIC_UNIT_NAMES)
        .map(|(text, name)| SourceUnit {
            name: name.to_string(),
            kind: UnitKind::Static,
            text: text.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // The support sources compiled in place, as a build would see them.
    mod prelude {
        include!("../support/prelude.rs");
    }

    mod context_base {
        include!("../support/context_base.rs");
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct StringEntity {
        #[serde(rename = "_id")]
        id: String,
    }

    #[test]
    fn test_static_units_are_valid_rust() {
        let units = static_units();
        assert_eq!(units.len(), 2);
        for unit in &units {
            assert_eq!(unit.kind, UnitKind::Static);
            assert!(syn::parse_file(&unit.text).is_ok(), "{} does not parse", unit.name);
        }
    }

    fn use_tree_names(tree: &syn::UseTree, names: &mut Vec<String>) {
        match tree {
            syn::UseTree::Path(path) => use_tree_names(&path.tree, names),
            syn::UseTree::Name(name) => names.push(name.ident.to_string()),
            syn::UseTree::Rename(rename) => names.push(rename.rename.to_string()),
            syn::UseTree::Group(group) => group.items.iter().for_each(|t| use_tree_names(t, names)),
            syn::UseTree::Glob(_) => panic!("glob exports cannot be listed"),
        }
    }

    #[test]
    fn test_root_exports_match_static_units() {
        let mut names = Vec::new();
        for unit in static_units() {
            let file = syn::parse_file(&unit.text).unwrap();
            for item in &file.items {
                match item {
                    syn::Item::Use(u) if matches!(u.vis, syn::Visibility::Public(_)) => {
                        use_tree_names(&u.tree, &mut names)
                    }
                    syn::Item::Type(t) if matches!(t.vis, syn::Visibility::Public(_)) => {
                        names.push(t.ident.to_string())
                    }
                    syn::Item::Struct(s) if matches!(s.vis, syn::Visibility::Public(_)) => {
                        names.push(s.ident.to_string())
                    }
                    _ => {}
                }
            }
        }
        names.sort();
        assert_eq!(names, ROOT_EXPORTS);
    }

    #[test]
    fn test_interceptor_alias_is_generic() {
        let entity = StringEntity { id: "abcdef".into() };
        let id = prelude::Interceptor::<StringEntity>::get_id(&entity).unwrap();
        assert_eq!(id, "abcdef");
    }

    #[test]
    fn test_base_context_hands_out_collections() {
        let base = context_base::BaseContext::new(Arc::new(docpad::MemoryStore::new()), "db");
        let handle = base.collection::<prelude::Document>("events");
        assert_eq!(handle.database(), "db");
        assert_eq!(handle.name(), "events");
    }
}
