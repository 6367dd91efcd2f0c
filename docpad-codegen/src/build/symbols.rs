//! Public types of a built unit, indexed by their path from the crate root.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Struct,
    Enum,
    TypeAlias,
    Trait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub kind: SymbolKind,
    /// Number of type parameters.
    pub generics: usize,
    /// Source unit that defines the symbol.
    pub unit: String,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    symbols: BTreeMap<String, Symbol>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the public items of one unit. Every unit is glob re-exported
    /// from the crate root, so paths start at the unit's top level.
    pub fn add_unit(&mut self, unit: &str, file: &syn::File) {
        self.add_items(unit, &[], &file.items);
    }

    fn add_items(&mut self, unit: &str, prefix: &[String], items: &[syn::Item]) {
        for item in items {
            let (ident, kind, generics) = match item {
                syn::Item::Struct(s) if is_public(&s.vis) => (&s.ident, SymbolKind::Struct, &s.generics),
                syn::Item::Enum(e) if is_public(&e.vis) => (&e.ident, SymbolKind::Enum, &e.generics),
                syn::Item::Type(t) if is_public(&t.vis) => (&t.ident, SymbolKind::TypeAlias, &t.generics),
                syn::Item::Trait(t) if is_public(&t.vis) => (&t.ident, SymbolKind::Trait, &t.generics),
                syn::Item::Mod(m) if is_public(&m.vis) => {
                    if let Some((_, inner)) = &m.content {
                        let mut nested = prefix.to_vec();
                        nested.push(m.ident.to_string());
                        self.add_items(unit, &nested, inner);
                    }
                    continue;
                }
                _ => continue,
            };

            let mut path = prefix.to_vec();
            path.push(ident.to_string());
            self.symbols.insert(
                path.join("::"),
                Symbol {
                    kind,
                    generics: generics.type_params().count(),
                    unit: unit.to_string(),
                },
            );
        }
    }

    pub fn get(&self, path: &str) -> Option<&Symbol> {
        self.symbols.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn is_public(vis: &syn::Visibility) -> bool {
    matches!(vis, syn::Visibility::Public(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_nested_public_items() {
        let file: syn::File = syn::parse_str(
            r#"
pub mod outer {
    pub mod inner {
        pub struct Ctx { base: u8 }
    }
    struct Hidden;
}
pub type Alias<T> = Vec<T>;
pub trait Marker<A, B> {}
pub enum Kind { A }
mod private { pub struct Unreachable; }
"#,
        )
        .unwrap();

        let mut index = SymbolIndex::new();
        index.add_unit("ctx", &file);

        let paths: Vec<&str> = index.paths().collect();
        assert_eq!(paths, vec!["Alias", "Kind", "Marker", "outer::inner::Ctx"]);
        assert_eq!(index.get("Alias").unwrap().generics, 1);
        assert_eq!(index.get("Marker").unwrap().kind, SymbolKind::Trait);
        assert_eq!(index.get("Marker").unwrap().generics, 2);
        assert_eq!(index.get("outer::inner::Ctx").unwrap().unit, "ctx");
    }
}
