//! Declared types available to a build, keyed by their normalized path.

use crate::type_utils::{crate_ident_name, normalize_type_path, type_path_tokens};
use docpad::{CrateReference, DriverError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A declared type that collections may be mapped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableType {
    /// Normalized path, e.g. `models::StringEntity`.
    pub path: String,
    /// Crate that defines the type and must be linked into the build.
    pub source: CrateReference,
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, AvailableType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan every reference that has a local path. Registry-only references
    /// cannot be scanned and contribute no types.
    pub fn from_references(references: &[CrateReference]) -> Result<Self> {
        let mut registry = Self::new();
        for reference in references {
            if reference.path.is_some() {
                let found = registry.scan_crate(reference)?;
                log::debug!("Found {found} public types in crate '{}'", reference.name);
            } else {
                log::debug!("Skipping scan of registry crate '{}'", reference.name);
            }
        }
        Ok(registry)
    }

    /// Register a single type. The path has to start with the crate's name.
    pub fn register(&mut self, path: &str, source: &CrateReference) -> Result<()> {
        let path = normalize_type_path(path);
        type_path_tokens(&path)?;

        let crate_ident = crate_ident_name(&source.name);
        if path.split("::").next() != Some(crate_ident.as_str()) || !path.contains("::") {
            return Err(DriverError::InvalidMapping(format!(
                "type `{path}` is not inside crate '{}'",
                source.name
            )));
        }

        self.types.insert(
            path.clone(),
            AvailableType {
                path,
                source: source.clone(),
            },
        );
        Ok(())
    }

    /// Builder-style [`TypeRegistry::register`].
    pub fn with_type(mut self, path: &str, source: &CrateReference) -> Result<Self> {
        self.register(path, source)?;
        Ok(self)
    }

    /// Look up a declared type name (either `::` or `.` separated).
    pub fn resolve(&self, declared: &str) -> Option<&AvailableType> {
        self.types.get(&normalize_type_path(declared))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AvailableType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register the public, non-generic structs and enums of a local crate,
    /// starting from `src/lib.rs` and following public modules.
    /// Returns how many types were added.
    pub fn scan_crate(&mut self, reference: &CrateReference) -> Result<usize> {
        let root = reference.path.as_ref().ok_or_else(|| {
            DriverError::InvalidMapping(format!(
                "crate '{}' has no local path to scan",
                reference.name
            ))
        })?;
        let lib = root.join("src").join("lib.rs");
        let mut found = Vec::new();
        let prefix = vec![crate_ident_name(&reference.name)];
        scan_file(&lib, &root.join("src"), &prefix, &mut found)?;

        let count = found.len();
        for path in found {
            self.register(&path, reference)?;
        }
        Ok(count)
    }
}

fn scan_file(file: &Path, module_dir: &Path, prefix: &[String], found: &mut Vec<String>) -> Result<()> {
    let source = std::fs::read_to_string(file)?;
    let parsed = syn::parse_file(&source).map_err(|e| {
        DriverError::InvalidMapping(format!("failed to parse {}: {e}", file.display()))
    })?;
    scan_items(&parsed.items, module_dir, prefix, found)
}

fn scan_items(items: &[syn::Item], module_dir: &Path, prefix: &[String], found: &mut Vec<String>) -> Result<()> {
    for item in items {
        match item {
            syn::Item::Struct(s) if is_public(&s.vis) && !is_generic(&s.generics) => {
                found.push(qualified(prefix, &s.ident));
            }
            syn::Item::Enum(e) if is_public(&e.vis) && !is_generic(&e.generics) => {
                found.push(qualified(prefix, &e.ident));
            }
            syn::Item::Mod(m) if is_public(&m.vis) => {
                let mut nested = prefix.to_vec();
                nested.push(m.ident.to_string());
                let nested_dir = module_dir.join(m.ident.to_string());
                match &m.content {
                    Some((_, inner)) => scan_items(inner, &nested_dir, &nested, found)?,
                    None => {
                        let file = module_file(module_dir, &m.ident.to_string()).ok_or_else(|| {
                            DriverError::InvalidMapping(format!(
                                "module `{}` not found under {}",
                                nested.join("::"),
                                module_dir.display()
                            ))
                        })?;
                        scan_file(&file, &nested_dir, &nested, found)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// `foo.rs` or `foo/mod.rs` next to the parent module.
fn module_file(module_dir: &Path, name: &str) -> Option<PathBuf> {
    let flat = module_dir.join(format!("{name}.rs"));
    if flat.exists() {
        return Some(flat);
    }
    let nested = module_dir.join(name).join("mod.rs");
    nested.exists().then_some(nested)
}

fn is_public(vis: &syn::Visibility) -> bool {
    matches!(vis, syn::Visibility::Public(_))
}

fn is_generic(generics: &syn::Generics) -> bool {
    !generics.params.is_empty()
}

fn qualified(prefix: &[String], ident: &syn::Ident) -> String {
    format!("{}::{}", prefix.join("::"), ident)
}
