//! docpad code generation - turns collection-to-type mappings into a typed
//! access layer and compiles it.
//!
//! The main entry point is [`generate_access_layer`], which produces the
//! source units of the access layer. [`build::BuildPipeline`] compiles them
//! into a [`build::BuiltUnit`].

pub mod build;
mod context_gen;
pub mod registry;
pub mod support;
pub mod type_utils;

use context_gen::{generate_context, Accessor, ElementType};
use docpad::{ConnectionProperties, CrateReference, DriverError, Result};
use std::collections::BTreeSet;
use std::path::Path;
use type_utils::{accessor_idents, namespace_idents, parse_ident, DOCUMENT_TYPE};

pub use registry::{AvailableType, TypeRegistry};

/// Header placed at the top of every generated context unit.
const GENERATED_HEADER: &str = "// Generated by docpad-codegen. Do not edit.\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Derived from the mapping, fresh for every request.
    Context,
    /// Shipped with the driver, identical across requests.
    Static,
}

/// One named Rust source file of an access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub kind: UnitKind,
    pub text: String,
}

impl SourceUnit {
    /// A caller-supplied static unit.
    pub fn static_unit(name: &str, text: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: UnitKind::Static,
            text: text.into(),
        }
    }
}

/// A collection whose declared type could not be resolved and was generated
/// against the untyped document instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub collection: String,
    pub declared_type: String,
}

/// The generated access layer: one context unit followed by the static units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub units: Vec<SourceUnit>,
    /// Path of the context type, e.g. `testns::driver`.
    pub context_path: String,
    /// Element types the context instantiates, sorted and deduplicated.
    pub entity_types: Vec<String>,
    /// Crates defining the declared element types, sorted by name.
    pub references: Vec<CrateReference>,
    pub demoted: Vec<Demotion>,
}

impl GeneratedSource {
    pub fn context_unit(&self) -> Option<&SourceUnit> {
        self.units.iter().find(|u| u.kind == UnitKind::Context)
    }

    pub fn static_units(&self) -> impl Iterator<Item = &SourceUnit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Static)
    }

    /// All units as one printable listing.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for unit in &self.units {
            out.push_str(&format!("// ---- unit: {} ----\n", unit.name));
            out.push_str(&unit.text);
            if !unit.text.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

/// What to do when a mapping declares a type that is not available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedTypePolicy {
    /// Return [`DriverError::UnresolvedType`].
    #[default]
    Fail,
    /// Fall back to the untyped document and record the demotion.
    Demote,
}

#[derive(Debug, Clone, Default)]
pub struct AccessLayerGenerator {
    policy: UnresolvedTypePolicy,
}

impl AccessLayerGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unresolved_types(mut self, policy: UnresolvedTypePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Generate the access layer for the selected database of `props`.
    pub fn generate(
        &self,
        props: &ConnectionProperties,
        available: &TypeRegistry,
        context_name: &str,
        namespace_name: &str,
    ) -> Result<GeneratedSource> {
        props.validate()?;
        let context = parse_ident(context_name, "context name")?;
        let namespace = namespace_idents(namespace_name)?;
        check_context_name(context_name, namespace.is_empty())?;

        let database = props.selected_database.as_str();
        if database.trim().is_empty() {
            return Err(DriverError::InvalidMapping("no database selected".into()));
        }
        if !props.collection_type_mappings.contains_key(database) {
            log::warn!("Database '{database}' has no collection mappings, generating an empty context");
        }

        let mut mappings: Vec<_> = props.selected_mappings().iter().collect();
        mappings.sort_by(|a, b| a.collection_name.cmp(&b.collection_name));

        let names: Vec<&str> = mappings.iter().map(|m| m.collection_name.as_str()).collect();
        let idents = accessor_idents(&names);

        let mut accessors = Vec::with_capacity(mappings.len());
        let mut entity_types = BTreeSet::new();
        let mut references = BTreeSet::new();
        let mut demoted = Vec::new();

        for (mapping, ident) in mappings.into_iter().zip(idents) {
            let element = match mapping.declared_type() {
                None => ElementType::Document,
                Some(declared) => match available.resolve(declared) {
                    Some(found) => {
                        references.insert(found.source.clone());
                        ElementType::Declared(found.path.clone())
                    }
                    None => match self.policy {
                        UnresolvedTypePolicy::Fail => {
                            return Err(DriverError::UnresolvedType {
                                type_name: declared.to_string(),
                                context: format!("collection '{}'", mapping.collection_name),
                            });
                        }
                        UnresolvedTypePolicy::Demote => {
                            log::warn!(
                                "Collection '{}' declares unknown type `{declared}`, using {DOCUMENT_TYPE}",
                                mapping.collection_name
                            );
                            demoted.push(Demotion {
                                collection: mapping.collection_name.clone(),
                                declared_type: declared.to_string(),
                            });
                            ElementType::Document
                        }
                    },
                },
            };
            entity_types.insert(element.path().to_string());
            accessors.push(Accessor {
                collection: mapping.collection_name.clone(),
                ident,
                element,
            });
        }

        let tokens = generate_context(database, &namespace, &context, &accessors)?;
        log::debug!(
            "Generated context `{context}` with {} accessor(s) for database '{database}'",
            accessors.len()
        );

        let mut segments: Vec<String> = namespace.iter().map(|i| i.to_string()).collect();
        segments.push(context.to_string());

        let unit_name = segments.join("_");
        if support::STATIC_UNIT_NAMES.contains(&unit_name.as_str()) {
            return Err(DriverError::InvalidMapping(format!(
                "context unit `{unit_name}` collides with a static unit of the same name"
            )));
        }

        let mut units = vec![SourceUnit {
            name: unit_name,
            kind: UnitKind::Context,
            text: format_token_stream(&tokens),
        }];
        units.extend(support::static_units());

        Ok(GeneratedSource {
            units,
            context_path: segments.join("::"),
            entity_types: entity_types.into_iter().collect(),
            references: references.into_iter().collect(),
            demoted,
        })
    }
}

/// Reject context names that clash with items already in scope where the
/// context is declared: the context unit's imports always, and the static
/// units' exports when the context sits at the crate root.
fn check_context_name(context_name: &str, at_root: bool) -> Result<()> {
    let clashes = context_gen::CONTEXT_IMPORTS.contains(&context_name)
        || (at_root && support::ROOT_EXPORTS.contains(&context_name));
    if clashes {
        return Err(DriverError::InvalidMapping(format!(
            "context name `{context_name}` is reserved by the generated access layer"
        )));
    }
    Ok(())
}

/// Generate the access layer with the default options.
pub fn generate_access_layer(
    props: &ConnectionProperties,
    available: &TypeRegistry,
    context_name: &str,
    namespace_name: &str,
) -> Result<GeneratedSource> {
    AccessLayerGenerator::new().generate(props, available, context_name, namespace_name)
}

/// Load connection properties from a YAML file, scan its local references
/// for types and generate the access layer.
pub fn generate_from_properties(
    properties_path: &Path,
    context_name: &str,
    namespace_name: &str,
) -> Result<GeneratedSource> {
    let props = docpad::mapping::parse_properties(properties_path)?;
    let registry = TypeRegistry::from_references(&props.references)?;
    generate_access_layer(&props, &registry, context_name, namespace_name)
}

/// Like [`generate_from_properties`] but takes the YAML content directly and
/// an explicit registry. Useful for testing.
pub fn generate_from_properties_str(
    properties_yaml: &str,
    available: &TypeRegistry,
    context_name: &str,
    namespace_name: &str,
) -> Result<GeneratedSource> {
    let props = docpad::mapping::parse_properties_str(properties_yaml)?;
    generate_access_layer(&props, available, context_name, namespace_name)
}

/// Pretty-print generated tokens. Falls back to the raw token text when
/// prettyplease cannot parse them.
pub fn format_token_stream(tokens: &proc_macro2::TokenStream) -> String {
    let body = match syn::parse2::<syn::File>(tokens.clone()) {
        Ok(file) => prettyplease::unparse(&file),
        Err(e) => {
            log::warn!("Generated tokens did not parse ({e}), emitting unformatted source");
            tokens.to_string()
        }
    };
    format!("{GENERATED_HEADER}{body}")
}
