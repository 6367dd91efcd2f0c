use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Everything the driver knows about one configured connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub connection_string: String,
    #[serde(default)]
    pub selected_database: String,
    /// Database name -> mapped collections of that database.
    #[serde(default)]
    pub collection_type_mappings: BTreeMap<String, Vec<CollectionTypeMapping>>,
    /// Crates that define the declared collection types.
    #[serde(default)]
    pub references: Vec<CrateReference>,
}

/// Association of a store collection with an optional declared element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTypeMapping {
    pub collection_name: String,
    /// Fully qualified type path, e.g. `models::StringEntity`. Absent or blank
    /// means the collection is untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<String>,
}

/// A crate that has to be linked into the generated access layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrateReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CollectionTypeMapping {
    pub fn typed(collection_name: &str, collection_type: &str) -> Self {
        Self {
            collection_name: collection_name.to_string(),
            collection_type: Some(collection_type.to_string()),
        }
    }

    pub fn untyped(collection_name: &str) -> Self {
        Self {
            collection_name: collection_name.to_string(),
            collection_type: None,
        }
    }

    /// The declared type name, or `None` for an untyped collection.
    pub fn declared_type(&self) -> Option<&str> {
        self.collection_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

impl CrateReference {
    /// A crate on the local filesystem.
    pub fn local(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            path: Some(path.into()),
            version: None,
        }
    }

    /// A crate fetched from the registry.
    pub fn registry(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            version: Some(version.to_string()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DriverError::InvalidMapping(
                "crate reference with an empty name".into(),
            ));
        }
        match (&self.path, &self.version) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(DriverError::InvalidMapping(format!(
                "crate reference '{}' must have exactly one of `path` or `version`",
                self.name
            ))),
        }
    }
}

impl ConnectionProperties {
    /// Check the invariants every consumer relies on: non-empty, unique
    /// collection names per database and well-formed references.
    pub fn validate(&self) -> Result<()> {
        for (database, mappings) in &self.collection_type_mappings {
            let mut seen = HashSet::new();
            for mapping in mappings {
                if mapping.collection_name.trim().is_empty() {
                    return Err(DriverError::InvalidMapping(format!(
                        "database '{database}' has a mapping with an empty collection name"
                    )));
                }
                if !seen.insert(mapping.collection_name.as_str()) {
                    return Err(DriverError::InvalidMapping(format!(
                        "collection '{}' is mapped more than once in database '{database}'",
                        mapping.collection_name
                    )));
                }
            }
        }

        let mut names = HashSet::new();
        for reference in &self.references {
            reference.validate()?;
            if !names.insert(reference.name.as_str()) {
                return Err(DriverError::InvalidMapping(format!(
                    "crate '{}' is referenced more than once",
                    reference.name
                )));
            }
        }
        Ok(())
    }

    /// Mappings of the selected database, empty if it has none.
    pub fn selected_mappings(&self) -> &[CollectionTypeMapping] {
        self.collection_type_mappings
            .get(&self.selected_database)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rebase relative reference paths onto `base`, typically the directory
    /// the properties file was loaded from.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for reference in &mut self.references {
            if let Some(path) = &reference.path {
                if path.is_relative() {
                    reference.path = Some(base.join(path));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_declared_type_is_untyped() {
        let mapping = CollectionTypeMapping {
            collection_name: "logs".into(),
            collection_type: Some("   ".into()),
        };
        assert_eq!(mapping.declared_type(), None);
        assert_eq!(
            CollectionTypeMapping::typed("users", " models::User ").declared_type(),
            Some("models::User")
        );
    }

    #[test]
    fn test_reference_needs_exactly_one_location() {
        let reference = CrateReference {
            name: "models".into(),
            path: Some("../models".into()),
            version: Some("1".into()),
        };
        assert!(reference.validate().is_err());
        assert!(CrateReference::registry("models", "1.2").validate().is_ok());
    }

    #[test]
    fn test_selected_mappings_missing_database() {
        let props = ConnectionProperties {
            connection_string: "mongodb://localhost".into(),
            selected_database: "absent".into(),
            ..Default::default()
        };
        assert!(props.selected_mappings().is_empty());
    }

    #[test]
    fn test_resolve_relative_to() {
        let mut props = ConnectionProperties {
            references: vec![
                CrateReference::local("models", "models"),
                CrateReference::local("shared", "/opt/shared"),
                CrateReference::registry("chrono", "0.4"),
            ],
            ..Default::default()
        };
        props.resolve_relative_to(Path::new("/work"));
        assert_eq!(props.references[0].path.as_deref(), Some(Path::new("/work/models")));
        assert_eq!(props.references[1].path.as_deref(), Some(Path::new("/opt/shared")));
        assert_eq!(props.references[2].path, None);
    }
}
