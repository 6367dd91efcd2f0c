use super::types::ConnectionProperties;
use crate::error::Result;
use std::path::Path;

/// Parse a connection properties YAML file into validated ConnectionProperties
/// Relative reference paths are resolved against the file's directory.
pub fn parse_properties(path: &Path) -> Result<ConnectionProperties> {
    let content = std::fs::read_to_string(path)?;
    let mut properties = parse_properties_str(&content)?;
    if let Some(base) = path.parent() {
        properties.resolve_relative_to(base);
    }
    Ok(properties)
}

/// Parse a connection properties YAML string into validated ConnectionProperties
pub fn parse_properties_str(content: &str) -> Result<ConnectionProperties> {
    let properties: ConnectionProperties = serde_yaml::from_str(content)?;
    properties.validate()?;
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::mapping::CollectionTypeMapping;
    use pretty_assertions::assert_eq;

    const PROPERTIES: &str = r#"
connection_string: mongodb://localhost:27017
selected_database: db
collection_type_mappings:
  db:
    - collection_name: collection
      collection_type: models::StringEntity
    - collection_name: untyped
references:
  - name: models
    path: ../models
"#;

    #[test]
    fn test_parse_properties_str() {
        let props = parse_properties_str(PROPERTIES).unwrap();
        assert_eq!(props.connection_string, "mongodb://localhost:27017");
        assert_eq!(props.selected_database, "db");

        assert_eq!(
            props.selected_mappings(),
            &[
                CollectionTypeMapping::typed("collection", "models::StringEntity"),
                CollectionTypeMapping::untyped("untyped"),
            ][..]
        );

        assert_eq!(props.references.len(), 1);
        assert_eq!(props.references[0].name, "models");
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let yaml = r#"
connection_string: mongodb://localhost
selected_database: db
collection_type_mappings:
  db:
    - collection_name: users
    - collection_name: users
      collection_type: models::User
"#;
        let err = parse_properties_str(yaml).unwrap_err();
        assert!(matches!(err, DriverError::InvalidMapping(_)), "got {err:?}");
    }

    #[test]
    fn test_parse_properties_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.yaml");
        std::fs::write(&path, PROPERTIES).unwrap();

        let props = parse_properties(&path).unwrap();
        assert_eq!(props.selected_mappings().len(), 2);
        assert_eq!(
            props.references[0].path.as_deref(),
            Some(dir.path().join("../models").as_path())
        );
    }
}
