mod parser;
mod types;

pub use parser::{parse_properties, parse_properties_str};
pub use types::{CollectionTypeMapping, ConnectionProperties, CrateReference};
