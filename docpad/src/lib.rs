pub mod collection;
pub mod document;
pub mod error;
pub mod hash;
pub mod interceptor;
pub mod mapping;
pub mod store;

pub use collection::{Entity, TypedCollection};
pub use document::Document;
pub use error::{Diagnostic, DriverError, Result, Severity};
pub use hash::{deep_hash, Fingerprint, UnorderedSet};
pub use interceptor::{Identifier, Interceptor, Tracked, TrackingState};
pub use mapping::{CollectionTypeMapping, ConnectionProperties, CrateReference};
pub use store::{MemoryStore, StoreConnection};
