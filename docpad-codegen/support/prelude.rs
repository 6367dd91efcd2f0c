// Runtime items every generated access layer builds on.

pub use ::docpad::{
    Document, Entity, Fingerprint, Identifier, StoreConnection, Tracked, TrackingState,
    TypedCollection,
};

/// Change-tracking interceptor, generic over the collection element type.
///
/// `Interceptor::<T>::get_id`, `deep_hash` and `has_changed` are callable
/// without an instance.
pub type Interceptor<T> = ::docpad::Interceptor<T>;
