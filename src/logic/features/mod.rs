//! Features Module - input contract with the extraction side
//!
//! - `layout.rs` - named, versioned feature layout
//! - `vector.rs` - FeatureVector and its validation
//! - `cache.rs` - last frame per stream, to skip duplicate inference

pub mod layout;
pub mod vector;
pub mod cache;

pub use layout::{FeatureLayout, HAND_FEATURE_COUNT, HAND_FEATURE_LAYOUT};
pub use vector::FeatureVector;
pub use cache::{CachedFrame, EvictionPolicy, FeatureCache, CacheStats};
