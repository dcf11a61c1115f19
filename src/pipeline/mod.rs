//! Post-extraction stages: normalize, dedupe, score, transform, and the
//! runner that drives a whole crawl through them.

mod dedup;
mod normalize;
mod quality;
mod runner;
mod transform;

pub use dedup::{DedupConfig, DedupReport, Deduplicator};
pub use normalize::{
    content_hash, listing_id, normalize_key, parse_count, parse_count_near, parse_price, Count, Normalized, Normalizer, ParsedPrice,
    ValidationBounds, MAX_ROOMS,
};
pub use quality::{QualityScorer, QualityWeights};
pub use runner::{CrawlRunner, RunOutput};
pub use transform::{
    classify_category, classify_listing_type, Category, EnterpriseDocument, ListingType, SchemaTransformer, Tag,
    TransformConfig,
};
