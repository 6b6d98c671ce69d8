#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Generation pipeline that drives the instance factory through bounded
//! attempts and validates each candidate instance.
//!
//! A [`GenerationJob`] never blocks: every call to [`GenerationJob::advance`]
//! performs one bounded unit of work, so the scheduler can interleave jobs
//! with session ticks.

mod job;
mod seed;
mod validation;

pub use job::{
    GenerationJob, GenerationSettings, JobStep, PreparedInstance, Variant, STAGED_SEARCH_LIMIT,
};
pub use seed::{attempt_rng, derive_attempt_seed, STREAM_CENTER, STREAM_PLACEMENT, STREAM_TERRAIN};
pub use validation::{
    check_terrain, find_center_site, locate, terrain_sample_budget, validate_features,
    validate_located, TerrainVerdict,
};
