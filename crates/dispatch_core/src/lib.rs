pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod eta;
pub mod events;
pub mod geo;
pub mod index;
pub mod ingestion;
pub mod matching;
pub mod persistence;
pub mod query;
pub mod rematch;
pub mod rides;
pub mod telemetry;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;
pub mod types;
