//! The two read-only queries over pipeline state.

pub mod get_source_stats;
pub mod list_objects_by_state;

pub use get_source_stats::{GetSourceStats, GetSourceStatsOutput};
pub use list_objects_by_state::{
    ListObjectsByState, ListObjectsByStateItem, ListObjectsByStateOutput,
};
