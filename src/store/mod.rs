//! Bar store module
//!
//! Symbol-exact historical bar retrieval from a partitioned file archive.
//! A symbol that is not in the archive is always an error; no other symbol's
//! data is ever substituted.

mod archive;
pub mod layout;
mod parse;
mod types;

pub use archive::BarStore;
pub use parse::{
    parse_date, parse_partition, sniff_delimiter, DateOrder, DateOrderResolver,
    FirstComponentHeuristic, ParseOptions, ParsedPartition,
};
pub use types::{Bar, CacheStats, StoreError};
