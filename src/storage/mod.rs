pub mod file_index;
pub mod listing;
pub mod patterns;

pub use file_index::{FileIndex, IndexSnapshot, SearchResults, build_index};
pub use listing::{DirectoryEntry, EntrySize, ListingOptions, list_directory};
pub use patterns::{PatternList, compile_search, matches_at_start};
