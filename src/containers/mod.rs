//! Core data containers: typed columns, role-grouped tables, the match
//! buffer, and the small index structures the tree fit leans on.

pub mod category_index;
pub mod column;
pub mod dataframe;
pub mod encoding;
pub mod index;
pub mod int_set;
pub mod matches;

pub use category_index::CategoryIndex;
pub use column::{Column, COMPARISON_ONLY};
pub use dataframe::DataFrame;
pub use encoding::{Encoding, NOT_KNOWN};
pub use index::JoinKeyIndex;
pub use int_set::IntSet;
pub use matches::{Match, MatchMaker};
