mod key;
mod store;

pub use key::{Content, EventKey, KeyParseError};
pub use store::{AggregateStore, Counters, Snapshot};
