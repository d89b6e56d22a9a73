//! Event and observable-list primitives
//!
//! The change-notification substrate used throughout the Helio model:
//! [`Event`] is a multicast notification with explicitly closeable listeners,
//! [`ObservableList`] is an ordered list that reports insertions and removals.

pub mod event;
pub mod list;

pub use event::{Event, EventListener};
pub use list::ObservableList;
