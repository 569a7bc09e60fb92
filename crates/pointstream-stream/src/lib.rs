//! Streaming core of pointstream.
//!
//! A [`Traverser`] ticks a [`TraversalEngine`] on its own thread: each tick
//! ranks the octree against the current [`ViewState`], issues load requests to
//! a [`LoadQueue`] (normally the [`NodeLoader`] pool), reclaims payloads from
//! the shared [`LruCache`], and publishes a render/delete [`QueuePair`] through
//! a [`QueueExchange`] that the render thread swaps in once per frame.

pub mod cache;
pub mod config;
pub mod counters;
pub mod engine;
pub mod exchange;
pub mod loader;
pub mod priority;
pub mod traverser;
pub mod view;

#[cfg(test)]
mod testing;

pub use cache::LruCache;
pub use config::{StreamingConfig, TraversalSettings, TraversalSettingsCell};
pub use counters::{LoadCounters, LoaderStats};
pub use engine::{TickReport, TraversalEngine};
pub use exchange::{QueueExchange, QueuePair};
pub use loader::{LoadQueue, NodeLoader};
pub use priority::{Candidate, DefaultPriority, NodePriority, PriorityInput};
pub use traverser::{TickSummary, Traverser};
pub use view::ViewState;
