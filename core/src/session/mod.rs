//! SessionCoordinator (spec.md §4.5) and its two capability boundaries:
//! `AgentAdapter` and `PathResolver` (spec.md §1, §9).

mod adapter;
mod coordinator;
mod path_resolver;

pub use adapter::{AdapterError, AgentAdapter, NoopAgentAdapter};
pub use coordinator::{SessionCoordinator, Spec, DEFAULT_POLL_INTERVAL};
pub use path_resolver::{PathResolver, PathResolverError, StaticPathResolver};
