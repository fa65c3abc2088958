//! Memory collaborators for runwarden.
//!
//! - [`InMemoryShortTerm`]: bounded per-session turn history
//! - [`InMemoryLongTerm`]: session-scoped facts with keyword retrieval
//! - [`NoopLongTerm`]: long-term memory switched off
//! - [`MemoryWritePolicy`]: decides which tool results become facts

pub mod long_term;
pub mod noop;
pub mod short_term;
pub mod write_policy;

pub use long_term::InMemoryLongTerm;
pub use noop::NoopLongTerm;
pub use short_term::InMemoryShortTerm;
pub use write_policy::MemoryWritePolicy;
