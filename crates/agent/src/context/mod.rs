//! Context assembly for model calls.
//!
//! | Layer | Source | Trim strategy |
//! |-------|--------|---------------|
//! | System | Agent config and run budget | Never trimmed |
//! | Retrieved notes | Long-term memory | Least relevant dropped |
//! | History | Short-term memory | Oldest turns dropped |
//! | Observations | Latest tool results | Never trimmed |

pub mod assembler;
pub mod prompt;
pub mod token;

pub use assembler::{
    AssembledContext, AssemblyInput, AssemblyMetadata, ContextAssembler, DropInfo, LayerStats,
    TokenBudget,
};
pub use prompt::CLARIFY_MARKER;
