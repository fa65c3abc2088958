//! Security checks applied to requests and to tool calls before they run.
//!
//! Provides:
//! - **Allow-list**: which registered tools a run may call
//! - **Guardrails**: argument scanning for secrets, dangerous commands,
//!   network/system calls in code, oversize payloads
//! - **Scope**: lexical path confinement to the scratch area
//! - **Redaction**: secret masking for logs and memory writes
//! - **Request policy**: blocked topics in the inbound message

pub mod allowlist;
pub mod guardrails;
pub mod redact;
pub mod request_policy;
pub mod scope;

pub use allowlist::ToolAllowlist;
pub use guardrails::{GuardrailViolation, Guardrails};
pub use redact::{redact_secrets, redact_value};
pub use request_policy::{Refusal, RequestPolicy};
pub use scope::{ScopeError, resolve_in_scope};
