//! Tool allow-list.
//!
//! An empty list or a list containing `"*"` allows every tool. Otherwise
//! only the named tools are allowed.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAllowlist {
    All,
    Only(BTreeSet<String>),
}

impl ToolAllowlist {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() || names.contains("*") {
            Self::All
        } else {
            Self::Only(names)
        }
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(tool_name),
        }
    }

    /// Human-readable reason for a denial.
    pub fn denial_reason(&self, tool_name: &str) -> String {
        match self {
            Self::All => format!("Tool '{tool_name}' is not available"),
            Self::Only(names) => format!(
                "Tool '{tool_name}' is not in the allow-list ({} tools allowed)",
                names.len()
            ),
        }
    }
}

impl Default for ToolAllowlist {
    fn default() -> Self {
        Self::All
    }
}
