//! Tool registry and the seam tools implement.
//!
//! Tools run inside the tool round with exclusive access to the calling
//! dialog. Teammate-tellask names are never registered here — the tool
//! round intercepts them before lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use dk_domain::{CancelToken, Result, ToolDefinition, ToolOutput};

use crate::dialog::Dialog;
use crate::state::DriverState;

/// What a tool sees while it runs: the calling dialog (locked by the
/// drive), the driver services, and the drive's abort signal (tools may
/// honor it mid-flight).
pub struct ToolCtx<'a> {
    pub dialog: &'a mut Dialog,
    pub caller_agent_id: &'a str,
    pub state: &'a DriverState,
    pub abort: CancelToken,
}

#[async_trait]
pub trait FuncTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Shell-class tools are filtered out for members outside the team's
    /// shell-specialist list.
    fn is_shell(&self) -> bool {
        false
    }

    async fn call(&self, ctx: ToolCtx<'_>, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Name → tool lookup for the configured (non-intrinsic) tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn FuncTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn FuncTool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FuncTool>> {
        self.tools.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn FuncTool>> {
        let mut tools: Vec<_> = self.tools.values().cloned().collect();
        tools.sort_by_key(|t| t.definition().name);
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
