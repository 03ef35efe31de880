use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::discovery::panic_message;
use super::{Tool, ToolOutput};

/// A registered tool as the agent runtime sees it.
///
/// Carries the runtime-visible metadata and forwards calls to the tool.
/// Whatever happens inside the tool, [`invoke`](Self::invoke) returns a
/// [`ToolOutput`].
#[derive(Clone)]
pub struct RuntimeTool {
    tool: Arc<dyn Tool>,
}

impl RuntimeTool {
    pub(crate) fn new(tool: Arc<dyn Tool>) -> Self {
        Self { tool }
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn description(&self) -> &str {
        self.tool.description()
    }

    /// JSON schema of the arguments, passed to the model as function parameters
    pub fn parameters(&self) -> Value {
        self.tool.schema()
    }

    /// Run the tool with `args`, converting errors and panics into a failed output
    pub async fn invoke(&self, args: Value) -> ToolOutput {
        let name = self.tool.name();
        let call = AssertUnwindSafe(self.tool.execute(args)).catch_unwind();

        match call.await {
            Ok(Ok(payload)) => {
                debug!(tool = name, kind = payload.kind(), "tool succeeded");
                ToolOutput::success(payload)
            }
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, error_type = e.kind(), "tool failed");
                ToolOutput::from_error(&e)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = name, panic = %message, "tool panicked");
                ToolOutput::failure(format!("tool '{}' crashed: {}", name, message), "panic")
            }
        }
    }
}

impl std::fmt::Debug for RuntimeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeTool")
            .field("name", &self.name())
            .finish()
    }
}
