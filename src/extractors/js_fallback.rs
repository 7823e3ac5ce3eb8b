//! Evaluation tier for signature transforms the token parser cannot digest.
//! Runs only the captured helper-object and driver source, never the whole
//! delivery script.

use anyhow::{anyhow, Result};
use rquickjs::{Context, Runtime};
use tracing::debug;

/// Captured transform source plus the global name to call.
#[derive(Debug, Clone)]
pub struct ScriptTransform {
    source: String,
    entry: String,
}

impl ScriptTransform {
    pub fn new(source: String, entry: String) -> Self {
        Self {
            // null bytes upset the engine; everything else is preserved
            source: source.replace('\0', ""),
            entry,
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Evaluates the captured source and calls the entry with `input`.
    pub fn run(&self, input: &str) -> Result<String> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;

        context.with(|ctx| {
            let _: rquickjs::Value = ctx.eval(self.source.as_bytes()).map_err(|e| {
                debug!("transform source failed to evaluate: {}", e);
                anyhow!("failed to evaluate transform source: {}", e)
            })?;

            let func: rquickjs::Function = ctx
                .globals()
                .get(self.entry.as_str())
                .map_err(|e| anyhow!("entry '{}' not defined: {}", self.entry, e))?;

            let output: String = func
                .call((input,))
                .map_err(|e| anyhow!("transform call failed: {}", e))?;

            debug!("script transform: {} -> {}", input, output);
            Ok(output)
        })
    }
}
