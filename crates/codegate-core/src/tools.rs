//! Tool table — the capability surface handed to a snippet

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named async function a snippet may call as `tools.<name>(...)`
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Invoke the tool with the snippet's positional arguments
    async fn call(&self, args: Vec<Value>) -> Result<Value>;
}

/// Adapter turning an async closure into a [`ToolHandler`]
pub struct FnTool<F> {
    name: String,
    description: String,
    f: F,
}

impl<F> FnTool<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            f,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value> {
        (self.f)(args).await
    }
}

/// Mapping from unique tool name to handler.
///
/// Cloning is cheap; handlers are shared. The gateway only reads it.
#[derive(Clone, Default)]
pub struct ToolTable {
    tools: HashMap<Arc<str>, Arc<dyn ToolHandler>>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any existing tool of the same name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name: Arc<str> = Arc::from(handler.name());
        debug!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    pub fn with(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Register an async closure under `name`
    pub fn with_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.with(Arc::new(FnTool::new(name, f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().map(|n| n.to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Forward a call to the named tool
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        debug!("Calling tool: {} with {} args", name, args.len());

        let handler = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", name))?;

        match handler.call(args).await {
            Ok(value) => {
                debug!("Tool {} succeeded", name);
                Ok(value)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                Err(e)
            }
        }
    }
}
