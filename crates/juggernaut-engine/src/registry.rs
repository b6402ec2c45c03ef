use std::collections::BTreeMap;
use std::sync::Arc;

use juggernaut_core::tools::{Tool, ToolDefinition};

/// Where a registered tool runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolSource {
    /// In-process.
    Local,
    /// Forwarded to the remote tool executor.
    Remote,
}

/// The tools offered to the model, keyed by name. Iteration order is by name, so the
/// schema sent with every request is stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, (Arc<dyn Tool>, ToolSource)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>, source: ToolSource) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), (tool, source)).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|(tool, _)| Arc::clone(tool))
    }

    pub fn source(&self, name: &str) -> Option<ToolSource> {
        self.tools.get(name).map(|(_, source)| *source)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|(tool, _)| tool.to_definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use juggernaut_core::tools::{ToolContext, ToolError, ToolOutcome};
    use serde_json::{json, Value};

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::success("ok"))
        }
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(Named("sql_query")), ToolSource::Remote);

        assert!(registry.get("sql_query").is_some());
        assert!(registry.get("slack_post").is_none());
        assert_eq!(registry.source("sql_query"), Some(ToolSource::Remote));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definitions_follow_name_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("slack_post")), ToolSource::Remote);
        registry.register(Arc::new(Named("create_task")), ToolSource::Local);
        registry.register(Arc::new(Named("sql_query")), ToolSource::Remote);

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["create_task", "slack_post", "sql_query"]);
    }

    #[test]
    fn re_registering_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("create_task")), ToolSource::Remote);
        registry.register(Arc::new(Named("create_task")), ToolSource::Local);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.source("create_task"), Some(ToolSource::Local));
    }
}
