pub mod create_task;
pub mod github;
pub mod remote;
pub mod slack_post;
pub mod sql_query;

use std::sync::Arc;

use crate::fallback::FallbackSink;
use crate::registry::{ToolRegistry, ToolSource};

pub use remote::{RemoteToolExecutor, ToolExecutor};

/// Create a ToolRegistry with every known tool.
pub fn create_default_registry(
    executor: Arc<dyn ToolExecutor>,
    fallback: Arc<dyn FallbackSink>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Data
    registry.register(
        Arc::new(sql_query::SqlQueryTool::new(Arc::clone(&executor))),
        ToolSource::Remote,
    );

    // GitHub
    registry.register(
        Arc::new(github::GithubCreateIssueTool::new(Arc::clone(&executor))),
        ToolSource::Remote,
    );
    registry.register(
        Arc::new(github::GithubListPullRequestsTool::new(Arc::clone(&executor))),
        ToolSource::Remote,
    );
    registry.register(
        Arc::new(github::GithubGetFileTool::new(Arc::clone(&executor))),
        ToolSource::Remote,
    );

    // Messaging
    registry.register(
        Arc::new(slack_post::SlackPostTool::new(executor)),
        ToolSource::Remote,
    );

    // Follow-ups
    registry.register(
        Arc::new(create_task::CreateTaskTool::new(fallback)),
        ToolSource::Local,
    );

    registry
}
