//! GitHub tools. All three are forwarded to the executor, which holds the token.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use juggernaut_core::requests::{
    ToolRequest, GITHUB_CREATE_ISSUE, GITHUB_GET_FILE, GITHUB_LIST_PULL_REQUESTS,
};
use juggernaut_core::tools::{Tool, ToolContext, ToolError, ToolOutcome};

use super::remote::{forward, ToolExecutor};

pub struct GithubCreateIssueTool {
    executor: Arc<dyn ToolExecutor>,
}

impl GithubCreateIssueTool {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for GithubCreateIssueTool {
    fn name(&self) -> &str {
        GITHUB_CREATE_ISSUE
    }

    fn description(&self) -> &str {
        "Open an issue in a GitHub repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["repo", "title"],
            "properties": {
                "repo": {"type": "string", "description": "owner/name"},
                "title": {"type": "string"},
                "body": {"type": "string"},
                "labels": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let request = ToolRequest::parse(GITHUB_CREATE_ISSUE, &args)?;
        forward(self.executor.as_ref(), request, ctx).await
    }
}

pub struct GithubListPullRequestsTool {
    executor: Arc<dyn ToolExecutor>,
}

impl GithubListPullRequestsTool {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for GithubListPullRequestsTool {
    fn name(&self) -> &str {
        GITHUB_LIST_PULL_REQUESTS
    }

    fn description(&self) -> &str {
        "List pull requests of a GitHub repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["repo"],
            "properties": {
                "repo": {"type": "string", "description": "owner/name"},
                "state": {"type": "string", "enum": ["open", "closed", "all"]}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let request = ToolRequest::parse(GITHUB_LIST_PULL_REQUESTS, &args)?;
        forward(self.executor.as_ref(), request, ctx).await
    }
}

pub struct GithubGetFileTool {
    executor: Arc<dyn ToolExecutor>,
}

impl GithubGetFileTool {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for GithubGetFileTool {
    fn name(&self) -> &str {
        GITHUB_GET_FILE
    }

    fn description(&self) -> &str {
        "Read one file from a GitHub repository at an optional ref"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["repo", "path"],
            "properties": {
                "repo": {"type": "string", "description": "owner/name"},
                "path": {"type": "string"},
                "ref": {"type": "string", "description": "Branch, tag or commit; default branch when omitted"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
        let request = ToolRequest::parse(GITHUB_GET_FILE, &args)?;
        forward(self.executor.as_ref(), request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::remote::testing::ScriptedExecutor;
    use crate::tools::testing::test_ctx;

    #[tokio::test]
    async fn invalid_repo_is_rejected_locally() {
        let executor = Arc::new(ScriptedExecutor::default());
        let tool = GithubListPullRequestsTool::new(executor.clone());
        let err = tool.execute(json!({"repo": "acme"}), &test_ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(executor.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn get_file_forwards_ref() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ToolOutcome::success("fn main() {}"))]));
        let tool = GithubGetFileTool::new(executor.clone());
        let args = json!({"repo": "acme/api", "path": "src/main.rs", "ref": "v2"});
        let outcome = tool.execute(args.clone(), &test_ctx()).await.unwrap();
        assert_eq!(outcome.content_text(), "fn main() {}");
        assert_eq!(executor.requests.lock()[0].to_arguments(), args);
    }

    #[tokio::test]
    async fn executor_failure_passes_through() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ToolOutcome::failure("Validation Failed"))]));
        let tool = GithubCreateIssueTool::new(executor);
        let outcome = tool
            .execute(json!({"repo": "acme/api", "title": "flaky test"}), &test_ctx())
            .await
            .unwrap();
        assert_eq!(outcome.error(), Some("Validation Failed"));
    }
}
