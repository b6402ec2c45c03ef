//! Typed argument payloads for the known tool contracts.
//!
//! The LLM and the remote executor speak untyped JSON objects. Arguments are
//! parsed into [`ToolRequest`] as soon as they leave the model and turned back
//! into JSON only when they are posted to the executor.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolError;

pub const SQL_QUERY: &str = "sql_query";
pub const GITHUB_CREATE_ISSUE: &str = "github_create_issue";
pub const GITHUB_LIST_PULL_REQUESTS: &str = "github_list_pull_requests";
pub const GITHUB_GET_FILE: &str = "github_get_file";
pub const SLACK_POST: &str = "slack_post";
pub const CREATE_TASK: &str = "create_task";

/// The tool that records follow-up work. Its own failures never spawn a follow-up.
pub const FALLBACK_TOOL_NAME: &str = CREATE_TASK;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SqlQueryArgs {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GithubCreateIssueArgs {
    pub repo: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    All,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GithubListPullRequestsArgs {
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PullRequestState>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GithubGetFileArgs {
    pub repo: String,
    pub path: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlackPostArgs {
    pub channel: String,
    pub text: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskArgs {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolRequest {
    SqlQuery(SqlQueryArgs),
    GithubCreateIssue(GithubCreateIssueArgs),
    GithubListPullRequests(GithubListPullRequestsArgs),
    GithubGetFile(GithubGetFileArgs),
    SlackPost(SlackPostArgs),
    CreateTask(CreateTaskArgs),
}

impl ToolRequest {
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolError> {
        let request = match name {
            SQL_QUERY => Self::SqlQuery(decode(name, args)?),
            GITHUB_CREATE_ISSUE => Self::GithubCreateIssue(decode(name, args)?),
            GITHUB_LIST_PULL_REQUESTS => Self::GithubListPullRequests(decode(name, args)?),
            GITHUB_GET_FILE => Self::GithubGetFile(decode(name, args)?),
            SLACK_POST => Self::SlackPost(decode(name, args)?),
            CREATE_TASK => Self::CreateTask(decode(name, args)?),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SqlQuery(_) => SQL_QUERY,
            Self::GithubCreateIssue(_) => GITHUB_CREATE_ISSUE,
            Self::GithubListPullRequests(_) => GITHUB_LIST_PULL_REQUESTS,
            Self::GithubGetFile(_) => GITHUB_GET_FILE,
            Self::SlackPost(_) => SLACK_POST,
            Self::CreateTask(_) => CREATE_TASK,
        }
    }

    /// Untyped arguments for the executor wire.
    pub fn to_arguments(&self) -> Value {
        let value = match self {
            Self::SqlQuery(a) => serde_json::to_value(a),
            Self::GithubCreateIssue(a) => serde_json::to_value(a),
            Self::GithubListPullRequests(a) => serde_json::to_value(a),
            Self::GithubGetFile(a) => serde_json::to_value(a),
            Self::SlackPost(a) => serde_json::to_value(a),
            Self::CreateTask(a) => serde_json::to_value(a),
        };
        value.unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ToolError> {
        match self {
            Self::SqlQuery(a) => non_empty("query", &a.query),
            Self::GithubCreateIssue(a) => {
                repo_slug(&a.repo)?;
                non_empty("title", &a.title)
            }
            Self::GithubListPullRequests(a) => repo_slug(&a.repo),
            Self::GithubGetFile(a) => {
                repo_slug(&a.repo)?;
                non_empty("path", &a.path)
            }
            Self::SlackPost(a) => {
                non_empty("channel", &a.channel)?;
                non_empty("text", &a.text)
            }
            Self::CreateTask(a) => non_empty("title", &a.title),
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidArguments(format!("{name}: {e}")))
}

fn non_empty(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidArguments(format!("{field} must not be empty")));
    }
    Ok(())
}

fn repo_slug(repo: &str) -> Result<(), ToolError> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(())
        }
        _ => Err(ToolError::InvalidArguments(format!(
            "repo must be owner/name, got {repo:?}"
        ))),
    }
}
