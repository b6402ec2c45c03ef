use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use juggernaut_engine::LoopController;
use juggernaut_settings::ServerSettings;

use crate::handlers;
use crate::sessions::ActiveSessions;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: LoopController,
    pub sessions: Arc<ActiveSessions>,
}

impl AppState {
    pub fn new(controller: LoopController) -> Self {
        Self {
            controller,
            sessions: Arc::new(ActiveSessions::new()),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::cancel_session),
        )
        .route("/sessions/{id}/messages", get(handlers::session_messages))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let sessions = state.sessions.clone();
    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "juggernaut server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        sessions,
        shutdown,
        server,
    })
}

/// Handle returned by [`start`]; keeps the server task alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    sessions: Arc<ActiveSessions>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Cancel running sessions, stop accepting connections and wait for the server task.
    pub async fn shutdown(self) {
        let cancelled = self.sessions.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled running sessions for shutdown");
        }
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not finish cleanly");
        }
    }

    /// Wait until the server task exits.
    pub async fn wait(self) {
        let _ = self.server.await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use juggernaut_core::ids::SessionId;
    use juggernaut_engine::{ControllerConfig, SessionServices, ToolRegistry};
    use juggernaut_llm::{MockProvider, MockResponse};
    use juggernaut_store::Database;

    use super::*;
    use crate::handlers::SESSION_ID_HEADER;

    fn controller(provider: MockProvider, services: SessionServices) -> LoopController {
        LoopController::new(
            Arc::new(provider),
            Arc::new(ToolRegistry::new()),
            services,
            ControllerConfig::default(),
        )
    }

    async fn serve(controller: LoopController) -> ServerHandle {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        start(config, AppState::new(controller)).await.unwrap()
    }

    fn url(handle: &ServerHandle, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", handle.port)
    }

    /// `event:` names in order of appearance.
    fn event_names(body: &str) -> Vec<&str> {
        body.lines()
            .filter_map(|line| line.strip_prefix("event: ").or_else(|| line.strip_prefix("event:")))
            .collect()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = serve(controller(
            MockProvider::new(vec![]),
            SessionServices::in_memory(),
        ))
        .await;
        assert!(handle.port > 0);

        let resp = reqwest::get(url(&handle, "/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["activeSessions"], 0);
        assert_eq!(body["persistence"], false);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn post_session_streams_events_until_done() {
        let handle = serve(controller(
            MockProvider::new(vec![MockResponse::stream_text("Hello")]),
            SessionServices::in_memory(),
        ))
        .await;

        let resp = reqwest::Client::new()
            .post(url(&handle, "/sessions"))
            .json(&serde_json::json!({"prompt": "say hello", "mode": "ops"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        assert!(resp.headers().contains_key(SESSION_ID_HEADER));

        let body = resp.text().await.unwrap();
        let names = event_names(&body);
        assert_eq!(names.first(), Some(&"session"));
        assert_eq!(names.last(), Some(&"done"));
        assert!(names.contains(&"token"));
        assert!(body.contains(r#""final_answer":"Hello""#));
    }

    #[tokio::test]
    async fn invalid_body_is_rejected() {
        let handle = serve(controller(
            MockProvider::new(vec![]),
            SessionServices::in_memory(),
        ))
        .await;
        let resp = reqwest::Client::new()
            .post(url(&handle, "/sessions"))
            .json(&serde_json::json!({"prompt": ""}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn delete_cancels_a_running_session() {
        let handle = serve(controller(
            MockProvider::always(MockResponse::delayed(
                Duration::from_secs(60),
                MockResponse::stream_text("late"),
            )),
            SessionServices::in_memory(),
        ))
        .await;
        let client = reqwest::Client::new();

        let resp = client
            .post(url(&handle, "/sessions"))
            .json(&serde_json::json!({"prompt": "wait"}))
            .send()
            .await
            .unwrap();
        let id = resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();

        let cancel = client
            .delete(url(&handle, &format!("/sessions/{id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(cancel.status(), 202);

        let body = tokio::time::timeout(Duration::from_secs(10), resp.text())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event_names(&body).last(), Some(&"done"));
        assert!(body.contains("CANCELLED"));
    }

    #[tokio::test]
    async fn delete_unknown_session_is_404() {
        let handle = serve(controller(
            MockProvider::new(vec![]),
            SessionServices::in_memory(),
        ))
        .await;
        let resp = reqwest::Client::new()
            .delete(url(&handle, &format!("/sessions/{}", SessionId::new())))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn message_log_is_readable_after_the_session() {
        let db = Database::in_memory().unwrap();
        let handle = serve(controller(
            MockProvider::new(vec![MockResponse::stream_text("Hi")]),
            SessionServices::with_database(db),
        ))
        .await;
        let client = reqwest::Client::new();

        let resp = client
            .post(url(&handle, "/sessions"))
            .json(&serde_json::json!({"prompt": "hi"}))
            .send()
            .await
            .unwrap();
        let id = resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
        resp.text().await.unwrap();

        let log: serde_json::Value = client
            .get(url(&handle, &format!("/sessions/{id}/messages")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let messages = log["messages"].as_array().unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);

        let session: serde_json::Value = client
            .get(url(&handle, &format!("/sessions/{id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["session"]["status"], "completed");
        assert_eq!(session["session"]["final_answer"], "Hi");

        let missing = client
            .get(url(&handle, &format!("/sessions/{}/messages", SessionId::new())))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn messages_without_persistence_is_503() {
        let handle = serve(controller(
            MockProvider::new(vec![]),
            SessionServices::in_memory(),
        ))
        .await;
        let resp = reqwest::get(url(&handle, "/sessions/sess_x/messages")).await.unwrap();
        assert_eq!(resp.status(), 503);
    }
}
