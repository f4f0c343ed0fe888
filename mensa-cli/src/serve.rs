//! Minimal static server publishing one feed file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::fs;
use tracing::{info, warn};

fn router(file: PathBuf) -> Router {
    Router::new()
        .route("/full.xml", get(full_feed))
        .with_state(Arc::new(file))
}

/// The file is read on every request so a concurrent update is picked up.
async fn full_feed(State(file): State<Arc<PathBuf>>) -> Response {
    match fs::read(file.as_path()).await {
        Ok(body) => ([(CONTENT_TYPE, "text/xml")], body).into_response(),
        Err(error) => {
            warn!(file = %file.display(), %error, "feed file unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Serve `file` at `/full.xml` until the process is stopped.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub(crate) async fn run(addr: SocketAddr, file: PathBuf) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, file = %file.display(), "serving");
    axum::serve(listener, router(file)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    async fn request(app: Router, path: &str) -> Response {
        app.oneshot(Request::get(path).body(Body::empty()).expect("valid request"))
            .await
            .expect("infallible router")
    }

    #[tokio::test]
    async fn serves_feed_as_xml() {
        let dir = TempDir::new().expect("temp dir");
        let file = dir.path().join("full.xml");
        std::fs::write(&file, "<openmensa/>").expect("feed written");

        let response = request(router(file), "/full.xml").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("text/xml")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body read");
        assert_eq!(body.as_ref(), b"<openmensa/>");
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let app = router(dir.path().join("full.xml"));
        assert_eq!(request(app.clone(), "/index.html").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(request(app, "/full.xml").await.status(), StatusCode::NOT_FOUND);
    }
}
