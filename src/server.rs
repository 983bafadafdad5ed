//! Webhook server: accepts relay posts and hands each email to a background
//! publish task.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::attachments::AttachmentFetcher;
use crate::config::Config;
use crate::error::{IntakeError, PublishError};
use crate::intake::{ParsedEmail, WebhookForm, parse_email};
use crate::post::Post;
use crate::publish::{PublishReport, Publisher};

/// Result of one background publish, as reported on the outcome channel.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub title: String,
    pub result: Result<PublishReport, PublishError>,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Arc<Publisher>,
    pub fetcher: Arc<AttachmentFetcher>,
    /// Receives every finished publish. None in production; logs are enough.
    pub outcomes: Option<mpsc::UnboundedSender<PublishOutcome>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, publisher: Arc<Publisher>, fetcher: Arc<AttachmentFetcher>) -> Self {
        Self {
            config,
            publisher,
            fetcher,
            outcomes: None,
        }
    }

    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<PublishOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }
}

/// Build the router with the webhook and health routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/publish", post(publish_webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mailpress"
    }))
}

// ── Webhook ─────────────────────────────────────────────────────────────

/// Webhook fields from either a urlencoded or a multipart body.
///
/// Relays send multipart when the message carried attachments; only the
/// named text fields are read and any file parts are skipped.
pub struct WebhookPayload(pub WebhookForm);

impl<S> FromRequest<S> for WebhookPayload
where
    S: Send + Sync,
{
    type Rejection = IntakeError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| IntakeError::MalformedForm(e.body_text()))?;
            read_multipart(multipart).await.map(Self)
        } else {
            let Form(form) = Form::<WebhookForm>::from_request(req, state)
                .await
                .map_err(|e| IntakeError::MalformedForm(e.body_text()))?;
            Ok(Self(form))
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<WebhookForm, IntakeError> {
    let mut form = WebhookForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IntakeError::MalformedForm(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let slot = match name.as_str() {
            "body-plain" => &mut form.body_plain,
            "sender" => &mut form.sender,
            "subject" => &mut form.subject,
            "attachments" => &mut form.attachments,
            _ => continue,
        };
        *slot = field
            .text()
            .await
            .map_err(|e| IntakeError::MalformedForm(e.body_text()))?;
    }
    Ok(form)
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

async fn publish_webhook(
    State(state): State<AppState>,
    payload: Result<WebhookPayload, IntakeError>,
) -> Response {
    let form = match payload {
        Ok(WebhookPayload(form)) => form,
        Err(err) => {
            warn!(error = %err, "Rejected webhook");
            return err.into_response();
        }
    };

    let email = match parse_email(&form, &state.config.authors) {
        Ok(email) => email,
        Err(err) => {
            warn!(sender = %form.sender, error = %err, "Rejected webhook");
            return err.into_response();
        }
    };

    info!(
        author = %email.author,
        title = %email.title,
        attachments = email.attachments.len(),
        "Email accepted"
    );
    spawn_publish(state, email, Utc::now());
    StatusCode::OK.into_response()
}

/// Publish an accepted email in the background.
///
/// The webhook has already answered by the time this runs, so failures only
/// reach the log and the outcome channel.
pub fn spawn_publish(state: AppState, email: ParsedEmail, timestamp: DateTime<Utc>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let title = email.title.clone();
        let result = run_publish(&state, email, timestamp).await;

        match &result {
            Ok(report) => info!(
                stamp = %report.stamp,
                path = %report.post_path,
                failed_attachments = report.failed_attachments().len(),
                "Background publish finished"
            ),
            Err(e) => warn!(title = %title, error = %e, "Background publish failed"),
        }

        if let Some(tx) = &state.outcomes {
            let _ = tx.send(PublishOutcome { title, result });
        }
    })
}

async fn run_publish(
    state: &AppState,
    mut email: ParsedEmail,
    timestamp: DateTime<Utc>,
) -> Result<PublishReport, PublishError> {
    let descriptors = std::mem::take(&mut email.attachments);
    let attachments = state.fetcher.fetch_all(&descriptors).await;
    let post = Post::from_email(email, attachments, timestamp);
    state.publisher.publish(&post).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, header};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::*;
    use crate::publish::Layout;
    use crate::store::MockStore;

    fn state(store: &MockStore) -> AppState {
        let config = crate::config::test_config();
        let publisher = Publisher::new(Arc::new(store.clone()), Layout::from_config(&config));
        let fetcher =
            AttachmentFetcher::new(SecretString::from("key-test"), Duration::from_secs(5)).unwrap();
        AppState::new(Arc::new(config), Arc::new(publisher), Arc::new(fetcher))
    }

    fn form_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/publish")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let app = routes(state(&MockStore::with_branch("main")));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["service"], "mailpress");
    }

    #[tokio::test]
    async fn unknown_sender_is_500_and_touches_nothing() {
        let store = MockStore::with_branch("main");
        let app = routes(state(&store));
        let response = app
            .oneshot(form_request("sender=mallory%40example.com&subject=Hi&body-plain=x"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Unknown Sender");
        tokio::task::yield_now().await;
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn wrong_content_type_is_malformed() {
        let app = routes(state(&MockStore::with_branch("main")));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/publish")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.starts_with("Malformed webhook form"));
    }

    fn multipart_request(fields: &[(&str, &str)]) -> Request<Body> {
        let boundary = "mailpress-boundary";
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"attachment-1\"; filename=\"cat.png\"\r\nContent-Type: image/png\r\n\r\nPNG\r\n"
        ));
        body.push_str(&format!("--{boundary}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/api/publish")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn multipart_webhook_is_accepted() {
        let store = MockStore::with_branch("main");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = routes(state(&store).with_outcomes(tx));

        let response = app
            .oneshot(multipart_request(&[
                ("sender", "ada@example.com"),
                ("subject", "[go] Hi"),
                ("body-plain", "x"),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.title, "Hi");
        let report = outcome.result.unwrap();
        let doc = String::from_utf8(store.file("main", &report.post_path).unwrap()).unwrap();
        assert!(doc.ends_with("}\nx"));
    }

    #[tokio::test]
    async fn multipart_unknown_sender_is_rejected() {
        let store = MockStore::with_branch("main");
        let app = routes(state(&store));
        let response = app
            .oneshot(multipart_request(&[("sender", "mallory@example.com"), ("subject", "Hi")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Unknown Sender");
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn accepted_email_is_published_in_background() {
        let store = MockStore::with_branch("main");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = routes(state(&store).with_outcomes(tx));

        let response = app
            .oneshot(form_request(
                "sender=ada%40example.com&subject=%5Bgo%5D+Hello&body-plain=Hi+there",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.title, "Hello");
        let report = outcome.result.unwrap();
        assert!(report.post_path.starts_with("content/posts/"));
        assert!(report.post_path.ends_with("-Hello.md"));
        assert!(store.file("main", &report.post_path).is_some());
    }
}
