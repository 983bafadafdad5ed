//! Attachment fetcher: downloads image attachments from the relay's storage.
//!
//! Losing an attachment never fails a publish. Every skip is logged and the
//! remaining attachments are still fetched.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AttachmentError;
use crate::intake::AttachmentDescriptor;

/// Content types that are published. Everything else is skipped.
pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/png", "image/jpg", "image/jpeg", "image/gif"];

/// Basic-auth user name the relay expects alongside the API key.
const BASIC_AUTH_USER: &str = "api";

/// Whether an attachment with this content type is published.
pub fn is_allowed(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

/// Authenticated client for the relay's attachment storage.
pub struct AttachmentFetcher {
    client: Client,
    api_key: SecretString,
}

impl std::fmt::Debug for AttachmentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentFetcher").finish_non_exhaustive()
    }
}

impl AttachmentFetcher {
    pub fn new(api_key: SecretString, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_key })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(config.mailgun_token.clone(), config.timeout)
    }

    /// Fetch one attachment's bytes.
    pub async fn fetch_one(
        &self,
        descriptor: &AttachmentDescriptor,
    ) -> Result<Vec<u8>, AttachmentError> {
        let name = &descriptor.name;

        if !is_allowed(&descriptor.content_type) {
            return Err(AttachmentError::UnsupportedType {
                name: name.clone(),
                content_type: descriptor.content_type.clone(),
            });
        }

        let request = self
            .client
            .get(&descriptor.url)
            .basic_auth(BASIC_AUTH_USER, Some(self.api_key.expose_secret()))
            .build()
            .map_err(|e| AttachmentError::Request {
                name: name.clone(),
                reason: format!("failed to build request: {e}"),
            })?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| AttachmentError::Request {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(AttachmentError::Status {
                name: name.clone(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| AttachmentError::Body {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        debug!(name = %name, bytes = bytes.len(), "Fetched attachment");
        Ok(bytes.to_vec())
    }

    /// Fetch every allowed attachment concurrently, keyed by filename.
    ///
    /// Failed or disallowed attachments are left out. If two attachments
    /// share a name, the later one in `descriptors` wins.
    pub async fn fetch_all(&self, descriptors: &[AttachmentDescriptor]) -> HashMap<String, Vec<u8>> {
        let results = join_all(descriptors.iter().map(|d| self.fetch_one(d))).await;

        let mut fetched = HashMap::new();
        for (descriptor, result) in descriptors.iter().zip(results) {
            match result {
                Ok(bytes) => {
                    fetched.insert(descriptor.name.clone(), bytes);
                }
                Err(e) => warn!(error = %e, "Skipping attachment"),
            }
        }

        if !descriptors.is_empty() {
            info!(
                requested = descriptors.len(),
                fetched = fetched.len(),
                "Attachments fetched"
            );
        }
        fetched
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{basic_auth, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher() -> AttachmentFetcher {
        AttachmentFetcher::new(SecretString::from("key-test"), Duration::from_secs(5)).unwrap()
    }

    fn descriptor(server: &MockServer, id: &str, content_type: &str, name: &str) -> AttachmentDescriptor {
        AttachmentDescriptor {
            url: format!("{}/attachments/{id}", server.uri()),
            content_type: content_type.into(),
            name: name.into(),
            size: 3,
        }
    }

    #[test]
    fn allow_list() {
        assert!(is_allowed("image/png"));
        assert!(is_allowed("image/jpg"));
        assert!(is_allowed("image/jpeg"));
        assert!(is_allowed("image/gif"));
        assert!(!is_allowed("image/webp"));
        assert!(!is_allowed("application/pdf"));
        assert!(!is_allowed("IMAGE/PNG"));
    }

    #[tokio::test]
    async fn fetches_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/1"))
            .and(basic_auth("api", "key-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;

        let bytes = fetcher()
            .fetch_one(&descriptor(&server, "1", "image/png", "a.png"))
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn disallowed_type_is_never_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_one(&descriptor(&server, "1", "application/pdf", "cv.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn non_200_status_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_one(&descriptor(&server, "1", "image/gif", "a.gif"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn other_success_codes_are_skipped_too() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8]))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_one(&descriptor(&server, "1", "image/gif", "a.gif"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Status { status: 206, .. }));
    }

    #[tokio::test]
    async fn invalid_url_is_a_request_error() {
        let err = fetcher()
            .fetch_one(&AttachmentDescriptor {
                url: "not a url".into(),
                content_type: "image/png".into(),
                name: "a.png".into(),
                size: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Request { .. }));
    }

    #[tokio::test]
    async fn fetch_all_keeps_only_successes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/attachments/gone"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let descriptors = vec![
            descriptor(&server, "ok", "image/png", "cat.png"),
            descriptor(&server, "gone", "image/jpeg", "dog.jpg"),
            descriptor(&server, "ok", "text/plain", "notes.txt"),
        ];
        let fetched = fetcher().fetch_all(&descriptors).await;

        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched["cat.png"], b"png".to_vec());
    }

    #[tokio::test]
    async fn fetch_all_requests_concurrently() {
        let delay = Duration::from_millis(400);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"gif".to_vec())
                    .set_delay(delay),
            )
            .expect(4)
            .mount(&server)
            .await;

        let descriptors: Vec<_> = (0..4)
            .map(|i| descriptor(&server, &i.to_string(), "image/gif", &format!("{i}.gif")))
            .collect();

        let started = std::time::Instant::now();
        let fetched = fetcher().fetch_all(&descriptors).await;
        let elapsed = started.elapsed();

        assert_eq!(fetched.len(), 4);
        // One at a time would take at least four delays.
        assert!(elapsed >= delay);
        assert!(elapsed < delay * 3, "took {elapsed:?}");
    }

    #[tokio::test]
    async fn fetch_all_of_nothing_is_empty() {
        assert!(fetcher().fetch_all(&[]).await.is_empty());
    }
}
