use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use notify_common::event::ProductCreated;
use notify_common::message::ReceivedMessage;
use reqwest::header;
use tracing::debug;

use crate::error::ProcessingError;

/// Domain logic invoked once per message. Implementations may perform
/// network I/O; the pipeline only sees their errors through the taxonomy
/// in [`ProcessingError`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn process(
        &self,
        event: &ProductCreated,
        message: &ReceivedMessage,
    ) -> Result<(), ProcessingError>;
}

/// Calls the downstream notification service over HTTP.
pub struct HttpNotificationHandler {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationHandler {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("notify-consumer")
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventHandler for HttpNotificationHandler {
    async fn process(
        &self,
        event: &ProductCreated,
        _message: &ReceivedMessage,
    ) -> Result<(), ProcessingError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(
                status = status.as_u16(),
                product_id = %event.product_id,
                "Received response from notification service"
            );
            return Ok(());
        }

        if is_unavailable_status(status) {
            Err(ProcessingError::Unavailable {
                status: status.as_u16(),
            })
        } else {
            Err(ProcessingError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

fn map_request_error(error: reqwest::Error) -> ProcessingError {
    if error.is_timeout() {
        ProcessingError::Timeout
    } else if error.is_connect() {
        ProcessingError::Connection(error.to_string())
    } else {
        ProcessingError::Other(error.to_string())
    }
}

/// Statuses that signal the downstream will recover on its own: back off
/// and try again. Everything else is a permanent rejection.
fn is_unavailable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::SERVICE_UNAVAILABLE
        || status == StatusCode::GATEWAY_TIMEOUT
}
