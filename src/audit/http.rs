// Audit observer posting events to a remote endpoint

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AuditError, AuditEvent, Observer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// POSTs each event as JSON. A non-2xx answer is logged, not returned.
pub struct HttpObserver {
    url: String,
    client: reqwest::Client,
}

impl HttpObserver {
    pub fn new(url: impl Into<String>) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(HttpObserver {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Observer for HttpObserver {
    fn name(&self) -> &str {
        "http"
    }

    async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(url = %self.url, status = status.as_u16(), ts = event.ts, "Audit event delivered");
        } else {
            warn!(url = %self.url, status = status.as_u16(), "Audit endpoint returned non-success status");
        }
        Ok(())
    }
}
