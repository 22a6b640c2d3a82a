use crate::core::error::Result;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::time::Duration;

/// Checks whether the agent behind a forwarded port is serving requests.
pub trait ReadinessProbe: Send + Sync {
    /// One probe of the agent on local `port`. `Ok(false)` means "not yet".
    fn is_ready(&self, port: u16) -> Result<bool>;
}

/// GETs the agent's status endpoint; only a 200 counts as ready.
pub struct HttpStatusProbe {
    client: Client,
    host: String,
    path: String,
}

impl HttpStatusProbe {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            host: "127.0.0.1".to_string(),
            path: path.into(),
        })
    }

    pub fn url(&self, port: u16) -> String {
        let path = self.path.trim_start_matches('/');
        format!("http://{}:{port}/{path}", self.host)
    }
}

impl ReadinessProbe for HttpStatusProbe {
    fn is_ready(&self, port: u16) -> Result<bool> {
        let url = self.url(port);
        match self.client.get(&url).send() {
            Ok(response) => {
                tracing::debug!(%url, status = %response.status(), "agent status");
                Ok(response.status() == StatusCode::OK)
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "agent not reachable yet");
                Ok(false)
            }
        }
    }
}
