use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};

use super::protocol::{
    ENDPOINT_NETWORK, ENDPOINT_PING, ENDPOINT_PREDECESSOR, ENDPOINT_STORAGE, ENDPOINT_SUCCESSOR,
};
use super::Transport;

/// Deadline for liveness and lookup RPCs. A dead peer must release the
/// caller within one maintenance tick's budget.
const FAST_TIMEOUT: Duration = Duration::from_millis(500);
/// Deadline for the authoritative set-successor / set-predecessor calls.
const SLOW_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for client-facing storage forwarding and network walks.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP implementation of the peer RPC surface. Holds pooled clients in the
/// two timeout classes plus a forwarding client for storage traffic.
pub struct HttpTransport {
    fast: Client,
    slow: Client,
    forward: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fast: Client::builder()
                .timeout(FAST_TIMEOUT)
                .build()
                .context("failed to build fast RPC client")?,
            slow: Client::builder()
                .timeout(SLOW_TIMEOUT)
                .build()
                .context("failed to build slow RPC client")?,
            forward: Client::builder()
                .timeout(FORWARD_TIMEOUT)
                .build()
                .context("failed to build forwarding client")?,
        })
    }

    /// Replays a storage request against the next hop and hands back the
    /// peer's status and body for streaming to the client.
    pub async fn forward_storage(
        &self,
        target: &str,
        key: &str,
        method: Method,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let url = format!("http://{target}{ENDPOINT_STORAGE}/{key}");
        let mut request = self.forward.request(method, url);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to forward storage request to '{target}'"))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read forwarded response from '{target}'"))?;
        Ok((status, body.to_vec()))
    }

    /// Continues a membership walk on the successor, carrying the origin so
    /// the traversal terminates.
    pub async fn fetch_network(&self, target: &str, origin: &str) -> Result<Vec<String>> {
        let response = self
            .forward
            .get(format!("http://{target}{ENDPOINT_NETWORK}"))
            .query(&[("origin", origin)])
            .send()
            .await
            .with_context(|| format!("failed to reach '{target}' for the network walk"))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn check_alive(&self, target: &str) -> Result<bool> {
        let response = self
            .fast
            .get(format!("http://{target}{ENDPOINT_PING}"))
            .send()
            .await
            .with_context(|| format!("ping to '{target}' failed"))?;
        Ok(response.status().is_success())
    }

    async fn get_predecessor(&self, target: &str) -> Result<String> {
        let response = self
            .fast
            .get(format!("http://{target}{ENDPOINT_PREDECESSOR}"))
            .send()
            .await
            .with_context(|| format!("predecessor request to '{target}' failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "predecessor request to '{target}' returned {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    async fn notify(&self, target: &str, predecessor: &str) -> Result<()> {
        let response = self
            .fast
            .put(format!("http://{target}{ENDPOINT_PREDECESSOR}"))
            .json(&predecessor)
            .send()
            .await
            .with_context(|| format!("notify to '{target}' failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!("notify to '{target}' returned {}", response.status()));
        }
        Ok(())
    }

    async fn find_successor(&self, target: &str, key_id: u64) -> Result<String> {
        let response = self
            .fast
            .get(format!("http://{target}{ENDPOINT_SUCCESSOR}"))
            .query(&[("key", key_id.to_string())])
            .send()
            .await
            .with_context(|| format!("successor lookup on '{target}' failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "successor lookup on '{target}' returned {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    async fn set_predecessor(&self, target: &str, predecessor: &str) -> Result<()> {
        let response = self
            .slow
            .post(format!("http://{target}{ENDPOINT_PREDECESSOR}"))
            .json(&predecessor)
            .send()
            .await
            .with_context(|| format!("set-predecessor on '{target}' failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "set-predecessor on '{target}' returned {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn set_successor(&self, target: &str, successor: &str) -> Result<()> {
        let response = self
            .slow
            .put(format!("http://{target}{ENDPOINT_SUCCESSOR}"))
            .json(&successor)
            .send()
            .await
            .with_context(|| format!("set-successor on '{target}' failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "set-successor on '{target}' returned {}",
                response.status()
            ));
        }
        Ok(())
    }
}
