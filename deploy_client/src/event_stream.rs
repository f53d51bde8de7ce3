//! Optional early notification of executed deploys from the node's SSE endpoint.
//!
//! Polling stays the source of truth; an event only makes the next poll happen sooner.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use metrics::node_rpc::inc_event_stream_message;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use casper_deploy_types::DeployHash;

use crate::{config::ExponentialBackoffConfig, node_client::display_error};

const CHANNEL_CAPACITY: usize = 256;

/// Event payload pointers leading to the hash of a processed or expired deploy.
const DEPLOY_HASH_POINTERS: [&str; 4] = [
    "/DeployProcessed/deploy_hash",
    "/DeployExpired/deploy_hash",
    "/TransactionProcessed/transaction_hash/Deploy",
    "/TransactionExpired/transaction_hash/Deploy",
];

pub struct EventStreamListener {
    endpoint: Url,
    backoff: ExponentialBackoffConfig,
    sender: broadcast::Sender<DeployHash>,
}

impl EventStreamListener {
    pub fn new(endpoint: Url, backoff: ExponentialBackoffConfig) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventStreamListener {
            endpoint,
            backoff,
            sender,
        }
    }

    /// Sender side of the notifications; call `subscribe` on it for a new receiver.
    pub fn notifier(&self) -> broadcast::Sender<DeployHash> {
        self.sender.clone()
    }

    /// Follows the event stream until `cancel` fires or connection attempts are exhausted.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut wait = self.backoff.initial_delay_ms;
        let mut current_attempt = 1;
        loop {
            match self.follow(&cancel).await {
                Ok(forwarded) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    debug!(endpoint = %self.endpoint, forwarded, "event stream ended");
                    wait = self.backoff.initial_delay_ms;
                    current_attempt = 1;
                }
                Err(err) => {
                    current_attempt += 1;
                    if !self.backoff.max_attempts.can_attempt(current_attempt) {
                        warn!(
                            endpoint = %self.endpoint,
                            err = display_error(&err),
                            "giving up on the event stream, relying on polling only"
                        );
                        return;
                    }
                    warn!(
                        endpoint = %self.endpoint,
                        err = display_error(&err),
                        "failed to connect to the event stream, waiting {wait}ms before retrying"
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
            }
            wait = wait
                .saturating_mul(self.backoff.coefficient)
                .min(self.backoff.max_delay_ms);
        }
    }

    /// Consumes one connection, returning how many deploy notifications it forwarded.
    async fn follow(&self, cancel: &CancellationToken) -> Result<usize, reqwest::Error> {
        let mut event_stream = Client::new()
            .get(self.endpoint.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes_stream()
            .eventsource();
        info!(endpoint = %self.endpoint, "connected to event stream");

        let mut forwarded = 0;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(forwarded),
                event = event_stream.next() => event,
            };
            match event {
                None => return Ok(forwarded),
                Some(Ok(event)) => {
                    if let Some(deploy_hash) = processed_deploy_hash(&event.data) {
                        inc_event_stream_message();
                        forwarded += 1;
                        debug!(%deploy_hash, "event stream reported deploy");
                        // No receivers just means nobody is waiting right now.
                        let _ = self.sender.send(deploy_hash);
                    }
                }
                Some(Err(err)) => {
                    warn!(
                        endpoint = %self.endpoint,
                        error = ?err,
                        "error returned from event stream"
                    )
                }
            }
        }
    }
}

/// Hash of the deploy an SSE payload reports as processed or expired, if any.
pub fn processed_deploy_hash(data: &str) -> Option<DeployHash> {
    let value: Value = serde_json::from_str(data).ok()?;
    let hash = DEPLOY_HASH_POINTERS
        .iter()
        .find_map(|pointer| value.pointer(pointer))?;
    serde_json::from_value(hash.clone()).ok()
}
