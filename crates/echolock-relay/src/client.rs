use std::collections::HashSet;
use std::time::Duration;

use echolock_core::{EchoLockError, EventId};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::event::Event;
use crate::filter::Filter;
use crate::health::RelayHealth;
use crate::message::{ClientMessage, RelayMessage};

/// The relay transport: fan-out publish with quorum, subscription
/// fan-in with dedup, and per-relay health tracking. Relays are a
/// shared, eventually-consistent bulletin board — `RelayNetwork` owns
/// no authoritative state, only connection health.
pub struct RelayNetwork {
    config: RelayConfig,
    health: Vec<RelayHealth>,
}

/// Outcome of a single `publish` call.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub accepted_by: Vec<String>,
    pub failed: Vec<String>,
}

impl RelayNetwork {
    pub fn new(config: RelayConfig) -> Self {
        let health = config.urls.iter().map(RelayHealth::new).collect();
        Self { config, health }
    }

    fn eligible_urls(&self) -> Vec<String> {
        self.health
            .iter()
            .filter(|h| h.is_eligible())
            .map(|h| h.url.clone())
            .collect()
    }

    fn mark(&mut self, url: &str, ok: bool) {
        if let Some(h) = self.health.iter_mut().find(|h| h.url == url) {
            if ok {
                h.record_success();
            } else {
                h.record_failure();
            }
        }
    }

    /// Publish `event` to every eligible relay in parallel, requiring
    /// `quorum` acceptances within the configured deadline. A rejected
    /// event is not retried against the same relay in this call.
    pub async fn publish(
        &mut self,
        event: &Event,
        quorum: usize,
    ) -> Result<PublishOutcome, EchoLockError> {
        let urls = self.eligible_urls();
        let deadline = self.config.deadline;
        let msg = ClientMessage::Publish {
            event: event.clone(),
        };

        let futures = urls.iter().cloned().map(|url| {
            let msg = msg.clone();
            let connect_timeout = self.config.connect_timeout;
            let event_id = event.id;
            async move { publish_one(&url, msg, event_id, connect_timeout).await }
        });

        let results = timeout(deadline, futures::future::join_all(futures))
            .await
            .unwrap_or_else(|_| urls.iter().map(|u| (u.clone(), false)).collect());

        let mut accepted_by = Vec::new();
        let mut failed = Vec::new();
        for (url, ok) in &results {
            self.mark(url, *ok);
            if *ok {
                accepted_by.push(url.clone());
            } else {
                failed.push(url.clone());
            }
        }

        if accepted_by.len() < quorum {
            return Err(EchoLockError::QuorumNotMet {
                need: quorum,
                got: accepted_by.len(),
            });
        }

        Ok(PublishOutcome { accepted_by, failed })
    }

    /// Fan the subscription out to every eligible relay, merge `EVENT`
    /// messages by id, verify signature and integrity before returning,
    /// and stop once every relay has signalled `EOSE` or the deadline
    /// elapses.
    pub async fn retrieve(&mut self, filter: &Filter) -> Result<Vec<Event>, EchoLockError> {
        let urls = self.eligible_urls();
        let deadline = self.config.deadline;
        let connect_timeout = self.config.connect_timeout;

        let futures = urls
            .iter()
            .cloned()
            .map(|url| async move { retrieve_one(&url, filter, connect_timeout).await });

        let results = timeout(deadline, futures::future::join_all(futures))
            .await
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for (url, outcome) in urls.iter().zip(results.into_iter()) {
            match outcome {
                Ok(batch) => {
                    self.mark(url, true);
                    for event in batch {
                        if !event.verify() {
                            debug!(relay = %url, "dropping event with invalid signature/id");
                            continue;
                        }
                        if seen.insert(event.id.0) {
                            events.push(event);
                        }
                    }
                }
                Err(_) => {
                    self.mark(url, false);
                    warn!(relay = %url, "retrieve failed");
                }
            }
        }
        Ok(events)
    }
}

async fn publish_one(
    url: &str,
    msg: ClientMessage,
    event_id: EventId,
    connect_timeout: Duration,
) -> (String, bool) {
    let ok = publish_one_inner(url, msg, event_id, connect_timeout)
        .await
        .unwrap_or(false);
    (url.to_string(), ok)
}

async fn publish_one_inner(
    url: &str,
    msg: ClientMessage,
    event_id: EventId,
    connect_timeout: Duration,
) -> Result<bool, EchoLockError> {
    let (mut ws, _) = timeout(connect_timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| EchoLockError::RelayUnreachable(url.to_string()))?
        .map_err(|e| EchoLockError::RelayUnreachable(format!("{url}: {e}")))?;

    ws.send(WsMessage::Text(msg.to_text()))
        .await
        .map_err(|e| EchoLockError::RelayUnreachable(format!("{url}: {e}")))?;

    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| EchoLockError::RelayUnreachable(format!("{url}: {e}")))?;
        if let WsMessage::Text(text) = frame {
            if let Ok(RelayMessage::Ok {
                event_id: got,
                accepted,
                reason,
            }) = RelayMessage::from_text(&text)
            {
                if got == event_id {
                    if !accepted {
                        debug!(relay = %url, %reason, "relay rejected event");
                    }
                    return Ok(accepted);
                }
            }
        }
    }
    Ok(false)
}

async fn retrieve_one(
    url: &str,
    filter: &Filter,
    connect_timeout: Duration,
) -> Result<Vec<Event>, EchoLockError> {
    let (mut ws, _) = timeout(connect_timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| EchoLockError::RelayUnreachable(url.to_string()))?
        .map_err(|e| EchoLockError::RelayUnreachable(format!("{url}: {e}")))?;

    let sub_id = "sub-1".to_string();
    let subscribe = ClientMessage::Subscribe {
        sub_id: sub_id.clone(),
        filter: filter.clone(),
    };
    ws.send(WsMessage::Text(subscribe.to_text()))
        .await
        .map_err(|e| EchoLockError::RelayUnreachable(format!("{url}: {e}")))?;

    let mut events = Vec::new();
    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| EchoLockError::RelayUnreachable(format!("{url}: {e}")))?;
        if let WsMessage::Text(text) = frame {
            match RelayMessage::from_text(&text) {
                Ok(RelayMessage::Event { sub_id: s, event }) if s == sub_id => {
                    if filter.matches(&event) {
                        events.push(event);
                    }
                }
                Ok(RelayMessage::Eose { sub_id: s }) if s == sub_id => break,
                Ok(RelayMessage::Notice { message }) => {
                    debug!(relay = %url, %message, "relay notice");
                }
                _ => {}
            }
        }
    }

    let close = ClientMessage::Close { sub_id };
    let _ = ws.send(WsMessage::Text(close.to_text())).await;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_urls_excludes_unhealthy() {
        let config = RelayConfig::from_urls(vec!["wss://a".into(), "wss://b".into()]);
        let mut net = RelayNetwork::new(config);
        net.mark("wss://a", false);
        net.mark("wss://a", false);
        net.mark("wss://a", false);
        let eligible = net.eligible_urls();
        assert_eq!(eligible, vec!["wss://b".to_string()]);
    }
}
