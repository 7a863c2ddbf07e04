//! Startup sequencing for the producer and consumer paths.
//!
//! Topic bootstrap always runs to completion, on its own connection, before
//! a publisher or subscriber is created.

use crate::kafka::{
    KafkaAdmin, KafkaSink, KafkaSource, Publisher, Subscriber, SubscriberState, TopicManager,
};
use crate::{Config, Error, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default upper bound for a whole `produce` run: bootstrap, publishing
/// and the final flush.
pub const PRODUCE_DEADLINE: Duration = Duration::from_secs(10);

/// Structured demo payload published next to the bare string.
#[derive(Debug, Clone, Serialize)]
pub struct TextMessage {
    pub message: String,
}

pub struct Platform {
    config: Config,
    shutdown: CancellationToken,
    produce_deadline: Duration,
}

impl Platform {
    pub fn new(config: Config) -> Self {
        Self::with_shutdown(config, CancellationToken::new())
    }

    pub fn with_shutdown(config: Config, shutdown: CancellationToken) -> Self {
        Self {
            config,
            shutdown,
            produce_deadline: PRODUCE_DEADLINE,
        }
    }

    pub fn with_produce_deadline(mut self, deadline: Duration) -> Self {
        self.produce_deadline = deadline;
        self
    }

    /// Token that stops every path started by this platform when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn bootstrap(&self) -> Result<()> {
        self.bootstrap_until(&self.shutdown).await
    }

    async fn bootstrap_until(&self, shutdown: &CancellationToken) -> Result<()> {
        let specs = self.config.kafka.topic_specs();
        let mut manager = TopicManager::new(KafkaAdmin::new(&self.config.kafka));

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(Error::Shutdown),
            result = manager.ensure_topics(&specs) => result,
        };

        manager.into_inner().close();
        result
    }

    pub fn publisher(&self) -> Publisher<KafkaSink> {
        Publisher::from_config(&self.config.kafka, self.shutdown.child_token())
    }

    pub fn subscriber(&self) -> Subscriber<KafkaSource> {
        Subscriber::from_config(&self.config.kafka)
    }

    /// Bootstraps topics, then publishes every message as a bare JSON string
    /// and as a [`TextMessage`].
    ///
    /// The whole run, final flush included, is bounded by the produce
    /// deadline; running out of time returns [`Error::Timeout`].
    pub async fn produce(&self, topic: Option<&str>, messages: &[String]) -> Result<()> {
        let deadline = self.shutdown.child_token();
        let timer = tokio::spawn({
            let deadline = deadline.clone();
            let limit = self.produce_deadline;
            async move {
                tokio::time::sleep(limit).await;
                deadline.cancel();
            }
        });

        let result = self.produce_until(&deadline, topic, messages).await;
        timer.abort();

        match result {
            Err(e) if e.is_cancellation() && !self.shutdown.is_cancelled() => {
                Err(Error::Timeout {
                    message: format!("produce did not finish within {:?}", self.produce_deadline),
                })
            }
            other => other,
        }
    }

    async fn produce_until(
        &self,
        deadline: &CancellationToken,
        topic: Option<&str>,
        messages: &[String],
    ) -> Result<()> {
        self.bootstrap_until(deadline).await?;

        let mut publisher = Publisher::from_config(&self.config.kafka, deadline.clone());
        let published = publish_all(&mut publisher, topic, messages).await;

        let closed = publisher.close().await;
        if let Err(e) = &closed {
            error!(error = %e, "Failed to flush publisher");
        }

        published.and(closed)
    }

    /// Runs the subscriber loop on its own task after bootstrap.
    pub fn spawn_consumer(&self) -> JoinHandle<Result<SubscriberState>> {
        let mut subscriber = self.subscriber();
        let shutdown = self.shutdown.child_token();

        tokio::spawn(async move {
            let result = subscriber.start(shutdown).await;
            subscriber.close();
            result
        })
    }

    /// Bootstraps topics and consumes until the shutdown token is cancelled.
    pub async fn consume(&self) -> Result<SubscriberState> {
        self.bootstrap().await?;

        let state = self
            .spawn_consumer()
            .await
            .map_err(|e| Error::Consume(format!("consumer task failed: {}", e)))??;

        info!(?state, "consumer shutdown complete");
        Ok(state)
    }
}

async fn publish_all(
    publisher: &mut Publisher<KafkaSink>,
    topic: Option<&str>,
    messages: &[String],
) -> Result<()> {
    for message in messages {
        let structured = TextMessage {
            message: message.clone(),
        };

        match topic {
            Some(topic) => {
                publisher.publish(topic, message.as_str()).await?;
                publisher.publish(topic, &structured).await?;
            }
            None => {
                publisher.publish_default(message.as_str()).await?;
                publisher.publish_default(&structured).await?;
            }
        }
    }

    info!(count = messages.len() * 2, "Successfully published all messages");
    Ok(())
}
