//! Publish/subscribe broker client.
//!
//! The core only needs two operations: retained QoS-1 publishes and topic
//! subscriptions with a per-subscription handler. [`Broker`] is the seam;
//! [`MqttBroker`] realizes it over `rumqttc` with a spawned event-loop
//! task that keeps reconnecting for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;
use crate::error::{BridgeError, BridgeResult};

/// Invoked for every payload arriving on a subscribed filter.
///
/// Handlers run on the broker event-loop task; they must not block.
pub type SubscriptionHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// The publish/subscribe operations the bridge needs from a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes at QoS 1, optionally retained.
    async fn publish(&self, topic: &str, payload: Bytes, retained: bool) -> BridgeResult<()>;

    /// Subscribes to a topic filter and routes matching payloads to the
    /// handler.
    async fn subscribe(&self, filter: &str, handler: SubscriptionHandler) -> BridgeResult<()>;
}

/// MQTT broker client over `rumqttc`.
pub struct MqttBroker {
    client: AsyncClient,
    handlers: Arc<DashMap<String, SubscriptionHandler>>,
}

impl MqttBroker {
    /// Builds the client and spawns its event loop.
    ///
    /// The connection is established lazily by the event loop and
    /// re-established after failures; publishes issued while disconnected
    /// are queued by `rumqttc`.
    pub fn connect(config: &BrokerConfig) -> BridgeResult<(Arc<Self>, JoinHandle<()>)> {
        let mut options = MqttOptions::new(&config.client, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(false);

        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 128);
        let handlers: Arc<DashMap<String, SubscriptionHandler>> = Arc::new(DashMap::new());

        let broker = Arc::new(Self {
            client: client.clone(),
            handlers: Arc::clone(&handlers),
        });

        log::info!(
            "[MQTT] connecting to {}:{} as {}",
            config.host,
            config.port,
            config.client
        );

        let event_loop_task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("[MQTT] connected");
                        // Sessions may have been dropped server-side; renew
                        // every live subscription. Keys are collected first
                        // so no map shard is held across an await.
                        let filters: Vec<String> =
                            handlers.iter().map(|entry| entry.key().clone()).collect();
                        for filter in filters {
                            if let Err(e) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await
                            {
                                log::warn!("[MQTT] resubscribe {} failed: {}", filter, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        for entry in handlers.iter() {
                            if mqttbytes::matches(&publish.topic, entry.key()) {
                                entry.value()(&publish.topic, &publish.payload);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("[MQTT] connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok((broker, event_loop_task))
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Bytes, retained: bool) -> BridgeResult<()> {
        self.client
            .publish_bytes(topic.to_string(), QoS::AtLeastOnce, retained, payload)
            .await
            .map_err(|e| BridgeError::InternalFailure(format!("mqtt publish: {}", e)))
    }

    async fn subscribe(&self, filter: &str, handler: SubscriptionHandler) -> BridgeResult<()> {
        self.handlers.insert(filter.to_string(), handler);
        self.client
            .subscribe(filter.to_string(), QoS::AtLeastOnce)
            .await
            .map_err(|e| BridgeError::InternalFailure(format!("mqtt subscribe: {}", e)))
    }
}
