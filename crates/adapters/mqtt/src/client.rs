//! [`MqttClient`] implementation on top of rumqttc.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, Publish, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mqttrules_app::ports::{Ack, InboundMessage, MqttClient, MqttError, OutboundMessage};
use mqttrules_domain::rule::Qos;
use mqttrules_domain::topic::{validate_filter, validate_publish_topic};

use crate::config::MqttConfig;
use crate::error::MqttAdapterError;

type Subscriptions = Arc<Mutex<BTreeMap<String, Qos>>>;

/// Map the domain QoS onto rumqttc's.
#[must_use]
pub fn to_rumqttc_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn lock(subscriptions: &Subscriptions) -> MutexGuard<'_, BTreeMap<String, Qos>> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A broker connection shared by the engine.
///
/// Cloning is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct RumqttClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    subscriptions: Subscriptions,
}

impl RumqttClient {
    /// Connect to the broker described by `config`.
    ///
    /// Returns the client, the stream of incoming messages and the handle of
    /// the background task driving the connection. The task reconnects after
    /// errors and restores subscriptions on every new session, until
    /// [`disconnect`](Self::disconnect) is called.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::Receiver<InboundMessage>, JoinHandle<()>) {
        let capacity = config.channel_capacity.max(1);
        let (client, eventloop) = AsyncClient::new(config.options(), capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let this = Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::default(),
        };
        let connection = Connection {
            client: this.client.clone(),
            connected: Arc::clone(&this.connected),
            closing: Arc::clone(&this.closing),
            subscriptions: Arc::clone(&this.subscriptions),
            inbound: inbound_tx,
            reconnect_delay: config.reconnect_delay(),
        };
        tracing::info!(
            host = %config.broker_host,
            port = config.broker_port,
            client_id = %config.client_id,
            "connecting to MQTT broker"
        );
        let handle = tokio::spawn(connection.run(eventloop));
        (this, inbound_rx, handle)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Close the session. The background task ends once the disconnect
    /// request went out.
    pub async fn disconnect(&self) {
        self.closing.store(true, Ordering::Release);
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(%err, "unable to send disconnect request");
        }
    }

    async fn publish_message(&self, message: OutboundMessage) -> Result<Ack, MqttAdapterError> {
        validate_publish_topic(&message.topic).map_err(MqttAdapterError::InvalidTopic)?;
        if !self.is_connected() {
            return Err(MqttAdapterError::NotConnected);
        }
        self.client
            .publish(
                message.topic,
                to_rumqttc_qos(message.qos),
                message.retain,
                message.payload,
            )
            .await
            .map_err(MqttAdapterError::Client)?;
        Ok(Ack)
    }

    async fn subscribe_filter(&self, filter: String, qos: Qos) -> Result<(), MqttAdapterError> {
        validate_filter(&filter).map_err(MqttAdapterError::InvalidTopic)?;
        self.client
            .subscribe(filter.as_str(), to_rumqttc_qos(qos))
            .await
            .map_err(MqttAdapterError::Client)?;
        lock(&self.subscriptions).insert(filter, qos);
        Ok(())
    }

    async fn unsubscribe_filter(&self, filter: String) -> Result<(), MqttAdapterError> {
        lock(&self.subscriptions).remove(&filter);
        self.client
            .unsubscribe(filter)
            .await
            .map_err(MqttAdapterError::Client)
    }
}

impl MqttClient for RumqttClient {
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<Ack, MqttError>> + Send {
        async move { self.publish_message(message).await.map_err(MqttError::from) }
    }

    fn subscribe(
        &self,
        filter: &str,
        qos: Qos,
    ) -> impl Future<Output = Result<(), MqttError>> + Send {
        let filter = filter.to_string();
        async move {
            self.subscribe_filter(filter, qos)
                .await
                .map_err(MqttError::from)
        }
    }

    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<(), MqttError>> + Send {
        let filter = filter.to_string();
        async move { self.unsubscribe_filter(filter).await.map_err(MqttError::from) }
    }
}

/// State owned by the background task polling the rumqttc event loop.
struct Connection {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    subscriptions: Subscriptions,
    inbound: mpsc::Sender<InboundMessage>,
    reconnect_delay: Duration,
}

impl Connection {
    async fn run(self, mut eventloop: EventLoop) {
        let mut sessions = 0_u64;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    sessions += 1;
                    self.connected.store(true, Ordering::Release);
                    tracing::info!(code = ?ack.code, session = sessions, "connected to MQTT broker");
                    if sessions > 1 {
                        self.restore_subscriptions();
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => self.forward(&publish),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::info!("disconnected from MQTT broker");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    self.connected.store(false, Ordering::Release);
                    if self.closing.load(Ordering::Acquire) {
                        break;
                    }
                    tracing::warn!(
                        %err,
                        retry_in_secs = self.reconnect_delay.as_secs(),
                        "MQTT connection error"
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
        self.connected.store(false, Ordering::Release);
    }

    /// Hand an incoming publish to the engine, dropping it when the engine
    /// is not keeping up so the connection keeps flowing.
    fn forward(&self, publish: &Publish) {
        let message = InboundMessage {
            topic: topic_of(publish),
            payload: publish.payload.to_vec(),
        };
        match self.inbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(topic = %message.topic, "inbound queue full, message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::debug!(topic = %message.topic, "no engine listening, message dropped");
            }
        }
    }

    fn restore_subscriptions(&self) {
        let subscriptions = lock(&self.subscriptions).clone();
        for (filter, qos) in subscriptions {
            match self.client.try_subscribe(filter.as_str(), to_rumqttc_qos(qos)) {
                Ok(()) => tracing::debug!(%filter, "subscription restored"),
                Err(err) => tracing::warn!(%filter, %err, "unable to restore subscription"),
            }
        }
    }
}

fn topic_of(publish: &Publish) -> String {
    String::from_utf8_lossy(AsRef::<[u8]>::as_ref(&publish.topic)).into_owned()
}
