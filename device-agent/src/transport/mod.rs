//! # MQTT Transport Connection
//!
//! Wraps the broker session behind a small publish/subscribe trait:
//! 1. Mutual-TLS session from the claim or permanent identity PEMs
//! 2. Subscribe resolves only on the broker's acknowledgment
//! 3. Publish resolves on the at-least-once delivery acknowledgment
//! 4. Incoming messages are routed to per-topic handlers on the I/O task
//!
//! Acknowledgments are matched to pending operations in FIFO order. That
//! is sound here because a single logical task issues subscribe/publish
//! operations and awaits each acknowledgment before the next request.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use shared::constants::{ACK_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, RECONNECT_DELAY_SECS};
use shared::error::{ProvisionError, ProvisionResult};

/// Callback invoked with the topic and payload of each incoming message.
///
/// Handlers run on the transport's I/O task and must not block; in this
/// agent they only fulfill correlation slots and log.
pub type MessageHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

pub(crate) type SharedHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Asynchronous publish/subscribe transport used by the provisioning
/// state machine and the telemetry publisher.
///
/// Topics are matched exactly; wildcard subscriptions are not used.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Subscribe at QoS 1 and resolve once the broker acknowledges.
    ///
    /// A negative or missing acknowledgment is fatal for the caller.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> ProvisionResult<()>;

    /// Publish at QoS 1 and resolve on the delivery acknowledgment
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ProvisionResult<()>;
}

// =============================================================================
// TLS IDENTITY
// =============================================================================

/// PEM material for the mutual-TLS session
pub struct TlsIdentity {
    ca: Vec<u8>,
    client_cert: Vec<u8>,
    client_key: Vec<u8>,
}

impl TlsIdentity {
    /// Read the trust root and client credential PEMs from disk
    pub async fn from_files(ca: &Path, cert: &Path, key: &Path) -> ProvisionResult<Self> {
        Ok(Self {
            ca: read_pem(ca).await?,
            client_cert: read_pem(cert).await?,
            client_key: read_pem(key).await?,
        })
    }
}

async fn read_pem(path: &Path) -> ProvisionResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        ProvisionError::ConfigurationError(format!("failed to read '{}': {e}", path.display()))
    })
}

/// Parameters for establishing a broker session
pub struct ConnectOptions {
    /// Broker endpoint hostname
    pub endpoint: String,

    /// Broker port; 443 switches to ALPN-based MQTT
    pub port: u16,

    /// MQTT client identifier (the machine identity)
    pub client_id: String,

    /// Keep-alive interval
    pub keep_alive: Duration,

    /// Mutual-TLS material
    pub tls: TlsIdentity,
}

// =============================================================================
// MQTT CONNECTION
// =============================================================================

type AckSender = oneshot::Sender<Result<(), String>>;

#[derive(Default)]
struct ConnectionShared {
    /// Exact topic name to handler for incoming messages
    handlers: Mutex<HashMap<String, SharedHandler>>,

    /// Acknowledged subscriptions, replayed after a session loss
    topics: Mutex<Vec<String>>,

    /// Pending subscription acknowledgments in request order
    pending_sub_acks: Mutex<VecDeque<AckSender>>,

    /// Pending publish acknowledgments in request order
    pending_pub_acks: Mutex<VecDeque<AckSender>>,
}

/// rumqttc-backed broker session
pub struct MqttConnection {
    client: AsyncClient,
    shared: Arc<ConnectionShared>,
}

impl MqttConnection {
    /// Establish a mutual-TLS session and wait for the broker's
    /// connection acknowledgment.
    pub async fn connect(options: ConnectOptions) -> ProvisionResult<Self> {
        info!(
            endpoint = %options.endpoint,
            port = options.port,
            client_id = %options.client_id,
            "Connecting to broker"
        );

        let mut mqtt_options =
            MqttOptions::new(&options.client_id, &options.endpoint, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(false);

        let alpn = (options.port == 443).then(|| vec![b"x-amzn-mqtt-ca".to_vec()]);
        mqtt_options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca: options.tls.ca,
            alpn,
            client_auth: Some((options.tls.client_cert, options.tls.client_key)),
        }));

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);

        let session_present = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            wait_for_connack(&mut eventloop, &options.endpoint),
        )
        .await
        .map_err(|_| ProvisionError::ConnectionError {
            endpoint: options.endpoint.clone(),
            reason: format!("no connection acknowledgment within {CONNECT_TIMEOUT_SECS} seconds"),
        })??;

        info!(session_present, "Connected to broker");

        let shared = Arc::new(ConnectionShared::default());
        let driver_shared = Arc::clone(&shared);
        let driver_client = client.clone();
        let endpoint = options.endpoint.clone();
        tokio::spawn(async move {
            drive_connection(eventloop, driver_client, driver_shared, endpoint).await;
        });

        Ok(Self { client, shared })
    }

    /// Send the MQTT disconnect packet; best effort
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect failed");
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop, endpoint: &str) -> ProvisionResult<bool> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(ack.session_present),
                    code => Err(ProvisionError::ConnectionError {
                        endpoint: endpoint.to_string(),
                        reason: format!("broker refused connection: {code:?}"),
                    }),
                };
            }
            Ok(event) => debug!(?event, "Event before connection acknowledgment"),
            Err(e) => {
                return Err(ProvisionError::ConnectionError {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl Connection for MqttConnection {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> ProvisionResult<()> {
        debug!(topic = %topic, "Subscribing");
        self.shared
            .handlers
            .lock()
            .insert(topic.to_string(), Arc::from(handler));

        let (sender, receiver) = oneshot::channel();
        self.shared.pending_sub_acks.lock().push_back(sender);

        if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            let _ = self.shared.pending_sub_acks.lock().pop_back();
            return Err(ProvisionError::SubscriptionError {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }

        match tokio::time::timeout(Duration::from_secs(ACK_TIMEOUT_SECS), receiver).await {
            Ok(Ok(Ok(()))) => {
                self.shared.topics.lock().push(topic.to_string());
                info!(topic = %topic, "Subscribed");
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(ProvisionError::SubscriptionError {
                topic: topic.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(ProvisionError::SubscriptionError {
                topic: topic.to_string(),
                reason: "connection lost before acknowledgment".to_string(),
            }),
            Err(_) => Err(ProvisionError::SubscriptionError {
                topic: topic.to_string(),
                reason: format!("no acknowledgment within {ACK_TIMEOUT_SECS} seconds"),
            }),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ProvisionResult<()> {
        debug!(topic = %topic, len = payload.len(), "Publishing");

        let (sender, receiver) = oneshot::channel();
        self.shared.pending_pub_acks.lock().push_back(sender);

        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            let _ = self.shared.pending_pub_acks.lock().pop_back();
            return Err(ProvisionError::PublishError {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }

        match tokio::time::timeout(Duration::from_secs(ACK_TIMEOUT_SECS), receiver).await {
            Ok(Ok(Ok(()))) => {
                debug!(topic = %topic, "Publish acknowledged");
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(ProvisionError::PublishError {
                topic: topic.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(ProvisionError::PublishError {
                topic: topic.to_string(),
                reason: "connection lost before acknowledgment".to_string(),
            }),
            Err(_) => Err(ProvisionError::PublishError {
                topic: topic.to_string(),
                reason: format!("no acknowledgment within {ACK_TIMEOUT_SECS} seconds"),
            }),
        }
    }
}

// =============================================================================
// EVENT LOOP
// =============================================================================

async fn drive_connection(
    mut eventloop: EventLoop,
    client: AsyncClient,
    shared: Arc<ConnectionShared>,
    endpoint: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(packet)) => handle_incoming(packet, &client, &shared).await,
            Ok(Event::Outgoing(_)) => {}
            Err(ConnectionError::RequestsDone) => {
                debug!("Client closed, stopping event loop");
                break;
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Connection interrupted");
                fail_pending(&shared, &e.to_string());
                tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        }
    }
}

async fn handle_incoming(packet: Packet, client: &AsyncClient, shared: &Arc<ConnectionShared>) {
    match packet {
        Packet::Publish(publish) => {
            let handler = shared.handlers.lock().get(&publish.topic).cloned();
            match handler {
                Some(handler) => {
                    debug!(
                        topic = %publish.topic,
                        len = publish.payload.len(),
                        "Message received"
                    );
                    handler(&publish.topic, &publish.payload);
                }
                None => warn!(topic = %publish.topic, "Message on topic without a handler"),
            }
        }
        Packet::SubAck(ack) => {
            let result = match ack.return_codes.first() {
                Some(SubscribeReasonCode::Success(qos)) => {
                    debug!(granted_qos = ?qos, "Subscription acknowledged");
                    Ok(())
                }
                Some(SubscribeReasonCode::Failure) => {
                    Err("broker rejected the subscription".to_string())
                }
                None => Err("acknowledgment carried no return code".to_string()),
            };
            match shared.pending_sub_acks.lock().pop_front() {
                Some(sender) => {
                    let _ = sender.send(result);
                }
                None => debug!("Unmatched subscription acknowledgment"),
            }
        }
        Packet::PubAck(_) => match shared.pending_pub_acks.lock().pop_front() {
            Some(sender) => {
                let _ = sender.send(Ok(()));
            }
            None => debug!("Unmatched publish acknowledgment"),
        },
        Packet::ConnAck(ack) => {
            info!(session_present = ack.session_present, "Connection resumed");
            if !ack.session_present {
                resubscribe(client, shared).await;
            }
        }
        _ => {}
    }
}

/// Replay acknowledged subscriptions after the broker dropped the session
async fn resubscribe(client: &AsyncClient, shared: &Arc<ConnectionShared>) {
    let topics: Vec<String> = shared.topics.lock().clone();
    for topic in topics {
        // The receiver half is dropped; the SubAck for this replay just
        // pops the placeholder and keeps the queue aligned.
        let (sender, _receiver) = oneshot::channel();
        shared.pending_sub_acks.lock().push_back(sender);
        match client.subscribe(&topic, QoS::AtLeastOnce).await {
            Ok(()) => info!(topic = %topic, "Resubscribed after session loss"),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Resubscription failed");
                let _ = shared.pending_sub_acks.lock().pop_back();
            }
        }
    }
}

/// Fail every pending acknowledgment after a connection interruption
fn fail_pending(shared: &Arc<ConnectionShared>, reason: &str) {
    let mut subs = shared.pending_sub_acks.lock();
    for sender in subs.drain(..) {
        let _ = sender.send(Err(reason.to_string()));
    }
    drop(subs);

    let mut pubs = shared.pending_pub_acks.lock();
    for sender in pubs.drain(..) {
        let _ = sender.send(Err(reason.to_string()));
    }
}

// =============================================================================
// SCRIPTED CONNECTION (test support)
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport with scripted responses, standing in for the
    //! broker plus the fleet-provisioning service in protocol tests.

    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use shared::error::{ProvisionError, ProvisionResult};

    use super::{Connection, MessageHandler, SharedHandler};

    /// Test double: records subscriptions and publishes, and delivers
    /// scripted responses synchronously when a request topic is published.
    #[derive(Default)]
    pub struct ScriptedConnection {
        handlers: Mutex<HashMap<String, SharedHandler>>,
        scripts: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
        failing_subscriptions: Mutex<Vec<String>>,
        subscriptions: Mutex<Vec<String>>,
        publishes: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ScriptedConnection {
        pub fn new() -> Self {
            Self::default()
        }

        /// Deliver `payload` on `response_topic` whenever `request_topic`
        /// is published to. Multiple scripts for one request run in order.
        pub fn script_response(&self, request_topic: &str, response_topic: &str, payload: &[u8]) {
            self.scripts
                .lock()
                .entry(request_topic.to_string())
                .or_default()
                .push((response_topic.to_string(), payload.to_vec()));
        }

        /// Refuse subscriptions to `topic`
        pub fn fail_subscription(&self, topic: &str) {
            self.failing_subscriptions.lock().push(topic.to_string());
        }

        /// Deliver a payload directly to the registered handler, as the
        /// I/O task would
        pub fn deliver(&self, topic: &str, payload: &[u8]) {
            let handler = self.handlers.lock().get(topic).cloned();
            if let Some(handler) = handler {
                handler(topic, payload);
            }
        }

        pub fn subscribed_topics(&self) -> Vec<String> {
            self.subscriptions.lock().clone()
        }

        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.publishes.lock().clone()
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn subscribe(&self, topic: &str, handler: MessageHandler) -> ProvisionResult<()> {
            if self.failing_subscriptions.lock().iter().any(|t| t == topic) {
                return Err(ProvisionError::SubscriptionError {
                    topic: topic.to_string(),
                    reason: "scripted refusal".to_string(),
                });
            }
            self.handlers
                .lock()
                .insert(topic.to_string(), Arc::from(handler));
            self.subscriptions.lock().push(topic.to_string());
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> ProvisionResult<()> {
            self.publishes.lock().push((topic.to_string(), payload));
            let responses = self
                .scripts
                .lock()
                .get(topic)
                .cloned()
                .unwrap_or_default();
            for (response_topic, response_payload) in responses {
                self.deliver(&response_topic, &response_payload);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedConnection;
    use super::*;

    #[tokio::test]
    async fn test_scripted_delivery_reaches_handler() {
        let connection = ScriptedConnection::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        connection
            .subscribe(
                "devices/iot_abc/data",
                Box::new(move |_topic, payload| sink.lock().push(payload.to_vec())),
            )
            .await
            .unwrap();

        connection.deliver("devices/iot_abc/data", b"reading");
        connection.deliver("devices/other/data", b"ignored");

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], b"reading");
    }

    #[tokio::test]
    async fn test_scripted_subscription_refusal() {
        let connection = ScriptedConnection::new();
        connection.fail_subscription("$aws/certificates/create/json/accepted");

        let err = connection
            .subscribe(
                "$aws/certificates/create/json/accepted",
                Box::new(|_, _| {}),
            )
            .await
            .unwrap_err();

        match err {
            ProvisionError::SubscriptionError { topic, .. } => {
                assert_eq!(topic, "$aws/certificates/create/json/accepted");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
