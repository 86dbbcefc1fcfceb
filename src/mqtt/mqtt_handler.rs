//! rumqttc implementation of the transport seam
//!
//! Every connect builds a fresh `AsyncClient`/`EventLoop` pair. The dispatcher
//! owns the retry policy, so rumqttc's own reconnect-on-next-poll behaviour is
//! never used: a failed poll ends the session.
//!
//! Subscribe requests go through a bounded queue that only `EventLoop::poll`
//! empties, so a subscribe that finds it full polls the loop itself and keeps
//! whatever arrives for the next receive.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, QoS, SubscribeReasonCode,
};
use tracing::{debug, info, warn};

use super::config::BrokerSettings;
use super::transport::{Connection, Delivery, InboundMessage, Transport};
use crate::error::{ConnectionError, SubscriptionError};

/// Request queue between client handle and event loop
const REQUEST_CAPACITY: usize = 100;
const DISCONNECT_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct RumqttcTransport;

impl RumqttcTransport {
    pub fn new() -> Self {
        Self
    }

    fn options(settings: &BrokerSettings) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        mqtt_options
            .set_keep_alive(settings.keep_alive())
            .set_clean_session(true);
        if let Some(credentials) = &settings.credentials {
            mqtt_options.set_credentials(credentials.user.clone(), credentials.password.clone());
        }
        mqtt_options
    }
}

impl Transport for RumqttcTransport {
    type Connection = RumqttcConnection;

    async fn connect(
        &mut self,
        settings: &BrokerSettings,
    ) -> Result<RumqttcConnection, ConnectionError> {
        debug!("Opening MQTT session to {}", settings);
        let (client, mut eventloop) = AsyncClient::new(Self::options(settings), REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("Broker {} accepted connection", settings);
                        return Ok(RumqttcConnection::new(client, eventloop));
                    }
                    return Err(ConnectionError::Refused(format!("{:?}", ack.code)));
                }
                Ok(event) => debug!("Ignoring pre-connack event {:?}", event),
                Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                    return Err(ConnectionError::Refused(format!("{:?}", code)));
                }
                Err(e) => {
                    return Err(ConnectionError::Unreachable {
                        host: settings.host.clone(),
                        port: settings.port,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

pub struct RumqttcConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Patterns requested but not yet handed a packet id by the event loop
    unsent: VecDeque<String>,
    /// Packet id -> pattern, awaiting SUBACK
    awaiting_ack: HashMap<u16, String>,
    /// Deliveries polled while a subscribe waited for request queue space
    buffered: VecDeque<Delivery>,
    /// Stream failure hit while subscribing, reported by the next receive
    failure: Option<ConnectionError>,
    closed: bool,
}

impl RumqttcConnection {
    fn new(client: AsyncClient, eventloop: EventLoop) -> Self {
        Self {
            client,
            eventloop,
            unsent: VecDeque::new(),
            awaiting_ack: HashMap::new(),
            buffered: VecDeque::new(),
            failure: None,
            closed: false,
        }
    }

    /// Polls one event loop step, returning anything the dispatcher must see
    async fn poll_once(&mut self) -> Result<Option<Delivery>, ConnectionError> {
        let event = self
            .eventloop
            .poll()
            .await
            .map_err(|e| ConnectionError::StreamClosed(e.to_string()))?;

        match event {
            Event::Incoming(Incoming::Publish(publish)) => Ok(Some(Delivery::Message(
                InboundMessage::new(publish.topic, publish.payload.to_vec()),
            ))),
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                if let Some(pattern) = self.unsent.pop_front() {
                    self.awaiting_ack.insert(pkid, pattern);
                }
                Ok(None)
            }
            Event::Incoming(Incoming::SubAck(ack)) => {
                let Some(pattern) = self.awaiting_ack.remove(&ack.pkid) else {
                    return Ok(None);
                };
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Ok(Some(Delivery::SubscriptionRejected(
                        SubscriptionError::Rejected { pattern },
                    )));
                }
                debug!("Subscription to {} acknowledged", pattern);
                Ok(None)
            }
            Event::Incoming(Incoming::Disconnect) => Err(ConnectionError::StreamClosed(
                "broker sent DISCONNECT".to_owned(),
            )),
            _ => Ok(None),
        }
    }
}

impl Connection for RumqttcConnection {
    async fn subscribe(&mut self, pattern: &str) -> Result<(), SubscriptionError> {
        let request_failed = |reason: String| SubscriptionError::Request {
            pattern: pattern.to_owned(),
            reason,
        };
        if let Some(failure) = &self.failure {
            return Err(request_failed(failure.to_string()));
        }

        loop {
            match self.client.try_subscribe(pattern, QoS::AtMostOnce) {
                Ok(()) => break,
                // Queue full; only the event loop drains it
                Err(ClientError::TryRequest(_)) => match self.poll_once().await {
                    Ok(Some(delivery)) => self.buffered.push_back(delivery),
                    Ok(None) => {}
                    Err(e) => {
                        let reason = e.to_string();
                        self.failure = Some(e);
                        return Err(request_failed(reason));
                    }
                },
                Err(e) => return Err(request_failed(e.to_string())),
            }
        }

        self.unsent.push_back(pattern.to_owned());
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, ConnectionError> {
        if let Some(delivery) = self.buffered.pop_front() {
            return Ok(delivery);
        }
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }

        loop {
            if let Some(delivery) = self.poll_once().await? {
                return Ok(delivery);
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
            return;
        }

        // The DISCONNECT packet only leaves when the event loop is polled
        let drain = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_DRAIN, drain).await.is_err() {
            warn!("Broker did not take the DISCONNECT in time, dropping socket");
        }
    }
}
