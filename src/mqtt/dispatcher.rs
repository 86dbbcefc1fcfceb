//! Dispatcher with statum state machine for the broker session lifecycle
//!
//! Owns the single processing path of the dashboard core: it connects,
//! subscribes, routes every inbound message in arrival order, and reconnects
//! after a fixed backoff whenever the stream fails. Retries never give up;
//! only a stop request ends the loop.
//!
//! # State Machine
//!
//! ```text
//!                 start            connect + subscribe
//! Disconnected ─────────► Connecting ─────────────────► Subscribed
//!      ▲                      │                              │
//!      │     connect failed   │          stream error        │
//!      └──────────────────────┴──────────────────────────────┘
//!                       (after backoff)
//!
//! any state ──(stop token cancelled)──► Stopped
//! ```
//!
//! # Architecture
//!
//! ```text
//! Transport ──► Connection ──► [MessageRouter] ──► DeviceRegistry
//!                  ▲                 │
//!        SubscriptionManager         ▼
//!                               EventSink ──► observers
//! ```
//!
//! The connection is released on every exit path: after a stream error,
//! after a stop request, and (by drop) if the task unwinds.

use chrono::{DateTime, Local};
use statum::{machine, state};
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{BrokerSettings, MqttConfig};
use super::router::MessageRouter;
use super::subscriptions::SubscriptionManager;
use super::transport::{Connection, Delivery, Transport};
use crate::error::{ConfigError, DispatcherError};
use crate::events::{DashboardEvent, DiagnosticKind, EventSink};
use crate::registry::{DeviceRegistry, RegistryView};

/// Connection lifecycle as seen by observers
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Subscribed => write!(f, "subscribed"),
            ConnectionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Counters published alongside the connection state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_dropped: usize,
    pub reconnect_attempts: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Session lifecycle states using statum
#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

/// Broker session with compile-time state safety via statum
///
/// The transport and its connection are passed into the state methods rather
/// than stored, so one session value survives any number of reconnects.
#[machine]
pub struct Session<S: SessionPhase> {
    settings: BrokerSettings,
    backoff: Duration,
    subscriptions: SubscriptionManager,
    router: MessageRouter,
    events: EventSink,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

/// Outcome of a connection attempt
pub enum Established<C> {
    Subscribed(Session<Subscribed>, C),
    Failed(Session<Disconnected>),
    Stopped(Session<Stopped>),
}

impl<S: SessionPhase> Session<S> {
    fn enter(&self, state: ConnectionState) {
        self.status
            .send_modify(|status| status.connection_state = state);
        debug!("Session state: {}", state);
    }
}

impl Session<Disconnected> {
    pub fn create(
        config: &MqttConfig,
        router: MessageRouter,
        events: EventSink,
        status: watch::Sender<SessionStatus>,
        cancel: CancellationToken,
    ) -> Self {
        info!(
            "Creating dispatcher session for {} with {} subscriptions",
            config.connection,
            config.subscriptions.len()
        );
        Self::new(
            config.connection.clone(),
            config.reconnect_interval(),
            SubscriptionManager::new(config.subscriptions.clone()),
            router,
            events,
            status,
            cancel,
        )
    }

    pub fn start(self) -> Session<Connecting> {
        self.events.diagnostic(
            DiagnosticKind::Connection,
            format!("Connecting to {}", self.settings),
        );
        self.enter(ConnectionState::Connecting);
        self.transition()
    }

    /// Sleeps out the backoff interval unless a stop request arrives first
    pub async fn wait_backoff(self) -> Result<Session<Disconnected>, Session<Stopped>> {
        debug!("Backing off for {:?}", self.backoff);
        let stopped = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(self.backoff) => false,
        };

        if stopped {
            return Err(self.stop());
        }
        self.status
            .send_modify(|status| status.reconnect_attempts += 1);
        Ok(self)
    }

    pub fn stop(self) -> Session<Stopped> {
        self.enter(ConnectionState::Stopped);
        self.transition()
    }
}

impl Session<Connecting> {
    /// Connects and issues the subscription set; cancellable at every await
    pub async fn establish<T: Transport>(self, transport: &mut T) -> Established<T::Connection> {
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = transport.connect(&self.settings) => Some(result),
        };

        let mut connection = match connected {
            None => return Established::Stopped(self.stop()),
            Some(Err(e)) => {
                self.events.diagnostic(
                    DiagnosticKind::Connection,
                    format!("{}; retrying in {:?}", e, self.backoff),
                );
                self.enter(ConnectionState::Disconnected);
                return Established::Failed(self.transition());
            }
            Some(Ok(connection)) => connection,
        };

        let subscribed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            report = self.subscriptions.subscribe_all(&mut connection, &self.events) => {
                if !report.failed.is_empty() {
                    warn!("{} subscriptions failed", report.failed.len());
                }
                true
            }
        };

        if !subscribed {
            connection.disconnect().await;
            return Established::Stopped(self.stop());
        }

        self.events.diagnostic(
            DiagnosticKind::Connection,
            format!(
                "Connected to {}, subscribed to {}",
                self.settings,
                self.subscriptions.patterns().join(", ")
            ),
        );
        self.enter(ConnectionState::Subscribed);
        Established::Subscribed(self.transition(), connection)
    }

    pub fn stop(self) -> Session<Stopped> {
        self.enter(ConnectionState::Stopped);
        self.transition()
    }
}

impl Session<Subscribed> {
    /// Routes deliveries in arrival order until the stream fails or a stop arrives.
    ///
    /// The caller still owns `connection` and must disconnect it afterwards.
    pub async fn consume<C: Connection>(
        self,
        connection: &mut C,
    ) -> Result<Session<Stopped>, Session<Disconnected>> {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                delivery = connection.next_delivery() => Some(delivery),
            };

            match delivery {
                None => {
                    info!("Stop requested while subscribed");
                    return Ok(self.stop());
                }
                Some(Ok(Delivery::Message(message))) => {
                    let applied = self.router.route(&message).await.is_applied();
                    self.status.send_modify(|status| {
                        status.messages_received += 1;
                        if !applied {
                            status.messages_dropped += 1;
                        }
                        status.last_activity = Some(message.received_at);
                    });
                }
                Some(Ok(Delivery::SubscriptionRejected(e))) => {
                    self.events
                        .diagnostic(DiagnosticKind::SubscriptionFailed, e.to_string());
                }
                Some(Err(e)) => {
                    self.events.diagnostic(
                        DiagnosticKind::Connection,
                        format!("Connection lost: {}; retrying in {:?}", e, self.backoff),
                    );
                    self.enter(ConnectionState::Disconnected);
                    return Err(self.transition());
                }
            }
        }
    }

    pub fn stop(self) -> Session<Stopped> {
        self.enter(ConnectionState::Stopped);
        self.transition()
    }
}

impl Session<Stopped> {
    pub fn finish(self) {
        let status = self.status.borrow().clone();
        self.events.diagnostic(
            DiagnosticKind::Connection,
            format!(
                "Dispatcher stopped after {} messages ({} dropped)",
                status.messages_received, status.messages_dropped
            ),
        );
    }
}

/// Drives one session through connect/consume/backoff cycles until stopped
async fn run_dispatcher_loop<T: Transport>(mut transport: T, session: Session<Disconnected>) {
    let mut session = session;
    loop {
        let disconnected = match session.start().establish(&mut transport).await {
            Established::Subscribed(subscribed, mut connection) => {
                let outcome = subscribed.consume(&mut connection).await;
                connection.disconnect().await;
                match outcome {
                    Ok(stopped) => return stopped.finish(),
                    Err(disconnected) => disconnected,
                }
            }
            Established::Failed(disconnected) => disconnected,
            Established::Stopped(stopped) => return stopped.finish(),
        };

        session = match disconnected.wait_backoff().await {
            Ok(session) => session,
            Err(stopped) => return stopped.finish(),
        };
    }
}

/// Validated, not yet running dispatcher.
///
/// Observers should subscribe before [`Dispatcher::spawn`] so they see the
/// very first events.
pub struct Dispatcher<T: Transport> {
    transport: T,
    config: MqttConfig,
    registry: DeviceRegistry,
    events: EventSink,
}

impl<T: Transport> Dispatcher<T> {
    /// Fails only on configuration the dispatcher can never run with
    pub fn new(transport: T, config: MqttConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            registry: DeviceRegistry::new(),
            events: EventSink::default(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> RegistryView {
        self.registry.view()
    }

    /// Starts the processing loop in a tokio task
    pub fn spawn(self) -> DispatcherHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let view = self.registry.view();
        let events = self.events.clone();

        let router = MessageRouter::new(self.registry, self.events.clone());
        let session = Session::<Disconnected>::create(
            &self.config,
            router,
            self.events,
            status_tx,
            cancel.clone(),
        );

        let transport = self.transport;
        let task_handle = tokio::spawn(async move {
            info!("Dispatcher task started");
            run_dispatcher_loop(transport, session).await;
            info!("Dispatcher task finished");
        });

        DispatcherHandle {
            registry: view,
            events,
            status: status_rx,
            cancel,
            task_handle: Some(task_handle),
        }
    }
}

/// Handle for a running dispatcher; dropping it stops the dispatcher
#[derive(Debug)]
pub struct DispatcherHandle {
    registry: RegistryView,
    events: EventSink,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> RegistryView {
        self.registry.clone()
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Token that stops the dispatcher when cancelled, e.g. from a signal handler
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests a stop and waits for the task to release its connection
    pub async fn shutdown(&mut self) -> Result<(), DispatcherError> {
        debug!("Sending stop signal to dispatcher");
        self.cancel.cancel();

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Dispatcher task panicked: {}", e);
                DispatcherError::TaskPanicked(e.to_string())
            }),
            None => {
                debug!("Dispatcher already shut down");
                Ok(())
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, SubscriptionError};

    struct Unreachable;

    struct NeverConnected;

    impl Connection for NeverConnected {
        async fn subscribe(&mut self, _pattern: &str) -> Result<(), SubscriptionError> {
            Ok(())
        }

        async fn next_delivery(&mut self) -> Result<Delivery, ConnectionError> {
            std::future::pending().await
        }

        async fn disconnect(&mut self) {}
    }

    impl Transport for Unreachable {
        type Connection = NeverConnected;

        async fn connect(
            &mut self,
            settings: &BrokerSettings,
        ) -> Result<NeverConnected, ConnectionError> {
            Err(ConnectionError::Unreachable {
                host: settings.host.clone(),
                port: settings.port,
                reason: "connection refused".to_owned(),
            })
        }
    }

    fn fast_config() -> MqttConfig {
        MqttConfig {
            reconnect_interval_ms: 5,
            ..MqttConfig::default()
        }
    }

    #[test]
    fn empty_subscription_set_is_rejected_up_front() {
        let config = MqttConfig {
            subscriptions: Vec::new(),
            ..MqttConfig::default()
        };
        assert!(matches!(
            Dispatcher::new(Unreachable, config),
            Err(ConfigError::NoSubscriptions)
        ));
    }

    #[tokio::test]
    async fn keeps_retrying_an_unreachable_broker_until_stopped() {
        let dispatcher = Dispatcher::new(Unreachable, fast_config()).unwrap();
        let mut handle = dispatcher.spawn();
        let mut status = handle.status();

        status
            .wait_for(|status| status.reconnect_attempts >= 3)
            .await
            .unwrap();
        handle.shutdown().await.unwrap();

        assert_eq!(
            handle.status().borrow().connection_state,
            ConnectionState::Stopped
        );
        assert!(handle.registry().is_empty().await);
    }

    #[tokio::test]
    async fn stop_interrupts_a_blocked_stream() {
        struct Silent;
        impl Transport for Silent {
            type Connection = NeverConnected;
            async fn connect(
                &mut self,
                _settings: &BrokerSettings,
            ) -> Result<NeverConnected, ConnectionError> {
                Ok(NeverConnected)
            }
        }

        let mut handle = Dispatcher::new(Silent, fast_config()).unwrap().spawn();
        let mut status = handle.status();
        status
            .wait_for(|status| status.connection_state == ConnectionState::Subscribed)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown timed out")
            .unwrap();
        assert_eq!(
            handle.status().borrow().connection_state,
            ConnectionState::Stopped
        );
    }

    #[tokio::test]
    async fn stop_interrupts_a_hanging_connect() {
        struct Blackhole;
        impl Transport for Blackhole {
            type Connection = NeverConnected;
            async fn connect(
                &mut self,
                _settings: &BrokerSettings,
            ) -> Result<NeverConnected, ConnectionError> {
                std::future::pending().await
            }
        }

        let mut handle = Dispatcher::new(Blackhole, fast_config()).unwrap().spawn();
        let mut status = handle.status();
        status
            .wait_for(|status| status.connection_state == ConnectionState::Connecting)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown timed out")
            .unwrap();
        let status = handle.status().borrow().clone();
        assert_eq!(status.connection_state, ConnectionState::Stopped);
        assert_eq!(status.reconnect_attempts, 0);
    }
}
