//! End-to-end dispatcher behaviour over a scripted in-memory transport

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tasmota_dash::config::{BrokerSettings, MqttConfig};
use tasmota_dash::error::{ConnectionError, SubscriptionError};
use tasmota_dash::events::{
    DashboardEvent, DeviceEvent, DeviceEventKind, Diagnostic, DiagnosticKind,
};
use tasmota_dash::mqtt::transport::{Connection, Delivery, InboundMessage, Transport};
use tasmota_dash::{ConnectionState, Dispatcher};
use tokio::sync::broadcast;

const REJECTED_PATTERN: &str = "rejected/#";

const STATE: &str = r#"{"Time":"2024-05-20T13:36:54","Uptime":"0T00:17:11","UptimeSec":1031,"Heap":25,"SleepMode":"Dynamic","Sleep":50,"LoadAvg":19,"MqttCount":1,"POWER":"ON","Wifi":{"AP":1,"SSId":"home","BSSId":"AA:BB:CC:DD:EE:FF","Channel":6,"Mode":"11n","RSSI":62,"Signal":-69,"LinkCount":1,"Downtime":"0T00:00:03"}}"#;

fn discovery_payload(id: &str, ip: &str) -> String {
    format!(
        r#"{{"ip":"{ip}","dn":"Plug1","fn":["Plug1",null],"hn":"{id}-host","mac":"A4CF12CEE97F","md":"Sonoff Basic","ty":0,"if":0,"ofln":"Offline","onln":"Online","state":["OFF","ON","TOGGLE","HOLD"],"sw":"13.2.0","t":"{id}","ft":"%prefix%/%topic%/","tp":["cmnd","stat","tele"],"rl":[1,0],"swc":[-1,-1],"swn":[null,null],"btn":[0,0],"so":{{"4":0}},"lk":0,"lt_st":0,"bat":0,"dslp":0,"sho":[],"sht":[],"ver":1}}"#
    )
}

fn message(topic: &str, payload: impl Into<Vec<u8>>) -> Result<Delivery, ConnectionError> {
    Ok(Delivery::Message(InboundMessage::new(topic, payload)))
}

/// Ordered record of every transport call
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

type Script = Vec<Result<Delivery, ConnectionError>>;

/// Each connect consumes one script; once they run out the broker is unreachable
struct ScriptedTransport {
    sessions: VecDeque<Script>,
    journal: Journal,
}

impl ScriptedTransport {
    fn new(sessions: Vec<Script>) -> (Self, Journal) {
        let journal = Journal::default();
        let transport = Self {
            sessions: sessions.into(),
            journal: journal.clone(),
        };
        (transport, journal)
    }
}

struct ScriptedConnection {
    script: VecDeque<Result<Delivery, ConnectionError>>,
    journal: Journal,
}

impl Transport for ScriptedTransport {
    type Connection = ScriptedConnection;

    async fn connect(
        &mut self,
        settings: &BrokerSettings,
    ) -> Result<ScriptedConnection, ConnectionError> {
        self.journal.push("connect".to_owned());
        match self.sessions.pop_front() {
            Some(script) => Ok(ScriptedConnection {
                script: script.into(),
                journal: self.journal.clone(),
            }),
            None => Err(ConnectionError::Unreachable {
                host: settings.host.clone(),
                port: settings.port,
                reason: "script exhausted".to_owned(),
            }),
        }
    }
}

impl Connection for ScriptedConnection {
    async fn subscribe(&mut self, pattern: &str) -> Result<(), SubscriptionError> {
        self.journal.push(format!("subscribe {}", pattern));
        if pattern == REJECTED_PATTERN {
            return Err(SubscriptionError::Request {
                pattern: pattern.to_owned(),
                reason: "not authorized".to_owned(),
            });
        }
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, ConnectionError> {
        match self.script.pop_front() {
            Some(delivery) => delivery,
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) {
        self.journal.push("disconnect".to_owned());
    }
}

fn config(subscriptions: &[&str]) -> MqttConfig {
    MqttConfig {
        subscriptions: subscriptions.iter().map(|s| s.to_string()).collect(),
        reconnect_interval_ms: 10,
        ..MqttConfig::default()
    }
}

async fn next_event(receiver: &mut broadcast::Receiver<DashboardEvent>) -> DashboardEvent {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for a dashboard event")
        .expect("event stream closed")
}

async fn next_device_event(receiver: &mut broadcast::Receiver<DashboardEvent>) -> DeviceEvent {
    loop {
        if let DashboardEvent::Device(event) = next_event(receiver).await {
            return event;
        }
    }
}

async fn next_diagnostic(
    receiver: &mut broadcast::Receiver<DashboardEvent>,
    kind: DiagnosticKind,
) -> Diagnostic {
    loop {
        if let DashboardEvent::Diagnostic(diagnostic) = next_event(receiver).await {
            if diagnostic.kind == kind {
                return diagnostic;
            }
        }
    }
}

#[tokio::test]
async fn reconnect_resubscribes_in_order_and_keeps_device_state() {
    let patterns = ["tasmota/discovery/+/+", "tele/+/+"];
    let (transport, journal) = ScriptedTransport::new(vec![
        vec![
            message(
                "tasmota/discovery/plug1/config",
                discovery_payload("plug1", "10.0.0.5"),
            ),
            message("tele/plug1/STATE", STATE),
            Err(ConnectionError::StreamClosed("connection reset".to_owned())),
        ],
        vec![message("tele/plug1/LWT", "Offline")],
    ]);

    let dispatcher = Dispatcher::new(transport, config(&patterns)).unwrap();
    let mut events = dispatcher.subscribe();
    let registry = dispatcher.registry();
    let mut handle = dispatcher.spawn();

    let kinds = [
        next_device_event(&mut events).await.kind,
        next_device_event(&mut events).await.kind,
        next_device_event(&mut events).await.kind,
    ];
    assert_eq!(
        kinds,
        [
            DeviceEventKind::Discovery,
            DeviceEventKind::State,
            DeviceEventKind::Offline
        ]
    );

    handle.shutdown().await.unwrap();

    let device = registry.lookup("plug1").await.unwrap();
    assert_eq!(device.ip_address.as_deref(), Some("10.0.0.5"));
    assert!(!device.is_online);
    assert!(device.last_state.is_some());
    assert_eq!(registry.len().await, 1);

    assert_eq!(
        journal.entries(),
        vec![
            "connect",
            "subscribe tasmota/discovery/+/+",
            "subscribe tele/+/+",
            "disconnect",
            "connect",
            "subscribe tasmota/discovery/+/+",
            "subscribe tele/+/+",
            "disconnect",
        ]
    );

    let status = handle.status().borrow().clone();
    assert_eq!(status.connection_state, ConnectionState::Stopped);
    assert_eq!(status.messages_received, 3);
    assert_eq!(status.messages_dropped, 0);
    assert_eq!(status.reconnect_attempts, 1);
}

#[tokio::test]
async fn bad_messages_never_stop_the_loop() {
    let (transport, _journal) = ScriptedTransport::new(vec![vec![
        message("tele/ghost/STATE", STATE),
        message("tele/plug1/SENSOR", "{not json"),
        message("stat/plug1/RESULT", "{}"),
        message(
            "tasmota/discovery/plug1/config",
            discovery_payload("plug1", "10.0.0.7"),
        ),
    ]]);

    let dispatcher = Dispatcher::new(transport, config(&["#"])).unwrap();
    let mut events = dispatcher.subscribe();
    let mut handle = dispatcher.spawn();

    let unknown = next_diagnostic(&mut events, DiagnosticKind::UnknownDevice).await;
    assert!(unknown.message.contains("ghost"));
    next_diagnostic(&mut events, DiagnosticKind::DecodeFailed).await;
    let unrecognized = next_diagnostic(&mut events, DiagnosticKind::UnrecognizedTopic).await;
    assert!(unrecognized.message.contains("stat/plug1/RESULT"));

    let discovered = next_device_event(&mut events).await;
    assert_eq!(discovered.kind, DeviceEventKind::Discovery);
    assert_eq!(discovered.device_id.as_str(), "plug1");

    let registry = handle.registry();
    assert_eq!(registry.len().await, 1);
    assert!(registry.lookup("ghost").await.is_none());

    handle.shutdown().await.unwrap();
    let status = handle.status().borrow().clone();
    assert_eq!(status.messages_received, 4);
    assert_eq!(status.messages_dropped, 3);
}

#[tokio::test]
async fn absurd_uptime_is_dropped_and_processing_continues() {
    let overflowing = STATE.replace("0T00:17:11", "300000000000000T00:00:00");
    let (transport, _journal) = ScriptedTransport::new(vec![vec![
        message(
            "tasmota/discovery/plug1/config",
            discovery_payload("plug1", "10.0.0.5"),
        ),
        message("tele/plug1/STATE", overflowing),
        message("tele/plug1/LWT", "Offline"),
    ]]);

    let dispatcher = Dispatcher::new(transport, config(&["tele/+/+"])).unwrap();
    let mut events = dispatcher.subscribe();
    let mut handle = dispatcher.spawn();

    let failed = next_diagnostic(&mut events, DiagnosticKind::DecodeFailed).await;
    assert!(failed.message.contains("tele/plug1/STATE"));
    let offline = next_device_event(&mut events).await;
    assert_eq!(offline.kind, DeviceEventKind::Offline);

    handle.shutdown().await.unwrap();
    let device = handle.registry().lookup("plug1").await.unwrap();
    assert!(device.last_state.is_none());
    assert!(!device.is_online);
}

#[tokio::test]
async fn failed_subscription_does_not_abort_the_others() {
    let (transport, journal) = ScriptedTransport::new(vec![vec![Ok(
        Delivery::SubscriptionRejected(SubscriptionError::Rejected {
            pattern: "tele/+/+".to_owned(),
        }),
    )]]);

    let dispatcher =
        Dispatcher::new(transport, config(&[REJECTED_PATTERN, "tele/+/+"])).unwrap();
    let mut events = dispatcher.subscribe();
    let mut handle = dispatcher.spawn();

    let refused = next_diagnostic(&mut events, DiagnosticKind::SubscriptionFailed).await;
    assert!(refused.message.contains(REJECTED_PATTERN));
    let rejected = next_diagnostic(&mut events, DiagnosticKind::SubscriptionFailed).await;
    assert!(rejected.message.contains("tele/+/+"));

    handle
        .status()
        .wait_for(|status| status.connection_state == ConnectionState::Subscribed)
        .await
        .unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(
        journal.entries(),
        vec![
            "connect",
            "subscribe rejected/#",
            "subscribe tele/+/+",
            "disconnect"
        ]
    );
}

#[tokio::test]
async fn stop_during_backoff_is_prompt() {
    let (transport, journal) = ScriptedTransport::new(Vec::new());
    let config = MqttConfig {
        reconnect_interval_ms: 60_000,
        ..config(&["tele/+/+"])
    };

    let dispatcher = Dispatcher::new(transport, config).unwrap();
    let mut events = dispatcher.subscribe();
    let mut handle = dispatcher.spawn();
    let failed = loop {
        let diagnostic = next_diagnostic(&mut events, DiagnosticKind::Connection).await;
        if diagnostic.message.contains("script exhausted") {
            break diagnostic;
        }
    };
    assert!(failed.message.contains("retrying"));

    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("shutdown waited for the backoff")
        .unwrap();
    assert_eq!(journal.entries(), vec!["connect"]);
}
