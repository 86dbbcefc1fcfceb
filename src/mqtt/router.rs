//! Per-message processing: classify, decode, apply, notify
//!
//! Every failure mode of a single message ends here as a diagnostic. Nothing
//! in this module returns an error to the dispatcher loop.

use tracing::debug;

use super::topic::{classify, device_id_from_topic, MessageKind};
use super::transport::InboundMessage;
use crate::error::{DecodeError, UnknownDeviceError};
use crate::events::{DeviceEvent, DeviceEventKind, DeviceEventPayload, DiagnosticKind, EventSink};
use crate::payload::{self, Availability, DiscoveryRecord};
use crate::registry::{DeviceId, DeviceRegistry};

/// Why a message did not reach the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnrecognizedTopic,
    MissingDeviceId,
    Decode(DecodeError),
    UnknownDevice(UnknownDeviceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied(DeviceEventKind, DeviceId),
    Dropped(DropReason),
}

impl RouteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RouteOutcome::Applied(..))
    }
}

pub struct MessageRouter {
    registry: DeviceRegistry,
    events: EventSink,
}

impl MessageRouter {
    pub fn new(registry: DeviceRegistry, events: EventSink) -> Self {
        Self { registry, events }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub async fn route(&self, message: &InboundMessage) -> RouteOutcome {
        let topic = message.topic.as_str();
        let kind = classify(topic);
        debug!("Routing {} message on {}", kind, topic);

        let outcome = match kind {
            MessageKind::Unrecognized => {
                self.events.diagnostic(
                    DiagnosticKind::UnrecognizedTopic,
                    format!("Unrecognized topic: {}", topic),
                );
                return RouteOutcome::Dropped(DropReason::UnrecognizedTopic);
            }
            MessageKind::Discovery => self.on_discovery(message).await,
            MessageKind::State => self.on_state(message).await,
            MessageKind::Telemetry => self.on_telemetry(message).await,
            MessageKind::LastWill => self.on_last_will(message).await,
        };

        match outcome {
            Ok(event) => {
                let applied = RouteOutcome::Applied(event.kind, event.device_id.clone());
                self.events.device(event);
                applied
            }
            Err(reason) => {
                self.report(topic, &reason);
                RouteOutcome::Dropped(reason)
            }
        }
    }

    fn report(&self, topic: &str, reason: &DropReason) {
        match reason {
            DropReason::Decode(e) => self
                .events
                .diagnostic(DiagnosticKind::DecodeFailed, e.to_string()),
            DropReason::UnknownDevice(e) => self
                .events
                .diagnostic(DiagnosticKind::UnknownDevice, format!("{} on {}", e, topic)),
            DropReason::MissingDeviceId => self.events.diagnostic(
                DiagnosticKind::UnrecognizedTopic,
                format!("No device id in topic: {}", topic),
            ),
            DropReason::UnrecognizedTopic => self.events.diagnostic(
                DiagnosticKind::UnrecognizedTopic,
                format!("Unrecognized topic: {}", topic),
            ),
        }
    }

    async fn on_discovery(&self, message: &InboundMessage) -> Result<DeviceEvent, DropReason> {
        let record = payload::decode_discovery(&message.topic, &message.payload)
            .map_err(DropReason::Decode)?;
        let id = discovery_device_id(&message.topic, &record).ok_or(DropReason::MissingDeviceId)?;

        self.registry.upsert_from_discovery(id.clone(), &record).await;
        Ok(DeviceEvent {
            kind: DeviceEventKind::Discovery,
            device_id: id,
            payload: DeviceEventPayload::Discovery(Box::new(record)),
        })
    }

    async fn on_state(&self, message: &InboundMessage) -> Result<DeviceEvent, DropReason> {
        let snapshot =
            payload::decode_state(&message.topic, &message.payload).map_err(DropReason::Decode)?;
        let id = device_id_from_topic(&message.topic).ok_or(DropReason::MissingDeviceId)?;

        self.registry
            .apply_state(&id, snapshot.clone())
            .await
            .map_err(DropReason::UnknownDevice)?;
        Ok(DeviceEvent {
            kind: DeviceEventKind::State,
            device_id: id,
            payload: DeviceEventPayload::State(snapshot),
        })
    }

    async fn on_telemetry(&self, message: &InboundMessage) -> Result<DeviceEvent, DropReason> {
        let snapshot = payload::decode_telemetry(&message.topic, &message.payload)
            .map_err(DropReason::Decode)?;
        let id = device_id_from_topic(&message.topic).ok_or(DropReason::MissingDeviceId)?;

        self.registry
            .apply_telemetry(&id, snapshot.clone())
            .await
            .map_err(DropReason::UnknownDevice)?;
        Ok(DeviceEvent {
            kind: DeviceEventKind::Telemetry,
            device_id: id,
            payload: DeviceEventPayload::Telemetry(snapshot),
        })
    }

    async fn on_last_will(&self, message: &InboundMessage) -> Result<DeviceEvent, DropReason> {
        let id = device_id_from_topic(&message.topic).ok_or(DropReason::MissingDeviceId)?;
        let literals = self.registry.availability_literals(&id).await;
        let availability = payload::decode_last_will(&message.topic, &message.payload, &literals)
            .map_err(DropReason::Decode)?;

        let (kind, changed) = match availability {
            Availability::Online => (DeviceEventKind::Online, self.registry.mark_online(&id).await),
            Availability::Offline => (
                DeviceEventKind::Offline,
                self.registry.mark_offline(&id).await,
            ),
        };
        let changed = changed.map_err(DropReason::UnknownDevice)?;

        Ok(DeviceEvent {
            kind,
            device_id: id,
            payload: DeviceEventPayload::Availability {
                online: availability.is_online(),
                changed,
            },
        })
    }
}

/// The announced topic identifier wins; the topic segment is the fallback
fn discovery_device_id(topic: &str, record: &DiscoveryRecord) -> Option<DeviceId> {
    let from_topic = device_id_from_topic(topic);
    if record.topic.is_empty() {
        return from_topic;
    }

    let id = DeviceId::new(record.topic.clone());
    if from_topic.as_ref() != Some(&id) {
        debug!(
            "Discovery topic {} announces device id {}, using the announced id",
            topic, id
        );
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DashboardEvent, Diagnostic};
    use crate::payload::samples;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::broadcast::Receiver;

    fn router() -> (MessageRouter, Receiver<DashboardEvent>) {
        let events = EventSink::new(64);
        let receiver = events.subscribe();
        (MessageRouter::new(DeviceRegistry::new(), events), receiver)
    }

    fn drain(receiver: &mut Receiver<DashboardEvent>) -> Vec<DashboardEvent> {
        let mut seen = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(event) => seen.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn diagnostics(events: &[DashboardEvent]) -> Vec<&Diagnostic> {
        events
            .iter()
            .filter_map(|event| match event {
                DashboardEvent::Diagnostic(diagnostic) => Some(diagnostic),
                _ => None,
            })
            .collect()
    }

    async fn discover(router: &MessageRouter, id: &str) {
        let message = InboundMessage::new(
            format!("tasmota/discovery/{}/config", id),
            samples::discovery(id, "10.0.0.5"),
        );
        assert!(router.route(&message).await.is_applied());
    }

    #[tokio::test]
    async fn discovery_registers_the_announced_device() {
        let (router, mut receiver) = router();
        discover(&router, "plug1").await;

        let view = router.registry().view();
        assert_eq!(view.len().await, 1);
        let device = view.lookup("plug1").await.unwrap();
        assert_eq!(device.ip_address.as_deref(), Some("10.0.0.5"));
        assert!(device.is_online);

        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            DashboardEvent::Device(DeviceEvent { kind: DeviceEventKind::Discovery, device_id, .. })
                if device_id.as_str() == "plug1"
        ));
    }

    #[tokio::test]
    async fn discovery_id_comes_from_the_payload() {
        let (router, _receiver) = router();
        let message = InboundMessage::new(
            "tasmota/discovery/A4CF12CEE97F/config",
            samples::discovery("plug1", "10.0.0.5"),
        );
        assert_eq!(
            router.route(&message).await,
            RouteOutcome::Applied(DeviceEventKind::Discovery, DeviceId::from("plug1"))
        );
        assert!(router.registry().lookup("A4CF12CEE97F").await.is_none());
    }

    #[tokio::test]
    async fn last_will_toggles_availability() {
        let (router, mut receiver) = router();
        discover(&router, "plug1").await;
        drain(&mut receiver);

        let offline = InboundMessage::new("tele/plug1/LWT", "Offline");
        assert_eq!(
            router.route(&offline).await,
            RouteOutcome::Applied(DeviceEventKind::Offline, DeviceId::from("plug1"))
        );
        assert!(!router.registry().lookup("plug1").await.unwrap().is_online);

        let online = InboundMessage::new("tele/plug1/LWT", "Online");
        router.route(&online).await;
        assert!(router.registry().lookup("plug1").await.unwrap().is_online);

        let kinds: Vec<DeviceEventKind> = drain(&mut receiver)
            .into_iter()
            .filter_map(|event| match event {
                DashboardEvent::Device(device) => Some(device.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![DeviceEventKind::Offline, DeviceEventKind::Online]);
    }

    #[tokio::test]
    async fn state_and_telemetry_land_on_the_record() {
        let (router, _receiver) = router();
        discover(&router, "plug1").await;

        router
            .route(&InboundMessage::new("tele/plug1/STATE", samples::STATE))
            .await;
        router
            .route(&InboundMessage::new("tele/plug1/SENSOR", samples::SENSOR))
            .await;

        let device = router.registry().lookup("plug1").await.unwrap();
        assert!(device.last_state.is_some());
        assert!(device.last_telemetry.unwrap().energy.is_some());
    }

    #[tokio::test]
    async fn state_for_undiscovered_device_is_a_diagnostic() {
        let (router, mut receiver) = router();

        let outcome = router
            .route(&InboundMessage::new("tele/ghost/STATE", samples::STATE))
            .await;

        assert!(matches!(
            outcome,
            RouteOutcome::Dropped(DropReason::UnknownDevice(_))
        ));
        assert_eq!(router.registry().len().await, 0);
        let events = drain(&mut receiver);
        let diagnostics = diagnostics(&events);
        assert_eq!(events.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnknownDevice);
    }

    #[tokio::test]
    async fn telemetry_for_undiscovered_device_is_a_diagnostic() {
        let (router, mut receiver) = router();
        discover(&router, "plug1").await;
        drain(&mut receiver);

        let outcome = router
            .route(&InboundMessage::new("tele/ghost/SENSOR", samples::SENSOR))
            .await;

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::UnknownDevice(UnknownDeviceError(
                DeviceId::from("ghost")
            )))
        );
        assert_eq!(router.registry().len().await, 1);
        assert!(router.registry().lookup("ghost").await.is_none());
        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        assert_eq!(diagnostics(&events)[0].kind, DiagnosticKind::UnknownDevice);
    }

    #[tokio::test]
    async fn last_will_for_undiscovered_device_is_a_diagnostic() {
        let (router, mut receiver) = router();

        let outcome = router
            .route(&InboundMessage::new("tele/ghost/LWT", "Offline"))
            .await;

        assert!(matches!(
            outcome,
            RouteOutcome::Dropped(DropReason::UnknownDevice(_))
        ));
        assert!(router.registry().view().is_empty().await);
        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        let diagnostic = diagnostics(&events)[0];
        assert_eq!(diagnostic.kind, DiagnosticKind::UnknownDevice);
        assert!(diagnostic.message.contains("tele/ghost/LWT"));
    }

    #[tokio::test]
    async fn malformed_json_is_one_diagnostic_and_no_mutation() {
        let (router, mut receiver) = router();
        discover(&router, "plug1").await;
        let before = router.registry().view().all().await;
        drain(&mut receiver);

        let outcome = router
            .route(&InboundMessage::new("tele/plug1/STATE", "{\"Time\": oops"))
            .await;

        assert!(matches!(outcome, RouteOutcome::Dropped(DropReason::Decode(_))));
        assert_eq!(router.registry().view().all().await, before);
        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        assert_eq!(diagnostics(&events)[0].kind, DiagnosticKind::DecodeFailed);
    }

    #[tokio::test]
    async fn unrecognized_topics_are_reported_and_dropped() {
        let (router, mut receiver) = router();

        let outcome = router
            .route(&InboundMessage::new("stat/plug1/RESULT", "{}"))
            .await;

        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::UnrecognizedTopic));
        let events = drain(&mut receiver);
        assert_eq!(events.len(), 1);
        let diagnostic = diagnostics(&events)[0];
        assert_eq!(diagnostic.kind, DiagnosticKind::UnrecognizedTopic);
        assert!(diagnostic.message.contains("stat/plug1/RESULT"));
    }

    #[tokio::test]
    async fn unknown_last_will_literal_is_a_decode_failure() {
        let (router, _receiver) = router();
        discover(&router, "plug1").await;

        let outcome = router
            .route(&InboundMessage::new("tele/plug1/LWT", "Sleeping"))
            .await;

        assert!(matches!(outcome, RouteOutcome::Dropped(DropReason::Decode(_))));
        assert!(router.registry().lookup("plug1").await.unwrap().is_online);
    }
}
