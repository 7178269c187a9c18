//! Test helpers and utilities for integration tests

use brokerlink::config::LinkConfig;
use brokerlink::session::ConnectionController;
use brokerlink::testing::{MockTransport, RecordingBus};
use brokerlink::transport::TransportEvent;
use tokio::sync::mpsc;

/// Two remote brokers, three attempts, five-minute return-to-primary
pub const DUAL_BROKER_TOML: &str = r#"
[device]
id = "test-device"
location = "lab"

[primary]
broker_url = "mqtt://primary.local:1883"

[reserved]
broker_url = "mqtts://reserved.example.com"

[session]
connect_attempts = 3
back_to_primary_minutes = 5
switch_delay_ms = 0
"#;

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> LinkConfig {
    LinkConfig::parse(DUAL_BROKER_TOML).unwrap()
}

/// Same as [`test_config`] without the reserved broker
#[allow(dead_code)]
pub fn single_broker_config() -> LinkConfig {
    let mut config = test_config();
    config.reserved = None;
    config
}

#[allow(dead_code)]
pub struct Harness {
    pub controller: ConnectionController<MockTransport, RecordingBus>,
    pub transport: MockTransport,
    pub bus: RecordingBus,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: &LinkConfig) -> Self {
        let transport = MockTransport::new();
        let bus = RecordingBus::new();
        let mut controller =
            ConnectionController::new(config, transport.clone(), bus.clone()).unwrap();
        let events = controller.take_transport_events().unwrap();
        Self {
            controller,
            transport,
            bus,
            events,
        }
    }

    /// Feed every callback emitted so far into the controller
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.controller.handle_transport_event(event).await;
            handled += 1;
        }
        handled
    }
}

/// Poll `condition` until it holds or two seconds pass
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    condition()
}
