//! Test helpers and utilities for integration tests

use remote_event_mqtt::config::ClientConfig;
use remote_event_mqtt::testing::{MockTransport, RecordingHandler};
use remote_event_mqtt::EventAdminClient;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Client configuration with small queues and a fixed id
#[allow(dead_code)]
pub fn test_config(queue: usize, parallel: usize) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.client.id = Some("earpm-test".to_string());
    config.client.msg_queue_capacity = queue;
    config.client.parallel_msg_capacity = parallel;
    config
}

/// Client over a fresh mock transport, not yet given any broker
#[allow(dead_code)]
pub fn mock_client(
    config: &ClientConfig,
) -> (EventAdminClient, Arc<MockTransport>, Arc<RecordingHandler>) {
    mock_client_with(config, MockTransport::new())
}

#[allow(dead_code)]
pub fn mock_client_with(
    config: &ClientConfig,
    transport: MockTransport,
) -> (EventAdminClient, Arc<MockTransport>, Arc<RecordingHandler>) {
    let transport = Arc::new(transport);
    let handler = Arc::new(RecordingHandler::new());
    let client = EventAdminClient::new(config, transport.clone(), handler.clone()).unwrap();
    (client, transport, handler)
}

/// Register a broker and wait for the session to come up
#[allow(dead_code)]
pub fn connect(client: &EventAdminClient) {
    client.add_broker_info(1, "localhost", 1883).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || client.is_connected()),
        "client did not connect"
    );
}

/// Poll `condition` until it holds or `timeout` passes
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
