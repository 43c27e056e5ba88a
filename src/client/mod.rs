//! Remote event client facade
//!
//! [`EventAdminClient`] is the entry point for the event-admin layer. It
//! publishes events with a priority and QoS, keeps the subscription table in
//! sync with the broker, and accepts broker records from discovery. A
//! background connection manager thread owns the broker session.
//!
//! All shared state sits behind one mutex. Two condition variables wake
//! distinct parties: `broker_changed` wakes only the connection manager,
//! `status_changed` wakes only callers blocked in
//! [`publish_sync`](EventAdminClient::publish_sync).

pub mod backoff;
mod callbacks;
pub mod handler;
mod manager;

pub use crate::dispatch::QueueStats;
pub use backoff::{ReconnectPolicy, RetryState};
pub use handler::{ChannelForwarder, HandlerEvent, RemoteEventHandler};

use crate::broker::{BrokerInfo, BrokerRegistry, ServiceId};
use crate::config::ClientConfig;
use crate::dispatch::DispatchEngine;
use crate::error::{ClientError, ClientResult};
use crate::message::Priority;
use crate::subscription::SubscriptionTable;
use crate::topic;
use crate::transport::mqtt::MqttTransport;
use crate::transport::{DisconnectReason, PublishProperties, QoS, Transport};
use manager::ConnectionManager;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// State guarded by the client mutex
pub(crate) struct ClientState {
    pub(crate) engine: DispatchEngine,
    pub(crate) subscriptions: SubscriptionTable,
    pub(crate) brokers: BrokerRegistry,
    pub(crate) connected: bool,
    pub(crate) running: bool,
}

/// Everything shared between the facade and the connection manager thread
pub(crate) struct Shared {
    pub(crate) state: Mutex<ClientState>,
    pub(crate) broker_changed: Condvar,
    pub(crate) status_changed: Condvar,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) handler: Arc<dyn RemoteEventHandler>,
    pub(crate) keep_alive: Duration,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) client_id: String,
}

/// MQTT remote event client
pub struct EventAdminClient {
    shared: Arc<Shared>,
    manager: Option<JoinHandle<()>>,
}

impl EventAdminClient {
    /// Create a client over `transport` and start its connection manager.
    ///
    /// The manager stays idle until a broker is registered with
    /// [`add_broker_info`](Self::add_broker_info).
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn RemoteEventHandler>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let client_id = config.resolve_client_id();

        let state = ClientState {
            engine: DispatchEngine::new(
                config.client.msg_queue_capacity,
                config.client.parallel_msg_capacity,
                config.admission,
            ),
            subscriptions: SubscriptionTable::new(),
            brokers: BrokerRegistry::new(),
            connected: false,
            running: true,
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            broker_changed: Condvar::new(),
            status_changed: Condvar::new(),
            transport,
            handler,
            keep_alive: config.keep_alive(),
            reconnect: config.reconnect,
            client_id,
        });

        let manager = ConnectionManager::new(Arc::clone(&shared));
        let handle = thread::Builder::new()
            .name("earpm-conn".to_string())
            .spawn(move || manager.run())
            .map_err(ClientError::ThreadSpawn)?;

        info!(client_id = %shared.client_id, "Remote event client started");
        Ok(Self {
            shared,
            manager: Some(handle),
        })
    }

    /// Create a client backed by the rumqttc transport
    pub fn with_mqtt(
        config: &ClientConfig,
        handler: Arc<dyn RemoteEventHandler>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let mut config = config.clone();
        config.client.id = Some(config.resolve_client_id());
        let transport = MqttTransport::from_config(&config)?;
        Self::new(&config, Arc::new(transport), handler)
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    /// Subscribe to an event topic pattern (`*` suffix allowed).
    ///
    /// While offline the subscription is only recorded and gets sent on the
    /// next connect. A rejected subscribe restores the previous entry.
    pub fn subscribe(&self, pattern: &str, qos: QoS) -> ClientResult<()> {
        let filter = topic::to_mqtt_filter(pattern).inspect_err(|e| {
            error!(pattern, error = %e, "Invalid topic pattern");
        })?;

        let mut state = self.shared.state.lock();
        let previous = state.subscriptions.set(&filter, qos);
        if state.connected {
            if let Err(e) = self.shared.transport.subscribe(&filter, qos, true) {
                state.subscriptions.restore(&filter, previous);
                error!(topic = %filter, ?qos, error = %e, "Failed to subscribe");
                return Err(e.into());
            }
        }
        debug!(topic = %filter, ?qos, connected = state.connected, "Subscription recorded");
        Ok(())
    }

    /// Remove a subscription.
    ///
    /// While offline the filter is marked for removal and unsubscribed on the
    /// next connect.
    pub fn unsubscribe(&self, pattern: &str) -> ClientResult<()> {
        let filter = topic::to_mqtt_filter(pattern).inspect_err(|e| {
            error!(pattern, error = %e, "Invalid topic pattern");
        })?;

        let mut state = self.shared.state.lock();
        if state.connected {
            state.subscriptions.remove(&filter);
            if let Err(e) = self.shared.transport.unsubscribe(&filter) {
                warn!(topic = %filter, error = %e, "Failed to unsubscribe");
                return Err(e.into());
            }
        } else {
            state.subscriptions.mark_removed(&filter);
        }
        debug!(topic = %filter, "Subscription removed");
        Ok(())
    }

    /// Queue or submit a fire-and-forget publish.
    ///
    /// Success means the message was accepted, not delivered. Messages that
    /// do not fit under the admission threshold for `priority` are dropped
    /// with [`ClientError::ResourceExhausted`].
    pub fn publish_async(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        properties: Option<&PublishProperties>,
        priority: Priority,
    ) -> ClientResult<()> {
        topic::validate_publish_topic(topic)?;

        let mut state = self.shared.state.lock();
        if qos == QoS::AtMostOnce && !state.connected {
            warn!(topic, "Not connected, dropping QoS 0 async message");
            return Err(ClientError::NotConnected);
        }
        let handle = state
            .engine
            .create(topic, qos, priority, false)
            .inspect_err(|e| {
                error!(topic, ?priority, error = %e, "Too many messages pending, dropping async message");
            })?;
        let connected = state.connected;
        state
            .engine
            .dispatch(handle, payload, properties, self.shared.transport.as_ref(), connected)
    }

    /// Publish and block until the broker acknowledges or `timeout` elapses.
    ///
    /// Waits for pool room at low-priority admission first (QoS 0 fails fast
    /// instead), then for completion. On timeout the message is withdrawn
    /// from whichever queue holds it.
    pub fn publish_sync(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        properties: Option<&PublishProperties>,
        timeout: Duration,
    ) -> ClientResult<()> {
        let _span = crate::publish_span!(topic, ?qos, sync = true).entered();
        topic::validate_publish_topic(topic)?;
        // a timeout too large to represent means wait without limit
        let deadline = Instant::now().checked_add(timeout);

        let mut state = self.shared.state.lock();
        if qos == QoS::AtMostOnce && !state.connected {
            warn!(topic, "Not connected, dropping QoS 0 sync message");
            return Err(ClientError::NotConnected);
        }

        while !state.engine.has_capacity_for(Priority::Low) {
            if qos == QoS::AtMostOnce {
                warn!(topic, "Too many messages pending, dropping QoS 0 sync message");
                return Err(ClientError::resource_exhausted(
                    "message pool full for QoS 0 sync publish",
                ));
            }
            warn!(topic, "Too many messages pending, waiting for queue room");
            if self.wait_for_status(&mut state, deadline) {
                warn!(topic, "Timed out waiting for queue room");
                return Err(ClientError::timeout("message queue room"));
            }
        }

        let handle = state.engine.create(topic, qos, Priority::Low, true)?;
        let connected = state.connected;
        state.engine.dispatch(
            handle,
            payload,
            properties,
            self.shared.transport.as_ref(),
            connected,
        )?;

        while !state.engine.is_published(handle) {
            if self.wait_for_status(&mut state, deadline) && !state.engine.is_published(handle)
            {
                state.engine.delete(handle);
                self.shared.status_changed.notify_all();
                error!(topic, "Timed out waiting for message to be published");
                return Err(ClientError::timeout("publish completion"));
            }
        }

        match state.engine.take_published(handle) {
            Some(Ok(())) => Ok(()),
            Some(Err(failure)) => {
                error!(topic, %failure, "Failed to publish message");
                Err(failure.into())
            }
            None => Err(ClientError::illegal_argument("message vanished before pickup")),
        }
    }

    /// Block until the status changes; returns true if `deadline` passed first
    fn wait_for_status(
        &self,
        state: &mut MutexGuard<'_, ClientState>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => self
                .shared
                .status_changed
                .wait_until(state, deadline)
                .timed_out(),
            None => {
                self.shared.status_changed.wait(state);
                false
            }
        }
    }

    /// Register or replace a candidate broker announced by discovery
    pub fn add_broker_info(&self, service_id: ServiceId, host: &str, port: u16) -> ClientResult<()> {
        if service_id < 0 {
            return Err(ClientError::illegal_argument(format!(
                "invalid broker service id {service_id}"
            )));
        }
        let info = BrokerInfo::new(host, port).map_err(ClientError::illegal_argument)?;

        let mut state = self.shared.state.lock();
        state.brokers.insert(service_id, info);
        info!(service_id, host, port, "Broker info added");
        self.shared.broker_changed.notify_one();
        Ok(())
    }

    /// Forget a broker record; the next connection attempt skips it
    pub fn remove_broker_info(&self, service_id: ServiceId) -> ClientResult<()> {
        if service_id < 0 {
            return Err(ClientError::illegal_argument(format!(
                "invalid broker service id {service_id}"
            )));
        }
        if self.shared.state.lock().brokers.remove(service_id).is_some() {
            info!(service_id, "Broker info removed");
        }
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.state.lock().engine.stats()
    }

    /// Disconnect (letting the broker publish the last will), stop the
    /// connection manager and release every queued message.
    ///
    /// Returns the queue statistics left after the release.
    pub fn shutdown(mut self) -> QueueStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            if let Err(e) = self
                .shared
                .transport
                .disconnect(DisconnectReason::WithWillMessage)
            {
                debug!(error = %e, "Disconnect during shutdown failed");
            }
            self.shared.broker_changed.notify_all();
        }
        if manager.join().is_err() {
            error!("Connection manager thread panicked");
        }

        let mut state = self.shared.state.lock();
        state.connected = false;
        state.engine.clear();
        self.shared.status_changed.notify_all();
        info!(client_id = %self.shared.client_id, "Remote event client stopped");
    }
}

impl Drop for EventAdminClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EventAdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventAdminClient")
            .field("client_id", &self.shared.client_id)
            .finish_non_exhaustive()
    }
}
