//! Pure connection configuration for the rumqttc transport
//!
//! Builds [`MqttOptions`] for one broker from the client settings: persistent
//! session, keep-alive, credentials and the optional last will.

use crate::config::ClientConfig;
use crate::transport::TransportError;
use rumqttc::v5::mqttbytes::v5::{ConnectProperties, LastWill, LastWillProperties};
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use std::time::Duration;

/// Session settings shared by every connection the transport opens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MqttSettings {
    pub session_expiry_secs: u32,
    pub max_packet_size: Option<u32>,
    pub credentials: Option<(String, String)>,
    pub last_will: Option<WillSettings>,
}

/// Last will registered on connect
#[derive(Debug, Clone, PartialEq)]
pub struct WillSettings {
    pub topic: String,
    pub user_properties: Vec<(String, String)>,
}

impl MqttSettings {
    /// Settings from the client configuration, resolving credentials
    pub fn from_config(config: &ClientConfig) -> Result<Self, crate::config::ConfigError> {
        Ok(Self {
            session_expiry_secs: config.client.session_expiry_secs,
            max_packet_size: config.client.max_packet_size,
            credentials: config.credentials()?,
            last_will: config.last_will.as_ref().map(|will| WillSettings {
                topic: will.topic.clone(),
                user_properties: will
                    .user_properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }),
        })
    }
}

/// Pure function to configure MQTT options for one broker
///
/// The session is persistent (`clean_start = false`) so in-flight QoS 1/2
/// publishes survive reconnects. The will is delayed by twice the session
/// expiry, which means the broker sends it when the session ends rather than
/// on a transient network drop.
pub fn configure_mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    keep_alive: Duration,
    settings: &MqttSettings,
) -> Result<MqttOptions, TransportError> {
    if client_id.is_empty() {
        return Err(TransportError::InvalidOptions(
            "client id cannot be empty".to_string(),
        ));
    }
    if keep_alive.as_secs() > u16::MAX as u64 {
        return Err(TransportError::InvalidOptions(format!(
            "keep alive of {}s exceeds the MQTT limit",
            keep_alive.as_secs()
        )));
    }

    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    mqtt_options.set_keep_alive(keep_alive);
    mqtt_options.set_clean_start(false);
    mqtt_options.set_connect_properties(ConnectProperties {
        session_expiry_interval: Some(settings.session_expiry_secs),
        receive_maximum: None,
        max_packet_size: settings.max_packet_size,
        topic_alias_max: None,
        request_response_info: None,
        request_problem_info: None,
        user_properties: Vec::new(),
        authentication_method: None,
        authentication_data: None,
    });

    if let Some((username, password)) = &settings.credentials {
        mqtt_options.set_credentials(username.clone(), password.clone());
    }

    if let Some(will) = &settings.last_will {
        let properties = LastWillProperties {
            delay_interval: Some(settings.session_expiry_secs.saturating_mul(2)),
            payload_format_indicator: None,
            message_expiry_interval: None,
            content_type: None,
            response_topic: None,
            correlation_data: None,
            user_properties: will.user_properties.clone(),
        };
        let lwt = LastWill::new(&will.topic, "", QoS::AtLeastOnce, false, Some(properties));
        mqtt_options.set_last_will(lwt);
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_will() -> MqttSettings {
        MqttSettings {
            session_expiry_secs: 600,
            max_packet_size: Some(256 * 1024),
            credentials: Some(("user".to_string(), "pass".to_string())),
            last_will: Some(WillSettings {
                topic: "celix/EventAdminMqtt/session/end".to_string(),
                user_properties: vec![("fw".to_string(), "fw-1".to_string())],
            }),
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(
            "earpm-1",
            "broker.local",
            1883,
            Duration::from_secs(60),
            &settings_with_will(),
        )
        .unwrap();

        assert_eq!(options.client_id(), "earpm-1");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(!options.clean_start());
    }

    #[test]
    fn test_last_will_delay_is_twice_session_expiry() {
        let options = configure_mqtt_options(
            "earpm-1",
            "localhost",
            1883,
            Duration::from_secs(60),
            &settings_with_will(),
        )
        .unwrap();

        let will = options.last_will().unwrap();
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(!will.retain);
        assert!(will.message.is_empty());
        let properties = will.properties.unwrap();
        assert_eq!(properties.delay_interval, Some(1200));
        assert_eq!(properties.user_properties.len(), 1);
    }

    #[test]
    fn test_session_expiry_is_sent_with_connect() {
        let options = configure_mqtt_options(
            "earpm-1",
            "localhost",
            1883,
            Duration::from_secs(60),
            &settings_with_will(),
        )
        .unwrap();

        let properties = options.connect_properties().unwrap();
        assert_eq!(properties.session_expiry_interval, Some(600));
        assert_eq!(properties.max_packet_size, Some(256 * 1024));
    }

    #[test]
    fn test_no_will_without_topic() {
        let options = configure_mqtt_options(
            "earpm-1",
            "localhost",
            1883,
            Duration::from_secs(60),
            &MqttSettings::default(),
        )
        .unwrap();
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_invalid_options() {
        let settings = MqttSettings::default();
        assert!(matches!(
            configure_mqtt_options("", "localhost", 1883, Duration::from_secs(60), &settings),
            Err(TransportError::InvalidOptions(_))
        ));
        assert!(matches!(
            configure_mqtt_options(
                "id",
                "localhost",
                1883,
                Duration::from_secs(70_000),
                &settings
            ),
            Err(TransportError::InvalidOptions(_))
        ));
    }
}
