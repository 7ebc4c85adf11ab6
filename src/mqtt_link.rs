// ESP-IDF MQTT Transport
// BrokerLink implementation over EspMqttClient. The ESP-IDF client runs its
// own protocol task; a small event thread mirrors its Connected/Disconnected
// transitions into an atomic flag that `service()` reports to the control
// loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use log::{info, warn};

use crate::broker::{BrokerEndpoint, BrokerLink};

/// Fixed session identifier on the broker.
pub const CLIENT_ID: &str = "ESP32C2_Client";

// How long one connect attempt waits for the session to come up before the
// attempt is counted as failed.
const SESSION_WAIT_MS: u64 = 5000;
const SESSION_POLL_MS: u64 = 100;

const EVENT_THREAD_STACK: usize = 6 * 1024;

pub struct EspMqttLink {
    endpoint: Option<BrokerEndpoint>,
    client: Option<EspMqttClient<'static>>,
    link_up: Arc<AtomicBool>,
}

impl EspMqttLink {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            client: None,
            link_up: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for EspMqttLink {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerLink for EspMqttLink {
    fn set_endpoint(&mut self, endpoint: BrokerEndpoint) {
        // Dropping the client closes the session; its event thread exits
        // when the connection handle reports the teardown.
        self.client = None;
        self.link_up.store(false, Ordering::SeqCst);
        self.endpoint = Some(endpoint);
    }

    fn try_connect(&mut self) -> Result<bool> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("broker endpoint not configured"))?;
        if endpoint.host.is_empty() {
            return Err(anyhow!("broker address is empty"));
        }

        let url = format!("mqtt://{}:{}", endpoint.host, endpoint.port);
        let conf = MqttClientConfiguration {
            client_id: Some(CLIENT_ID),
            username: (!endpoint.username.is_empty()).then_some(endpoint.username.as_str()),
            password: (!endpoint.password.is_empty()).then_some(endpoint.password.as_str()),
            ..Default::default()
        };

        let link_up = Arc::new(AtomicBool::new(false));
        let flag = link_up.clone();

        let (client, mut connection) =
            EspMqttClient::new(&url, &conf).with_context(|| format!("mqtt client for {}", url))?;

        thread::Builder::new()
            .name("mqtt-events".to_string())
            .stack_size(EVENT_THREAD_STACK)
            .spawn(move || {
                while let Ok(event) = connection.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => flag.store(true, Ordering::SeqCst),
                        EventPayload::Disconnected => flag.store(false, Ordering::SeqCst),
                        _ => {}
                    }
                }
            })
            .context("failed to spawn mqtt event thread")?;

        // Block until the session is up or the attempt window closes; the
        // caller owns the between-attempts backoff.
        let mut waited = 0;
        while waited < SESSION_WAIT_MS {
            if link_up.load(Ordering::SeqCst) {
                info!("mqtt session established with {}", url);
                self.client = Some(client);
                self.link_up = link_up;
                return Ok(true);
            }
            thread::sleep(Duration::from_millis(SESSION_POLL_MS));
            waited += SESSION_POLL_MS;
        }

        warn!("mqtt session did not come up within {} ms", SESSION_WAIT_MS);
        Ok(false)
    }

    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| anyhow!("no mqtt session"))?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("publish to '{}' failed", topic))?;
        Ok(())
    }

    fn service(&mut self) -> bool {
        // The ESP-IDF client services the protocol on its own task; the
        // tick only has to report link health.
        self.link_up.load(Ordering::SeqCst)
    }
}
