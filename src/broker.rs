// Broker Client Module
// Owns the MQTT connection lifecycle: bounded connect retries, best-effort
// status publication, and the periodic service tick that detects a broken
// link. The wire protocol itself lives behind the BrokerLink seam.

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::clock::Clock;
use crate::device_config::{DeviceConfig, DEFAULT_PORT};

/// Bounded retry policy for a connect cycle.
pub const CONNECT_ATTEMPTS: u32 = 3;
pub const CONNECT_RETRY_DELAY_MS: u64 = 2000;

/// A status message must fit the fixed 50-byte wire buffer (49 chars plus
/// terminator) of the field units this firmware interoperates with.
pub const MAX_PAYLOAD_LEN: usize = 49;

pub const STATUS_STARTUP: &str = "system_startup";
pub const STATUS_RECONNECTED: &str = "reconnected";

/// Connection lifecycle as seen by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Where and as whom to connect. Credentials may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl BrokerEndpoint {
    /// Derive the endpoint from the device configuration. A port field
    /// that does not parse falls back to the default MQTT port.
    pub fn from_config(config: &DeviceConfig) -> Self {
        let port = config.port.trim().parse::<u16>().unwrap_or_else(|_| {
            warn!(
                "port field '{}' is not a valid port, using {}",
                config.port, DEFAULT_PORT
            );
            1883
        });
        Self {
            host: config.server.clone(),
            port,
            username: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

/// Transport seam: a single connection attempt, a raw send, and a poll of
/// protocol bookkeeping. Implemented over ESP-IDF MQTT on the device and
/// by fakes in tests.
pub trait BrokerLink {
    /// Replace the target endpoint; tears down any existing session.
    fn set_endpoint(&mut self, endpoint: BrokerEndpoint);

    /// One connection attempt. `Ok(false)` means the broker refused or the
    /// session did not come up; `Err` is a transport-level failure. Both
    /// count as a failed attempt.
    fn try_connect(&mut self) -> Result<bool>;

    /// Send one message on an established session.
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Service inbound/outbound bookkeeping; returns whether the transport
    /// still considers the link up.
    fn service(&mut self) -> bool;
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    status: &'a str,
}

/// Render the `{"status":"..."}` payload, truncating the status value
/// deterministically so the whole message fits [`MAX_PAYLOAD_LEN`].
pub fn status_payload(status: &str) -> String {
    // {"status":""} is 13 bytes of framing.
    const FRAMING: usize = 13;
    let mut status = crate::device_config::clamp_field(status, MAX_PAYLOAD_LEN - FRAMING);
    loop {
        // serde_json cannot fail on a plain string field
        let rendered = serde_json::to_string(&StatusMessage { status: &status })
            .unwrap_or_else(|_| String::from("{\"status\":\"\"}"));
        if rendered.len() <= MAX_PAYLOAD_LEN || status.is_empty() {
            return rendered;
        }
        // JSON escaping expanded the value; drop trailing chars until it fits.
        status.pop();
    }
}

/// Message-broker client: connect-with-retry, best-effort publish, link
/// health tick, and a side-effect-free connected-state query.
pub struct BrokerClient<L: BrokerLink> {
    pub(crate) link: L,
    state: ConnectionState,
}

impl<L: BrokerLink> BrokerClient<L> {
    pub fn new(link: L) -> Self {
        Self { link, state: ConnectionState::Disconnected }
    }

    pub fn configure(&mut self, endpoint: BrokerEndpoint) {
        info!("broker target {}:{}", endpoint.host, endpoint.port);
        self.state = ConnectionState::Disconnected;
        self.link.set_endpoint(endpoint);
    }

    /// Attempt connection up to [`CONNECT_ATTEMPTS`] times, sleeping
    /// [`CONNECT_RETRY_DELAY_MS`] between failures. Returns true on the
    /// first success. Does nothing when already connected.
    pub fn connect_with_retry(&mut self, clock: &mut impl Clock) -> bool {
        if self.state == ConnectionState::Connected {
            return true;
        }

        for attempt in 1..=CONNECT_ATTEMPTS {
            self.state = ConnectionState::Connecting;
            info!("broker connect attempt {}/{}", attempt, CONNECT_ATTEMPTS);
            match self.link.try_connect() {
                Ok(true) => {
                    info!("broker connected");
                    self.state = ConnectionState::Connected;
                    return true;
                }
                Ok(false) => warn!("broker refused connection"),
                Err(e) => warn!("broker connect failed: {:#}", e),
            }
            self.state = ConnectionState::Disconnected;
            if attempt < CONNECT_ATTEMPTS {
                clock.sleep_ms(CONNECT_RETRY_DELAY_MS);
            }
        }

        warn!("giving up after {} connect attempts", CONNECT_ATTEMPTS);
        false
    }

    /// Best-effort status publication. A silent no-op while disconnected;
    /// messages are never queued.
    pub fn publish(&mut self, topic: &str, status: &str) {
        if self.state != ConnectionState::Connected {
            debug!("not connected, dropping status '{}'", status);
            return;
        }
        let payload = status_payload(status);
        match self.link.send(topic, payload.as_bytes()) {
            Ok(()) => info!("published {} to '{}'", payload, topic),
            Err(e) => {
                warn!("publish failed, marking link down: {:#}", e);
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    /// Service the link; must run at least once per control-loop iteration.
    pub fn tick(&mut self) {
        let up = self.link.service();
        if self.state == ConnectionState::Connected && !up {
            warn!("broker link lost");
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FakeClock;

    /// Scripted link: each connect attempt pops the next outcome.
    #[derive(Default)]
    struct FakeLink {
        outcomes: Vec<Result<bool>>,
        attempts: u32,
        sent: Vec<(String, Vec<u8>)>,
        link_up: bool,
        endpoint: Option<BrokerEndpoint>,
    }

    impl FakeLink {
        fn rejecting(times: usize) -> Self {
            let mut link = Self::default();
            for _ in 0..times {
                link.outcomes.push(Ok(false));
            }
            link
        }

        fn succeeding_after(failures: usize) -> Self {
            let mut link = Self::rejecting(failures);
            link.outcomes.push(Ok(true));
            link
        }
    }

    impl BrokerLink for FakeLink {
        fn set_endpoint(&mut self, endpoint: BrokerEndpoint) {
            self.endpoint = Some(endpoint);
        }

        fn try_connect(&mut self) -> Result<bool> {
            self.attempts += 1;
            if self.outcomes.is_empty() {
                return Ok(false);
            }
            let up = self.outcomes.remove(0);
            if let Ok(true) = up {
                self.link_up = true;
            }
            up
        }

        fn send(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
            self.sent.push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn service(&mut self) -> bool {
            self.link_up
        }
    }

    #[test]
    fn retry_exhausts_after_three_attempts() {
        let mut client = BrokerClient::new(FakeLink::rejecting(10));
        let mut clock = FakeClock::new();

        assert!(!client.connect_with_retry(&mut clock));
        assert_eq!(client.link.attempts, 3);
        // Two inter-attempt delays of 2 s each.
        assert_eq!(clock.sleeps, vec![2000, 2000]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn retry_stops_on_first_success() {
        let mut client = BrokerClient::new(FakeLink::succeeding_after(1));
        let mut clock = FakeClock::new();

        assert!(client.connect_with_retry(&mut clock));
        assert_eq!(client.link.attempts, 2);
        assert_eq!(clock.sleeps, vec![2000]);
        assert!(client.is_connected());
    }

    #[test]
    fn connected_client_does_not_reattempt() {
        let mut client = BrokerClient::new(FakeLink::succeeding_after(0));
        let mut clock = FakeClock::new();
        assert!(client.connect_with_retry(&mut clock));
        assert!(client.connect_with_retry(&mut clock));
        assert_eq!(client.link.attempts, 1);
    }

    #[test]
    fn transport_errors_count_as_failed_attempts() {
        let mut link = FakeLink::default();
        link.outcomes.push(Err(anyhow::anyhow!("dns failure")));
        link.outcomes.push(Ok(true));
        let mut client = BrokerClient::new(link);
        let mut clock = FakeClock::new();

        assert!(client.connect_with_retry(&mut clock));
        assert_eq!(client.link.attempts, 2);
    }

    #[test]
    fn publish_while_disconnected_is_a_silent_noop() {
        let mut client = BrokerClient::new(FakeLink::rejecting(0));
        client.publish("esp32solo", STATUS_STARTUP);
        assert!(client.link.sent.is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn publish_sends_bounded_json_payload() {
        let mut client = BrokerClient::new(FakeLink::succeeding_after(0));
        let mut clock = FakeClock::new();
        client.connect_with_retry(&mut clock);

        client.publish("esp32solo", STATUS_STARTUP);
        let (topic, payload) = &client.link.sent[0];
        assert_eq!(topic, "esp32solo");
        assert_eq!(payload.as_slice(), br#"{"status":"system_startup"}"#);
    }

    #[test]
    fn oversized_status_is_truncated_not_rejected() {
        let payload = status_payload(&"s".repeat(100));
        assert_eq!(payload.len(), MAX_PAYLOAD_LEN);
        assert!(payload.starts_with(r#"{"status":"sss"#));
        assert!(payload.ends_with("\"}"));
    }

    #[test]
    fn escaped_characters_still_respect_the_bound() {
        let payload = status_payload(&"\"".repeat(40));
        assert!(payload.len() <= MAX_PAYLOAD_LEN);
        assert!(serde_json::from_str::<serde_json::Value>(&payload).is_ok());
    }

    #[test]
    fn tick_detects_a_dropped_link() {
        let mut client = BrokerClient::new(FakeLink::succeeding_after(0));
        let mut clock = FakeClock::new();
        client.connect_with_retry(&mut clock);
        assert!(client.is_connected());

        client.tick();
        assert!(client.is_connected());

        client.link.link_up = false;
        client.tick();
        assert!(!client.is_connected());
    }

    #[test]
    fn endpoint_derivation_defaults_bad_ports() {
        let mut config = DeviceConfig::default();
        config.set("server", "broker.local");
        config.set("port", "not-a-port");
        let endpoint = BrokerEndpoint::from_config(&config);
        assert_eq!(endpoint.host, "broker.local");
        assert_eq!(endpoint.port, 1883);
    }
}
