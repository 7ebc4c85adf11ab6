// WiFi Provisioning Portal
// Provisioner implementation over ESP-IDF: station auto-reconnect using the
// credentials the WiFi driver keeps in NVS, and the temporary access point
// + HTTP form used when no association works. The form carries the network
// credentials the portal itself owns plus the eight device configuration
// fields, pre-populated and length-limited.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpServer};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi,
};
use log::{info, warn};
use serde::Deserialize;

use crate::device_config::{DeviceConfig, CONFIG_FIELDS};
use crate::provisioning::{PortalOutcome, Provisioner, PORTAL_TIMEOUT_SECS};

const MAX_FORM_BODY: usize = 2048;
const HTTP_STACK_SIZE: usize = 10 * 1024;

// Probe URLs phones and laptops request to detect a captive portal; all of
// them get the form so the browser pops it up on join.
const PROBE_PATHS: [&str; 5] = [
    "/",
    "/generate_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
];

/// What the operator submitted: the portal's own network credentials plus
/// edits to the device configuration fields.
#[derive(Debug, Deserialize)]
struct PortalSubmission {
    #[serde(default)]
    ssid: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    fields: HashMap<String, String>,
}

pub struct EspPortal {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl EspPortal {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self> {
        // Handing the driver the NVS partition makes it persist station
        // credentials across power cycles.
        let esp_wifi =
            EspWifi::new(modem, sys_loop.clone(), Some(nvs)).context("wifi driver init failed")?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop).context("wifi wrapper init failed")?;
        Ok(Self { wifi })
    }

    fn stored_association(&self) -> bool {
        match self.wifi.get_configuration() {
            Ok(Configuration::Client(client)) => !client.ssid.is_empty(),
            Ok(_) => false,
            Err(e) => {
                warn!("could not read stored wifi configuration: {:?}", e);
                false
            }
        }
    }

    fn join_station(&mut self) -> Result<()> {
        self.wifi.start().context("wifi start failed")?;
        self.wifi.connect().context("wifi connect failed")?;
        self.wifi
            .wait_netif_up()
            .context("wifi interface did not come up")?;
        Ok(())
    }

    fn start_access_point(&mut self, ap_name: &str) -> Result<()> {
        if self.wifi.is_started().unwrap_or(false) {
            let _ = self.wifi.stop();
        }
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ap_name
                    .try_into()
                    .map_err(|_| anyhow!("access point name too long"))?,
                auth_method: AuthMethod::None,
                ..Default::default()
            }))
            .context("failed to configure access point")?;
        self.wifi.start().context("access point start failed")?;
        self.wifi
            .wait_netif_up()
            .context("access point interface did not come up")?;
        info!("access point '{}' up, waiting for the operator", ap_name);
        Ok(())
    }

    /// Persist the submitted station credentials and try to join the
    /// network right away. The join is best-effort; a failure leaves the
    /// device to its steady-state retry behavior.
    fn apply_station_credentials(&mut self, ssid: &str, password: &str) -> Result<()> {
        let _ = self.wifi.stop();
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid.try_into().map_err(|_| anyhow!("ssid too long"))?,
                password: password
                    .try_into()
                    .map_err(|_| anyhow!("wifi password too long"))?,
                auth_method,
                ..Default::default()
            }))
            .context("failed to store station credentials")?;

        if let Err(e) = self.join_station() {
            warn!("join of the newly configured network failed: {:#}", e);
        }
        Ok(())
    }

    fn serve_form(
        &self,
        config: &DeviceConfig,
        tx: mpsc::Sender<PortalSubmission>,
    ) -> Result<EspHttpServer<'static>> {
        let conf = HttpConfiguration {
            stack_size: HTTP_STACK_SIZE,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&conf).context("portal http server failed")?;

        let html = build_portal_html(config);
        for path in PROBE_PATHS {
            let page = html.clone();
            server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
                req.into_response(
                    200,
                    Some("OK"),
                    &[("Content-Type", "text/html; charset=utf-8")],
                )?
                .write_all(page.as_bytes())?;
                Ok(())
            })?;
        }

        let tx = Mutex::new(tx);
        server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
            let len = req.content_len().unwrap_or(0) as usize;
            if len == 0 || len > MAX_FORM_BODY {
                req.into_response(400, Some("Bad Request"), &[])?
                    .write_all(b"invalid form body")?;
                return Ok(());
            }
            let mut body = vec![0u8; len];
            req.read_exact(&mut body)?;

            match serde_json::from_slice::<PortalSubmission>(&body) {
                Ok(submission) => {
                    // First submission wins; the portal closes right after.
                    let _ = tx.lock().map(|sender| sender.send(submission));
                    req.into_response(
                        200,
                        Some("OK"),
                        &[("Content-Type", "text/plain; charset=utf-8")],
                    )?
                    .write_all(b"saved, device is applying the configuration")?;
                }
                Err(e) => {
                    warn!("rejecting malformed portal submission: {}", e);
                    req.into_response(400, Some("Bad Request"), &[])?
                        .write_all(b"malformed submission")?;
                }
            }
            Ok(())
        })?;

        Ok(server)
    }
}

impl Provisioner for EspPortal {
    fn auto_connect(&mut self, _ap_name: &str) -> Result<bool> {
        if !self.stored_association() {
            info!("no stored network association");
            return Ok(false);
        }
        match self.join_station() {
            Ok(()) => {
                info!("rejoined the stored network");
                Ok(true)
            }
            Err(e) => {
                warn!("automatic network join failed: {:#}", e);
                let _ = self.wifi.stop();
                Ok(false)
            }
        }
    }

    fn run_config_portal(
        &mut self,
        ap_name: &str,
        config: &mut DeviceConfig,
    ) -> Result<PortalOutcome> {
        self.start_access_point(ap_name)?;

        let (tx, rx) = mpsc::channel();
        let server = self.serve_form(config, tx)?;

        let outcome = match rx.recv_timeout(Duration::from_secs(PORTAL_TIMEOUT_SECS)) {
            Ok(submission) => {
                info!("portal form submitted");
                for field in &CONFIG_FIELDS {
                    if let Some(value) = submission.fields.get(field.key) {
                        config.set(field.key, value);
                    }
                }
                drop(server);
                if submission.ssid.is_empty() {
                    let _ = self.wifi.stop();
                } else {
                    self.apply_station_credentials(&submission.ssid, &submission.password)?;
                }
                PortalOutcome::Submitted
            }
            Err(_) => {
                info!("portal idle timeout after {} s", PORTAL_TIMEOUT_SECS);
                drop(server);
                let _ = self.wifi.stop();
                PortalOutcome::TimedOut
            }
        };

        Ok(outcome)
    }

    fn reset_settings(&mut self) -> Result<()> {
        let _ = self.wifi.stop();
        // An empty client configuration overwrites the persisted SSID and
        // password in the driver's NVS namespace.
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .context("failed to clear stored network credentials")?;
        info!("stored network association cleared");
        Ok(())
    }
}

fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render the configuration form, pre-populated with the current values and
/// carrying each field's declared maximum length.
fn build_portal_html(config: &DeviceConfig) -> String {
    let mut inputs = String::new();
    for field in &CONFIG_FIELDS {
        let value = html_escape(config.get(field.key).unwrap_or_default());
        inputs.push_str(&format!(
            "<label>{label}</label>\
             <input data-key=\"{key}\" maxlength=\"{max}\" value=\"{value}\">\n",
            label = field.label,
            key = field.key,
            max = field.max_len,
            value = value,
        ));
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Power Switch Setup</title>
<style>
body{{font-family:Arial,sans-serif;max-width:480px;margin:2rem auto;padding:0 1rem}}
label{{display:block;margin:.6rem 0 .2rem}}
input{{width:100%;padding:.45rem;box-sizing:border-box}}
button{{padding:.6rem 1rem;margin-top:1rem}}
#msg{{margin-top:.8rem}}
</style>
</head>
<body>
<h1>Power Switch Setup</h1>
<label>WiFi network (SSID)</label>
<input id="ssid" maxlength="32">
<label>WiFi password</label>
<input id="pass" type="password" maxlength="63">
{inputs}
<button onclick="save()">Save</button>
<p id="msg"></p>
<script>
function save(){{
  var fields={{}};
  document.querySelectorAll('[data-key]').forEach(function(el){{
    fields[el.getAttribute('data-key')]=el.value;
  }});
  fetch('/save',{{method:'POST',headers:{{'Content-Type':'application/json'}},
    body:JSON.stringify({{ssid:document.getElementById('ssid').value,
      password:document.getElementById('pass').value,fields:fields}})}})
    .then(function(r){{return r.text();}})
    .then(function(t){{document.getElementById('msg').textContent=t;}})
    .catch(function(){{document.getElementById('msg').textContent='submit failed';}});
}}
</script>
</body>
</html>"#,
        inputs = inputs
    )
}
