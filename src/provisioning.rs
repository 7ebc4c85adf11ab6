// Provisioning seam: automatic rejoin of a previously associated network,
// the blocking configuration portal, and the credential wipe used by the
// hardware reset path. The WiFi stack and portal HTTP mechanics live in the
// ESP-IDF implementation.

use anyhow::Result;

use crate::device_config::DeviceConfig;

/// Fixed identifier of the temporary access point the portal exposes.
pub const AP_NAME: &str = "ESP32C2_AP";

/// Idle timeout after which an untouched portal closes on its own.
pub const PORTAL_TIMEOUT_SECS: u64 = 180;

/// How a blocking portal session ended. Both are normal exits; a timeout is
/// not an error and the device proceeds with whatever configuration it had.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalOutcome {
    /// The operator submitted the form; the edited fields were written back
    /// and the configuration should be persisted.
    Submitted,
    /// The timeout elapsed without a submission.
    TimedOut,
}

pub trait Provisioner {
    /// Try to rejoin a previously associated network without operator
    /// input. `Ok(false)` means no stored association worked.
    fn auto_connect(&mut self, ap_name: &str) -> Result<bool>;

    /// Open the access point + form and block until the operator submits
    /// or [`PORTAL_TIMEOUT_SECS`] elapse. On submission the edited fields
    /// are copied into `config` before returning.
    fn run_config_portal(
        &mut self,
        ap_name: &str,
        config: &mut DeviceConfig,
    ) -> Result<PortalOutcome>;

    /// Discard stored network-association credentials. Does not touch the
    /// persisted DeviceConfig.
    fn reset_settings(&mut self) -> Result<()>;
}
