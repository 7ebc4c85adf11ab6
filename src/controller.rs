// Device Controller Module
// Wires the config store, provisioning manager, broker client, button
// monitor and GPIO lines together: the strict boot sequence and the
// 100 ms steady-state loop. All shared state lives here; there are no
// ambient globals.

use anyhow::Result;
use log::{info, warn};

use crate::broker::{BrokerClient, BrokerEndpoint, BrokerLink, STATUS_RECONNECTED, STATUS_STARTUP};
use crate::button::ButtonMonitor;
use crate::clock::Clock;
use crate::config_store::{ConfigKvs, ConfigStore, CONFIG_NAMESPACE};
use crate::device_config::DeviceConfig;
use crate::gpio::SwitchGpio;
use crate::provisioning::{PortalOutcome, Provisioner, AP_NAME};

/// Steady-state loop cadence.
pub const LOOP_DELAY_MS: u64 = 100;

/// Reset confirmation blink: toggle count and spacing.
pub const RESET_BLINK_TOGGLES: u32 = 10;
pub const RESET_BLINK_INTERVAL_MS: u64 = 100;

/// Settle time between the startup publish and the boot-time button sample.
pub const STARTUP_SETTLE_MS: u64 = 500;

/// Platform restart seam. On hardware this call does not return.
pub trait SystemControl {
    fn restart(&mut self);
}

/// What one loop iteration decided. `Restarted` is only observable in
/// tests; on hardware the restart already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Restarted,
}

pub struct DeviceController<K, P, L, G, C, S>
where
    K: ConfigKvs,
    P: Provisioner,
    L: BrokerLink,
    G: SwitchGpio,
    C: Clock,
    S: SystemControl,
{
    store: ConfigStore<K>,
    provisioner: P,
    broker: BrokerClient<L>,
    gpio: G,
    clock: C,
    system: S,
    config: DeviceConfig,
    button: ButtonMonitor,
    save_requested: bool,
}

impl<K, P, L, G, C, S> DeviceController<K, P, L, G, C, S>
where
    K: ConfigKvs,
    P: Provisioner,
    L: BrokerLink,
    G: SwitchGpio,
    C: Clock,
    S: SystemControl,
{
    pub fn new(kvs: K, provisioner: P, link: L, gpio: G, clock: C, system: S) -> Self {
        Self {
            store: ConfigStore::new(kvs),
            provisioner,
            broker: BrokerClient::new(link),
            gpio,
            clock,
            system,
            config: DeviceConfig::default(),
            button: ButtonMonitor::new(),
            save_requested: false,
        }
    }

    /// Boot sequence, in strict order: load config, initial GPIO state,
    /// provisioning, persist edits, broker setup, startup publish and the
    /// single-shot output arm.
    pub fn boot(&mut self) -> Result<()> {
        self.config = self.store.load(CONFIG_NAMESPACE);

        self.apply_gpio_state()?;

        if !self.provisioner.auto_connect(AP_NAME)? {
            info!("network join failed, opening config portal '{}'", AP_NAME);
            self.gpio.set_indicator(true);
            let outcome = self.provisioner.run_config_portal(AP_NAME, &mut self.config);
            // Indicator returns to idle the instant the portal closes,
            // whatever happened inside it.
            self.gpio.set_indicator(false);
            match outcome? {
                PortalOutcome::Submitted => self.save_requested = true,
                PortalOutcome::TimedOut => info!("config portal timed out"),
            }
        }

        if self.save_requested {
            self.config.sanitize();
            self.store.save(CONFIG_NAMESPACE, &self.config)?;
            // Pin assignments may have changed with the save.
            self.apply_gpio_state()?;
        }

        self.broker.configure(BrokerEndpoint::from_config(&self.config));

        if self.broker.connect_with_retry(&mut self.clock) {
            self.broker.publish(&self.config.topic, STATUS_STARTUP);
            self.clock.sleep_ms(STARTUP_SETTLE_MS);
            // Single-shot arm: the output defaults off after startup unless
            // the operator is holding the button through boot.
            if !self.gpio.button_pressed() {
                self.gpio.set_output(false);
            }
        }

        Ok(())
    }

    /// Steady-state loop. Never returns on hardware; the only exit is the
    /// long-press restart.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.run_iteration()? == LoopAction::Restarted {
                return Ok(());
            }
        }
    }

    /// One loop iteration: button first, then connectivity maintenance,
    /// then the broker tick and the idle wait.
    pub fn run_iteration(&mut self) -> Result<LoopAction> {
        let pressed = self.gpio.button_pressed();
        if self.button.sample(pressed, self.clock.now_ms()) {
            self.reset_and_restart()?;
            return Ok(LoopAction::Restarted);
        }

        if !self.broker.is_connected() && self.broker.connect_with_retry(&mut self.clock) {
            self.broker.publish(&self.config.topic, STATUS_RECONNECTED);
        }
        self.broker.tick();

        self.clock.sleep_ms(LOOP_DELAY_MS);
        Ok(LoopAction::Continue)
    }

    /// Drive the configured initial physical state: indicator off,
    /// controlled output on.
    fn apply_gpio_state(&mut self) -> Result<()> {
        self.gpio.configure(&self.config.pins())?;
        self.gpio.set_indicator(false);
        self.gpio.set_output(true);
        Ok(())
    }

    /// The long-press reset action: confirm visually, clear the stored
    /// network association, restart. Leaves the persisted DeviceConfig
    /// untouched.
    fn reset_and_restart(&mut self) -> Result<()> {
        warn!("long press detected, clearing network credentials and restarting");
        for _ in 0..RESET_BLINK_TOGGLES {
            self.gpio.toggle_indicator();
            self.clock.sleep_ms(RESET_BLINK_INTERVAL_MS);
        }
        self.provisioner.reset_settings()?;
        self.system.restart();
        Ok(())
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn broker(&self) -> &BrokerClient<L> {
        &self.broker
    }
}
