// Board GPIO Module
// Binds the three configured pin numbers to ESP-IDF pin drivers: pulled-up
// reset button input, status indicator output and power control output.
// Rebinding drops the previous drivers first, so the same lines can be
// reconfigured after a portal save.

use anyhow::{Context, Result};
use esp_idf_hal::gpio::{AnyIOPin, Input, Output, PinDriver, Pull};
use log::info;

use crate::controller::SystemControl;
use crate::device_config::PinAssignment;
use crate::gpio::SwitchGpio;

pub struct BoardGpio {
    button: Option<PinDriver<'static, AnyIOPin, Input>>,
    indicator: Option<PinDriver<'static, AnyIOPin, Output>>,
    output: Option<PinDriver<'static, AnyIOPin, Output>>,
    // Output pins cannot be read back in plain output mode; track the
    // indicator level for the toggle used by the reset blink.
    indicator_high: bool,
}

impl BoardGpio {
    pub fn new() -> Self {
        Self {
            button: None,
            indicator: None,
            output: None,
            indicator_high: false,
        }
    }
}

impl Default for BoardGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchGpio for BoardGpio {
    fn configure(&mut self, pins: &PinAssignment) -> Result<()> {
        // Release current bindings before claiming pins that may overlap.
        self.button = None;
        self.indicator = None;
        self.output = None;

        info!(
            "gpio: button={} indicator={} output={}",
            pins.button, pins.indicator, pins.output
        );

        // Pin numbers were validated against the GPIO range when parsed.
        let button_pin = unsafe { AnyIOPin::new(pins.button as i32) };
        let mut button = PinDriver::input(button_pin).context("failed to bind button pin")?;
        button
            .set_pull(Pull::Up)
            .context("failed to enable button pull-up")?;
        self.button = Some(button);

        let indicator_pin = unsafe { AnyIOPin::new(pins.indicator as i32) };
        self.indicator =
            Some(PinDriver::output(indicator_pin).context("failed to bind indicator pin")?);
        self.indicator_high = false;

        let output_pin = unsafe { AnyIOPin::new(pins.output as i32) };
        self.output = Some(PinDriver::output(output_pin).context("failed to bind output pin")?);

        Ok(())
    }

    fn button_pressed(&mut self) -> bool {
        // Active-low: the pulled-up input reads low while pressed.
        self.button.as_ref().map(|pin| pin.is_low()).unwrap_or(false)
    }

    fn set_indicator(&mut self, on: bool) {
        if let Some(pin) = self.indicator.as_mut() {
            let _ = pin.set_level(on.into());
            self.indicator_high = on;
        }
    }

    fn toggle_indicator(&mut self) {
        let level = !self.indicator_high;
        self.set_indicator(level);
    }

    fn set_output(&mut self, on: bool) {
        if let Some(pin) = self.output.as_mut() {
            let _ = pin.set_level(on.into());
        }
    }
}

/// Unconditional device restart; this call does not return.
pub struct EspSystem;

impl SystemControl for EspSystem {
    fn restart(&mut self) {
        unsafe {
            esp_idf_sys::esp_restart();
        }
    }
}
