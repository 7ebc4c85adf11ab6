// GPIO seam for the three logical lines the controller drives: the
// pulled-up reset button (active-low), the status indicator, and the
// controlled power output. Pin numbers come from configuration and may be
// rebound after a portal save.

use anyhow::Result;

use crate::device_config::PinAssignment;

pub trait SwitchGpio {
    /// (Re)bind the three lines to the given pins, dropping any previous
    /// bindings first. Called at boot and again after a config save.
    fn configure(&mut self, pins: &PinAssignment) -> Result<()>;

    /// Sample the reset button; true means pressed (input reads low).
    fn button_pressed(&mut self) -> bool;

    fn set_indicator(&mut self, on: bool);

    /// Invert the indicator, used by the reset confirmation blink.
    fn toggle_indicator(&mut self);

    fn set_output(&mut self, on: bool);
}
