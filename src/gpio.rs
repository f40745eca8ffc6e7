//! Reed switch input on a Raspberry Pi GPIO line.
//!
//! The bucket closes a reed switch to ground once per tip; the pin runs with
//! the internal pull-up and the falling edge is the tip. rppal delivers the
//! edge on its own interrupt thread, which plays the role of the ISR: it only
//! stamps the time and hands it to the capture.

use anyhow::Context;
use rain_bucket_lib::{clock::MonotonicClock, TipCapture};
use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use std::sync::Arc;

/// Keeps the interrupt registered for as long as it lives.
pub struct TipInput {
    _pin: InputPin,
}

/// Attach the tip capture to the falling edge of BCM pin `pin`.
pub fn attach(pin: u8, capture: Arc<TipCapture>, clock: MonotonicClock) -> anyhow::Result<TipInput> {
    let mut input = Gpio::new()
        .context("open GPIO")?
        .get(pin)
        .with_context(|| format!("claim GPIO {}", pin))?
        .into_input_pullup();

    input
        .set_async_interrupt(Trigger::FallingEdge, move |_: Level| {
            capture.on_interrupt(clock.millis());
        })
        .with_context(|| format!("register interrupt on GPIO {}", pin))?;

    Ok(TipInput { _pin: input })
}
