//! Board support
//!
//! Constants and pin assignments of the LED strip demo board
//! (GD32F130C8T6, programmed as STM32F051).

use crate::hal::gpio;

/// Number of WS2812 pixels on the strip
pub const NLEDS: usize = 30;

/// Heartbeat LED toggled on every transmitted frame
pub type HeartbeatPin = gpio::gpioc::PC13<gpio::Output<gpio::PushPull>>;
