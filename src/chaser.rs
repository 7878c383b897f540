//! Moving-dot animation: one lit pixel running along the strip, changing
//! color after each full sweep.

use rgb::RGB8;

use crate::hal_ext::dma::DmaTx;
use crate::ws2812::{Error, Strip};

/// Colors cycled by the chaser (given in RGB, packing order is handled by the strip)
pub const PALETTE: [RGB8; 7] = [
    RGB8::new(255, 0, 0),     // red
    RGB8::new(255, 255, 0),   // yellow
    RGB8::new(0, 255, 0),     // green
    RGB8::new(0, 255, 255),   // cyan
    RGB8::new(0, 0, 255),     // blue
    RGB8::new(255, 0, 255),   // magenta
    RGB8::new(255, 255, 255), // white
];

const ON_BRIGHTNESS: u8 = 100;

pub struct Chaser<const N: usize> {
    pos: usize,
    color: usize,
}

impl<const N: usize> Chaser<N> {
    pub const fn new() -> Self {
        Self { pos: 0, color: 0 }
    }

    /// Encode the current frame: the dot at full brightness, all other pixels off
    pub fn render<TX>(&self, strip: &mut Strip<TX, N>) -> Result<(), Error>
    where
        TX: DmaTx<Word = u32>,
    {
        for i in 0..N {
            let (color, brightness) = if i == self.pos {
                (PALETTE[self.color], ON_BRIGHTNESS)
            } else {
                (RGB8::new(0, 0, 0), 0)
            };
            strip.set_pixel(i, color, brightness)?;
        }
        Ok(())
    }

    /// Move the dot one pixel forward, rotating the color on wrap-around
    pub fn advance(&mut self) {
        self.pos = (self.pos + 1) % N;
        if self.pos == 0 {
            self.color = (self.color + 1) % PALETTE.len();
        }
    }
}
