use static_assertions as sa;
use rgb::RGB8;

use crate::hal_ext::dma::{self, DmaTx};

// WS2812 bit waveform: ~1.25 us period, ~0.8 us high for a 1, ~0.4 us for a 0.
const PERIOD_NS: usize = 1250;
const T1H_NS: usize = 800;
const T0H_NS: usize = 400;
const RESET_NS: usize = 50_000;

/// Compare values per LED: 3x8-bit color, one timer period per bit
pub const BITS_PER_LED: usize = 24;

/// All-zero trailer slots holding the line low for the reset/latch interval
pub const RESET_SLOTS: usize = 3;

// 3 LED-sized slots of low output are comfortably above the minimum latch time
sa::const_assert!(RESET_SLOTS * BITS_PER_LED * PERIOD_NS >= RESET_NS);

/// Total compare-value count for a strip of `leds` pixels
pub const fn buffer_len(leds: usize) -> usize {
    (leds + RESET_SLOTS) * BITS_PER_LED
}

const fn ticks(mhz: u32, ns: usize) -> u32 {
    mhz * ns as u32 / 1000
}

/// Timer parameters encoding WS2812 bit timing at a given timer clock
///
/// `high`/`low` are the compare values for a 1/0 bit, `period` is the
/// auto-reload value (one counter period = one bit time). Derived with
/// truncating integer math; at 72 MHz this yields the canonical
/// ARR=89, high=57, low=28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub period: u16,
    pub high: u32,
    pub low: u32,
}

impl BitTiming {
    /// Derive timing from the timer input clock
    ///
    /// # Panics
    ///
    /// If the clock is not a whole number of MHz - bit timing would be off
    /// by more than the WS2812 tolerances allow.
    pub const fn new(timer_hz: u32) -> Self {
        assert!(timer_hz % 1_000_000 == 0, "Timer clock must be a multiple of 1 MHz");
        let mhz = timer_hz / 1_000_000;
        let period = ticks(mhz, PERIOD_NS);
        let high = ticks(mhz, T1H_NS);
        let low = ticks(mhz, T0H_NS);
        assert!(low > 0 && high > low && high < period);
        Self {
            period: (period - 1) as u16,
            high,
            low,
        }
    }
}

/// Status of strip operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Error {
    /// Pixel index outside of the strip
    InvalidParam,
    /// A frame transfer is in flight, the buffer must not be modified
    Busy,
}

fn encode_pixel(timing: &BitTiming, slots: &mut [u32], color: RGB8, brightness: u8) {
    debug_assert_eq!(slots.len(), BITS_PER_LED);
    let brightness = brightness.min(100) as u32;
    let scale = |c: u8| c as u32 * brightness / 100;
    // This firmware's strip takes green-red-blue, MSB first
    let word = (scale(color.g) << 16) | (scale(color.r) << 8) | scale(color.b);
    for (bit, slot) in slots.iter_mut().enumerate() {
        *slot = if word & (1 << (23 - bit)) != 0 {
            timing.high
        } else {
            timing.low
        };
    }
}

/// WS2812 strip of `N` pixels over a DMA compare-value transmitter
///
/// Owns the transmitter (and through it the frame buffer), so pixel data
/// can only be encoded while no transfer is in flight.
pub struct Strip<TX, const N: usize>
where
    TX: DmaTx<Word = u32>,
{
    tx: TX,
    timing: BitTiming,
}

impl<TX, const N: usize> Strip<TX, N>
where
    TX: DmaTx<Word = u32>,
{
    /// Compare values in a full frame, including the reset trailer
    pub const BUFFER_LEN: usize = buffer_len(N);

    /// Take ownership of the transmitter
    ///
    /// # Panics
    ///
    /// If the transmitter's buffer cannot hold a full frame.
    pub fn new(tx: TX, timing: BitTiming) -> Self {
        assert!(tx.capacity() >= Self::BUFFER_LEN, "DMA buffer too small for strip");
        Self { tx, timing }
    }

    /// Encode all pixels off and the reset trailer
    ///
    /// Must be called once before the first [`Self::submit`]; afterwards the
    /// reset trailer never changes. Idempotent.
    pub fn clear(&mut self) -> Result<(), Error> {
        let timing = self.timing;
        self.tx
            .push(|buf| {
                for slot in buf[..N * BITS_PER_LED].iter_mut() {
                    *slot = timing.low;
                }
                // Compare value 0 keeps the output low for the whole period
                for slot in buf[N * BITS_PER_LED..Self::BUFFER_LEN].iter_mut() {
                    *slot = 0;
                }
                Self::BUFFER_LEN
            })
            .map_err(|dma::TransferOngoing| Error::Busy)
    }

    /// Encode one pixel's 24 compare values
    ///
    /// `brightness` is a percentage; values above 100 are clamped. Each
    /// channel is scaled as `channel * brightness / 100` (truncating), so
    /// brightness 0 turns the pixel off. No other pixel is modified, and on
    /// error the buffer is left untouched.
    pub fn set_pixel(&mut self, index: usize, color: RGB8, brightness: u8) -> Result<(), Error> {
        if index >= N {
            return Err(Error::InvalidParam);
        }
        let timing = self.timing;
        self.tx
            .push(|buf| {
                let slots = &mut buf[index * BITS_PER_LED..(index + 1) * BITS_PER_LED];
                encode_pixel(&timing, slots, color, brightness);
                Self::BUFFER_LEN
            })
            .map_err(|dma::TransferOngoing| Error::Busy)
    }

    /// Start transmission of the encoded frame
    ///
    /// At most one transfer is ever in flight; a second submit before the
    /// completion interrupt fires returns [`Error::Busy`] and does not
    /// re-arm the hardware.
    pub fn submit(&mut self) -> Result<(), Error> {
        match self.tx.start() {
            Ok(()) => Ok(()),
            Err(nb::Error::Other(dma::TransferOngoing)) | Err(nb::Error::WouldBlock) => {
                Err(Error::Busy)
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.tx.is_ready()
    }

    /// Handle the DMA transfer-complete interrupt
    pub fn on_interrupt(&mut self) -> dma::InterruptResult {
        self.tx.on_interrupt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::vec::Vec;
    use rand::prelude::*;
    use crate::hal_ext::dma::mock::DmaTxMock;

    const TIMING: BitTiming = BitTiming::new(48_000_000);
    const N: usize = 3;
    const LEN: usize = buffer_len(N);

    fn decode(slots: &[u32]) -> u32 {
        assert_eq!(slots.len(), BITS_PER_LED);
        slots.iter().fold(0, |word, &slot| {
            let bit = match slot {
                s if s == TIMING.high => 1,
                s if s == TIMING.low => 0,
                other => panic!("Slot is neither HIGH nor LOW: {}", other),
            };
            (word << 1) | bit
        })
    }

    #[test]
    fn timing_matches_original_72mhz() {
        // Reference firmware values: ARR=89, high=57, low=28
        let t = BitTiming::new(72_000_000);
        assert_eq!((t.period, t.high, t.low), (89, 57, 28));
    }

    #[test]
    fn timing_at_48mhz() {
        assert_eq!((TIMING.period, TIMING.high, TIMING.low), (59, 38, 19));
    }

    #[test]
    #[should_panic(expected = "multiple of 1 MHz")]
    fn timing_rejects_fractional_mhz() {
        let _ = BitTiming::new(44_100_000);
    }

    #[test]
    fn red_pixel_frame() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);

        strip.clear().unwrap();
        strip.set_pixel(0, RGB8::new(255, 0, 0), 100).unwrap();
        strip.submit().unwrap();

        let frame = sent.take();
        assert_eq!(frame.len(), LEN);
        // green=0, red=255, blue=0 packs to 0x00ff00: bits 15..8 high
        assert_eq!(decode(&frame[..24]), 0x00ff00);
        for (i, &slot) in frame[..24].iter().enumerate() {
            let expected = if (8..16).contains(&i) { TIMING.high } else { TIMING.low };
            assert_eq!(slot, expected, "bit {}", i);
        }
        // remaining pixels off, reset trailer low
        assert_eq!(decode(&frame[24..48]), 0);
        assert_eq!(decode(&frame[48..72]), 0);
        assert!(frame[N * 24..].iter().all(|&slot| slot == 0));
    }

    #[test]
    fn encode_scales_each_channel() {
        let mut rng = StdRng::seed_from_u64(0x5712);
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);
        strip.clear().unwrap();

        for _ in 0..500 {
            let index = rng.gen_range(0..N);
            let color = RGB8::new(rng.gen(), rng.gen(), rng.gen());
            let brightness = rng.gen_range(0..=100u32) as u8;

            strip.set_pixel(index, color, brightness).unwrap();
            strip.submit().unwrap();
            let frame = sent.take();

            let b = brightness as u32;
            let expected = ((color.g as u32 * b / 100) << 16)
                | ((color.r as u32 * b / 100) << 8)
                | (color.b as u32 * b / 100);
            assert_eq!(decode(&frame[index * 24..(index + 1) * 24]), expected);
        }
    }

    #[test]
    fn brightness_zero_turns_pixel_off() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);

        strip.clear().unwrap();
        strip.set_pixel(1, RGB8::new(255, 255, 255), 0).unwrap();
        strip.submit().unwrap();

        let frame = sent.take();
        assert!(frame[24..48].iter().all(|&slot| slot == TIMING.low));
    }

    #[test]
    fn full_white_is_all_high() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);

        strip.clear().unwrap();
        strip.set_pixel(2, RGB8::new(255, 255, 255), 100).unwrap();
        strip.submit().unwrap();

        let frame = sent.take();
        assert!(frame[48..72].iter().all(|&slot| slot == TIMING.high));
    }

    #[test]
    fn brightness_above_100_is_clamped() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);

        strip.clear().unwrap();
        strip.set_pixel(0, RGB8::new(10, 20, 30), 255).unwrap();
        strip.submit().unwrap();

        let frame = sent.take();
        assert_eq!(decode(&frame[..24]), (20 << 16) | (10 << 8) | 30);
    }

    #[test]
    fn out_of_range_index_leaves_frame_unchanged() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);

        strip.clear().unwrap();
        strip.set_pixel(1, RGB8::new(0x12, 0x34, 0x56), 100).unwrap();
        strip.submit().unwrap();
        let baseline = sent.take();

        assert_eq!(strip.set_pixel(N, RGB8::new(255, 255, 255), 100), Err(Error::InvalidParam));
        assert_eq!(strip.set_pixel(usize::MAX, RGB8::new(255, 255, 255), 100), Err(Error::InvalidParam));

        // Re-encode the same pixel to make the next submit send the buffer again
        strip.set_pixel(1, RGB8::new(0x12, 0x34, 0x56), 100).unwrap();
        strip.submit().unwrap();
        assert_eq!(sent.take(), baseline);
    }

    #[test]
    fn repeated_encode_is_idempotent() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);
        strip.clear().unwrap();

        strip.set_pixel(2, RGB8::new(1, 2, 3), 53).unwrap();
        strip.submit().unwrap();
        let first = sent.take();

        strip.set_pixel(2, RGB8::new(1, 2, 3), 53).unwrap();
        strip.submit().unwrap();
        assert_eq!(sent.take(), first);
    }

    #[test]
    fn reset_trailer_stays_low() {
        let sent = Cell::new(Vec::new());
        let dma = DmaTxMock::<u32, _, LEN>::new(true, |data| sent.set(data));
        let mut strip = Strip::<_, N>::new(dma, TIMING);
        strip.clear().unwrap();

        for i in 0..N {
            strip.set_pixel(i, RGB8::new(255, 255, 255), 100).unwrap();
        }
        strip.submit().unwrap();

        let frame = sent.take();
        assert!(frame[N * 24..].iter().all(|&slot| slot == 0));
    }

    #[test]
    fn busy_until_completion_interrupt() {
        let transfers = Cell::new(0usize);
        let dma = DmaTxMock::<u32, _, LEN>::new(false, |_| transfers.set(transfers.get() + 1));
        let mut strip = Strip::<_, N>::new(dma, TIMING);

        // Mock starts busy, as if a transfer was already in flight
        assert!(strip.is_busy());
        assert_eq!(strip.clear(), Err(Error::Busy));
        assert_eq!(strip.submit(), Err(Error::Busy));
        assert_eq!(transfers.get(), 0);

        assert_eq!(strip.on_interrupt(), dma::InterruptResult::Done(Ok(())));
        assert!(!strip.is_busy());

        strip.clear().unwrap();
        strip.set_pixel(0, RGB8::new(255, 0, 0), 100).unwrap();
        strip.submit().unwrap();
        assert_eq!(transfers.get(), 1);

        // Second submit must not re-arm the transfer
        assert!(strip.is_busy());
        assert_eq!(strip.submit(), Err(Error::Busy));
        assert_eq!(strip.set_pixel(0, RGB8::new(0, 255, 0), 100), Err(Error::Busy));
        assert_eq!(transfers.get(), 1);

        strip.on_interrupt();
        assert!(!strip.is_busy());
    }
}
