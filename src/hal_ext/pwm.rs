use core::sync::atomic;
use embedded_dma::ReadBuffer;

use crate::hal;
use super::dma;

type DmaChannel = dma::DmaChannel<3>;

/// WS2812 data output: TIM3 channel 3 PWM on PB0
pub type Tim3Ch3Pin = hal::gpio::gpiob::PB0<hal::gpio::Alternate<hal::gpio::AF1>>;

// TIM3_CCMR2: OC3M = 0b110 (PWM mode 1), OC3PE = compare preload.
// Preload keeps the output waveform intact when DMA reloads the compare
// value in the middle of a period.
const CCMR2_OC3_PWM1_PRELOAD: u32 = (0b110 << 4) | (1 << 3);

/// Timer-PWM transmitter streaming compare values via DMA
///
/// Uses TIM3 as a free-running up-counter with one period per protocol bit.
/// On every update event DMA channel 3 writes the next compare value from
/// the buffer to CCR3, so the pin duty cycle reproduces the encoded
/// waveform. The transfer is one-shot (non-circular): when the buffer is
/// drained the completion interrupt stops the timer with the output low.
pub struct PwmTx {
    tim: hal::pac::TIM3,
    dma: DmaChannel,
    buf: &'static mut [u32],
    ready: bool,
}

impl PwmTx {
    /// Initialize TIM3 PWM output with DMA requests on update events
    ///
    /// `period` is the auto-reload value: one full counter period must equal
    /// one WS2812 bit time. The timer is configured but not started.
    pub fn new(
        tim: hal::pac::TIM3,
        _pin: Tim3Ch3Pin,
        mut dma: DmaChannel,
        buf: &'static mut [u32],
        period: u16,
        _rcc: &mut hal::rcc::Rcc,
    ) -> Self {
        // Need to access some registers outside of HAL type system (field `regs` is private)
        let rcc_regs = unsafe { &*hal::pac::RCC::ptr() };

        // Enable TIM3 clock & reset it
        rcc_regs.apb1enr.modify(|_, w| w.tim3en().enabled());
        rcc_regs.apb1rstr.modify(|_, w| w.tim3rst().set_bit());
        rcc_regs.apb1rstr.modify(|_, w| w.tim3rst().clear_bit());

        // Enable DMA clock
        rcc_regs.ahbenr.modify(|_, w| w.dmaen().enabled());

        // Make sure nothing is running while we configure
        tim.cr1.modify(|_, w| w.cen().clear_bit());
        dma.ch().cr.modify(|_, w| w.en().disabled());

        // One counter period per bit, no prescaling
        tim.psc.write(|w| unsafe { w.bits(0) });
        tim.arr.write(|w| unsafe { w.bits(period as u32) });

        // PWM mode 1 on channel 3, output starts high and falls at the
        // compare value, so the compare value is the bit's high time
        tim.ccmr2_output().write(|w| unsafe { w.bits(CCMR2_OC3_PWM1_PRELOAD) });
        // Idle low until the first compare value is loaded
        tim.ccr3.write(|w| unsafe { w.bits(0) });
        tim.ccer.modify(|_, w| w.cc3e().set_bit());

        // Use buffered auto-reload and request DMA on each update event
        tim.cr1.modify(|_, w| w.arpe().set_bit());
        tim.dier.modify(|_, w| w.ude().set_bit());

        // Load PSC/ARR shadow registers
        tim.egr.write(|w| w.ug().set_bit());

        dma.ch().cr.write(|w| {
            w
                .dir().from_memory()
                .mem2mem().disabled()
                .circ().disabled()
                .minc().enabled()
                .pinc().disabled()
                .msize().bits32()
                .psize().bits32()
                .pl().high()
                .htie().disabled()
                .teie().enabled()
                .tcie().enabled()
        });

        // Do NOT start the timer yet - DMA must be armed first
        Self { tim, dma, buf, ready: true }
    }

    fn configure_dma_transfer(&mut self, len: usize) {
        let src = self.buf.as_ptr();
        let dst = self.tim.ccr3.as_ptr() as u32;
        self.dma.ch().mar.write(|w| unsafe { w.ma().bits(src as u32) });
        self.dma.ch().par.write(|w| unsafe { w.pa().bits(dst) });
        self.dma.ch().ndtr.write(|w| w.ndt().bits(len as u16));
    }

    fn len(&mut self) -> u16 {
        self.dma.ch().ndtr.read().ndt().bits()
    }
}

impl dma::DmaTx for PwmTx {
    type Word = u32;

    fn capacity(&self) -> usize {
        let (_, len) = unsafe { self.buf.read_buffer() };
        len
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn push<F: FnOnce(&mut [u32]) -> usize>(&mut self, writer: F) -> Result<(), dma::TransferOngoing> {
        if !self.is_ready() {
            return Err(dma::TransferOngoing);
        }
        let len = writer(self.buf);
        self.configure_dma_transfer(len);
        Ok(())
    }

    fn start(&mut self) -> nb::Result<(), dma::TransferOngoing> {
        if !self.is_ready() {
            return Err(nb::Error::Other(dma::TransferOngoing));
        }

        // Nothing pushed since the last transfer
        if self.len() == 0 {
            return Ok(());
        }

        self.ready = false;

        // "Preceding reads and writes cannot be moved past subsequent writes"
        atomic::compiler_fence(atomic::Ordering::Release);

        // Arm the channel first, then let the timer generate requests
        self.dma.ch().cr.modify(|_, w| w.en().enabled());
        self.tim.cnt.reset();
        self.tim.cr1.modify(|_, w| w.cen().set_bit());

        Ok(())
    }

    fn on_interrupt(&mut self) -> dma::InterruptResult {
        let res = self.dma.handle_interrupt(dma::Interrupt::FullTransfer);
        if let Some(status) = res.as_option() {
            // The last compare values are the reset slots, so the output is
            // already low; stop the counter and keep it that way
            self.tim.cr1.modify(|_, w| w.cen().clear_bit());
            self.tim.ccr3.write(|w| unsafe { w.bits(0) });
            self.dma.ch().cr.modify(|_, w| w.en().disabled());

            // "Subsequent reads and writes cannot be moved ahead of preceding reads"
            atomic::compiler_fence(atomic::Ordering::Acquire);

            if status.is_ok() {
                assert!(!self.ready, "Transfer completion but transfer have not been started");
                self.ready = true;
            }
        }
        res
    }
}
