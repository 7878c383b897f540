use crate::hal;

/// Extension trait to split DMA into separate channels
pub trait DmaSplit {
    /// Structure holding DMA channels
    type Channels;

    /// Split DMA into independent channels
    fn split(self, rcc: &mut hal::rcc::Rcc) -> Self::Channels;
}

pub struct DmaChannel<const C: u8>;
pub struct InterruptStatus(u8);
pub struct InterruptClear(u8);

/// DMA1 channels of STM32F051 (GD32F130)
pub struct Dma {
    pub ch1: DmaChannel<1>,
    pub ch2: DmaChannel<2>,
    pub ch3: DmaChannel<3>,
    pub ch4: DmaChannel<4>,
    pub ch5: DmaChannel<5>,
}

impl DmaSplit for hal::pac::DMA1 {
    type Channels = Dma;

    fn split(self, _rcc: &mut hal::rcc::Rcc) -> Self::Channels {
        // Need to access some registers outside of HAL type system (field `regs` is private)
        let rcc_regs = unsafe { &*hal::pac::RCC::ptr() };

        // Enable DMA clock
        rcc_regs.ahbenr.modify(|_, w| w.dmaen().enabled());

        Dma {
            ch1: DmaChannel,
            ch2: DmaChannel,
            ch3: DmaChannel,
            ch4: DmaChannel,
            ch5: DmaChannel,
        }
    }
}

/// DMA event that an interrupt routine may want to handle
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    FullTransfer,
    HalfTransfer,
}

/// Error signaled by the DMA controller during a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferError;

/// Attempt to modify or start a transfer while the previous one is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOngoing;

/// Outcome of DMA interrupt handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptResult {
    /// The interrupt flags did not concern this channel
    Ignored,
    /// The requested event (or an error) occurred and has been handled
    Done(Result<(), TransferError>),
}

impl InterruptResult {
    pub fn as_option(self) -> Option<Result<(), TransferError>> {
        match self {
            Self::Ignored => None,
            Self::Done(res) => Some(res),
        }
    }
}

macro_rules! dma_channels {
    ($($C:literal => $ch:ident),+ $(,)?) => {
        $(
            impl DmaChannel<$C> {
                // Safety: takes &mut, so it's not possible to use channel in multiple places?
                pub fn ch(&mut self) -> &hal::pac::dma1::CH {
                    unsafe { &(*hal::pac::DMA1::ptr()).$ch }
                }

                const OFFSET: usize = 4 * ($C - 1);
                const MASK: u32 = 0b1111;

                pub fn isr(&self) -> InterruptStatus {
                    let dma = unsafe { &*hal::pac::DMA1::ptr() };
                    InterruptStatus(((dma.isr.read().bits() >> Self::OFFSET) & Self::MASK) as u8)
                }

                pub fn ifcr<F>(&mut self, f: F)
                where
                    F: FnOnce(&mut InterruptClear) -> &mut InterruptClear
                {
                    let dma = unsafe { &*hal::pac::DMA1::ptr() };
                    let mut ifcr = InterruptClear(0);
                    let ifcr = f(&mut ifcr);
                    let mask = (ifcr.0 as u32 & Self::MASK) << Self::OFFSET;
                    unsafe { dma.ifcr.write(|w| w.bits(mask)); }
                }

                /// Check and clear this channel's flags for the given event
                ///
                /// A transfer error always takes precedence over `interrupt`.
                pub fn handle_interrupt(&mut self, interrupt: Interrupt) -> InterruptResult {
                    let isr = self.isr();

                    if isr.error() {
                        self.ifcr(|w| w.all());
                        return InterruptResult::Done(Err(TransferError));
                    }

                    let done = match interrupt {
                        Interrupt::FullTransfer => isr.complete(),
                        Interrupt::HalfTransfer => isr.half_complete(),
                    };

                    if done {
                        self.ifcr(|w| match interrupt {
                            Interrupt::FullTransfer => w.complete(),
                            Interrupt::HalfTransfer => w.half_complete(),
                        });
                        InterruptResult::Done(Ok(()))
                    } else {
                        InterruptResult::Ignored
                    }
                }
            }
        )+
    }
}

dma_channels!(
    1 => ch1,
    2 => ch2,
    3 => ch3,
    4 => ch4,
    5 => ch5,
);

impl InterruptStatus {
    /// GIFx flag
    pub fn any(&self) -> bool {
        (self.0 & 0b0001) != 0
    }

    /// TCIFx flag
    pub fn complete(&self) -> bool {
        (self.0 & 0b0010) != 0
    }

    /// HTIFx flag
    pub fn half_complete(&self) -> bool {
        (self.0 & 0b0100) != 0
    }

    /// TEIFx flag
    pub fn error(&self) -> bool {
        (self.0 & 0b1000) != 0
    }
}

impl InterruptClear {
    pub fn all(&mut self) -> &mut Self {
        self.0 |= 0b0001;
        self
    }

    pub fn complete(&mut self) -> &mut Self {
        self.0 |= 0b0010;
        self
    }

    pub fn half_complete(&mut self) -> &mut Self {
        self.0 |= 0b0100;
        self
    }

    pub fn error(&mut self) -> &mut Self {
        self.0 |= 0b1000;
        self
    }
}

/// One-shot DMA transmitter over a buffer of words
///
/// The buffer is owned by the transmitter and may only be modified via
/// [`DmaTx::push`] while no transfer is in flight. [`DmaTx::on_interrupt`]
/// is the only place where the "in flight" state is cleared.
pub trait DmaTx {
    /// Single DMA transfer element
    type Word: Copy + 'static;

    /// Get buffer capacity
    fn capacity(&self) -> usize;

    /// Check if DMA TX is ready to send data (no transfer in flight)
    fn is_ready(&self) -> bool;

    /// Fill the transfer buffer; `writer` returns the number of words written
    fn push<F: FnOnce(&mut [Self::Word]) -> usize>(&mut self, writer: F) -> Result<(), TransferOngoing>;

    /// Start the transfer of previously pushed data
    fn start(&mut self) -> nb::Result<(), TransferOngoing>;

    /// Handle DMA interrupt, clearing the busy state on transfer completion
    fn on_interrupt(&mut self) -> InterruptResult;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::vec::Vec;

    /// [`DmaTx`] mock that passes "transmitted" data to a callback
    ///
    /// With `auto_ready` each transfer completes already in `start()`,
    /// otherwise the mock stays busy until `on_interrupt()` is called,
    /// like a real DMA channel. `auto_ready = false` also means that
    /// construction leaves the mock busy, as if a transfer was started
    /// before the test began.
    pub struct DmaTxMock<W, F, const N: usize>
    where
        W: Copy + Default + 'static,
        F: Fn(Vec<W>),
    {
        buf: [W; N],
        len: usize,
        ready: bool,
        auto_ready: bool,
        on_transfer: F,
    }

    impl<W, F, const N: usize> DmaTxMock<W, F, N>
    where
        W: Copy + Default + 'static,
        F: Fn(Vec<W>),
    {
        pub fn new(auto_ready: bool, on_transfer: F) -> Self {
            Self {
                buf: [W::default(); N],
                len: 0,
                ready: auto_ready,
                auto_ready,
                on_transfer,
            }
        }
    }

    impl<W, F, const N: usize> DmaTx for DmaTxMock<W, F, N>
    where
        W: Copy + Default + 'static,
        F: Fn(Vec<W>),
    {
        type Word = W;

        fn capacity(&self) -> usize {
            N
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn push<G: FnOnce(&mut [W]) -> usize>(&mut self, writer: G) -> Result<(), TransferOngoing> {
            if !self.ready {
                return Err(TransferOngoing);
            }
            self.len = writer(&mut self.buf);
            assert!(self.len <= N);
            Ok(())
        }

        fn start(&mut self) -> nb::Result<(), TransferOngoing> {
            if !self.ready {
                return Err(nb::Error::Other(TransferOngoing));
            }
            if self.len == 0 {
                return Ok(());
            }
            (self.on_transfer)(self.buf[..self.len].to_vec());
            self.len = 0;
            self.ready = self.auto_ready;
            Ok(())
        }

        fn on_interrupt(&mut self) -> InterruptResult {
            if self.ready {
                InterruptResult::Ignored
            } else {
                self.ready = true;
                InterruptResult::Done(Ok(()))
            }
        }
    }
}
