#![no_main]
#![no_std]

use panic_probe as _;
use defmt_rtt as _;
use stm32f0xx_hal as hal;
use rivulet as lib;

#[rtic::app(device = crate::hal::pac, dispatchers = [CEC_CAN])]
mod app {
    use cortex_m::interrupt::free as ifree;
    use super::hal;
    use hal::prelude::*;

    use super::lib;
    use lib::bsp;
    use lib::chaser::Chaser;
    use lib::hal_ext::{dma::DmaSplit, pwm};
    use lib::ws2812::{BitTiming, Strip};

    /// Milliseconds between animation steps
    const FRAME_INTERVAL_MS: usize = 50;

    type LedStrip = Strip<pwm::PwmTx, { bsp::NLEDS }>;

    #[shared]
    struct Shared {
        strip: LedStrip,
    }

    #[local]
    struct Local {
        timer: hal::timers::Timer<hal::pac::TIM15>,
        chaser: Chaser<{ bsp::NLEDS }>,
        heartbeat: bsp::HeartbeatPin,
    }

    #[monotonic(binds = SysTick, default = true)]
    type Mono = systick_monotonic::Systick<MONO_HZ>;
    pub const MONO_HZ: u32 = 1000;

    #[init(local = [
        led_buf: [u32; LedStrip::BUFFER_LEN] = [0; LedStrip::BUFFER_LEN],
    ])]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let mut core = cx.core;
        let mut dev = cx.device;

        // Automatically enter sleep mode when leaving an ISR
        if cfg!(feature = "idle-sleep") {
            core.SCB.set_sleeponexit();
        }

        // Clock configuration: 48 MHz from HSI by default, TIM3 runs at PCLK
        let sysclk: hal::time::Hertz = 48.mhz().into();
        let pclk: hal::time::Hertz = 48.mhz().into();
        let crystal_clk: hal::time::Hertz = 8.mhz().into();

        let clk_config = dev.RCC
            .configure()
            .sysclk(sysclk)
            .pclk(pclk);
        let clk_config = if cfg!(feature = "crystal") {
            clk_config.hse(crystal_clk, hal::rcc::HSEBypassMode::NotBypassed)
        } else {
            clk_config
        };
        let mut rcc = clk_config.freeze(&mut dev.FLASH);

        // Pinout
        let gpiob = dev.GPIOB.split(&mut rcc);
        let gpioc = dev.GPIOC.split(&mut rcc);

        // DMA
        let dma = dev.DMA1.split(&mut rcc);

        // WS2812 data output and the strip driver
        // HAL provides only blocking PWM, so the timer is configured manually
        let ws_pin = ifree(|cs| gpiob.pb0.into_alternate_af1(cs));
        let timing = BitTiming::new(rcc.clocks.pclk().0);
        let pwm_tx = pwm::PwmTx::new(
            dev.TIM3,
            ws_pin,
            dma.ch3,
            &mut cx.local.led_buf[..],
            timing.period,
            &mut rcc,
        );
        let mut strip = Strip::new(pwm_tx, timing);

        let heartbeat = ifree(|cs| gpioc.pc13.into_push_pull_output(cs));

        // configure periodic timer
        let mut timer = hal::timers::Timer::tim15(dev.TIM15, 1.khz(), &mut rcc);
        timer.listen(hal::timers::Event::TimeOut);

        // Send a first transfer ASAP with all LEDs off
        strip.clear().expect("DMA busy at init");
        strip.submit().expect("DMA busy at init");

        defmt::info!("Liftoff!");

        let shared = Shared { strip };

        let local = Local {
            timer,
            chaser: Chaser::new(),
            heartbeat,
        };

        let mono = systick_monotonic::Systick::new(core.SYST, sysclk.0);

        (shared, local, init::Monotonics(mono))
    }

    #[task(binds = TIM15, priority = 2, local = [timer, t: usize = 0])]
    fn tick(cx: tick::Context) {
        // Clears interrupt flag
        if cx.local.timer.wait().is_ok() {
            let t = cx.local.t;
            *t += 1;

            if *t % FRAME_INTERVAL_MS == 0 {
                if frame::spawn().is_err() {
                    defmt::warn!("Spawn failed: frame");
                }
            }
        }
    }

    /// Encode and submit the next animation frame
    ///
    /// Non-blocking: when the previous transfer is still in flight the frame
    /// is skipped and retried on the next tick, keeping the loop live.
    #[task(priority = 1, shared = [strip], local = [chaser, heartbeat])]
    fn frame(mut cx: frame::Context) {
        let chaser = cx.local.chaser;
        let heartbeat = cx.local.heartbeat;

        cx.shared.strip.lock(|strip| {
            if strip.is_busy() {
                defmt::warn!("Skipping frame: transfer still in flight");
                return;
            }

            // Busy can only clear, never set, outside of submit, so neither
            // call can fail here
            chaser.render(strip)
                .expect("Render with transfer in flight");
            strip.submit()
                .expect("If we were able to render we must be able to submit!");

            chaser.advance();
            heartbeat.toggle().ok();
        });
    }

    #[task(binds = DMA1_CH2_3, priority = 3, shared = [strip])]
    fn dma_complete(mut cx: dma_complete::Context) {
        cx.shared.strip.lock(|strip| {
            strip.on_interrupt()
                .as_option()
                .transpose()
                .expect("DMA transfer error");
        });
    }

    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            if cfg!(feature = "idle-sleep") {
                rtic::export::wfi();
            } else {
                rtic::export::nop();
            }
        }
    }
}
