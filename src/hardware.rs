//! Board-level hardware: clock tree, the two CAN peripherals (BMS + PRIMARY),
//! the PCU contactor-driver pins and the feedback digital-input bank.
//!
//! The feedback bank's sixteen digital inputs read a real GPIOC IDR;
//! the ten analog channels and the external ADC behind TS/pack voltage
//! (`InternalVoltageIo`) stay latched placeholders until their channel
//! mapping is finalized. Clock-tree and CAN setup carry over almost
//! unchanged, generalized from one CAN bus to two.

use can_bit_timings;
use defmt::info;
use fdcan::ConfigMode;
use fdcan::FdCan;
use fugit::RateExtU32;
use hal::gpio::gpioa;
use hal::gpio::gpiob;
use hal::gpio::Output;
use hal::gpio::PushPull;
use inverted_pin::InvertedPin;
use stm32g4xx_hal as hal;
use stm32g4xx_hal::can::CanExt;
use stm32g4xx_hal::gpio::GpioExt;
use stm32g4xx_hal::gpio::Speed;
use stm32g4xx_hal::hal::digital::v2::OutputPin as _;
use stm32g4xx_hal::pwr::PwrExt;
use stm32g4xx_hal::rcc;
use stm32g4xx_hal::rcc::{PllConfig, RccExt};
use stm32g4xx_hal::stm32;

use crate::pcu::PcuPins;
use crate::units::{Celsius, Hertz, Millivolts};

/// CAN2 carries the internal BMS bus (cellboards); CAN1 carries PRIMARY
/// (rest of the car), matching the original's two-network split.
pub type PrimaryCan = hal::can::Can<hal::stm32::FDCAN1>;
pub type BmsCan = hal::can::Can<hal::stm32::FDCAN2>;

pub type AirNegativeOutput = gpioa::PA4<Output<PushPull>>;
pub type AirPositiveOutput = gpiob::PB0<Output<PushPull>>;
pub type PrechargeOutput = InvertedPin<gpiob::PB6<Output<PushPull>>>;
pub type AmsOutput = gpioa::PA1<Output<PushPull>>;

/// Concrete `PcuPins` implementation wired to the four contactor-circuit
/// GPIOs. AIR pins drive HIGH-is-open directly; the precharge relay is
/// behind an inverting FET driver.
pub struct BoardPcuPins {
    pub air_negative: AirNegativeOutput,
    pub air_positive: AirPositiveOutput,
    pub precharge: PrechargeOutput,
    pub ams: AmsOutput,
}

impl PcuPins for BoardPcuPins {
    fn set_air_negative(&mut self, open: bool) {
        if open {
            self.air_negative.set_high().unwrap();
        } else {
            self.air_negative.set_low().unwrap();
        }
    }

    fn set_air_positive(&mut self, open: bool) {
        if open {
            self.air_positive.set_high().unwrap();
        } else {
            self.air_positive.set_low().unwrap();
        }
    }

    fn set_precharge(&mut self, engaged: bool) {
        if engaged {
            self.precharge.set_high().unwrap();
        } else {
            self.precharge.set_low().unwrap();
        }
    }

    fn set_ams(&mut self, ok: bool) {
        if ok {
            self.ams.set_high().unwrap();
        } else {
            self.ams.set_low().unwrap();
        }
    }
}

/// Asynchronous boundary to the feedback GPIO bank and ADC. Implemented
/// against real peripherals once the board's feedback connector pinout is
/// finalized; the acquisition logic in `feedback.rs` only depends on this
/// trait.
pub trait FeedbackIo {
    fn read_digital(&mut self) -> u16;
    fn start_analog_conversion(&mut self);
    fn read_analog(&mut self, channel: u8) -> u16;
}

/// `FeedbackIo` wired to GPIOC, configured as sixteen floating inputs
/// covering the digital feedback bank. The analog bank's ADC channel
/// mapping isn't finalized yet, so `read_analog` serves the last latched
/// value instead of driving a real conversion.
pub struct BoardFeedbackIo {
    analog_latch: [u16; 10],
}

impl FeedbackIo for BoardFeedbackIo {
    fn read_digital(&mut self) -> u16 {
        unsafe { (*stm32::GPIOC::ptr()).idr.read().bits() as u16 }
    }

    fn start_analog_conversion(&mut self) {
        // TODO: kick off the external ADC's sequencer once the ten analog
        // feedback channels are assigned to physical ADC inputs.
    }

    fn read_analog(&mut self, channel: u8) -> u16 {
        self.analog_latch[channel as usize]
    }
}

/// PWM decode boundary for the IMD adaptor; the chip driver itself is out
/// of scope.
pub trait ImdIo {
    fn read_frequency(&mut self) -> Hertz;
}

/// Synchronous boundary to the external ADC behind TS/pack voltage and
/// precharge-heatsink temperature. Implemented against real hardware once
/// that ADC's channel mapping is finalized.
pub trait InternalVoltageIo {
    fn read(&mut self) -> (Millivolts, Millivolts, Celsius, bool);
}

/// Placeholder `InternalVoltageIo`: reports a pack reading that never
/// claims precharge completion until the external ADC is wired up.
pub struct BoardInternalVoltageIo;

impl InternalVoltageIo for BoardInternalVoltageIo {
    fn read(&mut self) -> (Millivolts, Millivolts, Celsius, bool) {
        // TODO: wire to the external ADC once the TS/pack-voltage and
        // heatsink-temperature channel mapping is finalized.
        (0, 0, 0, false)
    }
}

pub struct Board {
    pub primary_can_config: FdCan<PrimaryCan, ConfigMode>,
    pub bms_can_config: FdCan<BmsCan, ConfigMode>,
    pub can_timing_1mbps: can_bit_timings::CanBitTiming,
    pub pcu_pins: BoardPcuPins,
    pub feedback_io: BoardFeedbackIo,
    pub internal_voltage_io: BoardInternalVoltageIo,
}

pub const MONOTONIC_FREQUENCY: u32 = 1_000;
rtic_monotonics::systick_monotonic!(Mono, MONOTONIC_FREQUENCY);

pub fn init(core: cortex_m::Peripherals, dp: stm32::Peripherals) -> Board {
    info!("hardware init");

    let rcc = dp.RCC.constrain();

    let pll_config = PllConfig {
        mux: rcc::PllSrc::HSE(24_u32.MHz()),
        n: rcc::PllNMul::MUL_32,
        m: rcc::PllMDiv::DIV_3,
        r: Some(rcc::PllRDiv::DIV_2),
        q: None,
        p: None,
    };

    let clock_config = rcc::Config::default()
        .pll_cfg(pll_config)
        .clock_src(rcc::SysClockSrc::PLL)
        .ahb_psc(rcc::Prescaler::NotDivided)
        .apb1_psc(rcc::Prescaler::Div2)
        .apb2_psc(rcc::Prescaler::Div2);

    let pwr = dp.PWR.constrain().freeze();
    let mut rcc = rcc.freeze(clock_config, pwr);

    Mono::start(core.SYST, rcc.clocks.sys_clk.to_Hz());

    unsafe {
        let flash = &(*stm32::FLASH::ptr());
        flash.acr.modify(|_, w| w.latency().bits(0b1000));
    }

    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);
    let gpioc = dp.GPIOC.split(&mut rcc);

    assert!(rcc.clocks.apb1_clk.to_MHz() == 64);
    let can_timing_1mbps = can_bit_timings::can_timings!(64.mhz(), 1.mhz());

    let primary_can_config = {
        let rx = gpioa.pa11.into_alternate().set_speed(Speed::VeryHigh);
        let tx = gpioa.pa12.into_alternate().set_speed(Speed::VeryHigh);
        dp.FDCAN1.fdcan(tx, rx, &rcc)
    };

    let bms_can_config = {
        let rx = gpiob.pb12.into_alternate().set_speed(Speed::VeryHigh);
        let tx = gpiob.pb13.into_alternate().set_speed(Speed::VeryHigh);
        dp.FDCAN2.fdcan(tx, rx, &rcc)
    };

    let air_negative = gpioa.pa4.into_push_pull_output();
    let air_positive = gpiob.pb0.into_push_pull_output();
    let precharge = InvertedPin::new(gpiob.pb6.into_push_pull_output());
    let ams = gpioa.pa1.into_push_pull_output();

    let _ = gpioc.pc0.into_floating_input();
    let _ = gpioc.pc1.into_floating_input();
    let _ = gpioc.pc2.into_floating_input();
    let _ = gpioc.pc3.into_floating_input();
    let _ = gpioc.pc4.into_floating_input();
    let _ = gpioc.pc5.into_floating_input();
    let _ = gpioc.pc6.into_floating_input();
    let _ = gpioc.pc7.into_floating_input();
    let _ = gpioc.pc8.into_floating_input();
    let _ = gpioc.pc9.into_floating_input();
    let _ = gpioc.pc10.into_floating_input();
    let _ = gpioc.pc11.into_floating_input();
    let _ = gpioc.pc12.into_floating_input();
    let _ = gpioc.pc13.into_floating_input();
    let _ = gpioc.pc14.into_floating_input();
    let _ = gpioc.pc15.into_floating_input();

    Board {
        primary_can_config,
        bms_can_config,
        can_timing_1mbps,
        pcu_pins: BoardPcuPins {
            air_negative,
            air_positive,
            precharge,
            ams,
        },
        feedback_io: BoardFeedbackIo { analog_latch: [0; 10] },
        internal_voltage_io: BoardInternalVoltageIo,
    }
}
