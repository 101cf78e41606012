//! Feedback fusion: digital + analog acquisition, thresholding, and the
//! consistency check the FSM gates every transition on.
//!
//! Grounded in the original firmware's `feedback.h`/`feedback.c` for the
//! 27-entry identifier list, the 16-bit digital bitmask layout, the 10
//! analog channels and the threshold constants, including the documented
//! special cases preserved verbatim: the 3V3 probe inverts
//! the high/low rule, IMD-OK/AIR-mec channels use a lowered low threshold,
//! and the AIRP_OPEN_MEC / AIRN_OPEN_MEC analog channel indices are swapped.

use crate::conf::{
    FEEDBACK_ADC_RESOLUTION_BITS, FEEDBACK_THRESHOLD_HIGH_MV, FEEDBACK_THRESHOLD_LOW_COMPRESSED_MV,
    FEEDBACK_THRESHOLD_LOW_MV, FEEDBACK_VREF_MV,
};

/// All 27 feedback identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum FeedbackId {
    AirnOpenCom = 0,
    PrechargeOpenCom,
    AirpOpenCom,
    AirnOpenMec,
    PrechargeOpenMec,
    AirpOpenMec,
    SdImdFb,
    SdBmsFb,
    TsLessThan60V,
    PlausibleStatePersisted,
    PlausibleState,
    BmsFaultCockpitLed,
    ImdFaultCockpitLed,
    IndicatorConnected,
    LatchReset,
    ImplausibleStateLatched,
    BmsFaultLatched,
    ImdFaultLatched,
    ExtFaultLatched,
    ImdOk,
    PlausibleStateRc,
    TsalGreen,
    Probing3V3,
    SdOut,
    SdIn,
    SdEnd,
    V5Mcu,
}

pub const FEEDBACK_COUNT: usize = 27;

impl FeedbackId {
    const ALL: [FeedbackId; FEEDBACK_COUNT] = [
        FeedbackId::AirnOpenCom,
        FeedbackId::PrechargeOpenCom,
        FeedbackId::AirpOpenCom,
        FeedbackId::AirnOpenMec,
        FeedbackId::PrechargeOpenMec,
        FeedbackId::AirpOpenMec,
        FeedbackId::SdImdFb,
        FeedbackId::SdBmsFb,
        FeedbackId::TsLessThan60V,
        FeedbackId::PlausibleStatePersisted,
        FeedbackId::PlausibleState,
        FeedbackId::BmsFaultCockpitLed,
        FeedbackId::ImdFaultCockpitLed,
        FeedbackId::IndicatorConnected,
        FeedbackId::LatchReset,
        FeedbackId::ImplausibleStateLatched,
        FeedbackId::BmsFaultLatched,
        FeedbackId::ImdFaultLatched,
        FeedbackId::ExtFaultLatched,
        FeedbackId::ImdOk,
        FeedbackId::PlausibleStateRc,
        FeedbackId::TsalGreen,
        FeedbackId::Probing3V3,
        FeedbackId::SdOut,
        FeedbackId::SdIn,
        FeedbackId::SdEnd,
        FeedbackId::V5Mcu,
    ];
}

/// Bit position of each feedback inside a digital bitflag read or consulted
/// as part of a consistency-check mask. Only 16 bits are backed by the
/// single-pass GPIO read (`DigitalBit`); analog-only feedbacks still get a
/// mask bit so `FeedbackMask` can name them.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FeedbackMask(u32);

impl FeedbackMask {
    pub const fn of(id: FeedbackId) -> Self {
        Self(1u32 << (id as u8))
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const AIRN_OPEN_COM: Self = Self::of(FeedbackId::AirnOpenCom);
    pub const AIRN_OPEN_MEC: Self = Self::of(FeedbackId::AirnOpenMec);
    pub const AIRP_OPEN_COM: Self = Self::of(FeedbackId::AirpOpenCom);
    pub const AIRP_OPEN_MEC: Self = Self::of(FeedbackId::AirpOpenMec);
    pub const SD_END: Self = Self::of(FeedbackId::SdEnd);
}

/// Bit position of each digital feedback inside the 16-bit GPIO read
/// (`feedback.h`'s `FeedbackDigitalBit`).
#[derive(Clone, Copy)]
enum DigitalBit {
    AirnOpenCom = 0,
    AirpOpenCom,
    SdImdFb,
    SdBmsFb,
    PrechargeOpenCom,
    PrechargeOpenMec,
    TsLessThan60V,
    PlausibleState,
    BmsFaultCockpitLed,
    ImdFaultCockpitLed,
    IndicatorConnected,
    LatchReset,
    ImplausibleStateLatched,
    BmsFaultLatched,
    ImdFaultLatched,
    ExtFaultLatched,
}

fn digital_bit_for(id: FeedbackId) -> Option<DigitalBit> {
    use FeedbackId::*;
    Some(match id {
        AirnOpenCom => DigitalBit::AirnOpenCom,
        AirpOpenCom => DigitalBit::AirpOpenCom,
        SdImdFb => DigitalBit::SdImdFb,
        SdBmsFb => DigitalBit::SdBmsFb,
        PrechargeOpenCom => DigitalBit::PrechargeOpenCom,
        PrechargeOpenMec => DigitalBit::PrechargeOpenMec,
        TsLessThan60V => DigitalBit::TsLessThan60V,
        PlausibleState => DigitalBit::PlausibleState,
        BmsFaultCockpitLed => DigitalBit::BmsFaultCockpitLed,
        ImdFaultCockpitLed => DigitalBit::ImdFaultCockpitLed,
        IndicatorConnected => DigitalBit::IndicatorConnected,
        LatchReset => DigitalBit::LatchReset,
        ImplausibleStateLatched => DigitalBit::ImplausibleStateLatched,
        BmsFaultLatched => DigitalBit::BmsFaultLatched,
        ImdFaultLatched => DigitalBit::ImdFaultLatched,
        ExtFaultLatched => DigitalBit::ExtFaultLatched,
        _ => return None,
    })
}

/// The 10 ADC channels sampled asynchronously (`feedback.h`'s
/// `FeedbackAnalogIndex`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum AnalogChannel {
    AirnOpenMec = 0,
    AirpOpenMec,
    ImdOk,
    PlausibleStateRc,
    TsalGreen,
    Probing3V3,
    SdOut,
    SdIn,
    SdEnd,
    V5Mcu,
}

const ANALOG_COUNT: usize = 10;

fn analog_channel_for(id: FeedbackId) -> Option<AnalogChannel> {
    use FeedbackId::*;
    Some(match id {
        // Preserved hardware/schematic bug: the channel that
        // physically reads AIRP_OPEN_MEC is wired to the index the source
        // calls AIRN_OPEN_MEC, and vice versa. Do not "fix" this swap.
        AirnOpenMec => AnalogChannel::AirpOpenMec,
        AirpOpenMec => AnalogChannel::AirnOpenMec,
        ImdOk => AnalogChannel::ImdOk,
        PlausibleStateRc => AnalogChannel::PlausibleStateRc,
        TsalGreen => AnalogChannel::TsalGreen,
        Probing3V3 => AnalogChannel::Probing3V3,
        SdOut => AnalogChannel::SdOut,
        SdIn => AnalogChannel::SdIn,
        SdEnd => AnalogChannel::SdEnd,
        V5Mcu => AnalogChannel::V5Mcu,
        _ => return None,
    })
}

/// Channels whose low threshold is compressed to 1.4 V rather than the
/// standard 0.7 V, because their sense network's swing is reduced.
fn uses_compressed_low_threshold(channel: AnalogChannel) -> bool {
    matches!(
        channel,
        AnalogChannel::ImdOk | AnalogChannel::AirnOpenMec | AnalogChannel::AirpOpenMec
    )
}

fn millivolts_to_raw(mv: u32) -> u16 {
    ((mv as u64 * ((1u64 << FEEDBACK_ADC_RESOLUTION_BITS) - 1)) / FEEDBACK_VREF_MV as u64) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Status {
    Low,
    Error,
    High,
}

fn classify(channel: AnalogChannel, raw: u16) -> Status {
    let high_thr = millivolts_to_raw(FEEDBACK_THRESHOLD_HIGH_MV);
    let low_thr = if uses_compressed_low_threshold(channel) {
        millivolts_to_raw(FEEDBACK_THRESHOLD_LOW_COMPRESSED_MV)
    } else {
        millivolts_to_raw(FEEDBACK_THRESHOLD_LOW_MV)
    };

    if channel == AnalogChannel::Probing3V3 {
        // Inverted rule: in-window is the nominal (HIGH) state.
        return if raw >= low_thr && raw <= high_thr {
            Status::High
        } else {
            Status::Error
        };
    }

    if raw >= high_thr {
        Status::High
    } else if raw <= low_thr {
        Status::Low
    } else {
        Status::Error
    }
}

/// The fused 27-entry status vector.
pub struct Feedback {
    digital: u32,
    analog_raw: [u16; ANALOG_COUNT],
    status: [Status; FEEDBACK_COUNT],
}

impl Default for Feedback {
    fn default() -> Self {
        Self::new()
    }
}

impl Feedback {
    pub const fn new() -> Self {
        Self {
            digital: 0,
            analog_raw: [0; ANALOG_COUNT],
            status: [Status::Error; FEEDBACK_COUNT],
        }
    }

    /// Called once per acquisition cycle with the whole digital bitflag
    /// read in a single GPIO pass.
    pub fn update_digital_all(&mut self, bits: u32) {
        self.digital = bits;
    }

    /// Called from the ADC DMA-complete path, once per channel.
    pub fn update_analog(&mut self, channel: AnalogChannel, raw: u16) {
        self.analog_raw[channel as usize] = raw;
    }

    /// Recompute every entry's status from the latest raw digital/analog
    /// readings.
    pub fn update_status(&mut self) {
        for id in FeedbackId::ALL {
            if let Some(bit) = digital_bit_for(id) {
                self.status[id as usize] = if self.digital & (1 << (bit as u32)) != 0 {
                    Status::High
                } else {
                    Status::Low
                };
            } else if let Some(channel) = analog_channel_for(id) {
                self.status[id as usize] = classify(channel, self.analog_raw[channel as usize]);
            }
            // `PlausibleStatePersisted` has neither a digital bit nor an
            // analog channel in the source either: it is derived from
            // latched history rather than a direct reading, and persisted
            // state is out of scope here. Its status is left
            // untouched.
        }
    }

    pub fn status_of(&self, id: FeedbackId) -> Status {
        self.status[id as usize]
    }

    /// Raw 16-bit digital read, as delivered by `update_digital_all`.
    pub fn digital_bits(&self) -> u16 {
        self.digital as u16
    }

    /// Raw ADC reading for one analog channel index (0..10).
    pub fn analog_raw(&self, channel: u8) -> u16 {
        self.analog_raw[channel as usize]
    }

    /// True if every tracked feedback currently reads something other than
    /// `Error`.
    pub fn all_ok(&self) -> bool {
        self.status.iter().all(|&s| s != Status::Error)
    }

    /// The four latch bits packed into one byte, in `FeedbackId` declaration
    /// order (implausible-state, BMS fault, IMD fault, external fault).
    pub fn latched_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.status_of(FeedbackId::ImplausibleStateLatched) == Status::High {
            flags |= 1 << 0;
        }
        if self.status_of(FeedbackId::BmsFaultLatched) == Status::High {
            flags |= 1 << 1;
        }
        if self.status_of(FeedbackId::ImdFaultLatched) == Status::High {
            flags |= 1 << 2;
        }
        if self.status_of(FeedbackId::ExtFaultLatched) == Status::High {
            flags |= 1 << 3;
        }
        flags
    }

    /// True iff every feedback selected by `mask` matches the corresponding
    /// bit of `expected` (`LOW <-> 0`, `HIGH <-> 1`); any `ERROR` counts as
    /// not matching.
    pub fn matches(&self, mask: FeedbackMask, expected: FeedbackMask) -> bool {
        for id in FeedbackId::ALL {
            let bit = 1u32 << (id as u8);
            if mask.bits() & bit == 0 {
                continue;
            }
            let want_high = expected.bits() & bit != 0;
            match self.status_of(id) {
                Status::High if want_high => {}
                Status::Low if !want_high => {}
                _ => return false,
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn set_digital_high(&mut self, id: FeedbackId) {
        if let Some(bit) = digital_bit_for(id) {
            self.digital |= 1 << (bit as u32);
            self.status[id as usize] = Status::High;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v5_mcu_high_low_error_bands() {
        let mut fb = Feedback::new();
        fb.update_analog(AnalogChannel::V5Mcu, millivolts_to_raw(2000));
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::V5Mcu), Status::High);

        fb.update_analog(AnalogChannel::V5Mcu, millivolts_to_raw(500));
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::V5Mcu), Status::Low);

        fb.update_analog(AnalogChannel::V5Mcu, millivolts_to_raw(1200));
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::V5Mcu), Status::Error);
    }

    #[test]
    fn probing_3v3_inverts_the_rule() {
        let mut fb = Feedback::new();
        fb.update_analog(AnalogChannel::Probing3V3, millivolts_to_raw(1000));
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::Probing3V3), Status::High);

        fb.update_analog(AnalogChannel::Probing3V3, millivolts_to_raw(2500));
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::Probing3V3), Status::Error);
    }

    #[test]
    fn airp_airn_mec_channel_swap_is_preserved() {
        // Physically wiring the AIRN-mec ADC channel high should surface as
        // AirpOpenMec going HIGH, per the documented swap.
        let mut fb = Feedback::new();
        fb.update_analog(AnalogChannel::AirnOpenMec, millivolts_to_raw(2000));
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::AirpOpenMec), Status::High);
        assert_eq!(fb.status_of(FeedbackId::AirnOpenMec), Status::Low);
    }

    #[test]
    fn matches_rejects_on_any_error() {
        let mut fb = Feedback::new();
        fb.set_digital_high(FeedbackId::AirnOpenCom);
        // AirnOpenMec left at its default Error status.
        assert!(!fb.matches(
            FeedbackMask::AIRN_OPEN_COM.union(FeedbackMask::AIRN_OPEN_MEC),
            FeedbackMask::AIRN_OPEN_COM.union(FeedbackMask::AIRN_OPEN_MEC),
        ));
    }

    #[test]
    fn digital_read_updates_all_bits_in_one_pass() {
        let mut fb = Feedback::new();
        fb.update_digital_all(0b11);
        fb.update_status();
        assert_eq!(fb.status_of(FeedbackId::AirnOpenCom), Status::High);
        assert_eq!(fb.status_of(FeedbackId::AirpOpenCom), Status::High);
        assert_eq!(fb.status_of(FeedbackId::SdImdFb), Status::Low);
    }
}
