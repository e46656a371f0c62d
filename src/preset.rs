use fugit::Duration;
use strum::EnumCount;
use strum_macros::{EnumCount as EnumCountMacro, EnumIter};
use thiserror::Error;

use crate::{cache::RegisterCache, register::State, transaction::Outcome};

/// The base address of the first preset registers.
///
/// Base address of preset = PRESET_OFFSET + {group number} * PRESET_STRIDE.
///
/// There are 10 groups: M0 - M9.
pub const PRESET_OFFSET: u16 = 0x50;

/// Address distance between two consecutive preset groups.
pub const PRESET_STRIDE: u16 = 0x10;

/// Number of words making up one preset group.
pub const PRESET_WORDS: usize = PresetOffset::COUNT;

/// These are the offsets from the base address of each preset group.
///
/// See [`PRESET_OFFSET`] for calculating the base address of any group.
#[derive(Debug, Copy, Clone, EnumCountMacro, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum PresetOffset {
    /// __R/W__ - Voltage setting. LSB 0.01 V.
    VSet = 0x00,
    /// __R/W__ - Current setting. LSB 0.01 A.
    ISet = 0x01,
    /// __R/W__ - Low voltage protection.
    SLvp = 0x02,
    /// __R/W__ - Over voltage protection.
    SOvp = 0x03,
    /// __R/W__ - Over current protection.
    SOcp = 0x04,
    /// __R/W__ - Over power protection.
    SOpp = 0x05,
    /// __R/W__ - Over time protection - hours.
    SOhpH = 0x06,
    /// __R/W__ - Over time protection - minutes.
    SOhpM = 0x07,
    /// __R/W__ - Over capacity protection lower 16 bits.
    SOahL = 0x08,
    /// __R/W__ - Over capacity protection upper 16 bits.
    SOahH = 0x09,
    /// __R/W__ - Over energy protection lower 16 bits.
    SOwhL = 0x0A,
    /// __R/W__ - Over energy protection upper 16 bits.
    SOwhH = 0x0B,
    /// __R/W__ - Over temperature protection.
    SOtp = 0x0C,
    /// __R/W__ - Power output enable switch when the group is loaded.
    SIni = 0x0D,
}

impl PresetOffset {
    /// Return the address of this register provided the group number (0 - 9).
    pub fn address_in_group(&self, group: PresetGroup) -> u16 {
        group.base_address() + *self as u16
    }
}

/// This enum represents all possible preset groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum PresetGroup {
    Group0 = 0x00,
    Group1 = 0x01,
    Group2 = 0x02,
    Group3 = 0x03,
    Group4 = 0x04,
    Group5 = 0x05,
    Group6 = 0x06,
    Group7 = 0x07,
    Group8 = 0x08,
    Group9 = 0x09,
}

impl PresetGroup {
    /// First register of this group's memory window.
    pub const fn base_address(self) -> u16 {
        PRESET_OFFSET + self as u16 * PRESET_STRIDE
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetError {
    #[error("Preset group no not set")]
    InvalidGroupIndex,
}

impl TryFrom<u16> for PresetGroup {
    type Error = PresetError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use PresetGroup as PG;
        match value {
            0 => Ok(PG::Group0),
            1 => Ok(PG::Group1),
            2 => Ok(PG::Group2),
            3 => Ok(PG::Group3),
            4 => Ok(PG::Group4),
            5 => Ok(PG::Group5),
            6 => Ok(PG::Group6),
            7 => Ok(PG::Group7),
            8 => Ok(PG::Group8),
            9 => Ok(PG::Group9),
            _ => Err(PresetError::InvalidGroupIndex),
        }
    }
}

/// The contents of one preset group, in raw register units.
///
/// Use [`PresetBankBuilder`] to create one from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PresetBank {
    /// Index number of this preset group (0 - 9).
    pub group: PresetGroup,
    pub voltage_set: u16,
    pub current_set: u16,
    pub under_voltage: u16,
    pub over_voltage: u16,
    pub over_current: u16,
    pub over_power: u16,
    pub over_time_hours: u16,
    pub over_time_minutes: u16,
    /// Split over [`PresetOffset::SOahL`] and [`PresetOffset::SOahH`].
    pub over_capacity: u32,
    /// Split over [`PresetOffset::SOwhL`] and [`PresetOffset::SOwhH`].
    pub over_energy: u32,
    pub over_temperature: u16,
    /// What state the output should be in when the preset is loaded.
    pub output_enable: State,
}

impl PresetBank {
    /// Marshal into the word layout of the group's memory window.
    pub fn to_words(&self) -> [u16; PRESET_WORDS] {
        use PresetOffset as PO;

        let mut words = [0x00; PRESET_WORDS];
        words[PO::VSet as usize] = self.voltage_set;
        words[PO::ISet as usize] = self.current_set;
        words[PO::SLvp as usize] = self.under_voltage;
        words[PO::SOvp as usize] = self.over_voltage;
        words[PO::SOcp as usize] = self.over_current;
        words[PO::SOpp as usize] = self.over_power;
        words[PO::SOhpH as usize] = self.over_time_hours;
        words[PO::SOhpM as usize] = self.over_time_minutes;
        words[PO::SOahL as usize] = self.over_capacity as u16;
        words[PO::SOahH as usize] = (self.over_capacity >> 16) as u16;
        words[PO::SOwhL as usize] = self.over_energy as u16;
        words[PO::SOwhH as usize] = (self.over_energy >> 16) as u16;
        words[PO::SOtp as usize] = self.over_temperature;
        words[PO::SIni as usize] = self.output_enable.into();
        words
    }

    pub fn from_words(group: PresetGroup, words: &[u16; PRESET_WORDS]) -> Self {
        use PresetOffset as PO;

        let split = |low: PO, high: PO| words[low as usize] as u32 | (words[high as usize] as u32) << 16;
        Self {
            group,
            voltage_set: words[PO::VSet as usize],
            current_set: words[PO::ISet as usize],
            under_voltage: words[PO::SLvp as usize],
            over_voltage: words[PO::SOvp as usize],
            over_current: words[PO::SOcp as usize],
            over_power: words[PO::SOpp as usize],
            over_time_hours: words[PO::SOhpH as usize],
            over_time_minutes: words[PO::SOhpM as usize],
            over_capacity: split(PO::SOahL, PO::SOahH),
            over_energy: split(PO::SOwhL, PO::SOwhH),
            over_temperature: words[PO::SOtp as usize],
            output_enable: State::from(words[PO::SIni as usize]),
        }
    }
}

/// Use this type to create a preset.
#[derive(Debug)]
pub struct PresetBankBuilder {
    /// Index number of this preset group (0 - 9).
    group: Option<PresetGroup>,
    bank: PresetBank,
}

/// Default protections are essentially disabled.
impl Default for PresetBankBuilder {
    fn default() -> Self {
        PresetBankBuilder {
            group: None,
            bank: PresetBank {
                group: PresetGroup::Group0,
                voltage_set: 0,
                current_set: 0,
                under_voltage: 0,
                over_voltage: 9999,
                over_current: 9999,
                over_power: 9999,
                over_time_hours: 999,
                over_time_minutes: 0,
                over_capacity: 99999,
                over_energy: 99999,
                over_temperature: 1000,
                output_enable: State::default(),
            },
        }
    }
}

impl PresetBankBuilder {
    pub fn new(group: impl Into<PresetGroup>, voltage_set: u16, current_set: u16) -> Self {
        let mut builder = PresetBankBuilder {
            group: Some(group.into()),
            ..Default::default()
        };
        builder.bank.voltage_set = voltage_set;
        builder.bank.current_set = current_set;
        builder
    }

    /// Let's build it!
    pub fn build(self) -> Result<PresetBank, PresetError> {
        let group = self.group.ok_or(PresetError::InvalidGroupIndex)?;
        Ok(PresetBank { group, ..self.bank })
    }

    pub fn for_group(mut self, group: impl Into<PresetGroup>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set output state.
    pub fn with_output(mut self, output_enable: impl Into<State>) -> Self {
        self.bank.output_enable = output_enable.into();
        self
    }

    pub fn with_uvp(mut self, raw: u16) -> Self {
        self.bank.under_voltage = raw;
        self
    }

    pub fn with_ovp(mut self, raw: u16) -> Self {
        self.bank.over_voltage = raw;
        self
    }

    pub fn with_ocp(mut self, raw: u16) -> Self {
        self.bank.over_current = raw;
        self
    }

    pub fn with_opp(mut self, raw: u16) -> Self {
        self.bank.over_power = raw;
        self
    }

    /// Set over time protection. Whole minutes only, hours saturate at `u16::MAX`.
    pub fn with_ohp(mut self, duration: Duration<u32, 1, 1>) -> Self {
        self.bank.over_time_hours = u16::try_from(duration.to_hours()).unwrap_or(u16::MAX);
        self.bank.over_time_minutes = (duration.to_minutes() % 60) as u16;
        self
    }

    pub fn with_oahp(mut self, raw: u32) -> Self {
        self.bank.over_capacity = raw;
        self
    }

    pub fn with_owhp(mut self, raw: u32) -> Self {
        self.bank.over_energy = raw;
        self
    }

    pub fn with_otp(mut self, raw: u16) -> Self {
        self.bank.over_temperature = raw;
        self
    }
}

/// Phase of a preset read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PagerState {
    /// Ready to request a group.
    Send,
    /// Waiting on the read tagged `seq`.
    Wait { group: PresetGroup, seq: u16 },
}

/// Pages one preset group at a time into the register cache.
///
/// Completion is matched on the sequence id of the read it issued, so unrelated replies
/// arriving meanwhile never release it early.
#[derive(Debug)]
pub struct PresetPager {
    state: PagerState,
    outcome: Option<Outcome>,
}

impl Default for PresetPager {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetPager {
    pub const fn new() -> Self {
        Self {
            state: PagerState::Send,
            outcome: None,
        }
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    /// Move to `Wait` for the read tagged `seq`. Only valid from `Send`.
    pub(crate) fn begin(&mut self, group: PresetGroup, seq: u16) -> bool {
        if self.state != PagerState::Send {
            return false;
        }
        self.state = PagerState::Wait { group, seq };
        self.outcome = None;
        true
    }

    /// Note how request `seq` ended. Ignored unless it is the one we wait on.
    pub(crate) fn complete(&mut self, seq: u16, outcome: Outcome) {
        if matches!(self.state, PagerState::Wait { seq: waiting, .. } if waiting == seq) {
            self.outcome = Some(outcome);
        }
    }

    /// Back to `Send` with the bank, once our read has finished.
    pub(crate) fn poll<const N: usize>(&mut self, cache: &RegisterCache<N>) -> Option<PresetBank> {
        let PagerState::Wait { group, .. } = self.state else {
            return None;
        };
        let outcome = self.outcome.take()?;
        self.state = PagerState::Send;
        match outcome {
            Outcome::Data => cache.bank(group).map(|words| PresetBank::from_words(group, words)),
            failed => {
                log::warn!("Preset {:?} read failed: {:?}", group, failed);
                None
            }
        }
    }
}
