//! This module is used to define the holding registers on the XY6020L.
//!
//! Values are raw words as cached by the driver. Scaling them into physical units is left
//! to the caller.

use strum_macros::{EnumCount as EnumCountMacro, EnumIter};

/// Number of holding registers the XY6020L exposes from index 0.
pub const XY6020L_REGISTERS: usize = 31;

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, EnumCountMacro)]
#[repr(u16)]
pub enum XyRegister {
    /// __R/W__ - Voltage setting. LSB 0.01 V.
    VSet = 0x00,
    /// __R/W__ - Current setting. LSB 0.01 A.
    ISet = 0x01,
    /// __R__ - Output voltage display value. LSB 0.01 V.
    VOut = 0x02,
    /// __R__ - Output current display value. LSB 0.01 A.
    IOut = 0x03,
    /// __R__ - Output power display value. LSB 0.1 W.
    Power = 0x04,
    /// __R__ - Input voltage display value. LSB 0.01 V.
    UIn = 0x05,
    /// __R__ - Output Ah is low by 16 bits. LSB 0.001 Ah.
    AhLow = 0x06,
    /// __R__ - Output Ah is high by 16 bits.
    AhHigh = 0x07,
    /// __R__ - Output Wh is low by 16 bits. LSB 0.001 Wh.
    WhLow = 0x08,
    /// __R__ - Output Wh is high by 16 bits.
    WhHigh = 0x09,
    /// __R__ - Output on time, hours.
    OutH = 0x0A,
    /// __R__ - Output on time, minutes.
    OutM = 0x0B,
    /// __R__ - Output on time, seconds.
    OutS = 0x0C,
    /// __R__ - Internal temperature value. LSB 0.1 degree, unit per [`XyRegister::FC`].
    TIn = 0x0D,
    /// __R__ - External temperature value.
    TEx = 0x0E,
    /// __R/W__ - Key lock.
    /// * `0` - Unlocked.
    /// * `1` - Locked.
    Lock = 0x0F,
    /// __R/W__ - Protect status.
    Protect = 0x10,
    /// __R__ - Constant voltage constant current state.
    /// * `0` - CV.
    /// * `1` - CC.
    CvCc = 0x11,
    /// __R/W__ - Switched output.
    OnOff = 0x12,
    /// __R/W__ - The temperature symbol. `0` Celsius, `1` Fahrenheit.
    FC = 0x13,
    /// __R/W__ - Backlight brightness level.
    BLed = 0x14,
    /// __R/W__ - Rest screen time.
    Sleep = 0x15,
    /// __R__ - Product model.
    Model = 0x16,
    /// __R__ - Firmware version number.
    Version = 0x17,
    /// __R/W__ - Slave address of the machine. Applied after a power cycle.
    SlaveAdd = 0x18,
    /// __R/W__ - Baud rate index. Applied after a power cycle.
    BaudRateL = 0x19,
    /// __R/W__ - Internal temperature correction.
    TInOffset = 0x1A,
    /// __R/W__ - External temperature correction.
    TExOffset = 0x1B,
    /// __R/W__ - The buzzer switch.
    Buzzer = 0x1C,
    /// __R/W__ - Quickly call up the data group.
    ///
    /// Writing 0-9 loads the matching preset group into the live settings.
    ExtractM = 0x1D,
    /// __R/W__ - Device status.
    Device = 0x1E,
}

impl From<XyRegister> for u16 {
    fn from(value: XyRegister) -> Self {
        value as u16
    }
}

/// Used to be less ambiguous and whether something is on or off.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Disabled.
    #[default]
    Off = 0x00,
    /// Enabled.
    On = 0x01,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

impl From<u16> for State {
    /// Any non-zero register value counts as on.
    fn from(value: u16) -> Self {
        State::from(value != 0)
    }
}

impl From<State> for u16 {
    fn from(value: State) -> Self {
        value as u16
    }
}
