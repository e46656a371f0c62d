//! Last-known holding register values.

use crate::preset::{PRESET_WORDS, PresetGroup};

/// Where the values of a read reply belong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Destination {
    /// The main register map, starting at `start`.
    Main { start: u16 },
    /// The memory bank window of one preset group.
    PresetBank(PresetGroup),
}

/// Cache of `N` holding registers plus one buffer for a paged-in preset bank.
#[derive(Debug, Clone)]
pub struct RegisterCache<const N: usize> {
    registers: [u16; N],
    bank: [u16; PRESET_WORDS],
    bank_group: Option<PresetGroup>,
}

impl<const N: usize> Default for RegisterCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RegisterCache<N> {
    pub const fn new() -> Self {
        Self {
            registers: [0; N],
            bank: [0; PRESET_WORDS],
            bank_group: None,
        }
    }

    /// Last cached value, 0 if never populated or out of range.
    pub fn get(&self, index: u16) -> u16 {
        self.registers.get(index as usize).copied().unwrap_or_default()
    }

    /// Store the values of a read reply. Values past the end of the target are dropped.
    pub fn apply_read_reply(&mut self, destination: Destination, values: &[u16]) {
        match destination {
            Destination::Main { start } => {
                let start = start as usize;
                if let Some(target) = self.registers.get_mut(start..) {
                    target
                        .iter_mut()
                        .zip(values)
                        .for_each(|(slot, value)| *slot = *value);
                }
            }
            Destination::PresetBank(group) => {
                self.bank
                    .iter_mut()
                    .zip(values)
                    .for_each(|(slot, value)| *slot = *value);
                self.bank_group = Some(group);
            }
        }
    }

    /// A write confirm always targets the main register map.
    pub fn apply_write_confirm(&mut self, index: u16, value: u16) {
        if let Some(slot) = self.registers.get_mut(index as usize) {
            *slot = value;
        }
    }

    /// Words of the last preset bank paged in, if it was `group`.
    pub fn bank(&self, group: PresetGroup) -> Option<&[u16; PRESET_WORDS]> {
        (self.bank_group == Some(group)).then_some(&self.bank)
    }

    pub fn registers(&self) -> &[u16; N] {
        &self.registers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpopulated_reads_zero() {
        let cache = RegisterCache::<31>::new();
        assert_eq!(cache.get(0), 0);
        assert_eq!(cache.get(30), 0);
        // Out of range still succeeds.
        assert_eq!(cache.get(200), 0);
    }

    #[test]
    fn read_reply_lands_at_start() {
        let mut cache = RegisterCache::<8>::new();
        cache.apply_read_reply(Destination::Main { start: 2 }, &[10, 11, 12]);
        assert_eq!(cache.registers(), &[0, 0, 10, 11, 12, 0, 0, 0]);
    }

    #[test]
    fn read_reply_truncated_at_end() {
        let mut cache = RegisterCache::<4>::new();
        cache.apply_read_reply(Destination::Main { start: 2 }, &[1, 2, 3, 4]);
        assert_eq!(cache.registers(), &[0, 0, 1, 2]);
        cache.apply_read_reply(Destination::Main { start: 9 }, &[1]);
        assert_eq!(cache.registers(), &[0, 0, 1, 2]);
    }

    #[test]
    fn bank_reply_does_not_touch_main_map() {
        let mut cache = RegisterCache::<31>::new();
        cache.apply_read_reply(Destination::PresetBank(PresetGroup::Group4), &[7; PRESET_WORDS]);
        assert!(cache.registers().iter().all(|value| *value == 0));
        assert_eq!(cache.bank(PresetGroup::Group4), Some(&[7; PRESET_WORDS]));
        assert_eq!(cache.bank(PresetGroup::Group5), None);
    }

    #[test]
    fn write_confirm_updates_main_map() {
        let mut cache = RegisterCache::<31>::new();
        for (index, value) in [(0u16, 500u16), (1, 120), (0x12, 1), (30, 0xFFFF)] {
            cache.apply_write_confirm(index, value);
            assert_eq!(cache.get(index), value);
        }
        // Ignored, no panic.
        cache.apply_write_confirm(31, 1);
        assert_eq!(cache.get(31), 0);
    }
}
