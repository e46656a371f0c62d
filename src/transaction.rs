//! Bookkeeping for the single request allowed on the wire at a time.

use fugit::MillisDurationU32;

use crate::{
    cache::Destination,
    codec::{ExceptionCode, FN_READ_HOLDINGS, FN_WRITE_MULTIPLE, FN_WRITE_SINGLE, Frame, Reply},
    queue::PendingWrite,
};

/// Period of the coarse timeout tick.
pub const TIMEOUT_TICK: MillisDurationU32 = MillisDurationU32::millis(10);

/// What kind of reply a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    None,
    Confirm,
    Data,
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Data,
    Confirm,
    Exception(ExceptionCode),
    Timeout,
    TransmitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read { start: u16, count: u16, destination: Destination },
    /// `queued` is set when the write came out of the write queue, with its attempt number.
    WriteSingle { write: PendingWrite, queued: Option<u8> },
    WriteMultiple { start: u16, count: u16 },
}

/// A request tagged with its sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub seq: u16,
    pub kind: RequestKind,
}

impl Request {
    pub fn expects(&self) -> Response {
        match self.kind {
            RequestKind::Read { .. } => Response::Data,
            RequestKind::WriteSingle { .. } | RequestKind::WriteMultiple { .. } => Response::Confirm,
        }
    }

    fn function(&self) -> u8 {
        match self.kind {
            RequestKind::Read { .. } => FN_READ_HOLDINGS,
            RequestKind::WriteSingle { .. } => FN_WRITE_SINGLE,
            RequestKind::WriteMultiple { .. } => FN_WRITE_MULTIPLE,
        }
    }

    /// Whether `reply` answers this request, as far as the frame lets us tell.
    pub fn answered_by(&self, reply: &Reply) -> bool {
        match (&self.kind, reply) {
            (RequestKind::Read { count, .. }, Reply::ReadReply(values)) => {
                values.len() == *count as usize
            }
            (RequestKind::WriteSingle { write, .. }, Reply::WriteSingleConfirm { index, value }) => {
                write.index == *index && write.value == *value
            }
            (RequestKind::WriteMultiple { start, count }, Reply::WriteMultipleConfirm { start: s, count: c }) => {
                start == s && count == c
            }
            (_, Reply::Exception { function, .. }) => *function == self.function(),
            _ => false,
        }
    }
}

/// A frame built ahead of its transmit opportunity.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub frame: Frame,
    pub request: Request,
}

/// Countdown of coarse ticks before the outstanding request is abandoned.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBudget {
    reload: u8,
    remaining: u8,
}

impl TimeoutBudget {
    pub const MIN_TICKS: u8 = 4;
    pub const MAX_TICKS: u8 = 7;

    pub fn new(ticks: u8) -> Self {
        let reload = ticks.clamp(Self::MIN_TICKS, Self::MAX_TICKS);
        Self { reload, remaining: reload }
    }

    pub fn reload(&mut self) {
        self.remaining = self.reload;
    }

    /// Spend one coarse tick. Returns `true` once the budget is used up.
    pub fn spend(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::Words, preset::PresetGroup};

    fn read(count: u16) -> Request {
        Request {
            seq: 1,
            kind: RequestKind::Read { start: 0, count, destination: Destination::Main { start: 0 } },
        }
    }

    #[test]
    fn read_is_answered_by_matching_length() {
        let mut values = Words::new();
        values.extend_from_slice(&[1, 2]).unwrap();
        assert!(read(2).answered_by(&Reply::ReadReply(values.clone())));
        assert!(!read(3).answered_by(&Reply::ReadReply(values)));
        assert_eq!(read(1).expects(), Response::Data);
    }

    #[test]
    fn write_is_answered_by_its_echo() {
        let request = Request {
            seq: 2,
            kind: RequestKind::WriteSingle { write: PendingWrite { index: 1, value: 9 }, queued: None },
        };
        assert!(request.answered_by(&Reply::WriteSingleConfirm { index: 1, value: 9 }));
        assert!(!request.answered_by(&Reply::WriteSingleConfirm { index: 1, value: 8 }));
        assert!(!request.answered_by(&Reply::WriteMultipleConfirm { start: 1, count: 1 }));
        assert_eq!(request.expects(), Response::Confirm);
    }

    #[test]
    fn exception_matches_on_function() {
        let preset_read = Request {
            seq: 3,
            kind: RequestKind::Read {
                start: 0x50,
                count: 14,
                destination: Destination::PresetBank(PresetGroup::Group0),
            },
        };
        let busy = ExceptionCode::SlaveDeviceBusy;
        assert!(preset_read.answered_by(&Reply::Exception { function: FN_READ_HOLDINGS, code: busy }));
        assert!(!preset_read.answered_by(&Reply::Exception { function: FN_WRITE_SINGLE, code: busy }));
        assert!(!preset_read.answered_by(&Reply::Malformed));
    }

    #[test]
    fn budget_runs_out_after_reload_ticks() {
        let mut budget = TimeoutBudget::new(7);
        for _ in 0..6 {
            assert!(!budget.spend());
        }
        assert!(budget.spend());
        budget.reload();
        assert_eq!(budget.remaining(), 7);
    }

    #[test]
    fn budget_is_clamped() {
        assert_eq!(TimeoutBudget::new(1).remaining(), TimeoutBudget::MIN_TICKS);
        assert_eq!(TimeoutBudget::new(50).remaining(), TimeoutBudget::MAX_TICKS);
    }
}
