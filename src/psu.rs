use crate::{
    cache::{Destination, RegisterCache},
    codec::{self, Decoded, ExceptionCode, Framing, MAX_FRAME_LEN, MAX_READ_WORDS, Reply},
    config::DriverConfig,
    error::{Error, Result},
    preset::{PRESET_WORDS, PagerState, PresetBank, PresetGroup, PresetPager},
    queue::{PendingWrite, WRITE_QUEUE_CAPACITY, WriteQueue},
    register::{XY6020L_REGISTERS, XyRegister},
    transaction::{Outcome, Prepared, Request, RequestKind, Response, TIMEOUT_TICK, TimeoutBudget},
};
use fugit::{MillisDurationU32, TimerInstantU32};

/// Millisecond timestamp handed to [`XyPsu::tick`].
pub type Instant = TimerInstantU32<1000>;

/// Bytes pulled from the transport per read call.
const RX_CHUNK: usize = 32;

/// Counters kept across the lifetime of the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverStats {
    pub replies: u32,
    pub timeouts: u32,
    pub malformed: u32,
    pub exceptions: u32,
    /// Frames accepted although their CRC did not match.
    pub crc_mismatches: u32,
    /// Frames accepted although they carried another slave address.
    pub foreign_address: u32,
    pub skipped_writes: u32,
    pub requeued_writes: u32,
    pub dropped_writes: u32,
}

/// You can create a XyPsu using any interface which implements [embedded_io::Read],
/// [embedded_io::ReadReady] & [embedded_io::Write].
///
/// Nothing here blocks. The application calls [`XyPsu::tick`] from its main loop and
/// everything else only stages work for the next transmit opportunity or reads the cache.
/// At most one request is on the wire at a time and requests are spaced by the configured
/// pacing.
///
/// `N` is the number of holding registers mirrored from index 0, `Q` the depth of the write
/// queue.
pub struct XyPsu<
    S: embedded_io::Read + embedded_io::ReadReady + embedded_io::Write,
    const N: usize = XY6020L_REGISTERS,
    const Q: usize = WRITE_QUEUE_CAPACITY,
> {
    interface: S,
    config: DriverConfig,
    cache: RegisterCache<N>,
    queue: WriteQueue<Q>,
    /// A write lost to a timeout, with the attempt it will go out as.
    retry: Option<(PendingWrite, u8)>,
    pager: PresetPager,
    outbound: Option<Prepared>,
    in_flight: Option<Request>,
    rx: heapless::Vec<u8, MAX_FRAME_LEN>,
    budget: TimeoutBudget,
    next_seq: u16,
    reply_count: u16,
    /// Set when a read of the main register map has been merged.
    registers_fresh: bool,
    last_tx: Option<Instant>,
    last_refresh: Option<Instant>,
    last_timeout_tick: Option<Instant>,
    last_exception: Option<ExceptionCode>,
    last_dropped: Option<PendingWrite>,
    stats: DriverStats,
}

fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

fn elapsed(since: Option<Instant>, now: Instant, interval: MillisDurationU32) -> bool {
    match since {
        None => true,
        Some(then) => now
            .checked_duration_since(then)
            .is_some_and(|gap| gap >= interval),
    }
}

impl<S: embedded_io::Read + embedded_io::ReadReady + embedded_io::Write, const N: usize, const Q: usize>
    XyPsu<S, N, Q>
{
    /// Create a new XyPsu talking to the slave at `address` with default timing.
    pub fn new(interface: S, address: u8) -> Result<Self, S::Error> {
        Self::with_config(interface, DriverConfig::default().with_address(address))
    }

    /// Create a new XyPsu with full control over address, timing and options.
    ///
    /// Fails with [`Error::InvalidRange`] for an unusable slave address or register count.
    pub fn with_config(interface: S, config: DriverConfig) -> Result<Self, S::Error> {
        if !config.address_valid() || N == 0 || N > MAX_READ_WORDS {
            return Err(Error::InvalidRange);
        }
        Ok(Self {
            interface,
            config,
            cache: RegisterCache::new(),
            queue: WriteQueue::new(),
            retry: None,
            pager: PresetPager::new(),
            outbound: None,
            in_flight: None,
            rx: heapless::Vec::new(),
            budget: TimeoutBudget::new(config.timeout_ticks),
            next_seq: 0,
            reply_count: 0,
            registers_fresh: false,
            last_tx: None,
            last_refresh: None,
            last_timeout_tick: None,
            last_exception: None,
            last_dropped: None,
            stats: DriverStats::default(),
        })
    }

    /// The configuration the driver was created with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Borrow the underlying interface, e.g. to change the baud rate.
    pub fn interface_mut(&mut self) -> &mut S {
        &mut self.interface
    }

    /// Give the interface back.
    pub fn release(self) -> S {
        self.interface
    }

    /// Service the bus once: take in received bytes, age the outstanding request and use the
    /// transmit opportunity if there is one.
    ///
    /// A transport error is returned after the rest of the tick has run; the driver stays
    /// usable.
    pub fn tick(&mut self, now: Instant) -> Result<(), S::Error> {
        let received = self.receive();
        self.check_timeout(now);
        let transmitted = self.transmit(now);
        received.and(transmitted)
    }

    /// Cached value of holding register `index`, `0` when out of range or never read.
    pub fn read_cached(&self, index: u16) -> u16 {
        self.cache.get(index)
    }

    /// Cached value of a named XY6020L register.
    pub fn read_register(&self, register: XyRegister) -> u16 {
        self.cache.get(register.into())
    }

    /// The whole mirrored register map.
    pub fn registers(&self) -> &[u16; N] {
        self.cache.registers()
    }

    /// Queue a single register write. Returns `false` if the queue is full.
    pub fn enqueue_write(&mut self, index: u16, value: u16) -> bool {
        let accepted = self.queue.push(index, value);
        if !accepted {
            log::warn!("Write queue full, dropping write of {} to register {}", value, index);
        }
        accepted
    }

    /// Queue a write to a named XY6020L register.
    pub fn enqueue_register_write(&mut self, register: XyRegister, value: impl Into<u16>) -> bool {
        self.enqueue_write(register.into(), value.into())
    }

    /// Prepare a single register write that bypasses the queue and the unchanged check.
    pub fn write_direct(&mut self, index: u16, value: u16) -> Result<(), S::Error> {
        if self.outbound.is_some() {
            return Err(Error::TransmitSlotBusy);
        }
        let frame = codec::encode_write_single(self.config.address, index, value)?;
        let write = PendingWrite { index, value };
        let prepared = self.prepare(frame, RequestKind::WriteSingle { write, queued: None });
        self.outbound = Some(prepared);
        Ok(())
    }

    /// Start reading preset `group`. Poll [`XyPsu::poll_preset_ready`] for the result.
    pub fn request_preset(&mut self, group: impl Into<PresetGroup>) -> Result<(), S::Error> {
        let group = group.into();
        if self.pager.state() != PagerState::Send {
            return Err(Error::PresetBusy);
        }
        if self.outbound.is_some() {
            return Err(Error::TransmitSlotBusy);
        }
        let start = group.base_address();
        let count = PRESET_WORDS as u16;
        let frame = codec::encode_read_holdings(self.config.address, start, count)?;
        let prepared = self.prepare(
            frame,
            RequestKind::Read {
                start,
                count,
                destination: Destination::PresetBank(group),
            },
        );
        self.pager.begin(group, prepared.request.seq);
        log::debug!("Requesting preset {:?} as request {}", group, prepared.request.seq);
        self.outbound = Some(prepared);
        Ok(())
    }

    /// The requested preset once its read has been answered.
    ///
    /// A failed read also returns the pager to `Send`, but yields `None`.
    pub fn poll_preset_ready(&mut self) -> Option<PresetBank> {
        self.pager.poll(&self.cache)
    }

    /// Whether the pager is free or waiting on a preset read.
    pub fn preset_state(&self) -> PagerState {
        self.pager.state()
    }

    /// Write a whole preset group in one request.
    pub fn push_preset(&mut self, bank: &PresetBank) -> Result<(), S::Error> {
        if self.outbound.is_some() {
            return Err(Error::TransmitSlotBusy);
        }
        let start = bank.group.base_address();
        let words = bank.to_words();
        let frame = codec::encode_write_multiple(self.config.address, start, &words)?;
        let prepared = self.prepare(
            frame,
            RequestKind::WriteMultiple {
                start,
                count: words.len() as u16,
            },
        );
        self.outbound = Some(prepared);
        Ok(())
    }

    /// Number of accepted frames and timeouts so far, wrapping.
    pub fn reply_count(&self) -> u16 {
        self.reply_count
    }

    /// Whether anything was received or timed out since `mark` was taken from
    /// [`XyPsu::reply_count`].
    pub fn has_reply_since(&self, mark: u16) -> bool {
        self.reply_count != mark
    }

    /// `true` once after each read of the main register map has been merged into the cache.
    ///
    /// Timeouts, exceptions, write confirms and preset reads leave it alone.
    pub fn registers_updated(&mut self) -> bool {
        core::mem::take(&mut self.registers_fresh)
    }

    /// Forget every queued write, including one waiting for a retry.
    ///
    /// A write already on the wire still completes.
    pub fn clear_pending_writes(&mut self) {
        if !self.queue.is_empty() || self.retry.is_some() {
            log::debug!("Clearing {} pending writes", self.queue.len() + self.retry.iter().count());
        }
        self.queue.clear();
        self.retry = None;
    }

    /// Nothing prepared and nothing queued.
    pub fn tx_idle(&self) -> bool {
        self.outbound.is_none() && self.retry.is_none() && self.queue.is_empty()
    }

    /// The reply the bus is waiting on.
    pub fn awaiting(&self) -> Response {
        self.in_flight
            .map(|request| request.expects())
            .unwrap_or(Response::None)
    }

    /// Exception code of the most recent exception reply.
    pub fn last_exception(&self) -> Option<ExceptionCode> {
        self.last_exception
    }

    /// [`XyPsu::last_exception`] in rmodbus terms.
    pub fn last_exception_error(&self) -> Option<rmodbus::ErrorKind> {
        self.last_exception.map(Into::into)
    }

    /// The last queued write given up on after its retries ran out.
    pub fn last_dropped_write(&self) -> Option<PendingWrite> {
        self.last_dropped
    }

    /// Snapshot of the driver counters.
    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    fn max_words(&self) -> usize {
        N.max(PRESET_WORDS)
    }

    fn prepare(&mut self, frame: codec::Frame, kind: RequestKind) -> Prepared {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Prepared {
            frame,
            request: Request { seq, kind },
        }
    }

    fn receive(&mut self) -> Result<(), S::Error> {
        let drained = self.drain_interface();
        self.process_rx();
        drained
    }

    fn drain_interface(&mut self) -> Result<(), S::Error> {
        let mut chunk = [0u8; RX_CHUNK];
        while !self.rx.is_full() && self.interface.read_ready().map_err(Error::SerialError)? {
            let room = (self.rx.capacity() - self.rx.len()).min(RX_CHUNK);
            let count = self
                .interface
                .read(&mut chunk[..room])
                .map_err(Error::SerialError)?;
            if count == 0 || self.rx.extend_from_slice(&chunk[..count]).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn process_rx(&mut self) {
        let mut skipped = 0;
        loop {
            match codec::framing(&self.rx, self.max_words()) {
                Framing::NeedMore => break,
                // Slide one byte and look for a frame header again.
                Framing::Garbage => {
                    skipped += 1;
                    self.consume_rx(1);
                }
                Framing::Complete(len) => {
                    self.report_skipped(&mut skipped);
                    let decoded = codec::decode(&self.rx[..len], self.max_words());
                    self.consume_rx(len);
                    self.accept(decoded);
                }
            }
        }
        self.report_skipped(&mut skipped);
    }

    /// One run of unframeable bytes counts as one malformed frame.
    fn report_skipped(&mut self, skipped: &mut usize) {
        if *skipped > 0 {
            log::warn!("Discarded {} unframeable bytes", skipped);
            bump(&mut self.stats.malformed);
            *skipped = 0;
        }
    }

    fn consume_rx(&mut self, len: usize) {
        let rest = self.rx.len().saturating_sub(len);
        self.rx.copy_within(len.., 0);
        self.rx.truncate(rest);
    }

    fn accept(&mut self, decoded: Decoded) {
        if decoded.reply == Reply::Malformed {
            log::warn!("Dropping malformed frame");
            bump(&mut self.stats.malformed);
            return;
        }
        if !decoded.crc_ok {
            log::debug!("Accepting frame with bad CRC");
            bump(&mut self.stats.crc_mismatches);
        }
        if decoded.address != self.config.address {
            log::debug!("Accepting frame from slave {}", decoded.address);
            bump(&mut self.stats.foreign_address);
        }
        self.reply_count = self.reply_count.wrapping_add(1);
        bump(&mut self.stats.replies);

        let completed = match self.in_flight {
            Some(request) if request.answered_by(&decoded.reply) => self.in_flight.take(),
            Some(request) => {
                log::debug!("Frame does not answer request {}", request.seq);
                None
            }
            None => None,
        };

        let outcome = match decoded.reply {
            Reply::ReadReply(values) => {
                match completed.map(|request| request.kind) {
                    Some(RequestKind::Read { destination, .. }) => {
                        self.cache.apply_read_reply(destination, &values);
                        if let Destination::Main { .. } = destination {
                            self.registers_fresh = true;
                        }
                    }
                    _ => log::debug!("Unsolicited read reply, {} values dropped", values.len()),
                }
                Outcome::Data
            }
            Reply::WriteSingleConfirm { index, value } => {
                self.cache.apply_write_confirm(index, value);
                Outcome::Confirm
            }
            Reply::WriteMultipleConfirm { .. } => Outcome::Confirm,
            Reply::Exception { function, code } => {
                log::warn!("Slave answered function {:#04x} with {:?}", function, code);
                self.last_exception = Some(code);
                bump(&mut self.stats.exceptions);
                Outcome::Exception(code)
            }
            Reply::Malformed => return,
        };

        if let Some(request) = completed {
            log::debug!("Request {} finished: {:?}", request.seq, outcome);
            self.finish(request, outcome);
        }
    }

    fn finish(&mut self, request: Request, outcome: Outcome) {
        self.pager.complete(request.seq, outcome);
        if !matches!(outcome, Outcome::Timeout | Outcome::TransmitFailed) {
            return;
        }
        if let RequestKind::WriteSingle { write, queued: Some(attempt) } = request.kind {
            if attempt < self.config.write_retries {
                log::debug!("Retrying write of {} to register {}", write.value, write.index);
                self.retry = Some((write, attempt + 1));
                bump(&mut self.stats.requeued_writes);
            } else {
                log::warn!("Giving up on write of {} to register {}", write.value, write.index);
                self.last_dropped = Some(write);
                bump(&mut self.stats.dropped_writes);
            }
        }
    }

    fn check_timeout(&mut self, now: Instant) {
        if !elapsed(self.last_timeout_tick, now, TIMEOUT_TICK) {
            return;
        }
        self.last_timeout_tick = Some(now);
        match self.in_flight {
            None => self.budget.reload(),
            Some(request) => {
                if self.budget.spend() {
                    log::warn!("Request {} timed out", request.seq);
                    self.in_flight = None;
                    self.rx.clear();
                    self.reply_count = self.reply_count.wrapping_add(1);
                    bump(&mut self.stats.timeouts);
                    self.finish(request, Outcome::Timeout);
                }
            }
        }
    }

    fn transmit(&mut self, now: Instant) -> Result<(), S::Error> {
        if self.in_flight.is_some() || !elapsed(self.last_tx, now, self.config.pacing) {
            return Ok(());
        }
        match self.next_request(now)? {
            Some(prepared) => self.send(prepared, now),
            None => Ok(()),
        }
    }

    /// Pick what goes out next: the prepared frame, then one queued write, then a refresh.
    fn next_request(&mut self, now: Instant) -> Result<Option<Prepared>, S::Error> {
        if let Some(prepared) = self.outbound.take() {
            return Ok(Some(prepared));
        }

        let next_write = match self.retry.take() {
            Some(retry) => Some(retry),
            None => self.queue.pop().map(|write| (write, 0)),
        };
        if let Some((write, attempt)) = next_write {
            if self.config.options.skip_unchanged_writes() && self.cache.get(write.index) == write.value {
                log::trace!("Register {} already holds {}, skipping write", write.index, write.value);
                bump(&mut self.stats.skipped_writes);
                return Ok(None);
            }
            let frame = codec::encode_write_single(self.config.address, write.index, write.value)?;
            let kind = RequestKind::WriteSingle { write, queued: Some(attempt) };
            return Ok(Some(self.prepare(frame, kind)));
        }

        if !self.config.options.disable_periodic_refresh()
            && elapsed(self.last_refresh, now, self.config.refresh_interval)
        {
            self.last_refresh = Some(now);
            let count = N as u16;
            let frame = codec::encode_read_holdings(self.config.address, 0, count)?;
            let kind = RequestKind::Read {
                start: 0,
                count,
                destination: Destination::Main { start: 0 },
            };
            return Ok(Some(self.prepare(frame, kind)));
        }

        Ok(None)
    }

    fn send(&mut self, prepared: Prepared, now: Instant) -> Result<(), S::Error> {
        self.last_tx = Some(now);
        if !self.rx.is_empty() {
            log::debug!("Dropping {} stale bytes before request {}", self.rx.len(), prepared.request.seq);
            self.rx.clear();
        }
        match self.interface.write_all(&prepared.frame) {
            Ok(()) => {
                log::debug!("Sent request {} ({} bytes)", prepared.request.seq, prepared.frame.len());
                self.budget.reload();
                self.in_flight = Some(prepared.request);
                Ok(())
            }
            Err(e) => {
                log::warn!("Transmit of request {} failed", prepared.request.seq);
                self.finish(prepared.request, Outcome::TransmitFailed);
                Err(Error::SerialError(e))
            }
        }
    }
}
