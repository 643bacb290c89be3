//! Request/response correlation across the bridge's asynchronous pipe.
//!
//! Every outbound frame carries a sequence number; the bridge echoes it on
//! the terminal event for that frame (response, no-response, or framing
//! error). [`Bridge`] keeps a table of in-flight requests keyed by
//! sequence, a background thread reads and decodes inbound reports, and
//! each caller blocks on its own completion channel — so completions may
//! arrive in any order without confusing callers.
//!
//! Sequence 0 is never allocated: the bridge uses it for externally
//! initiated traffic, and occasionally for a no-response event it failed
//! to tag. The latter is only attributed to a pending request when exactly
//! one is in flight; anything more ambiguous is logged and dropped.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use daliusb_core::{DaliBus, DriverError, Frame, Reply};
use log::{debug, warn};

use crate::frame::{Direction, Event, InboundReport, encode_outbound};
use crate::transport::{Transport, TransportError};

/// Default deadline for a terminal event, measured from submission. The
/// DALI response window is ~10 ms; the rest covers bridge retransmission
/// and USB scheduling.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the reader thread blocks per read before re-checking for
/// shutdown.
const READ_POLL: Duration = Duration::from_millis(200);

/// Terminal outcome of one request, as delivered by the reader.
#[derive(Debug, Clone, Copy)]
enum Completion {
    Response(u8),
    Absent,
    Framing,
}

struct PendingEntry {
    complete: SyncSender<Completion>,
}

#[derive(Default)]
struct DispatchState {
    pending: HashMap<u8, PendingEntry>,
    next_sequence: u8,
}

impl DispatchState {
    /// Hand out the next free sequence number. Wraps 255 → 1; 0 is
    /// reserved; a number whose request is still in flight is skipped.
    fn allocate(&mut self) -> Option<u8> {
        for _ in 0..u8::MAX {
            let sequence = if self.next_sequence == 0 {
                1
            } else {
                self.next_sequence
            };
            self.next_sequence = sequence.wrapping_add(1);
            if !self.pending.contains_key(&sequence) {
                return Some(sequence);
            }
        }
        None
    }

    /// Deliver a completion and retire the sequence number. The send never
    /// blocks: the channel holds one slot and a gone receiver only means
    /// the caller stopped waiting.
    fn resolve(&mut self, sequence: u8, completion: Completion) -> bool {
        match self.pending.remove(&sequence) {
            Some(entry) => {
                let _ = entry.complete.try_send(completion);
                true
            }
            None => false,
        }
    }
}

/// The bridge dispatcher. Owns the transport, the pending table, and the
/// reader thread; implements [`DaliBus`] for everything above it.
pub struct Bridge<T: Transport + 'static> {
    transport: Arc<T>,
    state: Arc<Mutex<DispatchState>>,
    reply_timeout: Duration,
    reader: Option<thread::JoinHandle<()>>,
}

impl<T: Transport + 'static> Bridge<T> {
    /// Wrap a transport and start the reader thread.
    pub fn new(transport: T) -> Self {
        let transport = Arc::new(transport);
        let state = Arc::new(Mutex::new(DispatchState::default()));

        let reader = {
            let transport = Arc::clone(&transport);
            let state = Arc::clone(&state);
            thread::spawn(move || reader_loop(&*transport, &state))
        };

        Self {
            transport,
            state,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            reader: Some(reader),
        }
    }

    /// Override the per-request deadline.
    pub fn set_reply_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = timeout;
    }

    /// Requests currently awaiting a terminal event.
    pub fn in_flight(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Encode and transmit `frame`, returning a handle the caller waits
    /// on. The pending entry is registered before the report is written,
    /// so a reply cannot race the bookkeeping.
    pub fn submit(&self, frame: Frame) -> Result<PendingReply, DriverError> {
        let (complete, completed) = sync_channel(1);

        let sequence = {
            let mut state = lock(&self.state);
            let Some(sequence) = state.allocate() else {
                return Err(DriverError::Transport(
                    "entire sequence space is in flight".into(),
                ));
            };
            state.pending.insert(sequence, PendingEntry { complete });
            sequence
        };

        let report = encode_outbound(sequence, &frame);
        if let Err(err) = self.transport.write(&report) {
            lock(&self.state).pending.remove(&sequence);
            return Err(DriverError::Transport(err.to_string()));
        }
        debug!("sent frame {frame:?} as seq {sequence}");

        Ok(PendingReply {
            sequence,
            completed,
            deadline: Instant::now() + self.reply_timeout,
            timeout: self.reply_timeout,
            state: Arc::clone(&self.state),
        })
    }

    /// Close the transport and stop the reader. Also runs on drop.
    pub fn close(&mut self) {
        self.transport.close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl<T: Transport + 'static> Drop for Bridge<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport + 'static> DaliBus for Bridge<T> {
    fn send(&mut self, frame: Frame) -> Result<Reply, DriverError> {
        self.submit(frame)?.wait()
    }
}

/// A submitted request. [`wait`](Self::wait) blocks until the terminal
/// event or the deadline, whichever comes first.
pub struct PendingReply {
    sequence: u8,
    completed: Receiver<Completion>,
    deadline: Instant,
    timeout: Duration,
    state: Arc<Mutex<DispatchState>>,
}

impl PendingReply {
    /// The sequence number this request went out under.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Block for the terminal event. On deadline the pending entry is
    /// removed, so a report that shows up later is logged and dropped by
    /// the reader instead of resolving a stranger.
    pub fn wait(self) -> Result<Reply, DriverError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.completed.recv_timeout(remaining) {
            Ok(completion) => Self::into_reply(completion),
            Err(RecvTimeoutError::Timeout) => {
                let removed = lock(&self.state).pending.remove(&self.sequence).is_some();
                if removed {
                    warn!("seq {} timed out after {:?}", self.sequence, self.timeout);
                    return Err(DriverError::Timeout(self.timeout));
                }
                // The reader resolved the entry at the same moment we gave
                // up; the completion is already in the channel.
                match self.completed.try_recv() {
                    Ok(completion) => Self::into_reply(completion),
                    Err(_) => Err(DriverError::Timeout(self.timeout)),
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(DriverError::Transport("dispatcher state was dropped".into()))
            }
        }
    }

    fn into_reply(completion: Completion) -> Result<Reply, DriverError> {
        match completion {
            Completion::Response(byte) => Ok(Some(byte)),
            Completion::Absent => Ok(None),
            Completion::Framing => Err(DriverError::Framing),
        }
    }
}

fn lock(state: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn reader_loop<T: Transport + ?Sized>(transport: &T, state: &Mutex<DispatchState>) {
    loop {
        match transport.read(READ_POLL) {
            Ok(Some(raw)) => match InboundReport::decode(&raw) {
                Some(report) => on_inbound(state, report),
                None => warn!("undersized report from bridge: {raw:02x?}"),
            },
            Ok(None) => continue,
            Err(TransportError::Closed) => break,
            Err(err) => {
                warn!("bridge read failed, stopping reader: {err}");
                break;
            }
        }
    }
}

fn on_inbound(state: &Mutex<DispatchState>, report: InboundReport) {
    if report.direction != Direction::UsbSide {
        // Externally originated bus traffic (wall switches, other
        // masters); nothing here is waiting for it.
        debug!("bus event: {report:?}");
        return;
    }

    let mut state = lock(state);
    if report.sequence != 0 {
        let resolved = match report.event {
            Event::Response => state.resolve(report.sequence, Completion::Response(report.command)),
            Event::NoResponse => state.resolve(report.sequence, Completion::Absent),
            Event::FramingError => state.resolve(report.sequence, Completion::Framing),
            // Our own forward frame went out; the terminal event is still
            // to come, keep the entry.
            Event::TxComplete => state.pending.contains_key(&report.sequence),
            Event::BroadcastReceived | Event::Unknown(_) => false,
        };
        if !resolved {
            debug!("unmatched report: {report:?}");
        }
        return;
    }

    // The bridge sometimes elides the host sequence on a no-response
    // event. Attributing it is only safe when it cannot be ambiguous.
    if report.event == Event::NoResponse {
        let lone = match state.pending.keys().next().copied() {
            Some(sequence) if state.pending.len() == 1 => Some(sequence),
            _ => None,
        };
        match lone {
            Some(sequence) => {
                state.resolve(sequence, Completion::Absent);
            }
            None => warn!(
                "seq-0 no-response with {} requests in flight, dropping",
                state.pending.len()
            ),
        }
        return;
    }

    debug!("unmatched seq-0 report: {report:?}");
}
