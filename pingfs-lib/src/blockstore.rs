// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Echo-Loop Block Store — L1 (spec §3, §4.2, §5).
//!
//! Grounded in `ping_server.py`'s `PingServer`/`PingTimer` for the
//! receiver/timer split and in `zzping-daemon/src/transport.rs`'s
//! `Destination`/`Comms` for how the teacher shapes per-destination
//! state as plain Rust structs instead of Python's `threading.Thread`
//! subclasses.

use crate::error::{Error, Result};
use crate::icmp::{self, IcmpReceiver, IcmpSender};
use crate::signal::Signal;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Tunables for a [`BlockStore`]; the only ones fixed by calibration
/// are `block_size` (negotiated with the remote) and `t_op` (derived
/// from `op_timeout`).
#[derive(Debug, Clone)]
pub struct BlockStoreConfig {
    /// Operational timeout `T_op` (spec §4.2). Must be smaller than the
    /// measured round trip so we resend before the host's reply is lost.
    pub op_timeout: Duration,
    /// Fallback block size used while probing; the remote's actual echo
    /// length is authoritative once `setup()` completes.
    pub block_size_hint: usize,
    /// Minimum socket receive buffer, forwarded to [`icmp::open_socket`].
    pub recv_buffer: usize,
}

impl Default for BlockStoreConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(400),
            block_size_hint: 1024,
            recv_buffer: icmp::MIN_RECV_BUFFER,
        }
    }
}

/// A queued block operation, serialized per block id (spec §4.2 "Per-
/// block FIFO discipline").
enum PendingOp {
    Write {
        bytes: Vec<u8>,
        signal: Arc<Signal<()>>,
    },
    Read {
        signal: Arc<Signal<Vec<u8>>>,
    },
    Delete {
        signal: Arc<Signal<()>>,
    },
}

/// What a timer entry does when it fires before a reply arrives.
enum TimerKind {
    Write(Vec<u8>, Arc<Signal<()>>),
    Read(Arc<Signal<Vec<u8>>>),
    Delete(Arc<Signal<()>>),
}

impl TimerKind {
    fn already_done(&self) -> bool {
        match self {
            TimerKind::Write(_, s) => s.is_done(),
            TimerKind::Read(s) => s.is_done(),
            TimerKind::Delete(s) => s.is_done(),
        }
    }
}

struct TimerEntry {
    expire: Instant,
    seq: u64,
    block_id: u32,
    kind: TimerKind,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expire == other.expire && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expire.cmp(&other.expire).then(self.seq.cmp(&other.seq))
    }
}

struct ListenerEntry {
    expire: Instant,
    sink: Arc<Mutex<HashSet<u32>>>,
}

struct Inner {
    tx: Mutex<Box<dyn IcmpSender>>,
    dst: IpAddr,
    block_size: usize,
    t_op: Duration,
    live_blocks: AtomicI64,
    pending: Mutex<HashMap<u32, VecDeque<PendingOp>>>,
    timers: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    timer_cond: Condvar,
    listeners: Mutex<Vec<ListenerEntry>>,
    seq: AtomicU64,
    running: AtomicBool,
    /// Latched once the remote echoes back block id 0 (spec §7
    /// `CORRUPT_ID_ZERO`: "Fatal: the host is known to be unsuitable").
    /// `None` is the live state; `Some` is permanent for this store.
    fatal: Mutex<Option<Error>>,
}

impl Inner {
    fn zero_block(&self) -> Vec<u8> {
        vec![0u8; self.block_size]
    }

    fn check_fatal(&self) -> Result<()> {
        match &*self.fatal.lock().unwrap() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn latch_fatal(&self, err: Error) {
        let mut slot = self.fatal.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn schedule_timeout(&self, block_id: u32, kind: TimerKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = TimerEntry {
            expire: Instant::now() + self.t_op,
            seq,
            block_id,
            kind,
        };
        self.timers.lock().unwrap().push(Reverse(entry));
        self.timer_cond.notify_all();
    }

    fn enqueue(&self, block_id: u32, op: PendingOp) {
        self.pending
            .lock()
            .unwrap()
            .entry(block_id)
            .or_default()
            .push_back(op);
    }

    /// Drains every not-yet-resolved op queued for `block_id`, folding
    /// in the effect each has on the payload that gets echoed back out
    /// (spec §4.2 "Drain the FIFO of pending operations for K").
    fn on_reply(&self, block_id: u32, source: IpAddr, received: Vec<u8>) {
        let mut effective = received;
        let ops = self
            .pending
            .lock()
            .unwrap()
            .remove(&block_id)
            .unwrap_or_default();
        for op in ops {
            match op {
                PendingOp::Write { bytes, signal } => {
                    if signal.fire(()) {
                        effective = bytes;
                    }
                }
                PendingOp::Read { signal } => {
                    let delivered = if is_dead(&effective) {
                        self.zero_block()
                    } else {
                        effective.clone()
                    };
                    signal.fire(delivered);
                }
                PendingOp::Delete { signal } => {
                    if signal.fire(()) {
                        effective = Vec::new();
                    }
                }
            }
        }

        if is_dead(&effective) {
            self.live_blocks.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        {
            let now = Instant::now();
            let mut listeners = self.listeners.lock().unwrap();
            listeners.retain(|l| l.expire >= now);
            for l in listeners.iter() {
                l.sink.lock().unwrap().insert(block_id);
            }
        }

        let mut tx = self.tx.lock().unwrap();
        if let Err(e) = tx.send(source, block_id, &effective) {
            log::warn!("pingfs: resend failed for block {block_id}: {e}");
        }
    }

    /// Runs one due timer entry's handler, then resolves its signal
    /// (idempotent — a concurrent reply may have already done so).
    fn run_timeout(&self, entry: TimerEntry) {
        match entry.kind {
            TimerKind::Write(bytes, signal) => {
                self.live_blocks.fetch_add(1, Ordering::AcqRel);
                self.on_reply(entry.block_id, self.dst, bytes);
                signal.fire(());
            }
            TimerKind::Read(signal) => {
                signal.fire(self.zero_block());
            }
            TimerKind::Delete(signal) => {
                signal.fire(());
            }
        }
    }

    /// Pops and runs all due entries; returns how long until the next
    /// one is due, or `None` if the queue is empty.
    fn timer_process(&self) -> Option<Duration> {
        loop {
            let mut timers = self.timers.lock().unwrap();
            let now = Instant::now();
            let due = match timers.peek() {
                None => return None,
                Some(Reverse(top)) if top.expire > now => return Some(top.expire - now),
                Some(_) => timers.pop().unwrap().0,
            };
            drop(timers);
            if !due.kind.already_done() {
                self.run_timeout(due);
            }
        }
    }
}

fn is_dead(payload: &[u8]) -> bool {
    payload.is_empty() || payload.iter().all(|&b| b == 0)
}

/// A handle to a running echo-loop store. Cloning shares the same
/// background receiver/timer threads and transport.
pub struct BlockStore {
    inner: Arc<Inner>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BlockStore {
    /// Probes `server`, calibrates round-trip delay and block size, and
    /// starts the receiver/timer threads (spec §4.2 "Setup"), over a
    /// real raw ICMP socket.
    pub fn connect(server: &str, cfg: BlockStoreConfig) -> Result<Self> {
        let dst: IpAddr = server.parse().map_err(|_| Error::Setup {
            host: server.to_owned(),
            reason: "not a valid IPv4/IPv6 literal".to_owned(),
        })?;
        let (tx, rx) = icmp::open_socket(cfg.recv_buffer)?;
        Self::connect_with_transport(dst, Box::new(tx), Box::new(rx), cfg)
    }

    /// Same calibration and thread setup as [`Self::connect`], but over
    /// a caller-supplied transport — the seam tests use to swap in an
    /// in-process fake remote instead of a real raw socket.
    pub fn connect_with_transport(
        dst: IpAddr,
        mut tx: Box<dyn IcmpSender>,
        mut rx: Box<dyn IcmpReceiver>,
        cfg: BlockStoreConfig,
    ) -> Result<Self> {
        let probe_id = random_nonzero_id();
        measure_round_trip(tx.as_mut(), rx.as_mut(), dst, probe_id, cfg.op_timeout)?;
        let block_size = calibrate_block_size(
            tx.as_mut(),
            rx.as_mut(),
            dst,
            cfg.block_size_hint,
            cfg.op_timeout,
        )?;

        let inner = Arc::new(Inner {
            tx: Mutex::new(tx),
            dst,
            block_size,
            t_op: cfg.op_timeout,
            live_blocks: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            timers: Mutex::new(BinaryHeap::new()),
            timer_cond: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            running: AtomicBool::new(true),
            fatal: Mutex::new(None),
        });

        let receiver_inner = inner.clone();
        let receiver = std::thread::spawn(move || receiver_loop(receiver_inner, rx));
        let timer_inner = inner.clone();
        let timer = std::thread::spawn(move || timer_loop(timer_inner));

        Ok(Self {
            inner,
            receiver: Mutex::new(Some(receiver)),
            timer: Mutex::new(Some(timer)),
        })
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn op_timeout(&self) -> Duration {
        self.inner.t_op
    }

    /// The minimum window in which every currently-cycling block should
    /// be observed at least once (spec §4.2 "Nominal timeout").
    pub fn safe_timeout(&self) -> Duration {
        self.inner.t_op * 3
    }

    pub fn live_block_count(&self) -> i64 {
        self.inner.live_blocks.load(Ordering::Acquire)
    }

    /// Enqueues a write, padding/truncating `data` to exactly one block
    /// so the echo-loop invariant (Read returns what Write sent, padded
    /// to `block_size`) holds regardless of what the caller supplied.
    ///
    /// Fails with [`Error::CorruptIdZero`] once the remote has ever
    /// echoed back id 0 — that host is permanently unusable, so new ops
    /// are refused rather than queued to hang forever (spec §7).
    pub fn write(&self, block_id: u32, data: &[u8]) -> Result<Arc<Signal<()>>> {
        assert_ne!(block_id, 0, "block id 0 is reserved");
        self.inner.check_fatal()?;
        let mut bytes = vec![0u8; self.inner.block_size];
        let n = data.len().min(self.inner.block_size);
        bytes[..n].copy_from_slice(&data[..n]);
        let signal = Signal::new();
        self.inner.enqueue(
            block_id,
            PendingOp::Write {
                bytes: bytes.clone(),
                signal: signal.clone(),
            },
        );
        self.inner
            .schedule_timeout(block_id, TimerKind::Write(bytes, signal.clone()));
        Ok(signal)
    }

    pub fn write_blocking(&self, block_id: u32, data: &[u8]) -> Result<()> {
        self.write(block_id, data)?.wait();
        Ok(())
    }

    /// See [`Self::write`] for the `CorruptIdZero` refusal.
    pub fn read(&self, block_id: u32) -> Result<Arc<Signal<Vec<u8>>>> {
        assert_ne!(block_id, 0, "block id 0 is reserved");
        self.inner.check_fatal()?;
        let signal = Signal::new();
        self.inner.enqueue(
            block_id,
            PendingOp::Read {
                signal: signal.clone(),
            },
        );
        self.inner
            .schedule_timeout(block_id, TimerKind::Read(signal.clone()));
        Ok(signal)
    }

    pub fn read_blocking(&self, block_id: u32) -> Result<Vec<u8>> {
        Ok(self.read(block_id)?.wait())
    }

    /// See [`Self::write`] for the `CorruptIdZero` refusal.
    pub fn delete(&self, block_id: u32) -> Result<Arc<Signal<()>>> {
        assert_ne!(block_id, 0, "block id 0 is reserved");
        self.inner.check_fatal()?;
        let signal = Signal::new();
        self.inner.enqueue(
            block_id,
            PendingOp::Delete {
                signal: signal.clone(),
            },
        );
        self.inner
            .schedule_timeout(block_id, TimerKind::Delete(signal.clone()));
        Ok(signal)
    }

    pub fn delete_blocking(&self, block_id: u32) -> Result<()> {
        self.delete(block_id)?.wait();
        Ok(())
    }

    /// Registers a listener for `duration` and returns every block id
    /// observed cycling during that window (spec §4.2 "Liveness
    /// observation").
    pub fn observe_live(&self, duration: Duration) -> HashSet<u32> {
        let sink = Arc::new(Mutex::new(HashSet::new()));
        self.inner.listeners.lock().unwrap().push(ListenerEntry {
            expire: Instant::now() + duration,
            sink: sink.clone(),
        });
        std::thread::sleep(duration);
        let result = sink.lock().unwrap().clone();
        result
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.timer_cond.notify_all();
        if let Some(h) = self.receiver.lock().unwrap().take() {
            let _ = h.join();
        }
        if let Some(h) = self.timer.lock().unwrap().take() {
            let _ = h.join();
        }
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// For each maximal run of contiguous ids, `start -> length` (spec
/// §4.2 "used(blocks)").
pub fn used(observed: &HashSet<u32>) -> BTreeMap<u32, u32> {
    let mut sorted: Vec<u32> = observed.iter().copied().collect();
    sorted.sort_unstable();
    let mut result = BTreeMap::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut len = 1u32;
        while i + 1 < sorted.len() && sorted[i + 1] == sorted[i] + 1 {
            i += 1;
            len += 1;
        }
        result.insert(start, len);
        i += 1;
    }
    result
}

/// Complementary gap map from id 1 upward: `start -> length of gap`
/// (spec §4.2 "free(blocks)"). The highest-keyed entry is the
/// unbounded tail above the last observed used block and always
/// carries length 0 as a sentinel — the allocator's append-at-top path
/// uses its *key*, not its length.
pub fn free(observed: &HashSet<u32>) -> BTreeMap<u32, u32> {
    let mut sorted: Vec<u32> = observed.iter().copied().collect();
    sorted.sort_unstable();
    let mut result = BTreeMap::new();
    let mut cursor = 1u32;
    for id in sorted {
        if id > cursor {
            result.insert(cursor, id - cursor);
        }
        cursor = id + 1;
    }
    result.insert(cursor, 0);
    result
}

fn random_nonzero_id() -> u32 {
    loop {
        let id: u32 = rand::thread_rng().gen();
        if id != 0 {
            return id;
        }
    }
}

/// Probe 1: an identical-payload round trip, timing the delay (spec
/// §4.2 "Setup", step 1; `ping_server.py::setup_timeout`).
fn measure_round_trip(
    tx: &mut dyn IcmpSender,
    rx: &mut dyn IcmpReceiver,
    dst: IpAddr,
    id: u32,
    timeout: Duration,
) -> Result<Duration> {
    let started = Instant::now();
    let stamp = started.elapsed().as_nanos().to_ne_bytes();
    tx.send(dst, id, &stamp)?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Setup {
                host: dst.to_string(),
                reason: "no reply to calibration echo".to_owned(),
            });
        }
        match rx.recv(remaining)? {
            Some((addr, rid, payload)) if rid == id && addr == dst && payload == stamp => {
                return Ok(started.elapsed());
            }
            _ => continue,
        }
    }
}

/// Probe 2: a block-size-hint payload of a repeated random byte; the
/// accepted echo length becomes the authoritative block size (spec
/// §4.2 "Setup", step 2; `ping_server.py::setup_block`).
fn calibrate_block_size(
    tx: &mut dyn IcmpSender,
    rx: &mut dyn IcmpReceiver,
    dst: IpAddr,
    size_hint: usize,
    timeout: Duration,
) -> Result<usize> {
    let id = random_nonzero_id();
    let fill: u8 = rand::thread_rng().gen();
    let filler = vec![fill; size_hint];
    tx.send(dst, id, &filler)?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Setup {
                host: dst.to_string(),
                reason: "no reply to block-size calibration echo".to_owned(),
            });
        }
        match rx.recv(remaining)? {
            Some((addr, rid, payload)) if rid == id && addr == dst => {
                if payload.is_empty() {
                    return Err(Error::Setup {
                        host: dst.to_string(),
                        reason: "null response to block-size calibration".to_owned(),
                    });
                }
                if !payload.iter().all(|&b| b == fill) {
                    return Err(Error::Setup {
                        host: dst.to_string(),
                        reason: "corrupted block-size calibration payload".to_owned(),
                    });
                }
                return Ok(payload.len());
            }
            _ => continue,
        }
    }
}

fn receiver_loop(inner: Arc<Inner>, mut rx: Box<dyn IcmpReceiver>) {
    while inner.running.load(Ordering::Acquire) {
        match rx.recv(inner.t_op) {
            Ok(Some((addr, id, payload))) => {
                if id == 0 {
                    log::error!(
                        "pingfs: remote corrupted our identifier (received id 0); \
                         this host is permanently unusable"
                    );
                    inner.latch_fatal(Error::CorruptIdZero);
                    // The receiver thread dies here, same as ping_server.py's
                    // receiver thread on an uncaught exception; already
                    // in-flight ops still resolve through the timer thread's
                    // timeouts, but no further replies are ever processed.
                    return;
                }
                inner.on_reply(id, addr, payload);
            }
            Ok(None) => {}
            Err(e) => log::warn!("pingfs: receive error: {e}"),
        }
    }
}

fn timer_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::Acquire) {
        let wait = inner.timer_process();
        let timers = inner.timers.lock().unwrap();
        let _ = match wait {
            Some(d) => inner.timer_cond.wait_timeout(timers, d),
            None => inner.timer_cond.wait_timeout(timers, inner.t_op),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_finds_contiguous_runs() {
        let observed: HashSet<u32> = [1, 2, 3, 7, 8, 20].into_iter().collect();
        let result = used(&observed);
        assert_eq!(result.get(&1), Some(&3));
        assert_eq!(result.get(&7), Some(&2));
        assert_eq!(result.get(&20), Some(&1));
    }

    #[test]
    fn free_finds_interior_and_tail_gaps() {
        let observed: HashSet<u32> = [1, 5, 6].into_iter().collect();
        let result = free(&observed);
        assert_eq!(result.get(&2), Some(&3)); // gap 2..=4
        assert_eq!(result.get(&7), Some(&0)); // unbounded tail
    }

    #[test]
    fn free_of_empty_set_is_wide_open_from_one() {
        let observed: HashSet<u32> = HashSet::new();
        let result = free(&observed);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(&1), Some(&0));
    }

    #[test]
    fn is_dead_detects_empty_and_all_zero() {
        assert!(is_dead(&[]));
        assert!(is_dead(&[0, 0, 0]));
        assert!(!is_dead(&[0, 1, 0]));
    }
}
