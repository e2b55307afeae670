// src/io/serial/channel.rs
//
// One serial connection: line discipline, a dedicated receiver thread that
// frames `\n`-terminated lines into a single-slot mailbox, and synchronous
// writes. A partial line left when the receiver stops is dropped.
//
// Lifecycle: Closed -> Connecting -> Open -> Closing -> Closed.
// A receiver I/O failure takes Open -> Closing -> Error on its own.
// Whoever wins the Open -> Closing transition releases the device; the owner
// always joins the receiver before its handle is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{CloseError, ConfigError, ConnectError, ReceiveFault, WriteError};

use super::link::{LinkOpener, SerialLink, SystemOpener};
use super::framer::{FramedLine, LineFramer};
use super::mailbox::{truncate_line, Mailbox};
use super::utils::{BaudRate, DataBitsPolicy, LineParams, MAX_DATA_BITS, MIN_DATA_BITS};

// ============================================================================
// Types and Configuration
// ============================================================================

/// Bytes requested per read by the receiver thread.
pub const RX_BUFFER_SIZE: usize = 512;

/// Invoked on the receiver thread for every captured line.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Closing,
    /// Closed by the receiver after an I/O failure; see `last_fault()`.
    Error,
}

impl ChannelState {
    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Closed => 0,
            ChannelState::Connecting => 1,
            ChannelState::Open => 2,
            ChannelState::Closing => 3,
            ChannelState::Error => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ChannelState::Connecting,
            2 => ChannelState::Open,
            3 => ChannelState::Closing,
            4 => ChannelState::Error,
            _ => ChannelState::Closed,
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Closed => "closed",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Upper bound on one blocking read; also the worst-case `close()` latency.
    pub read_timeout: Duration,
    /// Longest line kept in the mailbox, in bytes. Longer lines are truncated.
    pub max_line_len: usize,
    pub data_bits_policy: DataBitsPolicy,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            max_line_len: 255,
            data_bits_policy: DataBitsPolicy::Reject,
        }
    }
}

/// Counters since the channel was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub lines_received: u64,
    /// Lines replaced in the mailbox before anyone read them.
    pub lines_overwritten: u64,
    pub lines_truncated: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

#[derive(Default)]
struct Counters {
    lines_received: AtomicU64,
    lines_overwritten: AtomicU64,
    lines_truncated: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

/// State visible to both the owner and the receiver thread.
struct Shared {
    state: AtomicU8,
    running: AtomicBool,
    mailbox: Mailbox,
    writer: Mutex<Option<Box<dyn SerialLink>>>,
    fault: Mutex<Option<ReceiveFault>>,
    counters: Counters,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ChannelState::Closed.as_u8()),
            running: AtomicBool::new(false),
            mailbox: Mailbox::new(),
            writer: Mutex::new(None),
            fault: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Compare-and-swap on the state. Only the caller that gets `true` may
    /// act on the transition.
    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ============================================================================
// Serial Channel
// ============================================================================

pub struct SerialChannel {
    opener: Arc<dyn LinkOpener>,
    options: ChannelOptions,
    on_line: Option<LineCallback>,
    shared: Arc<Shared>,
    receiver: Option<JoinHandle<()>>,
    device: Option<String>,
    params: Option<LineParams>,
}

impl SerialChannel {
    /// Unconnected channel on real tty devices with default options.
    pub fn new(on_line: Option<LineCallback>) -> Self {
        Self::with_opener(Arc::new(SystemOpener), ChannelOptions::default(), on_line)
    }

    pub fn with_opener(opener: Arc<dyn LinkOpener>, options: ChannelOptions, on_line: Option<LineCallback>) -> Self {
        Self {
            opener,
            options,
            on_line,
            shared: Arc::new(Shared::new()),
            receiver: None,
            device: None,
            params: None,
        }
    }

    /// Open `device` at `baud` and start the receiver thread.
    ///
    /// On any failure the channel is left Closed with nothing held open.
    pub fn connect(&mut self, device: &str, baud: u32) -> Result<(), ConnectError> {
        let current = self.shared.state();
        if !matches!(current, ChannelState::Closed | ChannelState::Error) {
            return Err(ConnectError::AlreadyConnected);
        }
        // A receiver that faulted has already exited; collect it.
        self.reap_receiver();
        if !self.shared.transition(current, ChannelState::Connecting) {
            return Err(ConnectError::AlreadyConnected);
        }

        let baud_rate = match BaudRate::resolve(baud) {
            Some(b) => b,
            None => {
                tlog!("[serial] Baud rate {} not recognised", baud);
                self.shared.set_state(ChannelState::Closed);
                return Err(ConnectError::UnsupportedBaud(baud));
            }
        };

        let link = match self.opener.open(device, baud_rate, self.options.read_timeout) {
            Ok(link) => link,
            Err(e) => {
                tlog!("[serial] Failed to open {}: {}", device, e);
                self.shared.set_state(ChannelState::Closed);
                return Err(ConnectError::OpenFailed {
                    device: device.to_string(),
                    source: e,
                });
            }
        };

        let reader = match link.try_clone_link() {
            Ok(reader) => reader,
            Err(e) => {
                tlog!("[serial] Failed to duplicate handle for {}: {}", device, e);
                self.shared.set_state(ChannelState::Closed);
                return Err(ConnectError::OpenFailed {
                    device: device.to_string(),
                    source: e,
                });
            }
        };

        *lock(&self.shared.fault) = None;
        self.shared.mailbox.clear();
        *lock(&self.shared.writer) = Some(link);
        self.shared.running.store(true, Ordering::Release);
        // Open before the thread starts so a fault on its first read can
        // win the Open -> Closing transition.
        self.shared.set_state(ChannelState::Open);

        let shared = Arc::clone(&self.shared);
        let on_line = self.on_line.clone();
        let max_line_len = self.options.max_line_len;
        let spawned = std::thread::Builder::new()
            .name("serial-rx".to_string())
            .spawn(move || run_receiver(shared, reader, on_line, max_line_len));

        match spawned {
            Ok(handle) => self.receiver = Some(handle),
            Err(e) => {
                tlog!("[serial] Receiver thread could not be spawned: {}", e);
                self.shared.running.store(false, Ordering::Release);
                drop(lock(&self.shared.writer).take());
                self.shared.set_state(ChannelState::Closed);
                return Err(ConnectError::SpawnFailed(e));
            }
        }

        self.device = Some(device.to_string());
        self.params = Some(LineParams::with_baud(baud));
        tlog!("[serial] Opened {} at {} baud", device, baud_rate);
        Ok(())
    }

    /// Reconfigure the line discipline of the open device, immediately and
    /// without flushing.
    pub fn set_params(&mut self, params: LineParams) -> Result<(), ConfigError> {
        if self.shared.state() != ChannelState::Open {
            return Err(ConfigError::NotOpen);
        }
        let baud = BaudRate::resolve(params.baud).ok_or(ConfigError::UnsupportedBaud(params.baud))?;

        let mut applied = params;
        if !params.data_bits_valid() {
            match self.options.data_bits_policy {
                DataBitsPolicy::Reject => {
                    tlog!("[serial] Rejecting {} data bits (must be 5-8)", params.data_bits);
                    return Err(ConfigError::InvalidDataBits(params.data_bits));
                }
                DataBitsPolicy::Clamp => {
                    applied.data_bits = params.data_bits.clamp(MIN_DATA_BITS, MAX_DATA_BITS);
                    tlog!(
                        "[serial] Clamping {} data bits to {}",
                        params.data_bits,
                        applied.data_bits
                    );
                }
            }
        }

        {
            let mut writer = lock(&self.shared.writer);
            let link = writer.as_mut().ok_or(ConfigError::NotOpen)?;
            link.configure(baud, &applied).map_err(ConfigError::Apply)?;
        }

        tlog!(
            "[serial] {} set to {}",
            self.device.as_deref().unwrap_or("device"),
            applied
        );
        self.params = Some(applied);
        Ok(())
    }

    /// One blocking write. The count may be short; retrying is up to the caller.
    pub fn send(&self, data: &[u8]) -> Result<usize, WriteError> {
        if self.shared.state() != ChannelState::Open {
            return Err(WriteError::NotOpen);
        }
        let mut writer = lock(&self.shared.writer);
        let link = writer.as_mut().ok_or(WriteError::NotOpen)?;
        let written = link.write(data).map_err(WriteError::OsWriteFailed)?;
        self.shared
            .counters
            .bytes_sent
            .fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    /// Write a single byte; failures are only logged.
    pub fn send_byte(&self, byte: u8) {
        if let Err(e) = self.send(&[byte]) {
            tlog!("[serial] Dropped byte 0x{:02x}: {}", byte, e);
        }
    }

    /// Take the latest complete line, if one arrived since the last take.
    /// Never blocks; always `None` unless the channel is Open.
    pub fn try_receive_line(&self) -> Option<String> {
        if self.shared.state() != ChannelState::Open {
            return None;
        }
        self.shared.mailbox.take()
    }

    /// Like `try_receive_line`, but waits up to `timeout` for a line.
    pub fn receive_line_timeout(&self, timeout: Duration) -> Option<String> {
        if self.shared.state() != ChannelState::Open {
            return None;
        }
        self.shared.mailbox.take_timeout(timeout)
    }

    /// Discard any unread line.
    pub fn clear(&self) {
        self.shared.mailbox.clear();
    }

    /// Stop and join the receiver, then release the device.
    pub fn close(&mut self) -> Result<(), CloseError> {
        if !self.shared.transition(ChannelState::Open, ChannelState::Closing) {
            return Err(CloseError::NotOpen);
        }

        self.shared.running.store(false, Ordering::Release);
        self.reap_receiver();
        drop(lock(&self.shared.writer).take());
        self.shared.set_state(ChannelState::Closed);

        tlog!("[serial] Closed {}", self.device.as_deref().unwrap_or("device"));
        Ok(())
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Device of the most recent successful connect.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Line discipline currently applied, as far as this channel knows.
    pub fn params(&self) -> Option<LineParams> {
        self.params
    }

    /// Why the receiver last gave up, if it did.
    pub fn last_fault(&self) -> Option<ReceiveFault> {
        lock(&self.shared.fault).clone()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn stats(&self) -> ChannelStats {
        let c = &self.shared.counters;
        ChannelStats {
            lines_received: c.lines_received.load(Ordering::Relaxed),
            lines_overwritten: c.lines_overwritten.load(Ordering::Relaxed),
            lines_truncated: c.lines_truncated.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
        }
    }

    fn reap_receiver(&mut self) {
        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                tlog!("[serial] Receiver thread panicked");
            }
        }
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        let _ = self.close();
        self.reap_receiver();
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("device", &self.device)
            .field("state", &self.state())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Receiver thread
// ============================================================================

fn run_receiver(
    shared: Arc<Shared>,
    mut link: Box<dyn SerialLink>,
    on_line: Option<LineCallback>,
    max_line_len: usize,
) {
    let mut buf = [0u8; RX_BUFFER_SIZE];
    let mut framer = LineFramer::new(max_line_len);

    let fault = loop {
        if !shared.running.load(Ordering::Acquire) {
            break None;
        }

        match link.read(&mut buf) {
            Ok(0) => break Some(ReceiveFault::Disconnected),
            Ok(n) => {
                shared
                    .counters
                    .bytes_received
                    .fetch_add(n as u64, Ordering::Relaxed);
                for line in framer.feed(&buf[..n]) {
                    deliver(&shared, line, on_line.as_ref(), max_line_len);
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                ) =>
            {
                // Bounded wait expired; loop back to check the stop flag.
            }
            Err(e) => break Some(ReceiveFault::from(e)),
        }
    };

    // Our handle goes first, whatever happens next.
    drop(link);

    if let Some(fault) = fault {
        tlog!("[serial] Serial disconnect: {}", fault);
        if shared.transition(ChannelState::Open, ChannelState::Closing) {
            shared.running.store(false, Ordering::Release);
            drop(lock(&shared.writer).take());
            *lock(&shared.fault) = Some(fault);
            shared.set_state(ChannelState::Error);
        }
        // Otherwise the owner is mid-close and releases the writer itself.
    }
}

/// Hand one framed line to the mailbox and the callback.
fn deliver(shared: &Shared, line: FramedLine, on_line: Option<&LineCallback>, max_line_len: usize) {
    let counters = &shared.counters;

    let text = String::from_utf8_lossy(&line.bytes);
    let mut text = text.trim_end_matches('\r').to_string();
    if text.is_empty() {
        return;
    }

    // Lossy decoding can grow a cut multi-byte sequence past the cap.
    let recut = truncate_line(&mut text, max_line_len).is_some();
    if line.truncated || recut {
        counters.lines_truncated.fetch_add(1, Ordering::Relaxed);
        tlog!("[serial] Line longer than {} bytes truncated", max_line_len);
    }

    if shared.mailbox.put(text.clone()) {
        counters.lines_overwritten.fetch_add(1, Ordering::Relaxed);
    }
    counters.lines_received.fetch_add(1, Ordering::Release);

    if let Some(callback) = on_line {
        callback(&text);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            ChannelState::Closed,
            ChannelState::Connecting,
            ChannelState::Open,
            ChannelState::Closing,
            ChannelState::Error,
        ] {
            assert_eq!(ChannelState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_transition_only_one_winner() {
        let shared = Shared::new();
        shared.set_state(ChannelState::Open);
        assert!(shared.transition(ChannelState::Open, ChannelState::Closing));
        assert!(!shared.transition(ChannelState::Open, ChannelState::Closing));
        assert_eq!(shared.state(), ChannelState::Closing);
    }

    fn framed(bytes: &[u8], truncated: bool) -> FramedLine {
        FramedLine {
            bytes: bytes.to_vec(),
            truncated,
        }
    }

    #[test]
    fn test_deliver_strips_carriage_return_and_skips_empty() {
        let shared = Shared::new();
        deliver(&shared, framed(b"slider 40\r", false), None, 255);
        assert_eq!(shared.mailbox.take().as_deref(), Some("slider 40"));

        deliver(&shared, framed(b"\r", false), None, 255);
        assert_eq!(shared.mailbox.take(), None);
        assert_eq!(shared.counters.lines_received.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deliver_counts_framer_truncation() {
        let shared = Shared::new();
        deliver(&shared, framed(b"0123", true), None, 4);
        assert_eq!(shared.mailbox.take().as_deref(), Some("0123"));
        assert_eq!(shared.counters.lines_truncated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deliver_recuts_lossy_expansion() {
        let shared = Shared::new();
        // "a" plus the first byte of "é": the stray byte decodes to U+FFFD.
        deliver(&shared, framed(&[b'a', 0xC3], true), None, 2);
        assert_eq!(shared.mailbox.take().as_deref(), Some("a"));
        assert_eq!(shared.counters.lines_truncated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_new_channel_is_closed() {
        let channel = SerialChannel::new(None);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.try_receive_line(), None);
        assert_eq!(channel.device(), None);
        assert_eq!(channel.stats(), ChannelStats::default());
    }
}
