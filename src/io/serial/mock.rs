// src/io/serial/mock.rs
//
// In-memory serial devices.
// Lets the channel run end to end without hardware: inbound bytes are queued
// on a `MockDevice`, outbound writes and applied settings are recorded.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::link::{LinkOpener, SerialLink};
use super::utils::{BaudRate, LineParams};

enum MockRead {
    Data(Vec<u8>),
    Fault(i32),
    Eof,
}

#[derive(Default)]
struct MockInner {
    inbound: Mutex<VecDeque<MockRead>>,
    arrived: Condvar,
    written: Mutex<Vec<u8>>,
    write_calls: AtomicUsize,
    applied: Mutex<Option<(BaudRate, LineParams)>>,
    open_handles: AtomicUsize,
    opens: AtomicUsize,
    fail_open: Mutex<Option<i32>>,
    fail_write: Mutex<Option<i32>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Test-side handle on a simulated device.
#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<MockInner>,
}

impl MockDevice {
    /// Queue bytes to be returned by one read.
    pub fn push_bytes(&self, bytes: &[u8]) {
        lock(&self.inner.inbound).push_back(MockRead::Data(bytes.to_vec()));
        self.inner.arrived.notify_all();
    }

    /// Queue `line` followed by `\n` as one read.
    pub fn push_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.push_bytes(&bytes);
    }

    /// Make the next read fail with `errno`.
    pub fn push_read_error(&self, errno: i32) {
        lock(&self.inner.inbound).push_back(MockRead::Fault(errno));
        self.inner.arrived.notify_all();
    }

    /// Make the next read report end of file.
    pub fn push_eof(&self) {
        lock(&self.inner.inbound).push_back(MockRead::Eof);
        self.inner.arrived.notify_all();
    }

    /// Fail the next `open` with `errno`.
    pub fn fail_next_open(&self, errno: i32) {
        *lock(&self.inner.fail_open) = Some(errno);
    }

    /// Fail every write with `errno` until cleared with `None`.
    pub fn fail_writes(&self, errno: Option<i32>) {
        *lock(&self.inner.fail_write) = errno;
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.inner.written).clone()
    }

    pub fn write_calls(&self) -> usize {
        self.inner.write_calls.load(Ordering::SeqCst)
    }

    /// Baud and line parameters most recently applied by open or configure.
    pub fn applied(&self) -> Option<(BaudRate, LineParams)> {
        *lock(&self.inner.applied)
    }

    /// Handles currently alive (opened or cloned and not yet dropped).
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::SeqCst)
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }
}

/// Opener over a set of named mock devices.
#[derive(Default)]
pub struct MockOpener {
    devices: Mutex<HashMap<String, MockDevice>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device at `path` and return its handle.
    pub fn add_device(&self, path: &str) -> MockDevice {
        let device = MockDevice::default();
        lock(&self.devices).insert(path.to_string(), device.clone());
        device
    }
}

impl LinkOpener for MockOpener {
    fn open(&self, device: &str, baud: BaudRate, read_timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let dev = lock(&self.devices)
            .get(device)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;

        if let Some(errno) = lock(&dev.inner.fail_open).take() {
            return Err(io::Error::from_raw_os_error(errno));
        }

        dev.inner.opens.fetch_add(1, Ordering::SeqCst);
        *lock(&dev.inner.applied) = Some((baud, LineParams::with_baud(baud.as_u32())));
        Ok(Box::new(MockLink::new(Arc::clone(&dev.inner), read_timeout)))
    }
}

struct MockLink {
    inner: Arc<MockInner>,
    read_timeout: Duration,
}

impl MockLink {
    fn new(inner: Arc<MockInner>, read_timeout: Duration) -> Self {
        inner.open_handles.fetch_add(1, Ordering::SeqCst);
        Self { inner, read_timeout }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.inner.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SerialLink for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut inbound = lock(&self.inner.inbound);
        loop {
            match inbound.pop_front() {
                Some(MockRead::Data(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        inbound.push_front(MockRead::Data(bytes.split_off(n)));
                    }
                    return Ok(n);
                }
                Some(MockRead::Fault(errno)) => return Err(io::Error::from_raw_os_error(errno)),
                Some(MockRead::Eof) => return Ok(0),
                None => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
            }
            inbound = match self.inner.arrived.wait_timeout(inbound, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(errno) = *lock(&self.inner.fail_write) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        lock(&self.inner.written).extend_from_slice(data);
        Ok(data.len())
    }

    fn configure(&mut self, baud: BaudRate, params: &LineParams) -> io::Result<()> {
        *lock(&self.inner.applied) = Some((baud, *params));
        Ok(())
    }

    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(MockLink::new(Arc::clone(&self.inner), self.read_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_unknown_device() {
        let opener = MockOpener::new();
        let err = match opener.open("/dev/ttyNOPE", BaudRate::B9600, Duration::from_millis(5)) {
            Ok(_) => panic!("open should fail"),
            Err(e) => e,
        };
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_read_splits_long_chunks() {
        let opener = MockOpener::new();
        let device = opener.add_device("/dev/ttyMOCK0");
        let mut link = opener.open("/dev/ttyMOCK0", BaudRate::B9600, Duration::from_millis(5)).unwrap();

        device.push_bytes(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(link.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(link.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_handle_accounting() {
        let opener = MockOpener::new();
        let device = opener.add_device("/dev/ttyMOCK0");
        let link = opener.open("/dev/ttyMOCK0", BaudRate::B9600, Duration::from_millis(5)).unwrap();
        let clone = link.try_clone_link().unwrap();
        assert_eq!(device.open_handles(), 2);
        drop(link);
        drop(clone);
        assert_eq!(device.open_handles(), 0);
        assert_eq!(device.opens(), 1);
    }
}
