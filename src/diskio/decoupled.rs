//! Byte reader whose source is drained by a background thread.
//!
//! The producer thread pulls `chunk_size` bytes at a time from the wrapped
//! source into a fixed ring buffer; the consumer copies out of the ring. A
//! slow or blocking source therefore only stalls the consumer once the ring
//! runs dry.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::ReaderConfig;
use crate::error::{Error, Result};

struct Ring {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Caller guarantees `data.len() <= self.free()`.
    fn push(&mut self, data: &[u8]) {
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = data.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        self.len += data.len();
    }

    fn pop(&mut self, out: &mut [u8]) -> usize {
        let cap = self.capacity();
        let n = out.len().min(self.len);
        let first = n.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.consume(n);
        n
    }

    fn consume(&mut self, n: usize) {
        self.head = (self.head + n) % self.capacity();
        self.len -= n;
    }
}

struct State {
    ring: Ring,
    /// No more bytes will be pushed.
    eof: bool,
    error: Option<io::Error>,
    closing: bool,
    finished: bool,
}

struct Shared {
    state: Mutex<State>,
    data_ready: Condvar,
    space_ready: Condvar,
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the producer as finished even if the source panics.
struct FinishGuard(Arc<Shared>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.eof = true;
        state.finished = true;
        self.0.finished.notify_all();
        self.0.data_ready.notify_all();
    }
}

pub struct DecoupledReader {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    chunk_size: usize,
    poll_interval: Duration,
    close_timeout: Option<Duration>,
}

impl DecoupledReader {
    pub fn new<R>(source: R, config: &ReaderConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ring: Ring::new(config.buffer_size),
                eof: false,
                error: None,
                closing: false,
                finished: false,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            finished: Condvar::new(),
        });

        let producer = Arc::clone(&shared);
        let chunk_size = config.chunk_size;
        let handle = thread::Builder::new()
            .name("decoupled-reader".into())
            .spawn(move || fill(source, producer, chunk_size))?;

        Ok(Self {
            shared,
            handle: Some(handle),
            chunk_size: config.chunk_size,
            poll_interval: config.poll_interval,
            close_timeout: config.close_timeout,
        })
    }

    /// Bytes that can be read right now without blocking.
    pub fn available(&self) -> usize {
        self.shared.lock().ring.len
    }

    /// Discards up to `n` bytes, blocking like `read`. Returns how many bytes
    /// were skipped, which is less than `n` only at end of stream.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut skipped = 0u64;
        while skipped < n {
            let want = (n - skipped).min(self.chunk_size as u64) as usize;
            let mut state = self.wait_available(want)?;
            let got = state.ring.len.min(want);
            if got == 0 {
                break;
            }
            state.ring.consume(got);
            self.shared.space_ready.notify_one();
            skipped += got as u64;
        }
        Ok(skipped)
    }

    /// Stops the producer and waits for it to release the source.
    ///
    /// Waits at most `close_timeout`. If the producer is stuck inside a source
    /// read that never returns, the thread is detached and
    /// [`Error::ReaderClose`] is returned.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        debug!("closing decoupled reader");

        let mut state = self.shared.lock();
        state.closing = true;
        self.shared.space_ready.notify_all();

        let deadline = self.close_timeout.map(|t| Instant::now() + t);
        while !state.finished {
            state = match deadline {
                None => self
                    .shared
                    .finished
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(state);
                        let timeout = self.close_timeout.unwrap_or_default();
                        warn!(?timeout, "background reader did not stop, abandoning it");
                        return Err(Error::ReaderClose(timeout));
                    }
                    self.shared
                        .finished
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        drop(state);

        if handle.join().is_err() {
            return Err(io::Error::other("background reader panicked").into());
        }
        Ok(())
    }

    /// Blocks until `min(want, chunk_size)` bytes are buffered or the
    /// producer is done. A pending source error is returned only once the
    /// ring is empty.
    fn wait_available(&self, want: usize) -> io::Result<MutexGuard<'_, State>> {
        let target = want.min(self.chunk_size);
        let mut state = self.shared.lock();
        while state.ring.len < target && !state.eof {
            state = self
                .shared
                .data_ready
                .wait_timeout(state, self.poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if state.ring.len == 0 {
            if let Some(err) = state.error.take() {
                return Err(err);
            }
        }
        Ok(state)
    }
}

impl Read for DecoupledReader {
    /// Fills `buf` completely unless the stream ends first.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let mut state = match self.wait_available(buf.len() - total) {
                Ok(state) => state,
                Err(err) if total == 0 => return Err(err),
                Err(err) => {
                    // Hand back what was copied; the error is re-raised on the next call.
                    self.shared.lock().error = Some(err);
                    break;
                }
            };
            let got = state.ring.pop(&mut buf[total..]);
            if got == 0 {
                break;
            }
            drop(state);
            self.shared.space_ready.notify_one();
            total += got;
        }
        Ok(total)
    }
}

impl Drop for DecoupledReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "failed to close decoupled reader");
        }
    }
}

fn fill<R: Read>(mut source: R, shared: Arc<Shared>, chunk_size: usize) {
    let _guard = FinishGuard(Arc::clone(&shared));
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let want = {
            let mut state = shared.lock();
            while !state.closing && state.ring.free() == 0 {
                state = shared
                    .space_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if state.closing {
                return;
            }
            state.ring.free().min(chunk_size)
        };

        match source.read(&mut chunk[..want]) {
            Ok(0) => return,
            Ok(n) => {
                let mut state = shared.lock();
                state.ring.push(&chunk[..n]);
                shared.data_ready.notify_one();
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!(%err, "I/O error while reading source");
                shared.lock().error = Some(err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Emits `remaining` zero bytes one read at a time, counting reads served.
    struct CountingSource {
        remaining: usize,
        served: Arc<AtomicUsize>,
    }

    impl Read for CountingSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.remaining);
            buf[..n].fill(0);
            self.remaining -= n;
            self.served.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    struct FailingSource;

    impl Read for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("source failure in test"))
        }
    }

    fn counting(total: usize) -> (CountingSource, Arc<AtomicUsize>) {
        let served = Arc::new(AtomicUsize::new(0));
        (
            CountingSource {
                remaining: total,
                served: Arc::clone(&served),
            },
            served,
        )
    }

    #[test]
    fn test_read_two_halves_then_eof() {
        const N: usize = 40_000;
        let (source, served) = counting(2 * N);
        let mut reader = DecoupledReader::new(source, &ReaderConfig::default()).unwrap();

        let mut buf = vec![1u8; N];
        assert_eq!(reader.read(&mut buf).unwrap(), N);
        assert!(buf.iter().all(|b| *b == 0));

        let deadline = Instant::now() + Duration::from_secs(60);
        while served.load(Ordering::SeqCst) < 2 * N && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(reader.read(&mut buf).unwrap(), N);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        reader.close().unwrap();
    }

    #[test]
    fn test_source_error_surfaces_after_drain() {
        let mut reader = DecoupledReader::new(FailingSource, &ReaderConfig::default()).unwrap();
        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        // Reported once, then the stream is simply over.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        reader.close().unwrap();
    }

    #[test]
    fn test_skip() {
        const N: usize = 40_000;
        let (source, _) = counting(2 * N);
        let mut reader = DecoupledReader::new(source, &ReaderConfig::default()).unwrap();

        let mut buf = vec![0u8; N];
        assert_eq!(reader.read(&mut buf).unwrap(), N);
        assert_eq!(reader.skip(0).unwrap(), 0);
        assert_eq!(reader.skip(20_000).unwrap(), 20_000);
        assert_eq!(reader.read(&mut buf).unwrap(), N - 20_000);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.skip(10).unwrap(), 0);
    }

    #[test]
    fn test_small_ring_wraps_around() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let config = ReaderConfig::default()
            .with_buffer_size(1000)
            .with_chunk_size(300);
        let mut reader = DecoupledReader::new(io::Cursor::new(data.clone()), &config).unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_close_stops_blocked_producer() {
        // Source larger than the ring: the producer ends up waiting for space.
        let (source, _) = counting(8 << 20);
        let mut reader = DecoupledReader::new(source, &ReaderConfig::default()).unwrap();
        let mut buf = [0u8; 16];
        reader.read(&mut buf).unwrap();
        reader.close().unwrap();
        // Closing twice is a no-op.
        reader.close().unwrap();
    }

    #[test]
    fn test_close_times_out_on_stuck_source() {
        struct StuckSource(mpsc::Sender<()>);
        impl Read for StuckSource {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                let _ = self.0.send(());
                thread::sleep(Duration::from_secs(3600));
                Ok(0)
            }
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let config = ReaderConfig::default().with_close_timeout(Some(Duration::from_millis(50)));
        let mut reader = DecoupledReader::new(StuckSource(entered_tx), &config).unwrap();
        // Only close once the producer is blocked inside the source read.
        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(
            reader.close(),
            Err(Error::ReaderClose(timeout)) if timeout == Duration::from_millis(50)
        ));
    }
}
