//! Scripted transport for tests and hardware-free runs.
//!
//! `MockTransport` answers query frames from a response table, optionally
//! after a simulated instrument latency, and records every frame it was sent.
//! Clones share state, so a test can keep one handle while the SCPI client
//! owns the other. All delays use `tokio::time::sleep`, which makes the mock
//! deterministic under a paused tokio clock.

use super::{not_connected, Transport};
use crate::instrument::{lookup, InstrumentType, MeasurementFunction};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// One frame received by the mock, with the time it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    /// Arrival time on the tokio clock
    pub at: Instant,
    /// Frame text with the line terminator stripped
    pub command: String,
}

#[derive(Debug, Default)]
struct MockInner {
    open: bool,
    open_count: usize,
    close_count: usize,
    responses: HashMap<String, VecDeque<Vec<u8>>>,
    pending: Vec<u8>,
    frames: Vec<RecordedFrame>,
    queries_seen: usize,
    fail_after_queries: Option<usize>,
    fail_open: bool,
    switches: HashMap<String, (String, Vec<u8>)>,
}

/// Scripted in-memory instrument.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
    latency: Duration,
    timeout: Duration,
    response_terminator: Vec<u8>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Closed mock with no responses, zero latency and a 1 s read timeout.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner::default())),
            latency: Duration::ZERO,
            timeout: Duration::from_secs(1),
            response_terminator: b"\n".to_vec(),
        }
    }

    /// Mock preloaded with a plausible identity and readings for `instrument`.
    ///
    /// When several functions share one query, as on a multimeter, the query
    /// answers for whichever function was configured last.
    pub fn for_instrument(instrument: InstrumentType) -> Self {
        let profile = lookup(instrument);
        let identity = match instrument {
            InstrumentType::Mp730889 => "Multicomp Pro,MP730889,SN000001,V1.0",
            InstrumentType::OwonSpe6103 => "OWON,SPE6103,2214001,FV:V1.2.0",
        };
        let mut mock = Self::new().with_response(profile.identity_query, identity);

        for (function, command) in profile.commands() {
            let value = match function {
                MeasurementFunction::Voltage => "1.234500E+00",
                MeasurementFunction::Current => "2.500000E-02",
            };
            let answered = mock.lock().responses.contains_key(command.query_command);
            if !answered {
                mock = mock.with_response(command.query_command, value);
            }
            let exclusive_setup = command.setup_commands.iter().filter(|setup| {
                profile
                    .commands()
                    .filter(|(other, _)| *other != function)
                    .all(|(_, other)| !other.setup_commands.contains(*setup))
            });
            for setup in exclusive_setup {
                mock = mock.with_switch(setup, command.query_command, value);
            }
        }
        mock
    }

    /// Time each `read_until` takes before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// How long `read_until` waits for an unanswered query before failing.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Terminator appended to every canned response. Default `"\n"`.
    pub fn with_response_terminator(mut self, terminator: &str) -> Self {
        self.response_terminator = terminator.as_bytes().to_vec();
        self
    }

    /// Answer `command` with `response` every time.
    pub fn with_response(self, command: &str, response: &str) -> Self {
        self.with_raw_response(command, response.as_bytes())
    }

    /// Answer `command` with raw bytes (terminator still appended).
    pub fn with_raw_response(self, command: &str, response: &[u8]) -> Self {
        self.lock()
            .responses
            .insert(command.to_string(), VecDeque::from([response.to_vec()]));
        self
    }

    /// Answer `command` with each response in turn; the last one repeats.
    pub fn with_response_sequence(self, command: &str, responses: &[&str]) -> Self {
        let queue = responses.iter().map(|r| r.as_bytes().to_vec()).collect();
        self.lock().responses.insert(command.to_string(), queue);
        self
    }

    /// Writing `command` makes `query` answer `response` from then on.
    pub fn with_switch(self, command: &str, query: &str, response: &str) -> Self {
        self.lock().switches.insert(
            command.to_string(),
            (query.to_string(), response.as_bytes().to_vec()),
        );
        self
    }

    /// Let `n` queries succeed, then fail every later query write.
    pub fn fail_after_queries(self, n: usize) -> Self {
        self.lock().fail_after_queries = Some(n);
        self
    }

    /// Make `open` fail.
    pub fn fail_open(self) -> Self {
        self.lock().fail_open = true;
        self
    }

    /// Every frame received so far.
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.lock().frames.clone()
    }

    /// Text of every frame received so far.
    pub fn commands(&self) -> Vec<String> {
        self.lock().frames.iter().map(|f| f.command.clone()).collect()
    }

    /// Number of `open` and `close` calls that changed state.
    pub fn open_close_counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.open_count, inner.close_count)
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn strip_terminator(frame: &str) -> &str {
    frame.trim_end_matches(['\r', '\n'])
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&mut self) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.fail_open {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "mock port is unavailable",
            ));
        }
        if !inner.open {
            inner.open = true;
            inner.open_count += 1;
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut inner = self.lock();
        if inner.open {
            inner.open = false;
            inner.close_count += 1;
            inner.pending.clear();
        }
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        let terminator = self.response_terminator.clone();
        let mut inner = self.lock();
        if !inner.open {
            return Err(not_connected("mock"));
        }

        let text = String::from_utf8_lossy(payload);
        let command = strip_terminator(&text).to_string();

        if command.ends_with('?') {
            if let Some(limit) = inner.fail_after_queries {
                if inner.queries_seen >= limit {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        format!("mock write failed for '{}'", command),
                    ));
                }
            }
            inner.queries_seen += 1;
        }

        inner.frames.push(RecordedFrame {
            at: Instant::now(),
            command: command.clone(),
        });

        if let Some((query, answer)) = inner.switches.get(&command).cloned() {
            inner.responses.insert(query, VecDeque::from([answer]));
        }

        let response = inner.responses.get_mut(&command).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        if let Some(mut response) = response {
            response.extend_from_slice(&terminator);
            inner.pending.extend_from_slice(&response);
        }
        Ok(())
    }

    async fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        if !self.is_open() {
            return Err(not_connected("mock"));
        }
        if terminator.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty terminator"));
        }
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        {
            let mut inner = self.lock();
            let end = inner
                .pending
                .windows(terminator.len())
                .position(|w| w == terminator)
                .map(|pos| pos + terminator.len());
            if let Some(end) = end {
                return Ok(inner.pending.drain(..end).collect());
            }
        }

        sleep(self.timeout).await;
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("mock read timeout after {:?}", self.timeout),
        ))
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_known_query() {
        let mut mock = MockTransport::new().with_response("MEAS1?", "1.5");
        mock.open().await.unwrap();
        mock.write(b"MEAS1?\n").await.unwrap();
        let bytes = mock.read_until(b"\n").await.unwrap();
        assert_eq!(bytes, b"1.5\n");
        assert_eq!(mock.commands(), vec!["MEAS1?".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_times_out_on_unknown_query() {
        let mut mock = MockTransport::new().with_timeout(Duration::from_millis(200));
        mock.open().await.unwrap();
        mock.write(b"BOGUS?\n").await.unwrap();
        let err = mock.read_until(b"\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_mock_rejects_io_when_closed() {
        let mut mock = MockTransport::new();
        let err = mock.write(b"*IDN?\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_mock_response_sequence_repeats_last() {
        let mut mock = MockTransport::new().with_response_sequence("V?", &["1", "2"]);
        mock.open().await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            mock.write(b"V?\n").await.unwrap();
            seen.push(mock.read_until(b"\n").await.unwrap());
        }
        assert_eq!(seen, vec![b"1\n".to_vec(), b"2\n".to_vec(), b"2\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_multimeter_answers_for_configured_function() {
        let mut mock = MockTransport::for_instrument(InstrumentType::Mp730889);
        mock.open().await.unwrap();

        let mut answers = Vec::new();
        for setup in ["CONFigure:CURRent:DC\n", "CONFigure:VOLTage:DC\n"] {
            mock.write(setup.as_bytes()).await.unwrap();
            mock.write(b"MEAS1?\n").await.unwrap();
            answers.push(mock.read_until(b"\n").await.unwrap());
        }
        assert_eq!(
            answers,
            vec![b"2.500000E-02\n".to_vec(), b"1.234500E+00\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_mock_fails_after_query_budget() {
        let mut mock = MockTransport::new()
            .with_response("V?", "1")
            .fail_after_queries(1);
        mock.open().await.unwrap();
        mock.write(b"V?\n").await.unwrap();
        // setup writes are not queries and never fail
        mock.write(b"SYSTem:REMote\n").await.unwrap();
        let err = mock.write(b"V?\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
