//! Half-duplex transport session for the RS485 link.
//!
//! A [`Session`] owns one byte [`Channel`] and runs every exchange as
//! *write request → wait settle interval → read response*. The settle interval
//! gives the sensor time to turn its RS485 driver around before it answers.
//!
//! The session never retries. A failed or timed-out exchange is returned to
//! the caller, who decides whether to try again on the next poll.
//!
//! Progress is reported through an injected [`EventSink`]; the default
//! [`LogSink`] forwards events to the `log` facade.
use crate::protocol::{self as proto, RequestFrame};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default pause between writing a request and reading the response.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);
/// Default timeout for a complete response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised by the transport session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Cannot open serial port {port}")]
    PortUnavailable {
        port: String,
        #[source]
        source: io::Error,
    },
    #[error("No matching serial port found")]
    NoPortFound,
    #[error("Session is not open")]
    NotOpen,
    #[error("Session is already open on {0}")]
    AlreadyOpen(String),
    #[error("Timeout: expected {expected} bytes, received {received}")]
    Timeout { expected: usize, received: usize },
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

/// A bidirectional byte channel the session can drive.
pub trait Channel: Read + Write + Send {
    /// Sets how long a single `read` may block.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discards bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "serial")]
impl Channel for Box<dyn tokio_serial::SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        tokio_serial::SerialPort::set_timeout(&mut **self, timeout).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// Something that happened on a session.
#[derive(Debug)]
pub enum Event<'a> {
    Opened { port: &'a str, baud_rate: proto::BaudRate },
    Closed { port: &'a str },
    Sent(&'a [u8]),
    Received(&'a [u8]),
    Failed(&'a TransportError),
}

/// Receives session events.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event<'_>);
}

/// Forwards session events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: &Event<'_>) {
        match event {
            Event::Opened { port, baud_rate } => {
                log::info!("Opened serial port {port} at {baud_rate} baud")
            }
            Event::Closed { port } => log::info!("Closed serial port {port}"),
            Event::Sent(bytes) => log::debug!("Sent: {}", Hex(bytes)),
            Event::Received(bytes) => log::debug!("Received: {}", Hex(bytes)),
            Event::Failed(error) => log::warn!("Exchange failed: {error}"),
        }
    }
}

struct Hex<'a>(&'a [u8]);

impl std::fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        proto::write_hex(f, self.0)
    }
}

/// Immutable settings of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Address of the sensor on the bus.
    pub device_id: proto::DeviceId,
    pub baud_rate: proto::BaudRate,
    /// Time allowed for a complete response unless overridden per call.
    pub timeout: Duration,
    /// Pause after writing a request, before reading.
    pub settle: Duration,
    pub crc_check: proto::CrcCheck,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_id: proto::DeviceId::default(),
            baud_rate: proto::BaudRate::default(),
            timeout: DEFAULT_TIMEOUT,
            settle: DEFAULT_SETTLE,
            crc_check: proto::CrcCheck::default(),
        }
    }
}

struct OpenChannel {
    port: String,
    channel: Box<dyn Channel>,
}

/// A session over one half-duplex channel.
///
/// The session starts closed. [`Session::close`] is idempotent and also runs
/// when the session is dropped.
pub struct Session {
    config: SessionConfig,
    sink: Arc<dyn EventSink>,
    open: Option<OpenChannel>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("port", &self.port())
            .finish()
    }
}

impl Session {
    /// Creates a closed session that logs through [`LogSink`].
    pub fn new(config: SessionConfig) -> Self {
        Self::with_sink(config, Arc::new(LogSink))
    }

    /// Creates a closed session reporting to `sink`.
    pub fn with_sink(config: SessionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            open: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Name of the open port, if any.
    pub fn port(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.port.as_str())
    }

    /// Opens the serial port `port` with the configured baud rate and timeout.
    ///
    /// Fails with [`TransportError::AlreadyOpen`] when the session is open;
    /// close it first to switch ports.
    #[cfg(feature = "serial")]
    pub fn open(&mut self, port: &str) -> Result<(), TransportError> {
        self.ensure_closed()?;
        let channel = crate::serial_common::serial_port_builder(
            port,
            &self.config.baud_rate,
            self.config.timeout,
        )
        .open()
        .map_err(|error| TransportError::PortUnavailable {
            port: port.to_string(),
            source: error.into(),
        })?;
        self.attach(port, Box::new(channel))
    }

    /// Opens the session over an already acquired channel.
    pub fn attach(&mut self, port: &str, channel: Box<dyn Channel>) -> Result<(), TransportError> {
        self.ensure_closed()?;
        self.open = Some(OpenChannel {
            port: port.to_string(),
            channel,
        });
        self.sink.on_event(&Event::Opened {
            port,
            baud_rate: self.config.baud_rate,
        });
        Ok(())
    }

    fn ensure_closed(&self) -> Result<(), TransportError> {
        match &self.open {
            Some(open) => Err(TransportError::AlreadyOpen(open.port.clone())),
            None => Ok(()),
        }
    }

    /// Releases the channel. Safe to call in any state.
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            self.sink.on_event(&Event::Closed { port: &open.port });
        }
    }

    /// Writes `request`, waits the settle interval and reads `expected_len` bytes.
    ///
    /// `timeout` overrides the configured response timeout for this call.
    /// Fewer than `expected_len` bytes before the deadline is a
    /// [`TransportError::Timeout`].
    pub fn send_and_receive(
        &mut self,
        request: &RequestFrame,
        expected_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let timeout = timeout.unwrap_or(self.config.timeout);
        let settle = self.config.settle;
        let open = self.open.as_mut().ok_or(TransportError::NotOpen)?;
        let result = exchange(
            open.channel.as_mut(),
            self.sink.as_ref(),
            request.as_bytes(),
            expected_len,
            settle,
            timeout,
        );
        if let Err(error) = &result {
            self.sink.on_event(&Event::Failed(error));
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn exchange(
    channel: &mut dyn Channel,
    sink: &dyn EventSink,
    request: &[u8],
    expected_len: usize,
    settle: Duration,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    channel.clear_input()?;
    channel.write_all(request)?;
    channel.flush()?;
    sink.on_event(&Event::Sent(request));

    std::thread::sleep(settle);

    let deadline = Instant::now() + timeout;
    let mut buffer = vec![0u8; expected_len];
    let mut received = 0;
    while received < expected_len {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        channel.set_timeout(deadline - now)?;
        match channel.read(&mut buffer[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(error) => return Err(error.into()),
        }
    }
    sink.on_event(&Event::Received(&buffer[..received]));
    if received < expected_len {
        return Err(TransportError::Timeout {
            expected: expected_len,
            received,
        });
    }
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{build_request, DeviceId, Register};
    use assert_matches::assert_matches;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A scripted channel: queued replies are released one per request.
    #[derive(Clone, Default)]
    pub(crate) struct MockChannel {
        pub written: Arc<Mutex<Vec<u8>>>,
        replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pending: VecDeque<u8>,
        pub fail_reads: bool,
    }

    impl MockChannel {
        pub fn with_replies(replies: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into_iter().collect())),
                ..Default::default()
            }
        }
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            if self.pending.is_empty() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            // Hand out at most two bytes per read to exercise reassembly.
            let n = buf.len().min(self.pending.len()).min(2);
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                self.pending.extend(reply);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for MockChannel {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.pending.clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl EventSink for RecordingSink {
        fn on_event(&self, event: &Event<'_>) {
            let name = match event {
                Event::Opened { .. } => "opened",
                Event::Closed { .. } => "closed",
                Event::Sent(_) => "sent",
                Event::Received(_) => "received",
                Event::Failed(_) => "failed",
            };
            self.0.lock().unwrap().push(name.to_string());
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(20),
            settle: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn send_on_closed_session_fails() {
        let mut session = Session::new(fast_config());
        let request = build_request(DeviceId::DEFAULT, Register::Nitrogen);
        assert_matches!(
            session.send_and_receive(&request, 7, None),
            Err(TransportError::NotOpen)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = Session::new(fast_config());
        session.close();
        assert!(!session.is_open());

        session
            .attach("mock", Box::new(MockChannel::default()))
            .unwrap();
        assert!(session.is_open());
        assert_eq!(session.port(), Some("mock"));
        session.close();
        session.close();
        assert!(!session.is_open());
        assert_eq!(session.port(), None);
    }

    #[test]
    fn attach_twice_fails() {
        let mut session = Session::new(fast_config());
        session
            .attach("first", Box::new(MockChannel::default()))
            .unwrap();
        assert_matches!(
            session.attach("second", Box::new(MockChannel::default())),
            Err(TransportError::AlreadyOpen(port)) if port == "first"
        );
        session.close();
        assert!(session
            .attach("second", Box::new(MockChannel::default()))
            .is_ok());
    }

    #[test]
    fn full_exchange() {
        let channel = MockChannel::with_replies([vec![0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF]]);
        let written = channel.written.clone();
        let mut session = Session::new(fast_config());
        session.attach("mock", Box::new(channel)).unwrap();

        let request = build_request(DeviceId::DEFAULT, Register::Nitrogen);
        let rsp = session.send_and_receive(&request, 7, None).unwrap();
        assert_eq!(rsp, vec![0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF]);
        assert_eq!(written.lock().unwrap().as_slice(), request.as_bytes());
    }

    #[test]
    fn short_read_is_timeout() {
        let channel = MockChannel::with_replies([vec![0x01, 0x03, 0x02]]);
        let mut session = Session::new(fast_config());
        session.attach("mock", Box::new(channel)).unwrap();

        let request = build_request(DeviceId::DEFAULT, Register::Nitrogen);
        assert_matches!(
            session.send_and_receive(&request, 7, Some(Duration::from_millis(10))),
            Err(TransportError::Timeout {
                expected: 7,
                received: 3
            })
        );
    }

    #[test]
    fn read_error_is_io_failure() {
        let channel = MockChannel {
            fail_reads: true,
            ..Default::default()
        };
        let mut session = Session::new(fast_config());
        session.attach("mock", Box::new(channel)).unwrap();

        let request = build_request(DeviceId::DEFAULT, Register::Ph);
        assert_matches!(
            session.send_and_receive(&request, 7, None),
            Err(TransportError::IoFailure(error)) if error.kind() == io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn events_reach_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let channel = MockChannel::with_replies([vec![0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF]]);
        let mut session = Session::with_sink(fast_config(), sink.clone());
        session.attach("mock", Box::new(channel)).unwrap();

        let request = build_request(DeviceId::DEFAULT, Register::Nitrogen);
        session.send_and_receive(&request, 7, None).unwrap();
        assert!(session.send_and_receive(&request, 7, None).is_err());
        drop(session);

        assert_eq!(
            *sink.0.lock().unwrap(),
            ["opened", "sent", "received", "sent", "received", "failed", "closed"]
        );
    }

    #[cfg(feature = "serial")]
    #[test]
    fn open_missing_port_stays_closed() {
        let mut session = Session::new(fast_config());
        assert_matches!(
            session.open("/dev/ttyUSB_soil_missing_42"),
            Err(TransportError::PortUnavailable { port, .. }) if port == "/dev/ttyUSB_soil_missing_42"
        );
        assert!(!session.is_open());
        assert_eq!(session.port(), None);
        assert_matches!(
            session.send_and_receive(&build_request(DeviceId::DEFAULT, Register::Ph), 7, None),
            Err(TransportError::NotOpen)
        );
    }
}
