//! Log destination configuration
//!
//! The binary describes where logs go with a single URL:
//!
//! | URL | Destination |
//! |---|---|
//! | `console://?level=debug` | stderr (default, level `info`) |
//! | `file:///var/log/hdfsync.log?level=info` | file, appended |
//! | `syslog+udp://host:514/?facility=local0` | syslog over UDP |
//! | `syslog+tcp://host:601/?facility=daemon` | syslog over TCP |
//! | `syslog+unix:///dev/log` | local syslog socket |
//!
//! [`init`] installs a `tracing-subscriber` fmt subscriber for the parsed
//! [`LogSpec`]. `RUST_LOG`, when set, overrides the level from the URL.
//! Library code only ever uses the `tracing` macros.

use crate::error::{Result, SyncError};
use chrono::Local;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_TCP_PORT: u16 = 601;
const DEFAULT_UDP_PORT: u16 = 514;
const DEFAULT_UNIX_SOCKET: &str = "/dev/log";
const SYSLOG_TAG: &str = "hdfsync";

/// Syslog facility codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facility {
    Kern,
    #[default]
    User,
    Mail,
    Daemon,
    Auth,
    Syslog,
    Lpr,
    News,
    Uucp,
    Cron,
    Authpriv,
    Ftp,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

const FACILITIES: &[(&str, Facility, u8)] = &[
    ("kern", Facility::Kern, 0),
    ("user", Facility::User, 1),
    ("mail", Facility::Mail, 2),
    ("daemon", Facility::Daemon, 3),
    ("auth", Facility::Auth, 4),
    ("syslog", Facility::Syslog, 5),
    ("lpr", Facility::Lpr, 6),
    ("news", Facility::News, 7),
    ("uucp", Facility::Uucp, 8),
    ("cron", Facility::Cron, 9),
    ("authpriv", Facility::Authpriv, 10),
    ("ftp", Facility::Ftp, 11),
    ("local0", Facility::Local0, 16),
    ("local1", Facility::Local1, 17),
    ("local2", Facility::Local2, 18),
    ("local3", Facility::Local3, 19),
    ("local4", Facility::Local4, 20),
    ("local5", Facility::Local5, 21),
    ("local6", Facility::Local6, 22),
    ("local7", Facility::Local7, 23),
];

impl Facility {
    /// Parse a facility name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        FACILITIES
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, f, _)| *f)
    }

    /// Numeric facility code
    pub fn code(self) -> u8 {
        FACILITIES
            .iter()
            .find(|(_, f, _)| *f == self)
            .map(|(_, _, c)| *c)
            .unwrap_or(1)
    }
}

/// Syslog severity for a tracing level
pub fn severity(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

/// Where log records are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
    SyslogTcp { host: String, port: u16 },
    SyslogUdp { host: String, port: u16 },
    SyslogUnix(PathBuf),
}

/// Parsed logger destination URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSpec {
    pub destination: LogDestination,
    pub level: Level,
    pub facility: Facility,
}

impl Default for LogSpec {
    fn default() -> Self {
        Self {
            destination: LogDestination::Console,
            level: Level::INFO,
            facility: Facility::User,
        }
    }
}

fn parse_level(name: &str) -> Result<Level> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" | "critical" => Ok(Level::ERROR),
        other => Err(SyncError::Logging(format!("unknown log level: {}", other))),
    }
}

impl LogSpec {
    /// Parse a logger destination URL
    pub fn parse(spec: &str) -> Result<Self> {
        let url = Url::parse(spec).map_err(|e| SyncError::Logging(format!("bad log URL {}: {}", spec, e)))?;

        let mut level = Level::INFO;
        let mut facility = Facility::User;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "level" => level = parse_level(&value)?,
                "facility" => {
                    facility = Facility::from_name(&value)
                        .ok_or_else(|| SyncError::Logging(format!("unknown syslog facility: {}", value)))?
                }
                other => return Err(SyncError::Logging(format!("unknown log option: {}", other))),
            }
        }

        let host = url.host_str().unwrap_or("").to_string();
        let destination = match url.scheme() {
            "console" => LogDestination::Console,
            "file" => {
                // file://relative.log puts the name in the host position
                let path = if host.is_empty() {
                    url.path().to_string()
                } else {
                    format!("{}{}", host, url.path().trim_end_matches('/'))
                };
                if path.is_empty() {
                    return Err(SyncError::Logging(format!("log file URL has no path: {}", spec)));
                }
                LogDestination::File(PathBuf::from(path))
            }
            "syslog+tcp" | "syslog+udp" => {
                if host.is_empty() {
                    return Err(SyncError::Logging(format!("syslog URL has no host: {}", spec)));
                }
                if url.scheme() == "syslog+tcp" {
                    LogDestination::SyslogTcp {
                        port: url.port().unwrap_or(DEFAULT_TCP_PORT),
                        host,
                    }
                } else {
                    LogDestination::SyslogUdp {
                        port: url.port().unwrap_or(DEFAULT_UDP_PORT),
                        host,
                    }
                }
            }
            "syslog+unix" => {
                let path = format!("{}{}", host, url.path());
                let path = if path.is_empty() || path == "/" { DEFAULT_UNIX_SOCKET.to_string() } else { path };
                LogDestination::SyslogUnix(PathBuf::from(path))
            }
            other => return Err(SyncError::Logging(format!("unsupported log scheme: {}", other))),
        };

        Ok(Self {
            destination,
            level,
            facility,
        })
    }
}

enum Transport {
    Udp(UdpSocket),
    Tcp(Mutex<TcpStream>),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixDatagram),
}

/// Syslog sink usable as a `tracing-subscriber` writer
///
/// Each event becomes one RFC 3164 record whose priority is derived from
/// the event level and the configured facility.
pub struct SyslogWriter {
    transport: Transport,
    facility: Facility,
    hostname: String,
    pid: u32,
}

impl SyslogWriter {
    fn new(transport: Transport, facility: Facility) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            transport,
            facility,
            hostname,
            pid: std::process::id(),
        }
    }

    fn resolve(host: &str, port: u16) -> io::Result<std::net::SocketAddr> {
        (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host)))
    }

    /// Send records to a UDP syslog receiver
    pub fn udp(host: &str, port: u16, facility: Facility) -> io::Result<Self> {
        let addr = Self::resolve(host, port)?;
        let local = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
        Ok(Self::new(Transport::Udp(socket), facility))
    }

    /// Send records to a TCP syslog receiver, newline framed
    pub fn tcp(host: &str, port: u16, facility: Facility) -> io::Result<Self> {
        let stream = TcpStream::connect(Self::resolve(host, port)?)?;
        Ok(Self::new(Transport::Tcp(Mutex::new(stream)), facility))
    }

    /// Send records to a local syslog datagram socket
    #[cfg(unix)]
    pub fn unix(path: &std::path::Path, facility: Facility) -> io::Result<Self> {
        let socket = std::os::unix::net::UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(Self::new(Transport::Unix(socket), facility))
    }

    #[cfg(not(unix))]
    pub fn unix(_path: &std::path::Path, _facility: Facility) -> io::Result<Self> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "unix sockets are not available"))
    }

    fn frame(&self, severity: u8, message: &str) -> String {
        let pri = u16::from(self.facility.code()) * 8 + u16::from(severity);
        format!(
            "<{}>{} {} {}[{}]: {}",
            pri,
            Local::now().format("%b %e %H:%M:%S"),
            self.hostname,
            SYSLOG_TAG,
            self.pid,
            message
        )
    }

    fn send(&self, severity: u8, message: &str) -> io::Result<()> {
        let record = self.frame(severity, message);
        match &self.transport {
            Transport::Udp(socket) => socket.send(record.as_bytes()).map(|_| ()),
            Transport::Tcp(stream) => {
                let mut stream = stream.lock();
                stream.write_all(record.as_bytes())?;
                stream.write_all(b"\n")
            }
            #[cfg(unix)]
            Transport::Unix(socket) => socket.send(record.as_bytes()).map(|_| ()),
        }
    }

    fn line(&self, severity: u8) -> SyslogLine<'_> {
        SyslogLine {
            writer: self,
            severity,
            buffer: Vec::new(),
        }
    }
}

/// Buffers one formatted event and sends it when dropped
pub struct SyslogLine<'a> {
    writer: &'a SyslogWriter,
    severity: u8,
    buffer: Vec<u8>,
}

impl Write for SyslogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogLine<'_> {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buffer);
        let message = text.trim_end();
        if !message.is_empty() {
            // Nowhere left to report a failure to log
            let _ = self.writer.send(self.severity, message);
        }
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        self.line(severity(&Level::INFO))
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.line(severity(meta.level()))
    }
}

fn filter(spec: &LogSpec) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(spec.level.as_str().to_ascii_lowercase()))
}

/// Install the global subscriber described by `spec`
pub fn init(spec: &LogSpec) -> Result<()> {
    let installed = match &spec.destination {
        LogDestination::Console => tracing_subscriber::fmt()
            .with_env_filter(filter(spec))
            .with_thread_names(true)
            .with_writer(io::stderr)
            .try_init(),
        LogDestination::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SyncError::path_io(path, e))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter(spec))
                .with_thread_names(true)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init()
        }
        syslog => {
            let writer = match syslog {
                LogDestination::SyslogTcp { host, port } => SyslogWriter::tcp(host, *port, spec.facility),
                LogDestination::SyslogUdp { host, port } => SyslogWriter::udp(host, *port, spec.facility),
                LogDestination::SyslogUnix(path) => SyslogWriter::unix(path, spec.facility),
                _ => return Err(SyncError::internal("unreachable log destination")),
            }
            .map_err(|e| SyncError::Logging(format!("cannot open syslog destination: {}", e)))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter(spec))
                .with_thread_names(true)
                .with_ansi(false)
                .without_time()
                .with_level(false)
                .with_writer(writer)
                .try_init()
        }
    };
    installed.map_err(|e| SyncError::Logging(e.to_string()))
}
