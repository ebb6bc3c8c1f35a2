//! Transport manager: one active link, reconnect with backoff.
//!
//! Link lifecycle: `Disconnected → Connecting → Connected → Disconnected`,
//! retried indefinitely. There is no terminal failure state.
//!
//! [`TransportManager::next_event`] is cancel-safe: it can be used as a
//! `tokio::select!` branch and dropped at any await point without losing
//! received data or corrupting the link.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use windbridge_core::config::{Endpoint, Protocol};

use crate::backoff::Backoff;
use crate::http::{self, HttpUrl};
use crate::line::{split_payload, LineBuffer, LineEvent};

const UDP_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Errors raised by a link. None of them is fatal to the manager.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection closed by peer")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// State of the active link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Timeouts and intervals for all links.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Address UDP endpoints bind to.
    pub udp_bind_ip: IpAddr,
    pub connect_timeout: Duration,
    /// Whole-request bound for an HTTP poll.
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            udp_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Something that happened on the active link.
#[derive(Debug)]
pub enum TransportEvent {
    /// The link is up.
    Connected(Protocol),
    /// Lines received on the link.
    Lines(Vec<LineEvent>),
    /// The link went down; a retry is scheduled after `retry_in`.
    Disconnected {
        protocol: Protocol,
        error: TransportError,
        retry_in: Duration,
    },
}

enum Link {
    Udp(UdpSocket),
    Tcp {
        stream: TcpStream,
        lines: LineBuffer,
    },
    Http {
        url: HttpUrl,
        next_poll: Instant,
    },
}

/// Owns the single active link.
pub struct TransportManager {
    options: TransportOptions,
    endpoint: Option<Endpoint>,
    link: Option<Link>,
    state: LinkState,
    backoff: Backoff,
    retry_at: Option<Instant>,
    pending: VecDeque<TransportEvent>,
    buf: Box<[u8; 2048]>,
}

impl TransportManager {
    pub fn new(options: TransportOptions) -> Self {
        let backoff = Backoff::new(options.backoff_initial, options.backoff_max);
        Self {
            options,
            endpoint: None,
            link: None,
            state: LinkState::Disconnected,
            backoff,
            retry_at: None,
            pending: VecDeque::new(),
            buf: Box::new([0u8; 2048]),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Tear down the current link and switch to `endpoint`.
    ///
    /// The new link is opened by the next call to [`next_event`](Self::next_event).
    pub fn bind(&mut self, endpoint: Endpoint) {
        self.close();
        info!("Transport bound to {}", endpoint);
        self.endpoint = Some(endpoint);
    }

    /// Drop the current link without choosing a new endpoint.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            if let Some(endpoint) = &self.endpoint {
                info!("Closed {} link", endpoint.protocol());
            }
        }
        self.state = LinkState::Disconnected;
        self.retry_at = None;
        self.backoff.reset();
        self.pending.clear();
    }

    /// Wait for the next link event.
    ///
    /// Pends forever while no endpoint is bound.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let Some(endpoint) = self.endpoint.clone() else {
                std::future::pending::<()>().await;
                continue;
            };

            if self.link.is_none() {
                if let Some(at) = self.retry_at {
                    sleep_until(at).await;
                }
                self.state = LinkState::Connecting;
                match self.open(&endpoint).await {
                    Ok(link) => {
                        info!("{} link connected ({})", endpoint.protocol(), endpoint);
                        self.link = Some(link);
                        self.state = LinkState::Connected;
                        self.retry_at = None;
                        self.backoff.reset();
                        return TransportEvent::Connected(endpoint.protocol());
                    }
                    Err(error) => return self.fail(endpoint.protocol(), error),
                }
            }

            if let Some(event) = self.poll_link(endpoint.protocol()).await {
                return event;
            }
        }
    }

    /// Read from the open link once. Returns `None` when nothing usable
    /// arrived.
    async fn poll_link(&mut self, protocol: Protocol) -> Option<TransportEvent> {
        let request_timeout = self.options.request_timeout;
        let poll_interval = self.options.poll_interval;
        let buf = &mut self.buf[..];

        let result = match self.link.as_mut()? {
            Link::Udp(socket) => match socket.recv(buf).await {
                Ok(n) => Ok(split_payload(&buf[..n])),
                Err(e) => {
                    // a bound socket stays bound; only reconfiguration rebinds
                    debug!("UDP receive error: {}", e);
                    tokio::time::sleep(UDP_ERROR_PAUSE).await;
                    return None;
                }
            },
            Link::Tcp { stream, lines } => match stream.read(buf).await {
                Ok(0) => Err(TransportError::Closed),
                Ok(n) => Ok(lines.feed(&buf[..n])),
                Err(e) => Err(TransportError::Io(e)),
            },
            Link::Http { url, next_poll } => {
                sleep_until(*next_poll).await;
                *next_poll = Instant::now() + poll_interval;
                http::get(url, request_timeout)
                    .await
                    .map(|body| split_payload(&body))
            }
        };

        match result {
            Ok(events) if events.is_empty() => None,
            Ok(events) => Some(TransportEvent::Lines(events)),
            Err(error) => {
                self.link = None;
                Some(self.fail(protocol, error))
            }
        }
    }

    fn fail(&mut self, protocol: Protocol, error: TransportError) -> TransportEvent {
        let retry_in = self.backoff.next_delay();
        warn!(
            "{} link down: {} (retry in {:?}, consecutive failures={})",
            protocol,
            error,
            retry_in,
            self.backoff.consecutive_failures()
        );
        self.state = LinkState::Disconnected;
        self.retry_at = Some(Instant::now() + retry_in);
        TransportEvent::Disconnected {
            protocol,
            error,
            retry_in,
        }
    }

    async fn open(&mut self, endpoint: &Endpoint) -> Result<Link, TransportError> {
        match endpoint {
            Endpoint::Udp { port } => {
                let addr = SocketAddr::new(self.options.udp_bind_ip, *port);
                let socket = UdpSocket::bind(addr).await?;
                Ok(Link::Udp(socket))
            }
            Endpoint::Tcp { host, port } => {
                let timeout = self.options.connect_timeout;
                let connect = TcpStream::connect((host.as_str(), *port));
                let stream = tokio::time::timeout(timeout, connect)
                    .await
                    .map_err(|_| TransportError::ConnectTimeout(timeout))??;
                // nodelay only affects writes; a failure here is harmless
                let _ = stream.set_nodelay(true);
                Ok(Link::Tcp {
                    stream,
                    lines: LineBuffer::new(),
                })
            }
            Endpoint::Http { url } => {
                let url = HttpUrl::parse(url)?;
                let body = http::get(&url, self.options.request_timeout).await?;
                let events = split_payload(&body);
                if !events.is_empty() {
                    self.pending.push_back(TransportEvent::Lines(events));
                }
                Ok(Link::Http {
                    next_poll: Instant::now() + self.options.poll_interval,
                    url,
                })
            }
        }
    }
}
