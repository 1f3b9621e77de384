//! Relay session client: dial, authenticate, register.
//!
//! Every registration opens its own short-lived TLS connection. Registration
//! and data transfer share that connection: the allocated port returned by the
//! relay is advisory, handed to the remote peer through the negotiation text,
//! while the file bytes ride the connection that is already open.

use std::fmt;
use std::io;
use std::sync::Arc;

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::TlsConnector;
use url::{Host, Url};
use zeroize::Zeroizing;

use crate::download::DownloadSession;
use crate::error::{ProtocolError, RelayError};
use crate::frame::{FrameDecoder, FrameType, write_frame};
use crate::session_id::{SessionId, registration_payload};
use crate::tls::{TlsOptions, client_config};
use crate::upload::UploadStream;
use crate::{CONNECT_TIMEOUT, DEFAULT_CHUNK_SIZE, DEFAULT_RELAY_PORT};

/// TLS stream carrying one relay session
pub type RelayStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Ceiling for relay replies during auth and registration
const CONTROL_PAYLOAD_LIMIT: usize = 64 * 1024;

/// Relay account used to authenticate every connection
#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: Zeroizing<String>,
}

impl Credentials {
    /// Create credentials. Emptiness is checked when a connection is attempted.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Relay username
    pub fn username(&self) -> &str {
        &self.username
    }

    fn ensure_complete(&self) -> Result<(), RelayError> {
        if self.username.is_empty() || self.secret.is_empty() {
            return Err(RelayError::Config(
                "relay auth: username and secret required".to_string(),
            ));
        }
        Ok(())
    }

    /// Auth payload: `u32` BE username length, username bytes, secret bytes
    pub fn auth_payload(&self) -> Result<Zeroizing<Vec<u8>>, RelayError> {
        self.ensure_complete()?;
        let name = self.username.as_bytes();
        let name_len = u32::try_from(name.len())
            .map_err(|_| RelayError::Config("relay auth: username too long".to_string()))?;

        let mut payload = Zeroizing::new(Vec::with_capacity(4 + name.len() + self.secret.len()));
        payload.extend_from_slice(&name_len.to_be_bytes());
        payload.extend_from_slice(name);
        payload.extend_from_slice(self.secret.as_bytes());
        Ok(payload)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Per-transfer parameters captured when a session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Bytes read from the source per Data frame
    pub chunk_size: usize,
    /// Log every chunk and the final EOF at debug level
    pub debug: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            debug: false,
        }
    }
}

/// Which direction a session is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Agent sends a file to the chat peer
    Download,
    /// Chat peer sends a file to the agent
    Upload,
}

impl SessionKind {
    fn frame_type(self) -> FrameType {
        match self {
            SessionKind::Download => FrameType::RegisterDownload,
            SessionKind::Upload => FrameType::RegisterUpload,
        }
    }
}

/// Result of a successful registration
#[derive(Debug)]
pub struct Registration<S> {
    /// Relay host to advertise to the remote peer
    pub host: String,
    /// Port the relay allocated for the remote peer
    pub port: u16,
    /// Session owning the authenticated connection
    pub session: S,
}

/// Relay client. Immutable after construction; clone it freely across tasks.
#[derive(Clone)]
pub struct RelayClient {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    credentials: Credentials,
    options: TransferOptions,
}

impl RelayClient {
    /// Create a client for `relay_url` (e.g. `turns://relay.example.com:5349`)
    pub fn new(
        relay_url: &str,
        tls: &TlsOptions,
        credentials: Credentials,
    ) -> Result<Self, RelayError> {
        Self::with_tls_config(relay_url, client_config(tls)?, credentials)
    }

    /// Create a client with a caller-built TLS configuration
    pub fn with_tls_config(
        relay_url: &str,
        tls_config: Arc<ClientConfig>,
        credentials: Credentials,
    ) -> Result<Self, RelayError> {
        let (host, port) = parse_relay_url(relay_url)?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| RelayError::Config(format!("relay host {host:?}: {e}")))?;

        Ok(Self {
            host,
            port,
            server_name,
            connector: TlsConnector::from(tls_config),
            credentials,
            options: TransferOptions::default(),
        })
    }

    /// Replace the options handed to every new session
    #[must_use]
    pub fn with_transfer_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Relay host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Relay TLS port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register a download: the agent streams a file to the remote peer.
    pub async fn register_download(
        &self,
        session_id: &SessionId,
        filename: &str,
    ) -> Result<Registration<DownloadSession>, RelayError> {
        let (port, stream) = self.open_session(SessionKind::Download, session_id, filename).await?;
        tracing::info!(session = %session_id, filename, port, "registered download session");
        Ok(Registration {
            host: self.host.clone(),
            port,
            session: DownloadSession::new(stream, self.options),
        })
    }

    /// Register an upload: the remote peer streams a file to the agent.
    pub async fn register_upload_stream(
        &self,
        session_id: &SessionId,
        filename: &str,
    ) -> Result<Registration<UploadStream>, RelayError> {
        let (port, stream) = self.open_session(SessionKind::Upload, session_id, filename).await?;
        tracing::info!(session = %session_id, filename, port, "registered upload session");
        Ok(Registration {
            host: self.host.clone(),
            port,
            session: UploadStream::new(stream, self.options),
        })
    }

    async fn open_session(
        &self,
        kind: SessionKind,
        session_id: &SessionId,
        filename: &str,
    ) -> Result<(u16, RelayStream), RelayError> {
        // Credentials are mandatory; fail before touching the network
        self.credentials.ensure_complete()?;

        let mut stream = self.dial().await?;
        let result = async {
            authenticate(&mut stream, &self.credentials).await?;
            register(&mut stream, kind, session_id, filename).await
        }
        .await;

        match result {
            Ok(port) => Ok((port, stream)),
            Err(err) => {
                let _ = stream.shutdown().await;
                Err(err)
            }
        }
    }

    async fn dial(&self) -> Result<RelayStream, RelayError> {
        tracing::debug!("dialing relay {}:{}", self.host, self.port);

        let addr = (self.host.as_str(), self.port);
        let tcp = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RelayError::Timeout)?
            .map_err(RelayError::Connection)?;
        let _ = tcp.set_nodelay(true);

        time::timeout(
            CONNECT_TIMEOUT,
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| RelayError::Timeout)?
        .map_err(handshake_error)
    }
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .finish()
    }
}

/// Send Auth and wait for AuthOk.
///
/// An Error reply surfaces the relay's reason verbatim as [`RelayError::Relay`].
pub async fn authenticate<S>(stream: &mut S, credentials: &Credentials) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let payload = credentials.auth_payload()?;
    write_frame(stream, FrameType::Auth, &payload).await?;

    let reply = FrameDecoder::with_max_payload(CONTROL_PAYLOAD_LIMIT)
        .decode(stream)
        .await?;
    match reply.frame_type {
        FrameType::AuthOk => Ok(()),
        FrameType::Error => Err(RelayError::Relay(reply.text())),
        other => Err(ProtocolError::UnexpectedFrame {
            expected: "AuthOk",
            got: other,
        }
        .into()),
    }
}

/// Send RegisterDownload/RegisterUpload and wait for the allocated port.
pub async fn register<S>(
    stream: &mut S,
    kind: SessionKind,
    session_id: &SessionId,
    filename: &str,
) -> Result<u16, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let payload = registration_payload(session_id, filename);
    write_frame(stream, kind.frame_type(), &payload).await?;

    let reply = FrameDecoder::with_max_payload(CONTROL_PAYLOAD_LIMIT)
        .decode(stream)
        .await?;
    match reply.frame_type {
        FrameType::PortAlloc => parse_port_alloc(&reply.payload),
        FrameType::Error => Err(RelayError::Relay(reply.text())),
        other => Err(ProtocolError::UnexpectedFrame {
            expected: "PortAlloc",
            got: other,
        }
        .into()),
    }
}

fn parse_port_alloc(payload: &[u8]) -> Result<u16, RelayError> {
    let Some(bytes) = payload.get(..4) else {
        return Err(ProtocolError::MalformedPayload {
            frame: FrameType::PortAlloc,
            reason: "shorter than 4 bytes",
        }
        .into());
    };
    let port = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ProtocolError::MalformedPayload {
            frame: FrameType::PortAlloc,
            reason: "port outside 1..=65535",
        }
        .into()),
    }
}

fn parse_relay_url(relay_url: &str) -> Result<(String, u16), RelayError> {
    let url = Url::parse(relay_url)
        .map_err(|e| RelayError::Config(format!("relay URL {relay_url:?}: {e}")))?;

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => {
            return Err(RelayError::Config(format!("missing host in {relay_url}")));
        }
    };
    Ok((host, url.port().unwrap_or(DEFAULT_RELAY_PORT)))
}

fn handshake_error(err: io::Error) -> RelayError {
    let tls = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .cloned();
    match tls {
        Some(tls) => RelayError::Tls(tls),
        None => RelayError::Connection(err),
    }
}
