//! TCP client for the engine's control endpoint.

use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, tcp::OwnedReadHalf},
    task,
    time::timeout,
};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, trace, warn};

use crate::{
    EngineControl, Error, Result,
    protocol::{
        ClientMessage, EnginePermissions, MAX_LINE_BYTES, ServerMessage, decode_response,
        encode_request,
    },
};

/// Default control endpoint.
pub const DEFAULT_CONTROL_PORT: u16 = 37001;
/// Maximum number of unsolicited lines skipped while waiting for a response.
const MAX_SKIPPED_LINES: usize = 32;

/// Supplies the current session token, if any, at call time. Runs on a
/// blocking thread, so it may touch the keychain or the filesystem.
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Configuration for [`TcpControlClient`].
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Address of the engine's control listener.
    pub addr: SocketAddr,
    /// When false, every call fails fast with [`Error::Disabled`].
    pub enabled: bool,
    /// Label presented to the engine when authenticating.
    pub client_name: String,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_CONTROL_PORT)),
            enabled: true,
            client_name: "keygate".to_string(),
        }
    }
}

/// Control client that opens one connection per call.
///
/// Every call is bounded by the caller-supplied timeout, which covers
/// connecting, authenticating and the round trip itself.
#[derive(Clone)]
pub struct TcpControlClient {
    /// Endpoint and transport settings.
    cfg: ControlCfg,
    /// Optional token source used to authenticate each connection.
    token: Option<TokenProvider>,
}

impl fmt::Debug for TcpControlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpControlClient")
            .field("cfg", &self.cfg)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl TcpControlClient {
    /// Create a client for the given endpoint configuration.
    pub fn new(cfg: ControlCfg) -> Self {
        Self { cfg, token: None }
    }

    /// Authenticate every connection with the token returned by `provider`.
    pub fn with_token_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.token = Some(Arc::new(provider));
        self
    }

    /// Endpoint this client talks to.
    pub fn addr(&self) -> SocketAddr {
        self.cfg.addr
    }

    /// Send `msg` and wait for its response, bounded by `budget`.
    pub async fn exchange(&self, msg: ClientMessage, budget: Duration) -> Result<ServerMessage> {
        if !self.cfg.enabled {
            return Err(Error::Disabled);
        }
        match timeout(budget, self.exchange_inner(msg)).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(budget)),
        }
    }

    /// Unbounded body of [`exchange`](Self::exchange).
    async fn exchange_inner(&self, msg: ClientMessage) -> Result<ServerMessage> {
        let token = self.fetch_token().await;
        trace!(addr = %self.cfg.addr, "connecting to control endpoint");
        let stream = TcpStream::connect(self.cfg.addr).await?;
        stream.set_nodelay(true)?;
        let (read, mut write) = stream.into_split();
        let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

        if let Some(token) = token
            && !token.is_empty()
        {
            let auth = ClientMessage::Authenticate {
                token,
                client_name: self.cfg.client_name.clone(),
            };
            write.write_all(encode_request(&auth)?.as_bytes()).await?;
            match read_response(&mut lines).await? {
                ServerMessage::AuthResult { success: true } => {}
                ServerMessage::AuthResult { success: false } => {
                    return Err(Error::AuthFailed("token rejected".into()));
                }
                ServerMessage::Error { msg } => return Err(Error::AuthFailed(msg)),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected reply to Authenticate: {other:?}"
                    )));
                }
            }
        }

        write.write_all(encode_request(&msg)?.as_bytes()).await?;
        write.flush().await?;
        read_response(&mut lines).await
    }

    /// Ask the token provider off the runtime's worker threads.
    async fn fetch_token(&self) -> Option<String> {
        let provider = self.token.clone()?;
        match task::spawn_blocking(move || provider()).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "token provider failed; connecting unauthenticated");
                None
            }
        }
    }
}

/// Framed response lines, capped at [`MAX_LINE_BYTES`].
type ResponseLines = FramedRead<OwnedReadHalf, LinesCodec>;

/// Read lines until a known response arrives, skipping broadcasts.
async fn read_response(lines: &mut ResponseLines) -> Result<ServerMessage> {
    for _ in 0..MAX_SKIPPED_LINES {
        let line = match lines.next().await {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                return Err(Error::Protocol(format!(
                    "response line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }
            Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
            None => return Err(Error::Protocol("connection closed before response".into())),
        };
        if let Some(msg) = decode_response(&line)? {
            return Ok(msg);
        }
        trace!(line = %line, "skipping unsolicited control message");
    }
    Err(Error::Protocol(format!(
        "no response within {MAX_SKIPPED_LINES} lines"
    )))
}

#[async_trait]
impl EngineControl for TcpControlClient {
    fn transport_enabled(&self) -> bool {
        self.cfg.enabled
    }

    async fn check_server_status(&self, budget: Duration) -> bool {
        match self.exchange(ClientMessage::Hello {}, budget).await {
            Ok(ServerMessage::HelloOk { version, .. }) => {
                trace!(%version, "control endpoint reachable");
                true
            }
            Ok(other) => {
                debug!(?other, "unexpected reply to Hello");
                false
            }
            Err(e) => {
                trace!(error = %e, "control endpoint not reachable");
                false
            }
        }
    }

    async fn check_permissions(&self, budget: Duration) -> Result<EnginePermissions> {
        match self
            .exchange(ClientMessage::RequestPermissions {}, budget)
            .await?
        {
            ServerMessage::Permissions(perms) => Ok(perms),
            ServerMessage::Error { msg } => Err(Error::Protocol(msg)),
            other => Err(Error::Protocol(format!(
                "unexpected reply to RequestPermissions: {other:?}"
            ))),
        }
    }

    async fn reload_config(&self, budget: Duration) -> Result<()> {
        match self.exchange(ClientMessage::Reload {}, budget).await? {
            ServerMessage::Status { ok: true, .. } => Ok(()),
            ServerMessage::Status { ok: false, message } => Err(Error::Protocol(
                message.unwrap_or_else(|| "reload rejected".into()),
            )),
            ServerMessage::Error { msg } => Err(Error::Protocol(msg)),
            other => Err(Error::Protocol(format!(
                "unexpected reply to Reload: {other:?}"
            ))),
        }
    }

    async fn restart(&self, budget: Duration) -> Result<bool> {
        match self.exchange(ClientMessage::Restart {}, budget).await? {
            ServerMessage::Status { ok, message } => {
                if !ok {
                    warn!(message = ?message, "engine declined restart");
                }
                Ok(ok)
            }
            ServerMessage::Error { msg } => Err(Error::Protocol(msg)),
            other => Err(Error::Protocol(format!(
                "unexpected reply to Restart: {other:?}"
            ))),
        }
    }
}
