use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info, warn};

use crate::models::{local_part, Email};
use crate::smtp::errors::{SmtpError, SmtpResult};
use crate::smtp::mime;
use crate::smtp::reply::{Reply, SERVICE_READY};
use crate::smtp::stream::SmtpStream;

/// Upper bound of a single server reply.
const REPLY_BUF: usize = 4096;
/// Default bound on reaching the server and reading its greeting.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the last command sequence got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connected,
    HeloSent,
    AuthLogin,
    AuthUser,
    AuthPass,
    FromSent,
    RcptSent,
    DataRequested,
    BodySent,
    Done,
    Failed,
}

/// One SMTP session over one connection, one command in flight at a time.
pub struct SmtpClient<S = SmtpStream> {
    stream: S,
    host: String,
    authenticated: bool,
    state: State,
    timeout: Option<Duration>,
    debug: bool,
    transcript: String,
}

impl SmtpClient<SmtpStream> {
    /// Connects, optionally over TLS, and waits for a `220` greeting, all
    /// within [`CONNECT_TIMEOUT`].
    pub async fn connect(host: &str, port: u16, use_tls: bool) -> SmtpResult<Self> {
        Self::connect_with_timeout(host, port, use_tls, CONNECT_TIMEOUT).await
    }

    /// Like [`SmtpClient::connect`], with `limit` bounding each of the TCP
    /// connect, the TLS handshake and the greeting.
    pub async fn connect_with_timeout(
        host: &str,
        port: u16,
        use_tls: bool,
        limit: Duration,
    ) -> SmtpResult<Self> {
        let addr = lookup_host((host, port))
            .await
            .map_err(|_| SmtpError::Resolve(host.to_owned()))?
            .next()
            .ok_or_else(|| SmtpError::Resolve(host.to_owned()))?;

        let tcp = with_timeout(Some(limit), TcpStream::connect(addr)).await?;
        let stream = if use_tls {
            tokio::time::timeout(limit, SmtpStream::connect_tls(host, tcp))
                .await
                .map_err(|_| SmtpError::Timeout(limit))??
        } else {
            SmtpStream::Plain(tcp)
        };
        debug!(host, %addr, tls = use_tls, "connected");

        Self::greet(stream, host, Some(limit)).await
    }
}

impl<S> SmtpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Starts a session on an already connected stream. Anything but a `220`
    /// greeting is an error.
    pub async fn from_stream(stream: S, host: &str) -> SmtpResult<Self> {
        Self::greet(stream, host, None).await
    }

    async fn greet(mut stream: S, host: &str, limit: Option<Duration>) -> SmtpResult<Self> {
        let mut buf = [0u8; REPLY_BUF];
        let n = with_timeout(limit, stream.read(&mut buf)).await?;
        if n == 0 {
            return Err(eof());
        }

        let greeting = Reply::parse(&buf[..n])?;
        if greeting.code != SERVICE_READY {
            warn!(host, code = greeting.code, "unexpected greeting");
            return Err(SmtpError::Greeting {
                code: greeting.code,
                line: greeting.text,
            });
        }
        info!(host, "{}", greeting.text);

        Ok(Self {
            stream,
            host: host.to_owned(),
            authenticated: false,
            state: State::Connected,
            timeout: None,
            debug: false,
            transcript: String::new(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Everything sent and received while debug capture was on.
    pub fn debug_info(&self) -> &str {
        &self.transcript
    }

    /// Delivers `email` in one session. `timeout` bounds every read and write
    /// of this call. The first rejection or transport error ends the
    /// exchange; the connection is left where it stopped.
    pub async fn send(&mut self, email: &Email, timeout: Duration, debug: bool) -> SmtpResult {
        if self.state == State::Failed {
            return Err(SmtpError::SessionFailed);
        }
        self.timeout = Some(timeout);
        self.debug = debug;

        let result = self.exchange(email).await;
        match &result {
            Ok(()) => {
                self.state = State::Done;
                info!(host = %self.host, recipients = email.recipients().len(), "mail accepted");
            }
            Err(e) => {
                warn!(host = %self.host, step = ?self.state, "send failed: {}", e);
                self.state = State::Failed;
            }
        }
        result
    }

    async fn exchange(&mut self, email: &Email) -> SmtpResult {
        let helo = format!("HELO {}\r\n", self.host);
        self.do_cmd(helo.as_bytes()).await?;
        self.state = State::HeloSent;

        let from = email.from_address();
        if !self.authenticated && !from.is_empty() {
            self.do_cmd(b"AUTH LOGIN\r\n").await?;
            self.state = State::AuthLogin;

            let user = format!("{}\r\n", STANDARD.encode(local_part(from)));
            self.do_cmd(user.as_bytes()).await?;
            self.state = State::AuthUser;

            let pass = format!("{}\r\n", STANDARD.encode(&email.credential));
            self.do_cmd(pass.as_bytes()).await?;
            self.state = State::AuthPass;
            self.authenticated = true;
        }

        let mail_from = format!("MAIL FROM: <{}>\r\n", from);
        self.do_cmd(mail_from.as_bytes()).await?;
        self.state = State::FromSent;

        for rcpt in email.recipients() {
            let rcpt_to = format!("RCPT TO: <{}>\r\n", rcpt);
            self.do_cmd(rcpt_to.as_bytes()).await?;
            self.state = State::RcptSent;
        }

        self.do_cmd(b"DATA\r\n").await?;
        self.state = State::DataRequested;

        let message = mime::compose(email, &mime::new_boundary());
        self.do_cmd(&mime::data_payload(&message)).await?;
        self.state = State::BodySent;
        Ok(())
    }

    /// Writes one complete command and reads one reply. Codes below 400 pass.
    async fn do_cmd(&mut self, command: &[u8]) -> SmtpResult {
        let timeout = self.timeout;
        with_timeout(timeout, self.stream.write_all(command)).await?;
        with_timeout(timeout, self.stream.flush()).await?;

        let mut buf = [0u8; REPLY_BUF];
        let n = with_timeout(timeout, self.stream.read(&mut buf)).await?;
        if n == 0 {
            return Err(eof());
        }
        let raw = &buf[..n];

        if self.debug {
            self.transcript.push_str(&String::from_utf8_lossy(command));
            self.transcript.push_str(&String::from_utf8_lossy(raw));
        }

        let reply = Reply::parse(raw)?;
        debug!(code = reply.code, "{}", reply.text);
        if reply.is_rejection() {
            return Err(SmtpError::Rejected {
                code: reply.code,
                message: reply.text,
            });
        }
        Ok(())
    }

    /// Ends the session politely.
    pub async fn quit(mut self) -> SmtpResult {
        let result = self.do_cmd(b"QUIT\r\n").await;
        if let Err(e) = self.stream.shutdown().await {
            debug!("shutdown: {}", e);
        }
        result
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, op: F) -> SmtpResult<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| SmtpError::Timeout(limit))?
            .map_err(SmtpError::from),
        None => op.await.map_err(SmtpError::from),
    }
}

fn eof() -> SmtpError {
    SmtpError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "server closed the connection",
    ))
}
