use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IrcSection;
use crate::engine::events::IncomingMessage;
use crate::engine::tracker::DonationTracker;
use crate::ledger::store::LedgerStore;

use super::formatter;
use super::isupport::ServerFeatures;
use super::numerics::{
    ERR_BANNEDFROMCHAN, ERR_ERRONEUSNICKNAME, ERR_NICKNAMEINUSE, ERR_PASSWDMISMATCH,
    ERR_UNAVAILRESOURCE, RPL_ENDOFNAMES, RPL_ISUPPORT, RPL_NAMREPLY, RPL_WELCOME,
};
use super::parser::IrcMessage;
use super::roster::NetworkState;
use super::throttle::SendThrottle;

/// Maximum bytes per incoming line (RFC 2812 says 512; tags push it further).
const MAX_LINE_LENGTH: usize = 8192;
/// Silence after which the bot checks the server with a PING.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const QUIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Registration gives up once `_` suffixes push the nick past this length.
const MAX_NICK_LENGTH: usize = 30;
const SEND_BURST: u32 = 5;
const SEND_INTERVAL_SECS: f64 = 1.0;
const CAPABILITIES: &[&str] = &["message-tags", "multi-prefix", "account-tag"];
const QUIT_MESSAGE: &str = "Torre de Babel cerrando";

/// How a session ended when it did not fail.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    Cancelled,
    Closed,
}

/// Per-connection protocol state.
struct Session {
    /// Nick the server knows us by (or the one being attempted).
    nick: String,
    registered: bool,
    caps_outstanding: usize,
    tags_enabled: bool,
    features: ServerFeatures,
}

/// IRC client that feeds channel traffic to the donation tracker and writes
/// its replies back. Reconnects with exponential backoff until cancelled.
pub struct IrcClient<S> {
    config: IrcSection,
    companions: Vec<String>,
    tracker: Arc<DonationTracker<S>>,
    network: Arc<NetworkState>,
}

impl<S: LedgerStore> IrcClient<S> {
    pub fn new(
        config: IrcSection,
        companion_nicks: &[String],
        tracker: Arc<DonationTracker<S>>,
        network: Arc<NetworkState>,
    ) -> Self {
        Self {
            config,
            companions: companion_nicks
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            tracker,
            network,
        }
    }

    /// Connect, serve, and reconnect until the token is cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let max_delay = Duration::from_secs(self.config.max_reconnect_delay_secs.max(1));
        let mut delay = INITIAL_RECONNECT_DELAY;

        loop {
            let result = self.connect_once(&cancel).await;
            let was_registered = self.network.is_connected();
            self.network.set_connected(false);

            match result {
                Ok(SessionEnd::Cancelled) => {
                    info!("IRC client stopped");
                    break;
                }
                Ok(SessionEnd::Closed) => warn!("IRC connection closed by server"),
                Err(e) => warn!(error = %format_args!("{e:#}"), "IRC session failed"),
            }

            if was_registered {
                delay = INITIAL_RECONNECT_DELAY;
            }
            info!(delay_secs = delay.as_secs(), "reconnecting to IRC");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(max_delay);
        }
    }

    async fn connect_once(&self, cancel: &CancellationToken) -> anyhow::Result<SessionEnd> {
        let server = self.config.server.as_str();
        let port = self.config.port;

        let tcp = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            r = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((server, port))) => {
                r.map_err(|_| anyhow!("timed out connecting to {server}:{port}"))?
                    .with_context(|| format!("failed to connect to {server}:{port}"))?
            }
        };

        if self.config.tls {
            let connector = tls_connector(&self.config.tls_ca_file)?;
            let domain = ServerName::try_from(server.to_string())
                .with_context(|| format!("invalid TLS server name {server}"))?;
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(domain, tcp))
                .await
                .map_err(|_| anyhow!("TLS handshake with {server} timed out"))?
                .context("TLS handshake failed")?;
            info!(%server, port, "connected to IRC (TLS)");
            self.run_session(stream, cancel).await
        } else {
            info!(%server, port, "connected to IRC (plaintext)");
            self.run_session(tcp, cancel).await
        }
    }

    /// Drive one connection from registration to close. Accepts any stream
    /// implementing AsyncRead + AsyncWrite (plain TCP or TLS).
    async fn run_session<T>(&self, stream: T, cancel: &CancellationToken) -> anyhow::Result<SessionEnd>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        // Outbound lines go through the throttle in their own task
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let write_handle = tokio::spawn(async move {
            let mut throttle = SendThrottle::new(
                SEND_BURST,
                SEND_INTERVAL_SECS,
                std::time::Instant::now(),
            );
            while let Some(line) = out_rx.recv().await {
                let delay = throttle.delay_for_next(std::time::Instant::now());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let data = format!("{line}\r\n");
                if writer.write_all(data.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut session = Session {
            nick: self.config.nick.clone(),
            registered: false,
            caps_outstanding: CAPABILITIES.len(),
            tags_enabled: false,
            features: ServerFeatures::default(),
        };

        for cap in CAPABILITIES {
            send_line(&out_tx, formatter::cap_req(cap));
        }
        if let Some(password) = self.config.password.as_deref() {
            send_line(&out_tx, formatter::pass(password));
        }
        send_line(&out_tx, formatter::nick(&session.nick));
        send_line(
            &out_tx,
            formatter::user(&self.config.username, &self.config.realname),
        );

        let mut line_buf = Vec::new();
        let mut awaiting_pong = false;

        let outcome = loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => break Ok(SessionEnd::Cancelled),
                r = tokio::time::timeout(IDLE_TIMEOUT, read_bounded_line(&mut reader, &mut line_buf)) => r,
            };

            match read {
                Err(_) if awaiting_pong => break Err(anyhow!("server stopped responding")),
                Err(_) => {
                    awaiting_pong = true;
                    send_line(&out_tx, formatter::ping(&self.config.server));
                    continue;
                }
                Ok(Ok(0)) => break Ok(SessionEnd::Closed),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!(error = %e, "dropping oversized line");
                    continue;
                }
                Ok(Err(e)) => break Err(anyhow::Error::new(e).context("IRC read failed")),
                Ok(Ok(_)) => {}
            }
            awaiting_pong = false;

            let line = String::from_utf8_lossy(&line_buf).trim_end().to_string();
            line_buf.clear();
            if line.is_empty() {
                continue;
            }

            let msg = match IrcMessage::parse(&line) {
                Ok(m) => m,
                Err(e) => {
                    debug!(error = %e, %line, "ignoring unparseable line");
                    continue;
                }
            };

            if let Err(e) = self.handle_line(&mut session, &msg, &out_tx).await {
                break Err(e);
            }
        };

        if outcome.as_ref().is_ok_and(|end| *end == SessionEnd::Cancelled) {
            send_line(&out_tx, formatter::quit(QUIT_MESSAGE));
            drop(out_tx);
            if tokio::time::timeout(QUIT_FLUSH_TIMEOUT, write_handle)
                .await
                .is_err()
            {
                debug!("QUIT not flushed before shutdown");
            }
        } else {
            write_handle.abort();
        }

        outcome
    }

    async fn handle_line(
        &self,
        session: &mut Session,
        msg: &IrcMessage,
        out: &mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<()> {
        let source = msg.source_nick().unwrap_or("");
        let from_self = source.eq_ignore_ascii_case(&session.nick);

        match msg.command.as_str() {
            "PING" => send_line(out, formatter::pong(msg.param(0).unwrap_or(""))),
            "CAP" => match msg.param(1) {
                Some("ACK") | Some("NAK") => {
                    let acked = msg.param(1) == Some("ACK");
                    let caps = msg.params.last().map(String::as_str).unwrap_or("");
                    if acked && caps.split_whitespace().any(|c| c == "message-tags") {
                        session.tags_enabled = true;
                    }
                    debug!(caps, acked, "capability answer");
                    if session.caps_outstanding > 0 {
                        session.caps_outstanding -= 1;
                        if session.caps_outstanding == 0 && !session.registered {
                            send_line(out, formatter::cap_end());
                        }
                    }
                }
                _ => {}
            },
            RPL_WELCOME => {
                if let Some(nick) = msg.param(0) {
                    session.nick = nick.to_string();
                }
                session.registered = true;
                self.network.set_connected(true);
                info!(nick = %session.nick, tags = session.tags_enabled, "registered with IRC server");
                if !self.config.channels.is_empty() {
                    send_line(out, formatter::join(&self.config.channels));
                }
            }
            RPL_ISUPPORT => {
                let end = msg.params.len().saturating_sub(1);
                let tokens = msg.params.get(1..end).unwrap_or(&[]);
                session
                    .features
                    .apply_isupport(tokens.iter().map(String::as_str));
                self.tracker.set_channel_types(&session.features.chantypes);
            }
            RPL_NAMREPLY => {
                if let (Some(channel), Some(names)) = (msg.param(2), msg.param(3)) {
                    self.network.apply_names(channel, names, &session.features);
                }
            }
            RPL_ENDOFNAMES => {
                if let Some(channel) = msg.param(1) {
                    debug!(%channel, members = self.network.member_count(channel), "names complete");
                }
            }
            ERR_NICKNAMEINUSE | ERR_UNAVAILRESOURCE | ERR_ERRONEUSNICKNAME
                if !session.registered =>
            {
                session.nick.push('_');
                if session.nick.len() > MAX_NICK_LENGTH {
                    bail!("no usable nick (last tried {})", session.nick);
                }
                warn!(nick = %session.nick, "nick unavailable, retrying");
                send_line(out, formatter::nick(&session.nick));
            }
            ERR_PASSWDMISMATCH => bail!("server rejected the password"),
            ERR_BANNEDFROMCHAN => {
                warn!(channel = msg.param(1).unwrap_or(""), "banned from channel");
            }
            "JOIN" => {
                if let Some(channel) = msg.param(0) {
                    self.network.join(channel, source, from_self);
                    if from_self {
                        info!(%channel, "joined channel");
                    }
                }
            }
            "PART" => {
                if let Some(channel) = msg.param(0) {
                    self.network.part(channel, source, from_self);
                }
            }
            "KICK" => {
                if let (Some(channel), Some(victim)) = (msg.param(0), msg.param(1)) {
                    let kicked_self = victim.eq_ignore_ascii_case(&session.nick);
                    self.network.part(channel, victim, kicked_self);
                    if kicked_self {
                        warn!(%channel, by = source, "kicked from channel, rejoining");
                        send_line(out, formatter::join(&[channel.to_string()]));
                    }
                }
            }
            "QUIT" => self.network.quit(source),
            "NICK" => {
                if let Some(new_nick) = msg.param(0) {
                    if from_self {
                        session.nick = new_nick.to_string();
                    }
                    self.network.rename(source, new_nick);
                }
            }
            "MODE" => {
                if let (Some(target), Some(change)) = (msg.param(0), msg.param(1))
                    && session.features.is_channel(target)
                {
                    let args = msg.params.get(2..).unwrap_or(&[]);
                    self.network
                        .apply_mode(target, change, args, &session.features);
                }
            }
            "PRIVMSG" | "NOTICE" if !from_self => self.handle_chat(session, msg, out).await,
            "ERROR" => bail!("server closed the link: {}", msg.param(0).unwrap_or("")),
            _ => {}
        }

        Ok(())
    }

    /// Hand a channel message to the tracker and send whatever it answers.
    async fn handle_chat(
        &self,
        session: &Session,
        msg: &IrcMessage,
        out: &mpsc::UnboundedSender<String>,
    ) {
        let Some(incoming) = self.incoming_message(session, msg) else {
            return;
        };

        for action in self.tracker.handle_message(&incoming).await {
            for line in formatter::action_lines(&action, session.tags_enabled) {
                send_line(out, line);
            }
        }
    }

    fn incoming_message(&self, session: &Session, msg: &IrcMessage) -> Option<IncomingMessage> {
        let nick = msg.source_nick()?;
        let target = msg.param(0)?;
        let text = msg.param(1)?;

        // CTCP requests and private messages are not donation traffic
        if !session.features.is_channel(target) || text.starts_with('\x01') {
            return None;
        }

        let from_bot = self.is_companion(nick, msg);
        if msg.command == "NOTICE" && !from_bot {
            return None;
        }

        let author_id = msg
            .tag("account")
            .filter(|a| !a.is_empty() && *a != "*")
            .unwrap_or(nick);

        Some(IncomingMessage {
            community_id: self.config.community.clone(),
            channel_id: target.to_ascii_lowercase(),
            author_id: author_id.to_string(),
            author_name: nick.to_string(),
            text: formatter::strip_formatting(text),
            message_id: msg
                .tag("msgid")
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            from_bot,
            is_operator: self.network.is_elevated(target, nick),
        })
    }

    /// Configured companion nicks win; without any, the IRCv3 bot tag decides.
    fn is_companion(&self, nick: &str, msg: &IrcMessage) -> bool {
        if self.companions.is_empty() {
            msg.has_tag("bot") || msg.has_tag("draft/bot")
        } else {
            self.companions.iter().any(|c| c.eq_ignore_ascii_case(nick))
        }
    }
}

fn send_line(tx: &mpsc::UnboundedSender<String>, line: String) {
    let _ = tx.send(line);
}

/// Build a TLS connector trusting the CA certificates in a PEM bundle.
fn tls_connector(ca_file: &str) -> anyhow::Result<TlsConnector> {
    let file = std::fs::File::open(ca_file)
        .with_context(|| format!("failed to open CA bundle {ca_file}"))?;
    let mut reader = std::io::BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.with_context(|| format!("invalid certificate in {ca_file}"))?;
        roots.add(cert).context("rejected CA certificate")?;
    }
    if roots.is_empty() {
        bail!("no CA certificates found in {ca_file}");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Read one line (through `\n`) into `buf`, capped at MAX_LINE_LENGTH bytes.
/// Returns Ok(0) on EOF. Bytes of a partial line stay in `buf` if the
/// future is dropped, so a timeout does not lose data.
async fn read_bounded_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (chunk_len, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        buf.extend_from_slice(&available[..chunk_len]);
        reader.consume(chunk_len);

        if buf.len() > MAX_LINE_LENGTH {
            buf.clear();
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "IRC line exceeds maximum length",
            ));
        }
        if complete {
            return Ok(buf.len());
        }
    }
}
