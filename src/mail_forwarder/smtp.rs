use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, AsyncTokioStream, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::{RelayError, Result};
use crate::mail_forwarder::compose::ForwardEnvelope;
use crate::mail_reader::connector::Connector;
use crate::relay::SubmissionSession;
use crate::settings::AccountConfig;

const AUTH_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

/// Any already-connected stream handed to lettre, remembering the address
/// it was dialed to. Implicit TLS streams come from the connector, which
/// lettre cannot wrap on its own.
#[derive(Debug)]
pub struct SmtpTransport<S> {
    inner: S,
    peer: SocketAddr,
}

impl<S> SmtpTransport<S> {
    pub fn new(inner: S, peer: SocketAddr) -> Self {
        Self { inner, peer }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SmtpTransport<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SmtpTransport<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S> AsyncTokioStream for SmtpTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + Unpin + fmt::Debug,
{
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

/// An authenticated SMTP connection used for every forward of one cycle.
pub struct SmtpSubmitter {
    connection: AsyncSmtpConnection,
    connector: Connector,
}

fn connection_error(what: &str, err: lettre::transport::smtp::Error) -> RelayError {
    RelayError::Connection(format!("smtp {}: {}", what, err))
}

impl SmtpSubmitter {
    pub async fn open(account: &AccountConfig, connector: Connector) -> Result<Self> {
        let server = account.smtp.server.as_str();
        let tcp_stream = connector.dial(server, account.smtp.port).await?;
        let peer = tcp_stream
            .peer_addr()
            .map_err(|e| RelayError::Connection(format!("smtp peer address: {}", e)))?;

        let stream: Box<dyn AsyncTokioStream> = if account.smtp.use_ssl {
            let tls_stream = connector.tls(server, tcp_stream).await?;
            Box::new(SmtpTransport::new(tls_stream, peer))
        } else {
            Box::new(tcp_stream)
        };
        Self::start(stream, account, connector).await
    }

    /// Greeting and EHLO, STARTTLS when configured, then AUTH.
    pub async fn start(stream: Box<dyn AsyncTokioStream>, account: &AccountConfig, connector: Connector) -> Result<Self> {
        let hello = ClientId::default();
        let mut connection = connector
            .bounded("smtp greeting", async {
                AsyncSmtpConnection::connect_with_transport(stream, &hello)
                    .await
                    .map_err(|e| connection_error("greeting", e))
            })
            .await?;

        if account.smtp.use_starttls {
            let parameters = TlsParameters::new(account.smtp.server.clone())
                .map_err(|e| connection_error("tls parameters", e))?;
            connector
                .bounded("smtp starttls", async {
                    connection
                        .starttls(parameters, &hello)
                        .await
                        .map_err(|e| connection_error("starttls", e))
                })
                .await?;
        }

        let credentials = Credentials::new(account.email.clone(), account.password.clone());
        connector
            .bounded("smtp auth", async {
                connection
                    .auth(AUTH_MECHANISMS, &credentials)
                    .await
                    .map_err(|e| RelayError::Auth(format!("{}: {}", account.email, e)))
            })
            .await?;
        debug!("-- smtp session ready for {}", account.email);

        Ok(Self { connection, connector })
    }
}

impl SubmissionSession for SmtpSubmitter {
    async fn submit(&mut self, envelope: &ForwardEnvelope<'_>) -> Result<()> {
        let message = envelope.to_message()?;
        let connection = &mut self.connection;
        self.connector
            .bounded("smtp send", async {
                connection
                    .send(message.envelope(), &message.formatted())
                    .await
                    .map_err(|e| RelayError::Submission(format!("to {}: {}", envelope.recipient(), e)))
            })
            .await?;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        let connection = &mut self.connection;
        self.connector
            .bounded("smtp quit", async {
                connection.quit().await.map_err(|e| connection_error("quit", e))
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;
    use crate::mail_reader::message::Party;
    use crate::settings::{ForwardConfig, ImapConfig, ProxyConfig, SmtpConfig};

    fn account(email: &str) -> AccountConfig {
        AccountConfig {
            enabled: true,
            email: email.to_string(),
            password: "pw".to_string(),
            imap: ImapConfig {
                server: "imap.example.com".to_string(),
                port: 143,
                use_ssl: false,
                mailbox: "INBOX".to_string(),
            },
            smtp: SmtpConfig {
                server: "smtp.example.com".to_string(),
                port: 25,
                use_ssl: false,
                use_starttls: false,
            },
            proxy: ProxyConfig::default(),
            forward: ForwardConfig { to: vec!["x@example.org".to_string()] },
        }
    }

    fn transport(stream: DuplexStream) -> Box<dyn AsyncTokioStream> {
        let peer: SocketAddr = "127.0.0.1:25".parse().unwrap();
        Box::new(SmtpTransport::new(stream, peer))
    }

    /// Minimal SMTP server; returns every command line it saw.
    async fn smtp_server(stream: DuplexStream, accept_auth: bool) -> Vec<String> {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        let mut commands = Vec::new();

        write.write_all(b"220 smtp.example.com ESMTP\r\n").await.unwrap();
        while let Ok(Some(line)) = lines.next_line().await {
            let verb = line.split([' ', ':']).next().unwrap_or_default().to_ascii_uppercase();
            commands.push(line);
            let reply = match verb.as_str() {
                "EHLO" => "250-smtp.example.com\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n",
                "AUTH" if accept_auth => "235 2.7.0 accepted\r\n",
                "AUTH" => "535 5.7.8 bad credentials\r\n",
                "MAIL" | "RCPT" => "250 2.1.0 ok\r\n",
                "DATA" => {
                    write.write_all(b"354 go ahead\r\n").await.unwrap();
                    while let Ok(Some(data)) = lines.next_line().await {
                        if data == "." {
                            break;
                        }
                    }
                    "250 2.0.0 queued\r\n"
                }
                "QUIT" => {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 5.5.2 unknown\r\n",
            };
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        commands
    }

    fn verbs(commands: &[String]) -> Vec<String> {
        commands
            .iter()
            .map(|line| line.split([' ', ':']).next().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_submission_runs_over_a_wrapped_stream() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(smtp_server(server, true));

        let account = account("relay@example.com");
        let connector = Connector::new(None, Duration::from_secs(5));
        let mut submitter = SmtpSubmitter::start(transport(client), &account, connector).await.unwrap();

        let from = Party { name: "Alice".to_string(), address: "alice@example.com".to_string() };
        let to = Party { name: "Team".to_string(), address: "team@example.com".to_string() };
        let envelope = ForwardEnvelope::new(
            &account.email,
            "x@example.org",
            &from,
            &to,
            "Status",
            "<p>hi</p>",
            &[],
        )
        .unwrap();
        submitter.submit(&envelope).await.unwrap();
        submitter.close().await.unwrap();

        let commands = server.await.unwrap();
        assert_eq!(verbs(&commands), ["EHLO", "AUTH", "MAIL", "RCPT", "DATA", "QUIT"]);
        assert!(commands[1].starts_with("AUTH PLAIN "));
        assert!(commands[2].contains("<relay@example.com>"));
        assert!(commands[3].contains("<x@example.org>"));
    }

    #[tokio::test]
    async fn test_rejected_login_is_auth_error() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(smtp_server(server, false));

        let connector = Connector::new(None, Duration::from_secs(5));
        let result = SmtpSubmitter::start(transport(client), &account("locked@example.com"), connector).await;
        match result {
            Err(RelayError::Auth(detail)) => assert!(detail.contains("locked@example.com")),
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("login should have been refused"),
        }

        let commands = server.await.unwrap();
        assert_eq!(verbs(&commands), ["EHLO", "AUTH"]);
    }

    #[tokio::test]
    async fn test_wrapped_stream_reports_its_peer() {
        let (client, _server) = tokio::io::duplex(16);
        let peer: SocketAddr = "10.0.0.7:465".parse().unwrap();
        let wrapped = SmtpTransport::new(client, peer);
        assert_eq!(AsyncTokioStream::peer_addr(&wrapped).unwrap(), peer);
    }
}
