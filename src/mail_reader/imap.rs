use std::fmt;

use async_imap::{Client, Session};
use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::{RelayError, Result};
use crate::mail_reader::connector::Connector;
use crate::mail_reader::RawMessage;
use crate::relay::RetrievalSession;
use crate::settings::AccountConfig;
use log::{debug, info};

/// Any transport the IMAP client can run over: plain TCP or TLS.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

type ImapSession = Session<Compat<Box<dyn ImapStream>>>;

/// Providers that reject SELECT until the client has identified itself.
const CLIENT_ID_PROVIDERS: &[&str] = &["163.com", "126.com"];

/// Extra negotiation a provider needs between LOGIN and SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderQuirk {
    None,
    AnnounceClientId,
}

pub fn quirk_for(domain: &str) -> ProviderQuirk {
    let domain = domain.to_ascii_lowercase();
    let matches = CLIENT_ID_PROVIDERS
        .iter()
        .any(|provider| domain == *provider || domain.ends_with(&format!(".{}", provider)));
    if matches {
        ProviderQuirk::AnnounceClientId
    } else {
        ProviderQuirk::None
    }
}

pub fn client_id_command(contact: &str) -> String {
    let fields = [
        ("name", env!("CARGO_PKG_NAME")),
        ("contact", contact),
        ("version", env!("CARGO_PKG_VERSION")),
        ("vendor", env!("CARGO_PKG_NAME")),
    ];
    let pairs: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("\"{}\" \"{}\"", key, value.replace(['"', '\\'], "")))
        .collect();
    format!("ID ({})", pairs.join(" "))
}

/// An authenticated IMAP session with the account's mailbox selected.
pub struct ImapMailbox {
    session: ImapSession,
    connector: Connector,
    account: String,
}

impl ImapMailbox {
    pub async fn open(account: &AccountConfig, connector: Connector) -> Result<Self> {
        let server = account.imap.server.as_str();
        let tcp_stream = connector.dial(server, account.imap.port).await?;
        let stream: Box<dyn ImapStream> = if account.imap.use_ssl {
            Box::new(connector.tls(server, tcp_stream).await?)
        } else {
            Box::new(tcp_stream)
        };
        Self::start(stream, account, connector).await
    }

    /// Greeting, LOGIN, the provider's ID announcement when it needs one,
    /// then SELECT.
    pub async fn start(stream: Box<dyn ImapStream>, account: &AccountConfig, connector: Connector) -> Result<Self> {
        let mut client = Client::new(stream.compat());
        connector
            .bounded("imap greeting", async {
                let _greeting = client
                    .read_response()
                    .await
                    .ok_or_else(|| RelayError::Connection("connection closed before greeting".to_string()))?
                    .map_err(|e| RelayError::Connection(format!("reading greeting: {}", e)))?;
                Ok(())
            })
            .await?;

        let mut session = connector
            .bounded("imap login", async {
                client
                    .login(&account.email, &account.password)
                    .await
                    .map_err(|(e, _)| RelayError::Auth(format!("{}: {}", account.email, e)))
            })
            .await?;
        debug!("-- logged in as {}", account.email);

        if quirk_for(&account.domain()) == ProviderQuirk::AnnounceClientId {
            let command = client_id_command(&account.email);
            connector
                .bounded("imap id", async {
                    session
                        .run_command_and_check_ok(&command)
                        .await
                        .map_err(|e| RelayError::Protocol(format!("ID rejected: {}", e)))
                })
                .await?;
            debug!("-- announced client id for {}", account.email);
        }

        let mailbox = account.imap.mailbox.as_str();
        connector
            .bounded("imap select", async { Ok(session.select(mailbox).await?) })
            .await?;
        debug!("-- {} selected", mailbox);

        Ok(Self { session, connector, account: account.email.clone() })
    }
}

impl RetrievalSession for ImapMailbox {
    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>> {
        let session = &mut self.session;
        let mut uids: Vec<u32> = self
            .connector
            .bounded("imap search", async { Ok(session.uid_search("UNSEEN").await?) })
            .await?
            .into_iter()
            .collect();
        uids.sort_unstable();

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            // PEEK keeps \Seen untouched until the message has been dealt with
            let fetches: Vec<_> = self
                .connector
                .bounded("imap fetch", async {
                    let stream = session.uid_fetch(uid.to_string(), "BODY.PEEK[]").await?;
                    Ok(stream.try_collect::<Vec<_>>().await?)
                })
                .await?;

            let body = fetches
                .iter()
                .find_map(|fetch| fetch.body())
                .ok_or_else(|| RelayError::Protocol(format!("UID {} returned no body", uid)))?;
            messages.push(RawMessage { uid, bytes: body.to_vec() });
        }

        if !messages.is_empty() {
            info!("Retrieved {} new emails from {}", messages.len(), self.account);
        }
        Ok(messages)
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let session = &mut self.session;
        self.connector
            .bounded("imap store", async {
                let updates = session.uid_store(uid.to_string(), "+FLAGS (\\Seen)").await?;
                updates.try_collect::<Vec<_>>().await?;
                Ok(())
            })
            .await
    }

    async fn close(mut self) -> Result<()> {
        let session = &mut self.session;
        self.connector
            .bounded("imap logout", async { Ok(session.logout().await?) })
            .await
    }
}
