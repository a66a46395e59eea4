use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::mail_forwarder::compose::ForwardEnvelope;
use crate::mail_forwarder::mask::render_mask;
use crate::mail_forwarder::smtp::SmtpSubmitter;
use crate::mail_reader::connector::Connector;
use crate::mail_reader::imap::ImapMailbox;
use crate::mail_reader::message::decompose;
use crate::mail_reader::RawMessage;
use crate::settings::AccountConfig;

/// The retrieval side of one account cycle.
#[allow(async_fn_in_trait)]
pub trait RetrievalSession: Sized {
    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>>;
    async fn mark_seen(&mut self, uid: u32) -> Result<()>;
    async fn close(self) -> Result<()>;
}

/// The submission side of one account cycle.
#[allow(async_fn_in_trait)]
pub trait SubmissionSession: Sized {
    async fn submit(&mut self, envelope: &ForwardEnvelope<'_>) -> Result<()>;
    async fn close(self) -> Result<()>;
}

/// Opens fresh sessions for an account; nothing is pooled between cycles.
#[allow(async_fn_in_trait)]
pub trait SessionFactory {
    type Retrieval: RetrievalSession;
    type Submission: SubmissionSession;

    async fn open_retrieval(&self, account: &AccountConfig) -> Result<Self::Retrieval>;
    async fn open_submission(&self, account: &AccountConfig) -> Result<Self::Submission>;
}

/// IMAP + SMTP over real sockets.
#[derive(Debug, Clone)]
pub struct NetworkSessions {
    timeout: Duration,
}

impl NetworkSessions {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl SessionFactory for NetworkSessions {
    type Retrieval = ImapMailbox;
    type Submission = SmtpSubmitter;

    async fn open_retrieval(&self, account: &AccountConfig) -> Result<ImapMailbox> {
        ImapMailbox::open(account, Connector::for_account(account, self.timeout)).await
    }

    async fn open_submission(&self, account: &AccountConfig) -> Result<SmtpSubmitter> {
        SmtpSubmitter::open(account, Connector::for_account(account, self.timeout)).await
    }
}

/// What happened to one retrieved message.
#[derive(Debug)]
pub enum Outcome {
    /// Every destination accepted it.
    Sent { recipients: usize },
    /// It can never be forwarded (no body, unrenderable).
    Skipped(RelayError),
    /// Submission broke off; later destinations got nothing.
    Failed(RelayError),
}

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub account: String,
    pub retrieved: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub error: Option<RelayError>,
}

impl CycleSummary {
    fn new(account: &str) -> Self {
        Self { account: account.to_string(), ..Default::default() }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub async fn forward_message<S: SubmissionSession>(
    submitter: &mut S,
    account: &AccountConfig,
    raw: &RawMessage,
) -> Outcome {
    let message = match decompose(&raw.bytes) {
        Ok(message) => message,
        Err(e) => return Outcome::Skipped(e),
    };
    let html = match render_mask(&message.headers, &message.body) {
        Ok(html) => html,
        Err(e) => return Outcome::Skipped(e),
    };

    let subject = message.headers.subject.as_str();
    for recipient in &account.forward.to {
        let envelope = match ForwardEnvelope::new(
            &account.email,
            recipient,
            &message.headers.from,
            &message.headers.to,
            subject,
            &html,
            &message.attachments,
        ) {
            Ok(envelope) => envelope,
            Err(e) => return Outcome::Failed(e),
        };

        if let Err(e) = submitter.submit(&envelope).await {
            return Outcome::Failed(e);
        }
        info!("Forwarded email {} from {} to {}", subject, account.email, recipient);
    }

    Outcome::Sent { recipients: account.forward.to.len() }
}

/// The work's error wins over a failed close, which is then only logged.
fn settle(work: Result<()>, closed: Result<()>, side: &str, account: &str) -> Result<()> {
    match (work, closed) {
        (Ok(()), closed) => closed,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_error)) => {
            warn!("Closing {} session for {} failed: {}", side, account, close_error);
            Err(e)
        }
    }
}

/// Retrieve, forward and mark one account's unseen mail. Every session
/// opened here is closed again, whatever happened in between.
async fn relay_account<F: SessionFactory>(
    factory: &F,
    account: &AccountConfig,
    summary: &mut CycleSummary,
) -> Result<()> {
    let mut mailbox = factory.open_retrieval(account).await?;
    let work = relay_unseen(factory, &mut mailbox, account, summary).await;
    settle(work, mailbox.close().await, "retrieval", &account.email)
}

async fn relay_unseen<F: SessionFactory>(
    factory: &F,
    mailbox: &mut F::Retrieval,
    account: &AccountConfig,
    summary: &mut CycleSummary,
) -> Result<()> {
    let messages = mailbox.fetch_unseen().await?;
    summary.retrieved = messages.len();
    if messages.is_empty() {
        return Ok(());
    }

    let mut submitter = factory.open_submission(account).await?;
    let work = forward_all(&mut submitter, mailbox, account, &messages, summary).await;
    settle(work, submitter.close().await, "submission", &account.email)
}

/// A message is marked seen once it is Sent or Skipped. A Failed message
/// stays unseen and ends the cycle, so the next tick retries it.
async fn forward_all<R: RetrievalSession, S: SubmissionSession>(
    submitter: &mut S,
    mailbox: &mut R,
    account: &AccountConfig,
    messages: &[RawMessage],
    summary: &mut CycleSummary,
) -> Result<()> {
    for raw in messages {
        match forward_message(submitter, account, raw).await {
            Outcome::Sent { recipients } => {
                debug!("Email {} from {} reached {} recipients", raw.uid, account.email, recipients);
                summary.sent += 1;
                mailbox.mark_seen(raw.uid).await?;
            }
            Outcome::Skipped(reason) => {
                error!("Skipping email {} from {}: {}", raw.uid, account.email, reason);
                summary.skipped += 1;
                mailbox.mark_seen(raw.uid).await?;
            }
            Outcome::Failed(reason) => {
                summary.failed += 1;
                return Err(reason);
            }
        }
    }
    Ok(())
}

/// Errors never escape: they are logged against the account and kept in
/// the summary.
pub async fn run_account_cycle<F: SessionFactory>(factory: &F, account: &AccountConfig) -> CycleSummary {
    let mut summary = CycleSummary::new(&account.email);
    if let Err(e) = relay_account(factory, account, &mut summary).await {
        error!("Error processing account {}: {}", account.email, e);
        summary.error = Some(e);
    }
    summary
}
