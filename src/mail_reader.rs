pub mod connector;
pub mod imap;
pub mod message;

/// One unseen message as handed over by the retrieval session.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}
