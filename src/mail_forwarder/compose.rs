use lettre::message::header::ContentType;
use lettre::message::{Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};

use crate::error::{RelayError, Result};
use crate::mail_reader::message::{Attachment, Party};

const VIA: &str = "via Forwarder";

/// One outbound copy of an original message, addressed to one destination.
#[derive(Debug, Clone)]
pub struct ForwardEnvelope<'a> {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: &'a str,
    pub html: &'a str,
    pub attachments: &'a [Attachment],
}

/// `"Alice (alice@example.com) via Forwarder"`
pub fn provenance_name(party: &Party) -> String {
    format!("{} ({}) {}", party.name, party.address, VIA)
        .trim_start()
        .to_string()
}

fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|e| RelayError::Submission(format!("invalid address {:?}: {}", address, e)))
}

impl<'a> ForwardEnvelope<'a> {
    /// `relay` sends on behalf of `original_from`; `recipient` receives on
    /// behalf of `original_to`.
    pub fn new(
        relay: &str,
        recipient: &str,
        original_from: &Party,
        original_to: &Party,
        subject: &'a str,
        html: &'a str,
        attachments: &'a [Attachment],
    ) -> Result<Self> {
        Ok(Self {
            from: Mailbox::new(Some(provenance_name(original_from)), parse_address(relay)?),
            to: Mailbox::new(Some(provenance_name(original_to)), parse_address(recipient)?),
            subject,
            html,
            attachments,
        })
    }

    pub fn recipient(&self) -> &Address {
        &self.to.email
    }

    pub fn to_message(&self) -> Result<Message> {
        let mut body = MultiPart::mixed().singlepart(SinglePart::html(self.html.to_string()));

        for attachment in self.attachments {
            let content_type = match ContentType::parse(&attachment.content_type) {
                Ok(content_type) => content_type,
                Err(_) => ContentType::parse("application/octet-stream")
                    .map_err(|e| RelayError::Submission(format!("content type: {}", e)))?,
            };
            body = body.singlepart(
                AttachmentPart::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(self.subject)
            .multipart(body)
            .map_err(|e| RelayError::Submission(format!("cannot build message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailparse::{parse_mail, MailHeaderMap};

    fn alice() -> Party {
        Party { name: "Alice".to_string(), address: "alice@example.com".to_string() }
    }

    fn team() -> Party {
        Party { name: "Team".to_string(), address: "team@example.com".to_string() }
    }

    #[test]
    fn test_provenance_name() {
        assert_eq!(provenance_name(&alice()), "Alice (alice@example.com) via Forwarder");
        let nameless = Party { name: String::new(), address: "a@example.com".to_string() };
        assert_eq!(provenance_name(&nameless), "(a@example.com) via Forwarder");
    }

    #[test]
    fn test_envelope_goes_from_relay_to_recipient() {
        let envelope = ForwardEnvelope::new(
            "relay@example.com",
            "x@example.org",
            &alice(),
            &team(),
            "Status",
            "<p>hi</p>",
            &[],
        )
        .unwrap();
        let message = envelope.to_message().unwrap();

        let smtp_envelope = message.envelope();
        assert_eq!(smtp_envelope.from().map(ToString::to_string), Some("relay@example.com".to_string()));
        assert_eq!(smtp_envelope.to().len(), 1);
        assert_eq!(smtp_envelope.to()[0].to_string(), "x@example.org");
        assert_eq!(envelope.recipient().to_string(), "x@example.org");
    }

    #[test]
    fn test_message_carries_subject_body_and_identical_attachment() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let attachments = vec![Attachment {
            filename: "data.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            content: payload.clone(),
        }];
        let envelope = ForwardEnvelope::new(
            "relay@example.com",
            "x@example.org",
            &alice(),
            &team(),
            "Status",
            "<p>masked</p>",
            &attachments,
        )
        .unwrap();
        let formatted = envelope.to_message().unwrap().formatted();

        let parsed = parse_mail(&formatted).unwrap();
        assert_eq!(parsed.headers.get_first_value("Subject").as_deref(), Some("Status"));
        let from = parsed.headers.get_first_value("From").unwrap();
        assert!(from.contains("via Forwarder"));
        assert!(from.contains("relay@example.com"));

        let html = parsed.subparts.iter().find(|p| p.ctype.mimetype == "text/html").unwrap();
        assert!(html.get_body().unwrap().contains("<p>masked</p>"));

        let attached = parsed
            .subparts
            .iter()
            .find(|p| p.get_content_disposition().params.get("filename").map(String::as_str) == Some("data.bin"))
            .unwrap();
        assert_eq!(attached.get_body_raw().unwrap(), payload);
    }

    #[test]
    fn test_unknown_content_type_falls_back() {
        let attachments = vec![Attachment {
            filename: "weird".to_string(),
            content_type: "not a mime type".to_string(),
            content: b"x".to_vec(),
        }];
        let envelope = ForwardEnvelope::new(
            "relay@example.com",
            "x@example.org",
            &alice(),
            &team(),
            "Status",
            "<p>hi</p>",
            &attachments,
        )
        .unwrap();
        assert!(envelope.to_message().is_ok());
    }

    #[test]
    fn test_bad_recipient_is_rejected() {
        let result = ForwardEnvelope::new("relay@example.com", "nope", &alice(), &team(), "s", "b", &[]);
        assert!(matches!(result, Err(RelayError::Submission(_))));
    }
}
