use std::sync::OnceLock;

use mailparse::{addrparse_header, parse_header, parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use regex::Regex;

use crate::error::{RelayError, Result};

/// A decoded display name and address taken from an address header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Party {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginalHeaders {
    pub from: Party,
    pub to: Party,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content: String,
    pub is_html: bool,
}

/// An attachment payload, kept exactly as it was after transfer decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DecomposedMessage {
    pub headers: OriginalHeaders,
    pub body: Body,
    pub attachments: Vec<Attachment>,
}

/// Decode any RFC 2047 encoded words in `value`.
pub fn decode_words(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_string();
    }
    let line = format!("X: {}", value);
    match parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

fn html_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

pub fn looks_like_html(text: &str) -> bool {
    html_tag().is_match(text)
}

/// Plain text gets explicit line breaks so it survives being wrapped in HTML.
pub fn classify_body(content: String) -> Body {
    if looks_like_html(&content) {
        Body { content, is_html: true }
    } else {
        let content = content.replace("\r\n", "<br>").replace('\n', "<br>");
        Body { content, is_html: false }
    }
}

fn parse_party(mail: &ParsedMail, name: &str) -> Party {
    let Some(header) = mail.headers.get_first_header(name) else {
        return Party::default();
    };

    let first = addrparse_header(header).ok().and_then(|list| {
        list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.clone()),
            MailAddr::Group(group) => group.addrs.first().cloned(),
        })
    });

    match first {
        Some(info) => Party {
            name: info.display_name.map(|n| decode_words(&n)).unwrap_or_default(),
            address: info.addr,
        },
        None => Party::default(),
    }
}

fn part_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| decode_words(name))
}

fn is_attachment(part: &ParsedMail) -> bool {
    part.get_content_disposition().disposition == DispositionType::Attachment
        || part_filename(part).is_some()
}

struct Collected {
    body: Option<String>,
    attachments: Vec<Attachment>,
}

fn process_part(part: &ParsedMail, collected: &mut Collected) -> Result<()> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if is_attachment(part) {
        let content = part
            .get_body_raw()
            .map_err(|e| RelayError::Decomposition(format!("attachment payload: {}", e)))?;
        collected.attachments.push(Attachment {
            filename: part_filename(part).unwrap_or_else(|| "unnamed_attachment".to_string()),
            content_type: mimetype,
            content,
        });
    } else if mimetype == "text/html" {
        // the last HTML part wins
        collected.body = Some(text_of(part)?);
    } else if mimetype == "text/plain" && collected.body.as_deref().map_or(true, str::is_empty) {
        collected.body = Some(text_of(part)?);
    }

    for subpart in &part.subparts {
        process_part(subpart, collected)?;
    }
    Ok(())
}

fn text_of(part: &ParsedMail) -> Result<String> {
    part.get_body()
        .map_err(|e| RelayError::Decomposition(format!("text part: {}", e)))
}

pub fn decompose(raw: &[u8]) -> Result<DecomposedMessage> {
    let mail = parse_mail(raw).map_err(|e| RelayError::Decomposition(e.to_string()))?;

    let headers = OriginalHeaders {
        from: parse_party(&mail, "From"),
        to: parse_party(&mail, "To"),
        subject: mail.headers.get_first_value("Subject").unwrap_or_default(),
    };

    let mut collected = Collected { body: None, attachments: Vec::new() };
    if mail.subparts.is_empty() {
        collected.body = Some(text_of(&mail)?);
    } else {
        for part in &mail.subparts {
            process_part(part, &mut collected)?;
        }
    }

    let content = collected
        .body
        .filter(|body| !body.trim().is_empty())
        .ok_or_else(|| RelayError::Decomposition(format!("no body in {:?}", headers.subject)))?;

    Ok(DecomposedMessage {
        headers,
        body: classify_body(content),
        attachments: collected.attachments,
    })
}
