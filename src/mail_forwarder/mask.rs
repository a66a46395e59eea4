use tera::{Context, Tera};

use crate::error::Result;
use crate::mail_reader::message::{Body, OriginalHeaders};

const MASK_TEMPLATE: &str = include_str!("../../templates/mask.html");

/// Wrap `body` in the "Forwarded Email" banner and footer.
///
/// Header values are HTML-escaped; the body is embedded verbatim. The output
/// depends only on the arguments.
pub fn render_mask(headers: &OriginalHeaders, body: &Body) -> Result<String> {
    let mut ctx = Context::new();
    ctx.insert("from_name", &headers.from.name);
    ctx.insert("from_address", &headers.from.address);
    ctx.insert("to_name", &headers.to.name);
    ctx.insert("to_address", &headers.to.address);
    ctx.insert("subject", &headers.subject);
    ctx.insert("is_html", &body.is_html);
    ctx.insert("body", &body.content);

    Ok(Tera::one_off(MASK_TEMPLATE, &ctx, true)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail_reader::message::{classify_body, Party};

    fn headers() -> OriginalHeaders {
        OriginalHeaders {
            from: Party { name: "Alice".to_string(), address: "alice@example.com".to_string() },
            to: Party { name: "Bob".to_string(), address: "bob@example.com".to_string() },
            subject: "Quarterly numbers".to_string(),
        }
    }

    #[test]
    fn test_plain_body_is_wrapped_with_banner_and_footer() {
        let body = classify_body("line1\nline2".to_string());
        let html = render_mask(&headers(), &body).unwrap();

        let banner = html.find("Forwarded Email").unwrap();
        let content = html.find("line1<br>line2").unwrap();
        let footer = html.find("FORWARDED").unwrap();
        assert!(banner < content && content < footer);

        assert!(html.contains("This email is plain text, it may have display issues"));
        assert!(html.contains("it may contain something bad"));
        assert!(html.contains("You shouldn't reply directly to this email"));
    }

    #[test]
    fn test_html_body_is_embedded_unmodified() {
        let original = "<div class=\"x\">Hi &amp; bye</div>".to_string();
        let body = classify_body(original.clone());
        let html = render_mask(&headers(), &body).unwrap();

        assert!(html.contains(&original));
        assert!(!html.contains("This email is plain text"));
    }

    #[test]
    fn test_original_headers_are_shown() {
        let body = classify_body("hello".to_string());
        let html = render_mask(&headers(), &body).unwrap();

        assert!(html.contains("From: Alice &lt;"));
        assert!(html.contains(">alice@example.com</a>"));
        assert!(html.contains("To: Bob &lt;"));
        assert!(html.contains("Subject: Quarterly numbers"));
    }

    #[test]
    fn test_header_values_are_escaped() {
        let mut headers = headers();
        headers.subject = "<script>alert(1)</script>".to_string();
        let html = render_mask(&headers, &classify_body("hello".to_string())).unwrap();

        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let body = classify_body("same".to_string());
        assert_eq!(render_mask(&headers(), &body).unwrap(), render_mask(&headers(), &body).unwrap());
    }
}
