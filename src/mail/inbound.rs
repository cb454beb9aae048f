//! Turning fetched RFC 822 bytes into [`Email`] values.
//!
//! The body is the first `text/plain` part found walking the MIME tree
//! depth-first. Any part that carries a `Content-Disposition` header is
//! saved to disk and recorded as an attachment instead.

use std::path::{Path, PathBuf};

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, warn};
use uuid::Uuid;

use super::email::{Attachment, Email, base_name};

/// Parse one raw message. Returns `None` if the bytes are not a message.
///
/// Attachments are written under `attachment_dir/<uuid>/`.
pub fn parse_message(raw: &[u8], attachment_dir: &Path) -> Option<Email> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = extract_addresses(parsed.from()).into_iter().next();
    let receivers = extract_addresses(parsed.to());
    let subject = parsed.subject().unwrap_or_default().to_string();

    let mut body: Option<String> = None;
    let mut saved: Vec<Attachment> = Vec::new();
    let mut target_dir: Option<PathBuf> = None;

    for part in &parsed.parts {
        if part.content_disposition().is_some() {
            let dir = target_dir.get_or_insert_with(|| attachment_dir.join(Uuid::new_v4().to_string()));
            match save_part(part, dir, saved.len()) {
                Ok(attachment) => saved.push(attachment),
                Err(e) => warn!(dir = %dir.display(), "Failed to save attachment: {e}"),
            }
            continue;
        }

        if body.is_none()
            && let PartType::Text(text) = &part.body
            && is_plain(part)
        {
            body = Some(text.to_string());
        }
    }

    debug!(
        subject = %subject,
        attachments = saved.len(),
        "Parsed inbound message"
    );

    let mut email = Email::new(sender, receivers, subject, body.unwrap_or_default());
    email.attachments = saved;
    Some(email)
}

fn is_plain(part: &MessagePart) -> bool {
    part.content_type().is_none_or(|ct| {
        ct.ctype().eq_ignore_ascii_case("text")
            && ct.subtype().is_none_or(|s| s.eq_ignore_ascii_case("plain"))
    })
}

fn save_part(part: &MessagePart, dir: &Path, index: usize) -> std::io::Result<Attachment> {
    std::fs::create_dir_all(dir)?;

    let name = part
        .attachment_name()
        .map(base_name)
        .unwrap_or_else(|| format!("attachment-{}", index + 1));

    let mut path = dir.join(&name);
    if path.exists() {
        path = dir.join(format!("{}-{name}", index + 1));
    }
    std::fs::write(&path, part.contents())?;

    Ok(Attachment { name, path })
}

/// Extract email addresses from an optional mail_parser Address field.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}
