//! Delivery Status Notification rendering
//!
//! Builds an RFC 3464 `multipart/report` message with three parts:
//!
//! 1. `text/plain` notice for the human sender
//! 2. `message/delivery-status` machine-readable report
//! 3. `text/rfc822-headers` copy of the original message headers
//!
//! Lines end in CRLF. Values taken from the event are stripped of CR and LF
//! so a crafted subject or address cannot inject headers. Header fields are
//! folded at 78 columns where there is whitespace, and no line exceeds 998
//! octets. Non-ASCII subjects become RFC 2047 encoded words; addresses are
//! left as UTF-8 and every part is declared `8bit`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Event, Failure, Severity};

/// Display name used in the From header
const DAEMON_NAME: &str = "Mail Delivery System";

const CRLF: &str = "\r\n";

/// Preferred header line width
const FOLD_WIDTH: usize = 78;

/// Hard limit on line length, excluding CRLF
const MAX_LINE: usize = 998;

/// UTF-8 bytes per encoded word; keeps each word within 75 characters
const ENCODED_WORD_BYTES: usize = 45;

/// Errors rendering a bounce
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("event {0} is not a delivery failure")]
    NotAFailure(String),

    #[error("event {0} has no envelope sender to bounce to")]
    NoSender(String),
}

/// Renders DSN messages on behalf of `MAILER-DAEMON@<reporting_host>`
#[derive(Debug, Clone)]
pub struct DsnRenderer {
    reporting_host: String,
}

impl DsnRenderer {
    /// Create a renderer reporting as `reporting_host`
    pub fn new(reporting_host: impl Into<String>) -> Self {
        Self {
            reporting_host: sanitize(&reporting_host.into()),
        }
    }

    /// Host named in From, Message-ID and Reporting-MTA
    pub fn reporting_host(&self) -> &str {
        &self.reporting_host
    }

    /// Address bounces are sent from
    pub fn daemon_address(&self) -> String {
        format!("MAILER-DAEMON@{}", self.reporting_host)
    }

    /// Render the bounce for a `failed` event
    pub fn render(&self, event: &Event, now: DateTime<Utc>) -> Result<Vec<u8>, RenderError> {
        let failure = event
            .failure()
            .ok_or_else(|| RenderError::NotAFailure(event.id.clone()))?;

        let sender = sanitize(&failure.envelope.sender);
        if sender.is_empty() {
            return Err(RenderError::NoSender(event.id.clone()));
        }

        let token = format!("{}.{:016x}", now.timestamp(), fnv1a(event.id.as_bytes()));
        let boundary = format!("=_dsn_{}", token.replace('.', "_"));
        let delayed = failure.severity == Severity::Temporary;

        let mut out = String::new();
        let mut header = |name: &str, value: &str| {
            out.push_str(&fold(&format!("{}: {}", name, value), FOLD_WIDTH));
            out.push_str(CRLF);
        };

        header(
            "From",
            &format!("{} <{}>", DAEMON_NAME, self.daemon_address()),
        );
        header("To", &sender);
        header(
            "Subject",
            if delayed {
                "Delivery Status Notification (Delay)"
            } else {
                "Delivery Status Notification (Failure)"
            },
        );
        header("Date", &now.to_rfc2822());
        header(
            "Message-ID",
            &format!("<dsn.{}@{}>", token, self.reporting_host),
        );
        let original_id = message_id(failure);
        if !original_id.is_empty() {
            header("In-Reply-To", &original_id);
            header("References", &original_id);
        }
        header("Auto-Submitted", "auto-replied");
        header("MIME-Version", "1.0");
        header("Content-Transfer-Encoding", "8bit");
        out.push_str(&format!(
            "Content-Type: multipart/report; report-type=delivery-status;{}\tboundary=\"{}\"{}",
            CRLF, boundary, CRLF
        ));
        out.push_str(CRLF);
        out.push_str("This is a MIME-encapsulated message.");
        out.push_str(CRLF);
        out.push_str(CRLF);

        self.push_part(
            &mut out,
            &boundary,
            "text/plain; charset=utf-8",
            "Notification",
            &self.notice(failure, delayed),
        );
        self.push_part(
            &mut out,
            &boundary,
            "message/delivery-status",
            "Delivery report",
            &self.status_report(event, failure, delayed),
        );
        self.push_part(
            &mut out,
            &boundary,
            "text/rfc822-headers; charset=utf-8",
            "Undelivered message headers",
            &original_headers(failure),
        );

        out.push_str(&format!("--{}--{}", boundary, CRLF));
        Ok(out.into_bytes())
    }

    fn push_part(
        &self,
        out: &mut String,
        boundary: &str,
        content_type: &str,
        description: &str,
        body: &[String],
    ) {
        out.push_str(&format!("--{}{}", boundary, CRLF));
        out.push_str(&format!("Content-Type: {}{}", content_type, CRLF));
        out.push_str(&format!("Content-Description: {}{}", description, CRLF));
        out.push_str(&format!("Content-Transfer-Encoding: 8bit{}", CRLF));
        out.push_str(CRLF);
        for line in body {
            out.push_str(line);
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
    }

    fn notice(&self, failure: &Failure, delayed: bool) -> Vec<String> {
        let mut lines = vec![
            "Hi!".to_string(),
            String::new(),
            format!(
                "This is the mail system at host {}, please DO NOT REPLY to this email.",
                self.reporting_host
            ),
            String::new(),
        ];
        if delayed {
            lines.push("Delivery of your message to the following recipient".to_string());
            lines.push("has been delayed. Delivery will be retried:".to_string());
        } else {
            lines.push("An error has occurred while attempting to deliver a message".to_string());
            lines.push("to the following recipient:".to_string());
        }
        lines.push(String::new());
        lines.push(format!(
            "    {}: {}",
            sanitize(&failure.recipient),
            diagnostic(failure)
        ));
        lines.push(String::new());
        lines.push("The headers of the original message are attached.".to_string());
        lines.iter().map(|line| fold(line, MAX_LINE)).collect()
    }

    fn status_report(&self, event: &Event, failure: &Failure, delayed: bool) -> Vec<String> {
        let mut lines = vec![format!("Reporting-MTA: dns; {}", self.reporting_host)];
        if let Some(arrival) = event.datetime() {
            lines.push(format!("Arrival-Date: {}", arrival.to_rfc2822()));
        }
        lines.push(String::new());
        lines.push(format!(
            "Final-Recipient: rfc822; {}",
            sanitize(&failure.recipient)
        ));
        lines.push(format!(
            "Action: {}",
            if delayed { "delayed" } else { "failed" }
        ));
        lines.push(format!("Status: {}", status(failure, delayed)));

        let diagnostic = diagnostic(failure);
        if !diagnostic.is_empty() {
            lines.push(format!("Diagnostic-Code: smtp; {}", diagnostic));
        }
        lines.iter().map(|line| fold(line, FOLD_WIDTH)).collect()
    }
}

/// Status field value: the SMTP code when known, else the enhanced code,
/// else a generic class code
fn status(failure: &Failure, delayed: bool) -> String {
    let status = &failure.delivery_status;
    match status.code {
        Some(code) => code.to_string(),
        None if !status.enhanced_code.is_empty() => sanitize(&status.enhanced_code),
        None if delayed => "4.0.0".to_string(),
        None => "5.0.0".to_string(),
    }
}

/// "<code> <message>" as reported by the receiving MTA
fn diagnostic(failure: &Failure) -> String {
    let status = &failure.delivery_status;
    let message = if status.message.is_empty() {
        &status.description
    } else {
        &status.message
    };
    let text = match status.code {
        Some(code) => format!("{} {}", code, message),
        None => message.clone(),
    };
    sanitize(text.trim())
}

fn message_id(failure: &Failure) -> String {
    let id = sanitize(&failure.message.headers.message_id);
    if id.is_empty() || id.starts_with('<') {
        id
    } else {
        format!("<{}>", id)
    }
}

fn original_headers(failure: &Failure) -> Vec<String> {
    let headers = &failure.message.headers;
    let mut lines = Vec::new();
    for (name, value) in [
        ("Subject", encode_words(&sanitize(&headers.subject))),
        ("From", sanitize(&headers.from)),
        ("To", sanitize(&headers.to)),
        ("Message-ID", message_id(failure)),
    ] {
        if !value.is_empty() {
            lines.push(fold(&format!("{}: {}", name, value), FOLD_WIDTH));
        }
    }
    lines
}

/// RFC 2047 `B` encoding of `value`, unchanged if it is plain ASCII
fn encode_words(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let take = floor_char_boundary(rest, ENCODED_WORD_BYTES);
        let (chunk, tail) = rest.split_at(take);
        words.push(format!("=?utf-8?B?{}?=", STANDARD.encode(chunk)));
        rest = tail;
    }
    words.join(" ")
}

/// Fold `line` at spaces so physical lines stay within `width` where
/// possible, and split anything that would still exceed `MAX_LINE`
fn fold(line: &str, width: usize) -> String {
    if line.len() <= width {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + 16);
    let mut current = 0;
    for (i, word) in line.split(' ').enumerate() {
        if i > 0 {
            if current > 1 && current + 1 + word.len() > width {
                out.push_str(CRLF);
                current = 0;
            }
            out.push(' ');
            current += 1;
        }

        let mut rest = word;
        while current + rest.len() > MAX_LINE {
            let take = floor_char_boundary(rest, MAX_LINE - current);
            out.push_str(&rest[..take]);
            out.push_str(CRLF);
            out.push(' ');
            current = 1;
            rest = &rest[take..];
        }
        out.push_str(rest);
        current += rest.len();
    }
    out
}

/// Largest char boundary in `s` not after `max`
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    if i == 0 {
        // Never return an empty split while there is input left
        s.chars().next().map_or(0, char::len_utf8)
    } else {
        i
    }
}

/// Replace CR and LF so a value stays on one header line
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// 64-bit FNV-1a, used to keep boundaries and Message-IDs short
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
