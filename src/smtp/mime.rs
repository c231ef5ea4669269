//! Message composition for the DATA phase.

use chrono::Utc;
use rand::distributions::{Alphanumeric, DistString};

use crate::models::{header_address, Email};

const BOUNDARY_LEN: usize = 16;

/// A fresh random boundary token.
pub fn new_boundary() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), BOUNDARY_LEN)
}

/// Header block plus body. Without attachments the body follows the headers
/// as is; with attachments it becomes the first part of a `multipart/mixed`
/// message delimited by `boundary`.
pub fn compose(email: &Email, boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut header = |name: &str, value: &str| {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    };

    header("From", &header_address(&email.from));
    header("To", &join_addresses(&email.to));
    if !email.cc.is_empty() {
        header("Cc", &join_addresses(&email.cc));
    }
    header("Subject", &email.title);
    header("Date", &Utc::now().to_rfc2822());
    if !email.attachments.is_empty() {
        header(
            "Content-Type",
            &format!("multipart/mixed; boundary={}", boundary),
        );
    }
    header("MIME-Version", "1.0");
    out.extend_from_slice(b"\r\n");

    if email.attachments.is_empty() {
        out.extend_from_slice(email.body.as_bytes());
        return out;
    }

    let delimiter = format!("--{}\r\n", boundary);
    out.extend_from_slice(delimiter.as_bytes());
    out.extend_from_slice(b"Content-Type: text/html\r\n\r\n");
    out.extend_from_slice(email.body.as_bytes());
    out.extend_from_slice(b"\r\n");

    for attachment in &email.attachments {
        out.extend_from_slice(delimiter.as_bytes());
        for (key, value) in attachment.headers() {
            out.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(attachment.content());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

/// `message` made safe to send after `DATA`: lines starting with `.` get a
/// second one and the end-of-data marker is appended.
pub fn data_payload(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 8);
    let mut line_start = true;
    for &byte in message {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        line_start = byte == b'\n';
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

fn join_addresses(addrs: &[String]) -> String {
    addrs
        .iter()
        .map(|a| header_address(a))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailEntity;
    use mailparse::{parse_mail, MailHeaderMap};

    fn plain_email() -> Email {
        Email::new("me@example.com", "pw")
            .to("a@example.com")
            .to("Bee <b@example.com>")
            .subject("Weekly report")
            .body("<p>all good</p>")
    }

    fn count_lines(text: &str, line: &str) -> usize {
        text.split("\r\n").filter(|l| *l == line).count()
    }

    #[test]
    fn boundary_is_short_and_alphanumeric() {
        let boundary = new_boundary();
        assert_eq!(boundary.len(), BOUNDARY_LEN);
        assert!(boundary.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(boundary, new_boundary());
    }

    #[test]
    fn plain_message_has_no_multipart_markup() {
        let boundary = "XYZ123";
        let message = String::from_utf8(compose(&plain_email(), boundary)).unwrap();

        assert!(!message.contains(boundary));
        assert!(!message.contains("multipart/mixed"));
        assert!(!message.contains("Cc:"));
        assert!(message.contains("To: <a@example.com>,Bee <b@example.com>\r\n"));
        assert!(message.ends_with("MIME-Version: 1.0\r\n\r\n<p>all good</p>"));

        let parsed = parse_mail(message.as_bytes()).unwrap();
        assert_eq!(
            parsed.headers.get_first_value("Subject").as_deref(),
            Some("Weekly report")
        );
        assert!(parsed.subparts.is_empty());
    }

    #[test]
    fn attachments_become_parts() {
        let boundary = "XYZ123";
        let email = plain_email()
            .cc("c@example.com")
            .attach(EmailEntity::attachment("a.txt", "text/plain", b"first file"))
            .attach(EmailEntity::attachment("b.bin", "application/octet-stream", &[0, 1, 2, 255]));

        let raw = compose(&email, boundary);
        let message = String::from_utf8(raw.clone()).unwrap();

        assert_eq!(count_lines(&message, "--XYZ123"), 3);
        assert_eq!(count_lines(&message, "--XYZ123--"), 1);
        assert!(message.contains("Cc: <c@example.com>\r\n"));
        assert!(message.contains("Content-Type: multipart/mixed; boundary=XYZ123\r\n"));

        let parsed = parse_mail(&raw).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
        assert_eq!(parsed.subparts.len(), 3);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/html");
        assert_eq!(parsed.subparts[0].get_body().unwrap().trim(), "<p>all good</p>");
        assert_eq!(parsed.subparts[1].get_body_raw().unwrap(), b"first file");
        assert_eq!(parsed.subparts[2].get_body_raw().unwrap(), vec![0, 1, 2, 255]);
    }

    #[test]
    fn payload_is_dot_stuffed_and_terminated() {
        let payload = data_payload(b".hidden\r\nline\r\n.\r\nend");
        assert_eq!(payload, b"..hidden\r\nline\r\n..\r\nend\r\n.\r\n".to_vec());
    }

    #[test]
    fn payload_keeps_existing_line_end() {
        assert_eq!(data_payload(b"hi\r\n"), b"hi\r\n.\r\n".to_vec());
    }
}
