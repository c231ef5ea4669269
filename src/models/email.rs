use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::models::EmailEntity;

/// An outbound message. Addresses may be bare (`user@host`) or carry a
/// display name (`User <user@host>`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Email {
    pub from: String,
    /// Secret sent for `AUTH LOGIN` along with the local part of `from`.
    pub credential: String,
    pub title: String,
    pub body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub attachments: Vec<EmailEntity>,
}

impl Email {
    pub fn new(from: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            credential: credential.into(),
            ..Self::default()
        }
    }

    pub fn subject(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn to(mut self, addr: impl Into<String>) -> Self {
        self.to.push(addr.into());
        self
    }

    pub fn cc(mut self, addr: impl Into<String>) -> Self {
        self.cc.push(addr.into());
        self
    }

    pub fn bcc(mut self, addr: impl Into<String>) -> Self {
        self.bcc.push(addr.into());
        self
    }

    pub fn attach(mut self, attachment: EmailEntity) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn from_address(&self) -> &str {
        bare_address(&self.from)
    }

    /// Every envelope recipient once, in to/cc/bcc order.
    pub fn recipients(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|addr| bare_address(addr))
            .filter(|addr| !addr.is_empty() && seen.insert(*addr))
            .collect()
    }
}

fn angle_addr() -> &'static Regex {
    static ANGLE_ADDR: OnceLock<Regex> = OnceLock::new();
    ANGLE_ADDR.get_or_init(|| Regex::new(r"<\s*([^<>\s]+)\s*>").expect("valid address regex"))
}

/// The `user@host` part of an address, without display name or brackets.
///
/// ```
/// # use courier::models::bare_address;
/// assert_eq!(bare_address("Ada <ada@example.com>"), "ada@example.com");
/// assert_eq!(bare_address(" ada@example.com "), "ada@example.com");
/// ```
pub fn bare_address(addr: &str) -> &str {
    match angle_addr().captures(addr).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => addr.trim(),
    }
}

/// Whatever precedes the `@`.
pub fn local_part(addr: &str) -> &str {
    let bare = bare_address(addr);
    bare.split('@').next().unwrap_or(bare)
}

/// Header form of an address: display names are kept, bare addresses get
/// angle brackets.
pub fn header_address(addr: &str) -> String {
    let trimmed = addr.trim();
    if angle_addr().is_match(trimmed) {
        trimmed.to_owned()
    } else {
        format!("<{}>", trimmed)
    }
}
