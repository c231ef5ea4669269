use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;

const BASE64_LINE: usize = 76;

/// One MIME part: its own header block plus the bytes written verbatim after
/// it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailEntity {
    headers: BTreeMap<String, String>,
    content: Vec<u8>,
}

impl EmailEntity {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            content: content.into(),
        }
    }

    /// A base64-encoded file attachment.
    pub fn attachment(filename: &str, content_type: &str, data: &[u8]) -> Self {
        let encoded = STANDARD.encode(data);
        let mut content = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2);
        for (i, line) in encoded.as_bytes().chunks(BASE64_LINE).enumerate() {
            if i > 0 {
                content.extend_from_slice(b"\r\n");
            }
            content.extend_from_slice(line);
        }

        let mut entity = Self::new(content);
        entity.set_header(
            "Content-Type",
            format!("{}; name=\"{}\"", content_type, filename),
        );
        entity.set_header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        );
        entity.set_header("Content-Transfer-Encoding", "base64");
        entity
    }

    /// Replaces any previous value for `key`.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
    }
}
