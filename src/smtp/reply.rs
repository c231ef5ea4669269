use crate::smtp::errors::SmtpError;

/// Replies from this code up are rejections.
pub const FIRST_ERROR_CODE: u16 = 400;
pub const SERVICE_READY: u16 = 220;
const CODE_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Everything after the code token, line terminators removed.
    pub text: String,
}

impl Reply {
    /// Reads the leading reply code of a raw server response. The code must
    /// be exactly three digits.
    pub fn parse(raw: &[u8]) -> Result<Reply, SmtpError> {
        let line = String::from_utf8_lossy(raw);
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        if digits != CODE_LEN {
            return Err(SmtpError::Malformed(line.to_string()));
        }
        let code = line[..digits]
            .parse::<u16>()
            .map_err(|_| SmtpError::Malformed(line.to_string()))?;

        let rest = &line[digits..];
        let rest = rest.strip_prefix([' ', '-']).unwrap_or(rest);
        Ok(Reply {
            code,
            text: rest.trim_end_matches(['\r', '\n']).to_owned(),
        })
    }

    pub fn is_rejection(&self) -> bool {
        self.code >= FIRST_ERROR_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line() {
        let reply = Reply::parse(b"250 OK\r\n").unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.text, "OK");
        assert!(!reply.is_rejection());
    }

    #[test]
    fn parses_rejection() {
        let reply = Reply::parse(b"550 5.1.1 mailbox unavailable\r\n").unwrap();
        assert_eq!(reply.code, 550);
        assert_eq!(reply.text, "5.1.1 mailbox unavailable");
        assert!(reply.is_rejection());
    }

    #[test]
    fn parses_first_line_of_multiline_reply() {
        let reply = Reply::parse(b"250-smtp.example.com\r\n250 AUTH LOGIN\r\n").unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.text, "smtp.example.com\r\n250 AUTH LOGIN");
    }

    #[test]
    fn boundary_code_is_a_rejection() {
        assert!(Reply::parse(b"400 try later").unwrap().is_rejection());
        assert!(!Reply::parse(b"399 fine").unwrap().is_rejection());
    }

    #[test]
    fn missing_code_is_malformed() {
        assert!(matches!(
            Reply::parse(b"hello there\r\n"),
            Err(SmtpError::Malformed(_))
        ));
    }

    #[test]
    fn partial_or_overlong_code_is_malformed() {
        for raw in [&b"2"[..], b"25", b"50 OK\r\n", b"2500 OK\r\n"] {
            assert!(
                matches!(Reply::parse(raw), Err(SmtpError::Malformed(_))),
                "accepted {:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }
}
