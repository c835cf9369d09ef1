use std::fmt;

use crate::error::{ParseErrorKind, RtspError};

/// Control methods understood by the session state machine.
///
/// Anything else is carried through as [`Method::Other`] so the session
/// can answer it with a server error instead of the parser rejecting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Setup,
    Play,
    Pause,
    Teardown,
    Other(String),
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed control request.
///
/// ```text
/// METHOD SP target SP VERSION CRLF
/// *(Name: value CRLF)
/// CRLF
/// ```
///
/// The version token must be present but is otherwise ignored. Header
/// lookup is case-insensitive; lines without a colon are skipped.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    /// Request target, e.g. `rtsp://host:8554/clip.bin` or `clip.bin`.
    pub uri: String,
    pub version: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse one control message.
    ///
    /// Returns [`RtspError::Parse`] when the request line has fewer than
    /// three tokens; the caller answers that with a 500 carrying CSeq 0.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        };

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
                None => tracing::debug!(line, "skipping header line without colon"),
            }
        }

        Ok(RtspRequest {
            method: Method::from_token(method),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The request's `CSeq`, or 0 when the header is absent or not a number.
    pub fn cseq(&self) -> u32 {
        self.get_header("CSeq")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// The `Session` header with any `;timeout=` suffix removed.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/clip.bin RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/UDP;client_port=6000-6001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.uri, "rtsp://localhost:8554/clip.bin");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), 3);
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/UDP;client_port=6000-6001")
        );
    }

    #[test]
    fn missing_cseq_defaults_to_zero() {
        let req = RtspRequest::parse("PLAY clip.bin RTSP/1.0\r\n\r\n").unwrap();
        assert_eq!(req.cseq(), 0);
    }

    #[test]
    fn non_numeric_cseq_defaults_to_zero() {
        let req = RtspRequest::parse("PLAY clip.bin RTSP/1.0\r\nCSeq: abc\r\n\r\n").unwrap();
        assert_eq!(req.cseq(), 0);
    }

    #[test]
    fn unknown_method_is_preserved() {
        let req = RtspRequest::parse("DESCRIBE clip.bin RTSP/1.0\r\nCSeq: 2\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Other("DESCRIBE".to_string()));
        assert_eq!(req.method.to_string(), "DESCRIBE");
    }

    #[test]
    fn parse_empty_request() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest
            })
        ));
    }

    #[test]
    fn two_token_request_line_is_rejected() {
        assert!(matches!(
            RtspRequest::parse("PLAY clip.bin\r\nCSeq: 4\r\n\r\n"),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine
            })
        ));
    }

    #[test]
    fn headers_stop_at_blank_line() {
        let raw = "PLAY clip.bin RTSP/1.0\r\nCSeq: 5\r\n\r\nSession: late\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.get_header("Session"), None);
    }

    #[test]
    fn lines_without_colon_are_skipped() {
        let raw = "PAUSE clip.bin RTSP/1.0\nCSeq: 6\ngarbage\nSession: 00AB\n\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.cseq(), 6);
        assert_eq!(req.session_id(), Some("00AB"));
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let req = RtspRequest::parse("PLAY clip.bin RTSP/1.0\r\ncseq: 42\r\n\r\n").unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn session_id_strips_timeout() {
        let req =
            RtspRequest::parse("PLAY clip.bin RTSP/1.0\r\nSession: 0001;timeout=60\r\n\r\n")
                .unwrap();
        assert_eq!(req.session_id(), Some("0001"));
    }
}
