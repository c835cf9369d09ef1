/// A control response.
///
/// Serializes to the text wire format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Session: 0000000000000001\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then
/// call [`serialize`](Self::serialize).
#[must_use]
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

/// Protocol version written on every status line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Server identification string included in every response.
pub const SERVER_AGENT: &str = "clipcast/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
        }
    }

    /// 200 OK.
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found: the SETUP target is not in the media namespace.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 500 Internal Server Error: malformed request, unknown method,
    /// invalid transition or an internal failure.
    pub fn server_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Serialize to the text wire format.
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\r\n",
            RTSP_VERSION, self.status_code, self.status_text
        );
        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }
        response.push_str("\r\n");
        response
    }
}
