//! Minimal HTTP request parsing: just enough to route a GET and echo the
//! client's protocol version back at it.

/// Longest method token accepted.
const MAX_METHOD_LEN: usize = 10;
/// Longest request path accepted.
const MAX_PATH_LEN: usize = 250;
/// Longest version token accepted ("1.1", "1.0", ...).
const MAX_VERSION_LEN: usize = 4;

/// HTTP protocol version echoed into the response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::V1_0 => "1.0",
            HttpVersion::V1_1 => "1.1",
        }
    }
}

/// Parsed first line of a request.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: HttpVersion,
}

/// Try to parse the request line out of the accumulated bytes.
///
/// Returns `None` both when the first line has not fully arrived yet and when
/// it arrived malformed; the caller keeps accumulating either way and the
/// connection dies by timeout or client hang-up rather than by protocol
/// pedantry.
pub fn parse_request_line(buf: &[u8]) -> Option<RequestLine> {
    let line_end = find(buf, b"\r\n")?;
    let line = &buf[..line_end];

    let method_end = line.iter().position(|b| *b == b' ')?;
    if method_end == 0 || method_end > MAX_METHOD_LEN {
        return None;
    }
    let method = &line[..method_end];
    if !method.iter().all(|b| b.is_ascii_graphic()) {
        return None;
    }

    let rest = &line[method_end + 1..];
    let path_end = rest.iter().position(|b| *b == b' ')?;
    if path_end == 0 || path_end > MAX_PATH_LEN {
        return None;
    }
    let path = &rest[..path_end];
    if !path.iter().all(|b| b.is_ascii_graphic()) {
        return None;
    }

    let proto = &rest[path_end + 1..];
    let version = proto.strip_prefix(b"HTTP/")?;
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return None;
    }

    Some(RequestLine {
        method: String::from_utf8_lossy(method).into_owned(),
        path: String::from_utf8_lossy(path).into_owned(),
        version: if version.starts_with(b"1.1") {
            HttpVersion::V1_1
        } else {
            HttpVersion::V1_0
        },
    })
}

/// Whether the header block terminator has arrived.
pub fn headers_complete(buf: &[u8]) -> bool {
    find(buf, b"\r\n\r\n").is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_get() {
        let line = parse_request_line(b"GET /video.mjpeg HTTP/1.1\r\nHost: x\r\n").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.path, "/video.mjpeg");
        assert_eq!(line.version, HttpVersion::V1_1);
    }

    #[test]
    fn echoes_http_1_0() {
        let line = parse_request_line(b"GET / HTTP/1.0\r\n").unwrap();
        assert_eq!(line.version, HttpVersion::V1_0);
    }

    #[test]
    fn unknown_versions_fall_back_to_1_0() {
        let line = parse_request_line(b"GET / HTTP/2\r\n").unwrap();
        assert_eq!(line.version, HttpVersion::V1_0);
    }

    #[test]
    fn incomplete_line_waits_for_more_data() {
        assert!(parse_request_line(b"GET /video.mj").is_none());
        assert!(parse_request_line(b"").is_none());
    }

    #[test]
    fn malformed_lines_are_rejected() {
        // no spaces at all
        assert!(parse_request_line(b"GETHTTP/1.1\r\n").is_none());
        // missing protocol prefix
        assert!(parse_request_line(b"GET / FTP/1.1\r\n").is_none());
        // empty path
        assert!(parse_request_line(b"GET  HTTP/1.1\r\n").is_none());
    }

    #[test]
    fn oversized_tokens_are_rejected() {
        let method = "M".repeat(MAX_METHOD_LEN + 1);
        let request = format!("{} / HTTP/1.1\r\n", method);
        assert!(parse_request_line(request.as_bytes()).is_none());

        let path = format!("/{}", "p".repeat(MAX_PATH_LEN));
        let request = format!("GET {} HTTP/1.1\r\n", path);
        assert!(parse_request_line(request.as_bytes()).is_none());

        let request = b"GET / HTTP/1.1.2\r\n";
        assert!(parse_request_line(request).is_none());
    }

    #[test]
    fn longest_allowed_tokens_pass() {
        let path = format!("/{}", "p".repeat(MAX_PATH_LEN - 1));
        let request = format!("GET {} HTTP/1.1\r\n", path);
        let line = parse_request_line(request.as_bytes()).unwrap();
        assert_eq!(line.path.len(), MAX_PATH_LEN);
    }

    #[test]
    fn header_terminator_detection() {
        assert!(!headers_complete(b"GET / HTTP/1.1\r\n"));
        assert!(!headers_complete(b"GET / HTTP/1.1\r\nHost: a\r\n"));
        assert!(headers_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(headers_complete(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n"));
    }
}
