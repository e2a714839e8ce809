/// Parsed HTTP request line or response status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpData {
    pub is_request: bool,
    pub method: String,
    pub uri: String,
    pub status_code: u16,
}

const METHODS: [&[u8]; 7] = [
    b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ",
];

/// Classify an HTTP request (method prefix, trailing space significant)
/// or response (`HTTP/` prefix).
pub fn dissect(payload: &[u8]) -> Option<HttpData> {
    for method in METHODS {
        if payload.starts_with(method) {
            let rest = &payload[method.len()..];
            let uri = rest
                .split(|&b| b == b' ' || b == b'\r' || b == b'\n')
                .next()
                .and_then(|s| std::str::from_utf8(s).ok())
                .unwrap_or_default();
            return Some(HttpData {
                is_request: true,
                // method includes the significant trailing space; strip it
                method: String::from_utf8_lossy(&method[..method.len() - 1]).into_owned(),
                uri: uri.to_string(),
                status_code: 0,
            });
        }
    }

    if payload.starts_with(b"HTTP/") {
        let status_code = payload
            .split(|&b| b == b' ')
            .nth(1)
            .filter(|s| s.len() == 3 && s.iter().all(u8::is_ascii_digit))
            .and_then(|s| std::str::from_utf8(s).ok())
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(0);
        return Some(HttpData { is_request: false, method: String::new(), uri: String::new(), status_code });
    }

    None
}
