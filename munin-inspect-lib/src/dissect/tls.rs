const TLS_RECORD_HEADER_LEN: usize = 5;
const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_APPLICATION: u8 = 0x17;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SNI: u16 = 0x0000;

/// Parsed TLS record header, plus SNI when a ClientHello carries one
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsData {
    pub version_major: u8,
    pub version_minor: u8,
    pub is_client_hello: bool,
    pub sni: Option<String>,
}

/// Classify a TLS record: known content type and a 3.1–3.4 record
/// version. SNI extraction is best-effort; a truncated hello still
/// classifies.
pub fn dissect(payload: &[u8]) -> Option<TlsData> {
    if payload.len() < TLS_RECORD_HEADER_LEN {
        return None;
    }

    let content_type = payload[0];
    if !matches!(content_type, CONTENT_ALERT | CONTENT_HANDSHAKE | CONTENT_APPLICATION) {
        return None;
    }
    if payload[1] != 0x03 || !(0x01..=0x04).contains(&payload[2]) {
        return None;
    }

    let is_client_hello = content_type == CONTENT_HANDSHAKE
        && payload.get(TLS_RECORD_HEADER_LEN) == Some(&HANDSHAKE_CLIENT_HELLO);

    let sni = if is_client_hello {
        extract_sni(&payload[TLS_RECORD_HEADER_LEN..])
    } else {
        None
    };

    Some(TlsData {
        version_major: payload[1],
        version_minor: payload[2],
        is_client_hello,
        sni,
    })
}

/// Walk a ClientHello to the server_name extension.
///
/// Layout: handshake header (4), client version (2), random (32),
/// session id, cipher suites, compression methods, then extensions.
fn extract_sni(hello: &[u8]) -> Option<String> {
    let mut pos = 4 + 2 + 32;

    let session_id_len = usize::from(*hello.get(pos)?);
    pos += 1 + session_id_len;

    let cipher_len =
        usize::from(u16::from_be_bytes([*hello.get(pos)?, *hello.get(pos + 1)?]));
    pos += 2 + cipher_len;

    let compression_len = usize::from(*hello.get(pos)?);
    pos += 1 + compression_len;

    let extensions_len =
        usize::from(u16::from_be_bytes([*hello.get(pos)?, *hello.get(pos + 1)?]));
    pos += 2;
    let mut ext = hello.get(pos..pos + extensions_len)?;

    while ext.len() >= 4 {
        let ext_type = u16::from_be_bytes([ext[0], ext[1]]);
        let ext_len = usize::from(u16::from_be_bytes([ext[2], ext[3]]));
        let body = ext.get(4..4 + ext_len)?;
        if ext_type == EXTENSION_SNI {
            // server_name_list length (2), entry type (1, 0 = hostname),
            // then the hostname length and bytes.
            if body.len() < 5 || body[2] != 0 {
                return None;
            }
            let name_len = usize::from(u16::from_be_bytes([body[3], body[4]]));
            let name = body.get(5..5 + name_len)?;
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
        ext = &ext[4 + ext_len..];
    }
    None
}
