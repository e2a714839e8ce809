const DNS_HEADER_LEN: usize = 12;
const MAX_QDCOUNT: u16 = 32;
const MAX_NAME_LEN: usize = 253;

/// Parsed DNS message header plus the first question, when present
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsData {
    pub transaction_id: u16,
    pub is_query: bool,
    pub response_code: u8,
    pub query_name: Option<String>,
    pub query_type: u16,
}

/// Classify a DNS message.
///
/// Besides the 12-byte minimum, the header must be plausible: a known
/// opcode, the reserved Z bit clear, and a sane question count. Without
/// that gate every TLS record and SMB negotiate would classify as DNS
/// just by being long enough.
pub fn dissect(payload: &[u8]) -> Option<DnsData> {
    if payload.len() < DNS_HEADER_LEN {
        return None;
    }

    let flags_hi = payload[2];
    let flags_lo = payload[3];
    let opcode = (flags_hi >> 3) & 0x0F;
    let z_bit = (flags_lo >> 6) & 0x01;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);

    if opcode > 5 || z_bit != 0 || qdcount == 0 || qdcount > MAX_QDCOUNT {
        return None;
    }

    let (query_name, query_type) = parse_first_question(&payload[DNS_HEADER_LEN..]);

    Some(DnsData {
        transaction_id: u16::from_be_bytes([payload[0], payload[1]]),
        is_query: flags_hi & 0x80 == 0,
        response_code: flags_lo & 0x0F,
        query_name,
        query_type,
    })
}

/// Walk the uncompressed label sequence of the first question.
/// Anything malformed just yields no name; classification stands.
fn parse_first_question(mut rest: &[u8]) -> (Option<String>, u16) {
    let mut name = String::new();
    loop {
        let (&len, tail) = match rest.split_first() {
            Some(split) => split,
            None => return (None, 0),
        };
        rest = tail;
        if len == 0 {
            break;
        }
        // Compression pointers never appear in a question name.
        if len & 0xC0 != 0 || usize::from(len) > rest.len() {
            return (None, 0);
        }
        if !name.is_empty() {
            name.push('.');
        }
        match std::str::from_utf8(&rest[..usize::from(len)]) {
            Ok(label) => name.push_str(label),
            Err(_) => return (None, 0),
        }
        rest = &rest[usize::from(len)..];
        if name.len() > MAX_NAME_LEN {
            return (None, 0);
        }
    }

    if rest.len() < 2 {
        return (if name.is_empty() { None } else { Some(name) }, 0);
    }
    let qtype = u16::from_be_bytes([rest[0], rest[1]]);
    (if name.is_empty() { None } else { Some(name) }, qtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_HEADER: [u8; 12] =
        [0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

    #[test]
    fn minimal_query_parses() {
        let data = dissect(&QUERY_HEADER).unwrap();
        assert_eq!(data.transaction_id, 0x1234);
        assert!(data.is_query);
        assert_eq!(data.response_code, 0);
        assert!(data.query_name.is_none());
    }

    #[test]
    fn response_flag_and_rcode() {
        let mut payload = QUERY_HEADER;
        payload[2] = 0x81; // QR set
        payload[3] = 0x03; // NXDOMAIN
        let data = dissect(&payload).unwrap();
        assert!(!data.is_query);
        assert_eq!(data.response_code, 3);
    }

    #[test]
    fn question_name_parses() {
        let mut payload = QUERY_HEADER.to_vec();
        payload.extend_from_slice(&[7]);
        payload.extend_from_slice(b"example");
        payload.extend_from_slice(&[3]);
        payload.extend_from_slice(b"com");
        payload.push(0);
        payload.extend_from_slice(&[0x00, 0x01]); // A
        payload.extend_from_slice(&[0x00, 0x01]); // IN

        let data = dissect(&payload).unwrap();
        assert_eq!(data.query_name.as_deref(), Some("example.com"));
        assert_eq!(data.query_type, 1);
    }

    #[test]
    fn short_payload_declines() {
        assert!(dissect(&QUERY_HEADER[..11]).is_none());
    }

    #[test]
    fn tls_record_does_not_look_like_dns() {
        // A realistic ClientHello record: the implausible question count
        // keeps it out of the DNS arm of the cascade.
        let mut hello = vec![0x16, 0x03, 0x03, 0x00, 0x30, 0x01, 0x00, 0x00, 0x2C, 0x03, 0x03];
        hello.extend_from_slice(&[0u8; 48]);
        assert!(dissect(&hello).is_none());
    }

    #[test]
    fn implausible_header_declines() {
        let mut payload = QUERY_HEADER;
        payload[4] = 0xFF; // qdcount way out of range
        payload[5] = 0xFF;
        assert!(dissect(&payload).is_none());
    }
}
