/// Classify SMB/CIFS: the SMB1 (0xFF) or SMB2/3 (0xFE) magic followed
/// by the literal "SMB".
pub fn dissect(payload: &[u8]) -> bool {
    payload.len() >= 4
        && (payload[0] == 0xFF || payload[0] == 0xFE)
        && &payload[1..4] == b"SMB"
}
