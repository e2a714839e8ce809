const COMMANDS: [&[u8]; 6] = [b"EHLO ", b"HELO ", b"MAIL ", b"RCPT ", b"DATA", b"QUIT"];

/// Classify SMTP: a 3-digit-status-then-space response, or one of the
/// exact command prefixes.
pub fn dissect(payload: &[u8]) -> bool {
    if payload.len() >= 4
        && payload[..3].iter().all(u8::is_ascii_digit)
        && payload[3] == b' '
    {
        return true;
    }
    COMMANDS.iter().any(|cmd| payload.starts_with(cmd))
}
