//! Single-byte control codes exchanged outside frames.

/// Handshake request.
pub const ENQ: u8 = 0x05;

/// Positive acknowledgement.
pub const ACK: u8 = 0x06;

/// Negative acknowledgement: resend the last frame.
pub const NAK: u8 = 0x15;

/// Graceful end of session.
pub const EOT: u8 = 0x04;

/// Returns a human-readable name for a control byte.
pub fn control_name(byte: u8) -> &'static str {
    match byte {
        ENQ => "ENQ",
        ACK => "ACK",
        NAK => "NAK",
        EOT => "EOT",
        _ => "DATA",
    }
}
