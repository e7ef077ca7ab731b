//! Wire protocol for the detector's text command link.
//!
//! Requests are ASCII lines of the form `read <name>` or `set <name> <value>`
//! terminated by CRLF. Replies are free text with no framing: a literal ACK
//! line for writes, and for reads either a hex numeral, a float optionally
//! prefixed by a `<` or `>` range sigil, or two whitespace-separated decimal
//! integers (delay/width register pairs). The parsers here accept numeric
//! prefixes and ignore trailing bytes, matching the firmware's loose reply
//! formatting.

use crate::error::{Result, UltraError};

/// Two-byte line terminator appended to every command.
pub const TERMINATOR: &str = "\r\n";

/// Reply to every successful `set` command.
pub const ACK: &str = "ACK\r\n";

/// Reply to an empty probe command; used to verify the link is live.
pub const NOT_RECOGNISED: &str = "!Command Not Recognised\r\n";

/// Upper bound on reply size. The firmware answers every request in one
/// short burst; a single read of this many bytes is the complete reply.
pub const MAX_REPLY: usize = 40;

/// Format a register read request.
pub fn format_read(name: &str) -> String {
    format!("read {name}")
}

/// Format a register write request from pre-rendered arguments.
pub fn format_set(args: &str) -> String {
    format!("set {args}")
}

/// Check the literal ACK reply of a `set` command.
pub fn expect_ack(command: &str, reply: &str) -> Result<()> {
    if reply == ACK {
        Ok(())
    } else {
        Err(UltraError::Protocol {
            command: command.to_string(),
            reply: reply.to_string(),
        })
    }
}

/// Parse a hexadecimal register value reply.
pub fn parse_u32_hex(command: &str, reply: &str) -> Result<u32> {
    let token = reply.trim_start();
    let token = token.strip_prefix("0x").unwrap_or(token);
    let digits: &str = leading(token, |c| c.is_ascii_hexdigit());
    u32::from_str_radix(digits, 16).map_err(|_| protocol_error(command, reply))
}

/// Parse a floating-point reading, skipping the `<`/`>` range sigil the
/// firmware prefixes to out-of-range analog values.
pub fn parse_f32(command: &str, reply: &str) -> Result<f32> {
    let mut token = reply.trim_start();
    if let Some(rest) = token.strip_prefix(['<', '>']) {
        token = rest;
    }
    let digits = leading(token, |c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+');
    digits
        .parse::<f32>()
        .map_err(|_| protocol_error(command, reply))
}

/// Parse a paired delay/width reply of two decimal integers.
pub fn parse_pair(command: &str, reply: &str) -> Result<(u32, u32)> {
    let mut parts = reply.split_whitespace();
    let first = parts
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| protocol_error(command, reply))?;
    let second = parts
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| protocol_error(command, reply))?;
    Ok((first, second))
}

fn leading(s: &str, pred: impl Fn(char) -> bool) -> &str {
    let end = s.find(|c| !pred(c)).unwrap_or(s.len());
    &s[..end]
}

fn protocol_error(command: &str, reply: &str) -> UltraError {
    UltraError::Protocol {
        command: command.to_string(),
        reply: reply.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_read_and_set() {
        assert_eq!(format_read("coldtemp"), "read coldtemp");
        assert_eq!(format_set("headvcc 3.3V"), "set headvcc 3.3V");
    }

    #[test]
    fn ack_accepted_anything_else_rejected() {
        assert!(expect_ack("set fpgapwr 3", "ACK\r\n").is_ok());
        assert!(expect_ack("set fpgapwr 3", "ACK").is_err());
        assert!(expect_ack("set fpgapwr 3", "!Command Not Recognised\r\n").is_err());
    }

    #[test]
    fn hex_reply_parses() {
        assert_eq!(parse_u32_hex("read fpgapwr", "1a2b").unwrap(), 0x1a2b);
        assert_eq!(parse_u32_hex("read fpgapwr", "1a2b\r\n").unwrap(), 0x1a2b);
        assert_eq!(parse_u32_hex("read eeprom 0x1ff", "0x2").unwrap(), 2);
        assert!(parse_u32_hex("read fpgapwr", "zz").is_err());
    }

    #[test]
    fn float_reply_with_sigil_parses() {
        assert_eq!(parse_f32("read coldtemp", "<3.14").unwrap(), 3.14);
        assert_eq!(parse_f32("read hottemp", ">-12.5\r\n").unwrap(), -12.5);
        assert_eq!(parse_f32("read tecsup", "5.02").unwrap(), 5.02);
        assert!(parse_f32("read tecsup", "ACK\r\n").is_err());
    }

    #[test]
    fn pair_reply_parses() {
        assert_eq!(parse_pair("read fpgaaux1", "10 20").unwrap(), (10, 20));
        assert_eq!(parse_pair("read fpgaaux1", "10 20\r\n").unwrap(), (10, 20));
        assert!(parse_pair("read fpgaaux1", "10").is_err());
        assert!(parse_pair("read fpgaaux1", "ten twenty").is_err());
    }
}
