//! # Frame Checksum Validation
//!
//! Stateless check of the ASCII checksum field carried at the end of a frame.
//!
//! **Layout**: `body ++ field(width digits) ++ ending`
//! **Algorithm**: XOR-reduction over `body`, field parsed in the declared radix

use serde::Deserialize;
use std::ops::Range;

/// Checksum algorithm declared by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// Frames carry no checksum
    #[default]
    None,
    /// XOR of all body bytes
    Xor,
}

/// Radix the checksum field is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Radix {
    /// Hexadecimal digits (`5A`)
    #[default]
    Hex,
    /// Decimal digits (`090`)
    Decimal,
}

impl Radix {
    fn base(self) -> u32 {
        match self {
            Radix::Hex => 16,
            Radix::Decimal => 10,
        }
    }
}

/// Checksum declaration of a frame layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumSpec {
    /// Algorithm
    pub kind: ChecksumKind,
    /// Field radix
    pub radix: Radix,
    /// Field width in ASCII characters
    pub width: usize,
}

impl Default for ChecksumSpec {
    fn default() -> Self {
        Self::none()
    }
}

/// XOR-reduce a byte slice
///
/// # Examples
///
/// ```
/// use telemetry_gatherer::framing::checksum::xor_reduce;
///
/// assert_eq!(xor_reduce(&[0x01, 0x02, 0x04]), 0x07);
/// assert_eq!(xor_reduce(&[]), 0x00);
/// ```
pub fn xor_reduce(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

impl ChecksumSpec {
    /// Frames without a checksum
    pub const fn none() -> Self {
        Self {
            kind: ChecksumKind::None,
            radix: Radix::Hex,
            width: 0,
        }
    }

    /// XOR checksum written as `width` digits in `radix`
    pub const fn xor(radix: Radix, width: usize) -> Self {
        Self {
            kind: ChecksumKind::Xor,
            radix,
            width,
        }
    }

    /// Whether the layout carries a checksum field at all
    pub fn is_present(&self) -> bool {
        self.kind != ChecksumKind::None && self.width > 0
    }

    /// Byte range of the checksum field inside a frame of `frame_len` bytes
    /// whose last `trailer_len` bytes are the end delimiter
    pub fn field_range(&self, frame_len: usize, trailer_len: usize) -> Option<Range<usize>> {
        let end = frame_len.checked_sub(trailer_len)?;
        let start = end.checked_sub(self.width)?;
        Some(start..end)
    }

    /// Validate the trailing checksum field of `frame`
    ///
    /// # Arguments
    ///
    /// * `frame` - Complete frame including start and end delimiters
    /// * `trailer_len` - Length of the end delimiter
    ///
    /// # Returns
    ///
    /// * `bool` - true if the declared field matches the computed checksum;
    ///   always true for [`ChecksumKind::None`]
    pub fn is_valid(&self, frame: &[u8], trailer_len: usize) -> bool {
        if !self.is_present() {
            return true;
        }

        let Some(range) = self.field_range(frame.len(), trailer_len) else {
            return false;
        };

        let declared = match std::str::from_utf8(&frame[range.clone()]) {
            Ok(text) => match u32::from_str_radix(text.trim(), self.radix.base()) {
                Ok(value) => value,
                Err(_) => return false,
            },
            Err(_) => return false,
        };

        let computed = match self.kind {
            ChecksumKind::Xor => xor_reduce(&frame[..range.start]),
            ChecksumKind::None => return true,
        };

        declared == u32::from(computed)
    }

    /// Render the checksum field for `body` (used by simulators and fixtures)
    pub fn field_for(&self, body: &[u8]) -> Vec<u8> {
        if !self.is_present() {
            return Vec::new();
        }

        let value = xor_reduce(body);
        let width = self.width;
        let text = match self.radix {
            Radix::Hex => format!("{:0width$X}", value),
            Radix::Decimal => format!("{:0width$}", value),
        };
        text.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(spec: &ChecksumSpec, body: &[u8], ending: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&spec.field_for(body));
        frame.extend_from_slice(ending);
        frame
    }

    #[test]
    fn test_xor_reduce() {
        assert_eq!(xor_reduce(&[]), 0x00);
        assert_eq!(xor_reduce(&[0xFF]), 0xFF);
        assert_eq!(xor_reduce(&[0xAA, 0xAA]), 0x00);
        assert_eq!(xor_reduce(b"$1;1;"), b'$' ^ b'1' ^ b';' ^ b'1' ^ b';');
    }

    #[test]
    fn test_valid_hex_field() {
        let spec = ChecksumSpec::xor(Radix::Hex, 2);
        let frame = sealed(&spec, b"$1;3;1200;4123;", b"\r\n");
        assert!(spec.is_valid(&frame, 2));
    }

    #[test]
    fn test_valid_decimal_field() {
        let spec = ChecksumSpec::xor(Radix::Decimal, 3);
        let frame = sealed(&spec, b"$2;1;0;17;", b"\r\n");
        assert!(spec.is_valid(&frame, 2));
    }

    #[test]
    fn test_invalid_when_body_changes() {
        let spec = ChecksumSpec::xor(Radix::Hex, 2);
        let mut frame = sealed(&spec, b"$1;3;1200;4123;", b"\r\n");
        frame[5] ^= 0x01;
        assert!(!spec.is_valid(&frame, 2));
    }

    #[test]
    fn test_invalid_when_field_changes() {
        let spec = ChecksumSpec::xor(Radix::Hex, 2);
        let body = b"$1;3;1200;4123;";
        let mut frame = body.to_vec();
        frame.extend_from_slice(format!("{:02X}", xor_reduce(body) ^ 0x10).as_bytes());
        frame.extend_from_slice(b"\r\n");
        assert!(!spec.is_valid(&frame, 2));
    }

    #[test]
    fn test_matches_xor_across_fixtures() {
        let spec = ChecksumSpec::xor(Radix::Hex, 2);
        let bodies: [&[u8]; 4] = [b"$1;1;0;", b"$9;2;77;1;2;3;", b"#AB", b"$;;;;;;;"];

        for body in bodies {
            for declared in [0u8, 0x5A, xor_reduce(body), 0xFF] {
                let mut frame = body.to_vec();
                frame.extend_from_slice(format!("{:02X}", declared).as_bytes());
                frame.push(b'\n');
                assert_eq!(
                    spec.is_valid(&frame, 1),
                    declared == xor_reduce(body),
                    "body {:?} declared {:02X}",
                    body,
                    declared
                );
            }
        }
    }

    #[test]
    fn test_unparsable_field_is_invalid() {
        let spec = ChecksumSpec::xor(Radix::Decimal, 2);
        assert!(!spec.is_valid(b"$1;2;ZZ\r\n", 2));
    }

    #[test]
    fn test_frame_shorter_than_field_is_invalid() {
        let spec = ChecksumSpec::xor(Radix::Hex, 4);
        assert!(!spec.is_valid(b"A\n", 1));
    }

    #[test]
    fn test_none_always_valid() {
        let spec = ChecksumSpec::none();
        assert!(!spec.is_present());
        assert!(spec.is_valid(b"anything at all", 1));
        assert!(spec.field_for(b"body").is_empty());
    }

    #[test]
    fn test_field_range() {
        let spec = ChecksumSpec::xor(Radix::Hex, 2);
        assert_eq!(spec.field_range(10, 2), Some(6..8));
        assert_eq!(spec.field_range(3, 2), None);
    }
}
