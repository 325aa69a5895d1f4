//! The positional update payload and its binary codec.

use crate::error::ProtocolError;

/// Number of bytes in an encoded payload (three big-endian f64 values).
pub const PAYLOAD_LEN: usize = 24;

/// A single positional update. Plain value, copied freely.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdatePayload {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Timestamp, in whatever unit the application uses.
    pub t: f64,
}

impl UpdatePayload {
    pub fn new(x: f64, y: f64, t: f64) -> Self {
        Self { x, y, t }
    }

    /// Append the 24-byte big-endian encoding of this payload to `out`.
    pub fn write_be(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_be_bytes());
        out.extend_from_slice(&self.y.to_be_bytes());
        out.extend_from_slice(&self.t.to_be_bytes());
    }

    /// Decode a payload from the first 24 bytes of `input`.
    pub fn read_be(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < PAYLOAD_LEN {
            return Err(ProtocolError::Truncated {
                expected: PAYLOAD_LEN,
                got: input.len(),
            });
        }
        Ok(Self {
            x: read_f64(&input[0..8]),
            y: read_f64(&input[8..16]),
            t: read_f64(&input[16..24]),
        })
    }
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    f64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: UpdatePayload) -> UpdatePayload {
        let mut bytes = Vec::new();
        p.write_be(&mut bytes);
        assert_eq!(bytes.len(), PAYLOAD_LEN);
        UpdatePayload::read_be(&bytes).unwrap()
    }

    /// Bit-for-bit comparison; `==` on f64 would conflate -0.0 with 0.0 and
    /// reject NaN.
    fn assert_bits_eq(a: UpdatePayload, b: UpdatePayload) {
        assert_eq!(a.x.to_bits(), b.x.to_bits());
        assert_eq!(a.y.to_bits(), b.y.to_bits());
        assert_eq!(a.t.to_bits(), b.t.to_bits());
    }

    #[test]
    fn roundtrip_ordinary_values() {
        let p = UpdatePayload::new(1.5, -2.25, 100.0);
        assert_bits_eq(p, roundtrip(p));
    }

    #[test]
    fn roundtrip_zero_and_negative_zero() {
        let p = UpdatePayload::new(0.0, -0.0, 0.0);
        assert_bits_eq(p, roundtrip(p));
    }

    #[test]
    fn roundtrip_subnormal() {
        let p = UpdatePayload::new(f64::MIN_POSITIVE / 2.0, -f64::MIN_POSITIVE / 4.0, 5e-324);
        assert_bits_eq(p, roundtrip(p));
    }

    #[test]
    fn roundtrip_nan_and_infinities() {
        let p = UpdatePayload::new(f64::NAN, f64::INFINITY, f64::NEG_INFINITY);
        assert_bits_eq(p, roundtrip(p));
    }

    #[test]
    fn encoding_is_big_endian() {
        let p = UpdatePayload::new(1.0, 0.0, 0.0);
        let mut bytes = Vec::new();
        p.write_be(&mut bytes);
        // 1.0 in IEEE-754 big-endian is 3F F0 00 00 00 00 00 00.
        assert_eq!(&bytes[0..8], &[0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let err = UpdatePayload::read_be(&[0u8; 23]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                expected: PAYLOAD_LEN,
                got: 23
            }
        ));
    }
}
