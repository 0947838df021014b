//! Intel HEX record decoding.
//!
//! ## Record Format
//!
//! ```text
//! +-------+-------+---------+------+-----------------+----------+
//! | Start | Count | Address | Type |      Data       | Checksum |
//! +-------+-------+---------+------+-----------------+----------+
//! |  ':'  | 2 hex |  4 hex  | 2 hex|  2 * Count hex  |  2 hex   |
//! +-------+-------+---------+------+-----------------+----------+
//! ```
//!
//! All multi-byte fields are big-endian. The checksum is the two's complement
//! of the low byte of the sum of every other byte, so summing the whole record
//! including the checksum yields zero.

use crate::error::HexError;

/// Start code of every record.
pub const START_CODE: u8 = b':';

/// Characters in a record without data: start(1) + count(2) + address(4) + type(2) + checksum(2).
pub const LINE_SIZE_WITHOUT_DATA: usize = 11;

/// Largest payload a single record can carry.
pub const MAX_DATA_SIZE: usize = 0xFF;

/// Longest valid line.
pub const MAX_LINE_SIZE: usize = LINE_SIZE_WITHOUT_DATA + 2 * MAX_DATA_SIZE;

const COUNT_OFFSET: usize = 1;
const ADDRESS_OFFSET: usize = COUNT_OFFSET + 2;
const TYPE_OFFSET: usize = ADDRESS_OFFSET + 4;
const DATA_OFFSET: usize = TYPE_OFFSET + 2;

/// Intel HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum RecordType {
    /// Payload bytes at `offset + address`.
    Data = 0x00,
    /// Last record of the image.
    EndOfFile = 0x01,
    /// Sets the offset to `value * 16`.
    ExtendedSegmentAddress = 0x02,
    /// 80x86 CS:IP entry point.
    StartSegmentAddress = 0x03,
    /// Sets the offset to `value << 16`.
    ExtendedLinearAddress = 0x04,
    /// 32-bit entry point.
    StartLinearAddress = 0x05,
}

impl TryFrom<u8> for RecordType {
    type Error = HexError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Data),
            0x01 => Ok(Self::EndOfFile),
            0x02 => Ok(Self::ExtendedSegmentAddress),
            0x03 => Ok(Self::StartSegmentAddress),
            0x04 => Ok(Self::ExtendedLinearAddress),
            0x05 => Ok(Self::StartLinearAddress),
            other => Err(HexError::UnknownRecordType(other)),
        }
    }
}

/// A decoded and checksum-verified Intel HEX record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Record type.
    pub record_type: RecordType,
    /// 16-bit address field.
    pub address: u16,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Checksum byte as stored in the line.
    pub checksum: u8,
}

impl HexRecord {
    /// Decode one line such as `:0400100001020304E2`.
    ///
    /// The line must not carry a line terminator. Structure is validated before
    /// the data section is touched, so a short line never causes an out of
    /// bounds read.
    pub fn parse(line: &str) -> Result<Self, HexError> {
        let bytes = line.as_bytes();
        let len = bytes.len();

        if len < LINE_SIZE_WITHOUT_DATA {
            return Err(HexError::MalformedLine("line is shorter than a record"));
        }
        if len > MAX_LINE_SIZE {
            return Err(HexError::MalformedLine("line is longer than a record"));
        }
        if bytes[0] != START_CODE {
            return Err(HexError::MalformedLine("missing ':' start code"));
        }

        let count = hex_byte(bytes, COUNT_OFFSET)?;
        let address_high = hex_byte(bytes, ADDRESS_OFFSET)?;
        let address_low = hex_byte(bytes, ADDRESS_OFFSET + 2)?;
        let type_code = hex_byte(bytes, TYPE_OFFSET)?;
        let checksum = hex_byte(bytes, len - 2)?;

        let expected = LINE_SIZE_WITHOUT_DATA + 2 * usize::from(count);
        if len != expected {
            return Err(HexError::LengthMismatch {
                declared: count,
                expected,
                actual: len,
            });
        }

        let mut sum = count
            .wrapping_add(address_high)
            .wrapping_add(address_low)
            .wrapping_add(type_code)
            .wrapping_add(checksum);

        let mut data = Vec::with_capacity(usize::from(count));
        for i in 0..usize::from(count) {
            let b = hex_byte(bytes, DATA_OFFSET + 2 * i)?;
            sum = sum.wrapping_add(b);
            data.push(b);
        }

        if sum != 0 {
            return Err(HexError::ChecksumMismatch {
                declared: checksum,
                sum,
            });
        }

        Ok(Self {
            record_type: RecordType::try_from(type_code)?,
            address: u16::from_be_bytes([address_high, address_low]),
            data,
            checksum,
        })
    }

    /// Big-endian 16-bit value carried by address records.
    ///
    /// Returns `None` if the payload is shorter than two bytes.
    pub fn address_value(&self) -> Option<u16> {
        match self.data.as_slice() {
            [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
            _ => None,
        }
    }
}

/// Decode the hex pair starting at `offset`.
fn hex_byte(bytes: &[u8], offset: usize) -> Result<u8, HexError> {
    let high = hex_nibble(bytes[offset])?;
    let low = hex_nibble(bytes[offset + 1])?;
    Ok(high << 4 | low)
}

fn hex_nibble(c: u8) -> Result<u8, HexError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(HexError::MalformedLine("invalid hexadecimal digit")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a well-formed line with a correct checksum.
    pub(crate) fn encode(record_type: u8, address: u16, data: &[u8]) -> String {
        let [high, low] = address.to_be_bytes();
        #[allow(clippy::cast_possible_truncation)]
        let count = data.len() as u8;
        let mut sum = count
            .wrapping_add(high)
            .wrapping_add(low)
            .wrapping_add(record_type);
        let mut line = format!(":{count:02X}{address:04X}{record_type:02X}");
        for b in data {
            sum = sum.wrapping_add(*b);
            line.push_str(&format!("{b:02X}"));
        }
        line.push_str(&format!("{:02X}", sum.wrapping_neg()));
        line
    }

    #[test]
    fn test_parse_data_record() {
        let record = HexRecord::parse(":0B0010006164647265737320676170A7").unwrap();
        assert_eq!(record.record_type, RecordType::Data);
        assert_eq!(record.address, 0x0010);
        assert_eq!(record.data, b"address gap");
        assert_eq!(record.checksum, 0xA7);
    }

    #[test]
    fn test_parse_end_of_file() {
        let record = HexRecord::parse(":00000001FF").unwrap();
        assert_eq!(record.record_type, RecordType::EndOfFile);
        assert!(record.data.is_empty());
    }

    #[test]
    fn test_parse_lowercase_digits() {
        let line = encode(0x00, 0xBEEF, &[0xab, 0xcd]).to_lowercase();
        let record = HexRecord::parse(&line).unwrap();
        assert_eq!(record.address, 0xBEEF);
        assert_eq!(record.data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_extended_linear_address_value() {
        let record = HexRecord::parse(":020000040010EA").unwrap();
        assert_eq!(record.record_type, RecordType::ExtendedLinearAddress);
        assert_eq!(record.address_value(), Some(0x0010));
    }

    #[test]
    fn test_address_value_needs_two_bytes() {
        let record = HexRecord::parse(&encode(0x04, 0, &[0x01])).unwrap();
        assert_eq!(record.address_value(), None);
    }

    #[test]
    fn test_rejects_short_line() {
        assert_eq!(
            HexRecord::parse(":0000000"),
            Err(HexError::MalformedLine("line is shorter than a record"))
        );
    }

    #[test]
    fn test_rejects_long_line() {
        let line = format!(":{}", "0".repeat(MAX_LINE_SIZE));
        assert!(matches!(
            HexRecord::parse(&line),
            Err(HexError::MalformedLine(_))
        ));
    }

    #[test]
    fn test_rejects_missing_start_code() {
        assert_eq!(
            HexRecord::parse("000000001FF"),
            Err(HexError::MalformedLine("missing ':' start code"))
        );
    }

    #[test]
    fn test_rejects_non_hex_characters() {
        assert!(matches!(
            HexRecord::parse(":0000000GFF"),
            Err(HexError::MalformedLine(_))
        ));
    }

    #[test]
    fn test_rejects_multibyte_utf8_without_panicking() {
        assert!(HexRecord::parse(":00000001\u{00e9}F").is_err());
    }

    #[test]
    fn test_length_mismatch_detected_before_data_is_read() {
        // Count says 16 bytes but only two are present.
        let line = ":10000000AABB45";
        assert_eq!(
            HexRecord::parse(line),
            Err(HexError::LengthMismatch {
                declared: 0x10,
                expected: 43,
                actual: line.len(),
            })
        );
    }

    #[test]
    fn test_length_mismatch_for_every_truncation() {
        let line = encode(0x00, 0x0100, &[0x11, 0x22, 0x33, 0x44, 0x55]);
        for cut in LINE_SIZE_WITHOUT_DATA..line.len() {
            // Keep the trailing checksum characters in place, drop data characters.
            let truncated = format!("{}{}", &line[..cut - 2], &line[line.len() - 2..]);
            if truncated.len() == line.len() {
                continue;
            }
            assert!(
                matches!(
                    HexRecord::parse(&truncated),
                    Err(HexError::LengthMismatch { .. })
                ),
                "{truncated}"
            );
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        assert_eq!(
            HexRecord::parse(":0B0010006164647265737320676170A8"),
            Err(HexError::ChecksumMismatch {
                declared: 0xA8,
                sum: 0x01,
            })
        );
    }

    #[test]
    fn test_single_bit_flips_in_address_and_data_fail_checksum() {
        let data = [0x00, 0x7F, 0x80, 0xFF];
        let address = 0x1234u16;
        let good = encode(0x00, address, &data);
        let checksum = &good[good.len() - 2..];

        for bit in 0..16 {
            let flipped = address ^ (1 << bit);
            let mut line = encode(0x00, flipped, &data);
            line.replace_range(line.len() - 2.., checksum);
            assert!(matches!(
                HexRecord::parse(&line),
                Err(HexError::ChecksumMismatch { .. })
            ));
        }

        for index in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[index] ^= 1 << bit;
                let mut line = encode(0x00, address, &corrupted);
                line.replace_range(line.len() - 2.., checksum);
                assert!(matches!(
                    HexRecord::parse(&line),
                    Err(HexError::ChecksumMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn test_unknown_record_type_after_valid_checksum() {
        let line = encode(0x06, 0x0000, &[]);
        assert_eq!(
            HexRecord::parse(&line),
            Err(HexError::UnknownRecordType(0x06))
        );
    }

    #[test]
    fn test_max_size_record() {
        let data = vec![0x5A; MAX_DATA_SIZE];
        let line = encode(0x00, 0xFF00, &data);
        assert_eq!(line.len(), MAX_LINE_SIZE);
        let record = HexRecord::parse(&line).unwrap();
        assert_eq!(record.data.len(), MAX_DATA_SIZE);
    }

    #[test]
    fn test_record_type_codes() {
        assert_eq!(RecordType::try_from(0x04), Ok(RecordType::ExtendedLinearAddress));
        assert_eq!(RecordType::StartLinearAddress as u8, 0x05);
        assert_eq!(
            RecordType::try_from(0xFF),
            Err(HexError::UnknownRecordType(0xFF))
        );
    }
}
