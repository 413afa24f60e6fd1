//! MPEG-2 video (ISO/IEC 13818-2) start code scanning.
//!
//! A decoder can only start from a picture preceded by a sequence header, so an access unit
//! containing one is treated as a random access point.

/// `sequence_header_code` is `00 00 01 B3`
pub const SEQUENCE_HEADER_CODE: u8 = 0xb3;
/// `picture_start_code` is `00 00 01 00`
pub const PICTURE_START_CODE: u8 = 0x00;
/// `group_start_code` is `00 00 01 B8`
pub const GROUP_START_CODE: u8 = 0xb8;

/// Iterates over the start code values (the byte following each `00 00 01` prefix), paired with
/// the position of the prefix.
pub fn start_codes(buf: &[u8]) -> impl Iterator<Item = (usize, u8)> + '_ {
    buf.windows(4)
        .enumerate()
        .filter(|(_, w)| w[0] == 0 && w[1] == 0 && w[2] == 1)
        .map(|(pos, w)| (pos, w[3]))
}

/// `true` if the data contains a sequence header before its first picture.
pub fn is_random_access(buf: &[u8]) -> bool {
    for (_, code) in start_codes(buf) {
        match code {
            SEQUENCE_HEADER_CODE => return true,
            PICTURE_START_CODE => return false,
            _ => (),
        }
    }
    false
}
