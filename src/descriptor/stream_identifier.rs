//! Stream identifier descriptor, labelling an elementary stream with a broadcast `component_tag`

use super::DescriptorError;
use std::fmt;

/// Labels an elementary stream with a `component_tag`.
///
/// In ISDB broadcasts, private data streams with a `component_tag` in the range
/// [`CAPTION_COMPONENT_TAGS`](#associatedconstant.CAPTION_COMPONENT_TAGS) carry captions.
pub struct StreamIdentifierDescriptor<'buf> {
    buf: &'buf [u8],
}
impl<'buf> StreamIdentifierDescriptor<'buf> {
    pub const TAG: u8 = 0x52;
    pub const CAPTION_COMPONENT_TAGS: std::ops::RangeInclusive<u8> = 0x30..=0x37;

    pub fn new(
        _tag: u8,
        buf: &'buf [u8],
    ) -> Result<StreamIdentifierDescriptor<'buf>, DescriptorError> {
        if buf.is_empty() {
            Err(DescriptorError::NotEnoughData {
                tag: Self::TAG,
                actual: 0,
                expected: 1,
            })
        } else {
            Ok(StreamIdentifierDescriptor { buf })
        }
    }

    pub fn component_tag(&self) -> u8 {
        self.buf[0]
    }

    pub fn is_caption(&self) -> bool {
        Self::CAPTION_COMPONENT_TAGS.contains(&self.component_tag())
    }
}
impl<'buf> fmt::Debug for StreamIdentifierDescriptor<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("StreamIdentifierDescriptor")
            .field("component_tag", &self.component_tag())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::super::{CoreDescriptors, Descriptor};
    use super::*;
    use assert_matches::assert_matches;
    use hex_literal::*;

    #[test]
    fn caption_range() {
        for (tag, caption) in [(0x2f, false), (0x30, true), (0x37, true), (0x38, false)] {
            let data = [0x52, 0x01, tag];
            assert_matches!(CoreDescriptors::from_bytes(&data), Ok(CoreDescriptors::StreamIdentifier(d)) => {
                assert_eq!(d.component_tag(), tag);
                assert_eq!(d.is_caption(), caption);
            });
        }
    }

    #[test]
    fn empty() {
        let data = hex!("52 00");
        assert_matches!(
            CoreDescriptors::from_bytes(&data),
            Err(DescriptorError::NotEnoughData { tag: 0x52, .. })
        );
    }
}
