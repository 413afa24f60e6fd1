//! Just enough H.264 (ISO/IEC 14496-10) syntax to find key frames and to describe the stream
//! to a decoder: Annex B NAL unit iteration and _Sequence Parameter Set_ parsing.

use crate::bitreader::{BitReader, BitReaderError};
use std::fmt;

/// The `nal_unit_type` field from the first byte of a NAL unit.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnitType {
    SliceNonIdr,
    /// Slice of an _Instantaneous Decoder Refresh_ picture; decoding can start here
    SliceIdr,
    Sei,
    SeqParameterSet,
    PicParameterSet,
    AccessUnitDelimiter,
    Other(u8),
}
impl From<u8> for UnitType {
    fn from(header: u8) -> Self {
        match header & 0b0001_1111 {
            1 => UnitType::SliceNonIdr,
            5 => UnitType::SliceIdr,
            6 => UnitType::Sei,
            7 => UnitType::SeqParameterSet,
            8 => UnitType::PicParameterSet,
            9 => UnitType::AccessUnitDelimiter,
            v => UnitType::Other(v),
        }
    }
}

/// A NAL unit borrowed from an Annex B byte stream, without its start code.
#[derive(Clone, Copy)]
pub struct NalUnit<'buf> {
    buf: &'buf [u8],
}
impl<'buf> NalUnit<'buf> {
    pub fn unit_type(&self) -> UnitType {
        self.buf[0].into()
    }
    /// The NAL unit, starting with its one-byte header
    pub fn data(&self) -> &'buf [u8] {
        self.buf
    }
    /// The NAL unit payload with `emulation_prevention_three_byte`s removed
    pub fn rbsp(&self) -> Vec<u8> {
        decode_rbsp(&self.buf[1..])
    }
}
impl<'buf> fmt::Debug for NalUnit<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("NalUnit")
            .field("unit_type", &self.unit_type())
            .field("len", &self.buf.len())
            .finish()
    }
}

fn find_start_code(buf: &[u8]) -> Option<usize> {
    buf.windows(3).position(|w| w == [0, 0, 1])
}

/// Iterates over the NAL units delimited by `00 00 01` start codes.  Bytes before the first start
/// code are ignored.
pub struct NalUnits<'buf> {
    rest: &'buf [u8],
}
impl<'buf> NalUnits<'buf> {
    pub fn new(annexb: &'buf [u8]) -> NalUnits<'buf> {
        let rest = match find_start_code(annexb) {
            Some(pos) => &annexb[pos + 3..],
            None => &annexb[0..0],
        };
        NalUnits { rest }
    }
}
impl<'buf> Iterator for NalUnits<'buf> {
    type Item = NalUnit<'buf>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let (unit, rest) = match find_start_code(self.rest) {
                Some(pos) => (&self.rest[..pos], &self.rest[pos + 3..]),
                None => (self.rest, &self.rest[0..0]),
            };
            self.rest = rest;
            // a four byte start code leaves a zero at the end of the preceding unit
            let end = unit.iter().rposition(|&b| b != 0).map(|p| p + 1).unwrap_or(0);
            if end > 0 {
                return Some(NalUnit { buf: &unit[..end] });
            }
        }
        None
    }
}

/// `true` if the access unit contains a slice of an IDR picture.
pub fn has_idr(annexb: &[u8]) -> bool {
    NalUnits::new(annexb).any(|nal| nal.unit_type() == UnitType::SliceIdr)
}

/// Strip the `0x03` bytes inserted after each `00 00` pair to prevent start code emulation.
pub fn decode_rbsp(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        result.push(b);
    }
    result
}

#[derive(Debug, PartialEq, Eq)]
pub enum SpsError {
    /// The NAL unit given was of some other type
    NotSps(UnitType),
    BitReader(BitReaderError),
    /// `num_ref_frames_in_pic_order_cnt_cycle` over the limit of 255
    TooManyRefFrames(u32),
}
impl From<BitReaderError> for SpsError {
    fn from(e: BitReaderError) -> Self {
        SpsError::BitReader(e)
    }
}

/// The fields of a _Sequence Parameter Set_ that describe the stream as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqParameterSet {
    pub profile_idc: u8,
    /// `constraint_set0_flag` to `constraint_set5_flag` plus the two reserved zero bits
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    /// left, right, top, bottom
    pub frame_cropping: Option<[u32; 4]>,
}

impl SeqParameterSet {
    pub fn from_nal(nal: &NalUnit<'_>) -> Result<SeqParameterSet, SpsError> {
        if nal.unit_type() != UnitType::SeqParameterSet {
            return Err(SpsError::NotSps(nal.unit_type()));
        }
        Self::from_rbsp(&nal.rbsp())
    }

    /// Parse from the bytes following the NAL unit header, with emulation prevention removed.
    pub fn from_rbsp(rbsp: &[u8]) -> Result<SeqParameterSet, SpsError> {
        let mut r = BitReader::new(rbsp);
        let profile_idc = r.read_u8(8)?;
        let constraint_flags = r.read_u8(8)?;
        let level_idc = r.read_u8(8)?;
        let seq_parameter_set_id = r.read_ue()?;
        let mut chroma_format_idc = 1;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                r.skip_bits(1)?; // separate_colour_plane_flag
            }
            r.read_ue()?; // bit_depth_luma_minus8
            r.read_ue()?; // bit_depth_chroma_minus8
            r.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
            if r.read_bit()? {
                // seq_scaling_matrix_present_flag
                let count = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..count {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }
        r.read_ue()?; // log2_max_frame_num_minus4
        match r.read_ue()? {
            0 => {
                r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                r.skip_bits(1)?; // delta_pic_order_always_zero_flag
                r.read_se()?; // offset_for_non_ref_pic
                r.read_se()?; // offset_for_top_to_bottom_field
                let cycle = r.read_ue()?;
                if cycle > 255 {
                    return Err(SpsError::TooManyRefFrames(cycle));
                }
                for _ in 0..cycle {
                    r.read_se()?; // offset_for_ref_frame
                }
            }
            _ => (),
        }
        r.read_ue()?; // max_num_ref_frames
        r.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag
        let pic_width_in_mbs_minus1 = r.read_ue()?;
        let pic_height_in_map_units_minus1 = r.read_ue()?;
        let frame_mbs_only_flag = r.read_bit()?;
        if !frame_mbs_only_flag {
            r.skip_bits(1)?; // mb_adaptive_frame_field_flag
        }
        r.skip_bits(1)?; // direct_8x8_inference_flag
        let frame_cropping = if r.read_bit()? {
            Some([r.read_ue()?, r.read_ue()?, r.read_ue()?, r.read_ue()?])
        } else {
            None
        };
        Ok(SeqParameterSet {
            profile_idc,
            constraint_flags,
            level_idc,
            seq_parameter_set_id,
            chroma_format_idc,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            frame_cropping,
        })
    }

    /// Finds and parses the first SPS in the given Annex B data.
    pub fn find(annexb: &[u8]) -> Option<Result<SeqParameterSet, SpsError>> {
        NalUnits::new(annexb)
            .find(|nal| nal.unit_type() == UnitType::SeqParameterSet)
            .map(|nal| SeqParameterSet::from_nal(&nal))
    }

    fn crop_units(&self) -> (u32, u32) {
        let field_factor = if self.frame_mbs_only_flag { 1 } else { 2 };
        match self.chroma_format_idc {
            0 | 3 => (1, field_factor),
            1 => (2, 2 * field_factor),
            _ => (2, field_factor),
        }
    }

    pub fn width(&self) -> u32 {
        let width = self.pic_width_in_mbs_minus1.saturating_add(1).saturating_mul(16);
        match self.frame_cropping {
            Some([left, right, _, _]) => {
                width.saturating_sub(self.crop_units().0.saturating_mul(left.saturating_add(right)))
            }
            None => width,
        }
    }

    pub fn height(&self) -> u32 {
        let field_factor = if self.frame_mbs_only_flag { 1 } else { 2 };
        let height = self
            .pic_height_in_map_units_minus1
            .saturating_add(1)
            .saturating_mul(16 * field_factor);
        match self.frame_cropping {
            Some([_, _, top, bottom]) => {
                height.saturating_sub(self.crop_units().1.saturating_mul(top.saturating_add(bottom)))
            }
            None => height,
        }
    }

    /// RFC 6381 codec parameter, e.g. `avc1.64001f`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_idc, self.constraint_flags, self.level_idc
        )
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<(), BitReaderError> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = r.read_se()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}
