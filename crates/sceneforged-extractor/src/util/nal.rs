//! H.264 / H.265 NAL unit helpers.

use crate::error::Result;
use crate::track::avc_codec_string;
use crate::util::bits::Bits;

pub(crate) const H264_SLICE: u8 = 1;
pub(crate) const H264_IDR: u8 = 5;
pub(crate) const H264_SEI: u8 = 6;
pub(crate) const H264_SPS: u8 = 7;
pub(crate) const H264_PPS: u8 = 8;
pub(crate) const H264_AUD: u8 = 9;

pub(crate) const H265_VPS: u8 = 32;
pub(crate) const H265_SPS: u8 = 33;
pub(crate) const H265_PPS: u8 = 34;
pub(crate) const H265_AUD: u8 = 35;
pub(crate) const H265_PREFIX_SEI: u8 = 39;

/// Index of the next `00 00 01` start code at or after `from`.
pub(crate) fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// Removes emulation prevention bytes (`00 00 03` -> `00 00`).
pub(crate) fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// Fields of an H.264 sequence parameter set needed for track formats.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AvcSps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
    pub pixel_aspect_ratio: f32,
}

impl AvcSps {
    pub fn codec_string(&self) -> String {
        avc_codec_string(self.profile_idc, self.constraint_flags, self.level_idc)
    }
}

fn skip_scaling_list(bits: &mut Bits<'_>, size: u32) -> Result<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = bits.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Parses an H.264 SPS NAL unit, header byte included.
pub(crate) fn parse_avc_sps(nal: &[u8]) -> Result<AvcSps> {
    let rbsp = unescape_rbsp(nal.get(1..).unwrap_or_default());
    let mut bits = Bits::new(&rbsp);
    let profile_idc = bits.read_bits(8)? as u8;
    let constraint_flags = bits.read_bits(8)? as u8;
    let level_idc = bits.read_bits(8)? as u8;
    bits.read_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if matches!(profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134) {
        chroma_format_idc = bits.read_ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = bits.read_bit()?;
        }
        bits.read_ue()?; // bit_depth_luma_minus8
        bits.read_ue()?; // bit_depth_chroma_minus8
        bits.read_bit()?; // qpprime_y_zero_transform_bypass_flag
        if bits.read_bit()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if bits.read_bit()? {
                    skip_scaling_list(&mut bits, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }
    bits.read_ue()?; // log2_max_frame_num_minus4
    match bits.read_ue()? {
        0 => {
            bits.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            bits.read_bit()?; // delta_pic_order_always_zero_flag
            bits.read_se()?; // offset_for_non_ref_pic
            bits.read_se()?; // offset_for_top_to_bottom_field
            let cycle = bits.read_ue()?;
            for _ in 0..cycle {
                bits.read_se()?;
            }
        }
        _ => {}
    }
    bits.read_ue()?; // max_num_ref_frames
    bits.read_bit()?; // gaps_in_frame_num_value_allowed_flag
    let width_in_mbs = bits.read_ue()? + 1;
    let height_in_map_units = bits.read_ue()? + 1;
    let frame_mbs_only = bits.read_bit()?;
    if !frame_mbs_only {
        bits.read_bit()?; // mb_adaptive_frame_field_flag
    }
    bits.read_bit()?; // direct_8x8_inference_flag

    let mut width = width_in_mbs * 16;
    let mut height = (2 - u32::from(frame_mbs_only)) * height_in_map_units * 16;
    if bits.read_bit()? {
        let left = bits.read_ue()?;
        let right = bits.read_ue()?;
        let top = bits.read_ue()?;
        let bottom = bits.read_ue()?;
        let chroma_array_type = if separate_colour_plane { 0 } else { chroma_format_idc };
        let (crop_x, crop_y) = if chroma_array_type == 0 {
            (1, 2 - u32::from(frame_mbs_only))
        } else {
            let sub_width = if chroma_format_idc == 3 { 1 } else { 2 };
            let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
            (sub_width, sub_height * (2 - u32::from(frame_mbs_only)))
        };
        width = width.saturating_sub((left + right) * crop_x);
        height = height.saturating_sub((top + bottom) * crop_y);
    }

    let mut pixel_aspect_ratio = 1.0;
    if bits.read_bit().unwrap_or(false) && bits.read_bit().unwrap_or(false) {
        let idc = bits.read_bits(8)?;
        if idc == 255 {
            let sar_width = bits.read_bits(16)?;
            let sar_height = bits.read_bits(16)?;
            if sar_width != 0 && sar_height != 0 {
                pixel_aspect_ratio = sar_width as f32 / sar_height as f32;
            }
        } else if let Some(&(w, h)) = ASPECT_RATIO_IDC.get(idc as usize) {
            if h != 0 {
                pixel_aspect_ratio = w as f32 / h as f32;
            }
        }
    }

    Ok(AvcSps {
        profile_idc,
        constraint_flags,
        level_idc,
        width,
        height,
        pixel_aspect_ratio,
    })
}

const ASPECT_RATIO_IDC: [(u32, u32); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// `slice_type` of an H.264 slice NAL is an I slice.
pub(crate) fn avc_slice_is_intra(nal: &[u8]) -> bool {
    let rbsp = unescape_rbsp(nal.get(1..).unwrap_or_default());
    let mut bits = Bits::new(&rbsp);
    let slice_type = bits.read_ue().and_then(|_| bits.read_ue());
    matches!(slice_type, Ok(t) if t % 5 == 2)
}

/// `first_mb_in_slice == 0` for an H.264 slice NAL.
pub(crate) fn avc_slice_starts_picture(nal: &[u8]) -> bool {
    let rbsp = unescape_rbsp(nal.get(1..).unwrap_or_default());
    matches!(Bits::new(&rbsp).read_ue(), Ok(0))
}

/// Fields of an H.265 sequence parameter set needed for track formats.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HevcSps {
    pub profile_space: u8,
    pub tier_flag: bool,
    pub profile_idc: u8,
    pub compatibility_flags: u32,
    pub constraint_bytes: [u8; 6],
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

impl HevcSps {
    /// `hvc1.P.C.TL.B` codec string.
    pub fn codec_string(&self) -> String {
        let space = match self.profile_space {
            1 => "A",
            2 => "B",
            3 => "C",
            _ => "",
        };
        let mut codecs = format!(
            "hvc1.{space}{}.{:X}.{}{}",
            self.profile_idc,
            self.compatibility_flags.reverse_bits(),
            if self.tier_flag { 'H' } else { 'L' },
            self.level_idc
        );
        let used = self
            .constraint_bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        for b in &self.constraint_bytes[..used] {
            codecs.push_str(&format!(".{b:X}"));
        }
        codecs
    }
}

fn skip_sub_layers(bits: &mut Bits<'_>, max_sub_layers_minus1: u32) -> Result<()> {
    let mut profile_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    let mut level_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        profile_present.push(bits.read_bit()?);
        level_present.push(bits.read_bit()?);
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            bits.skip_bits(2)?;
        }
    }
    for (profile, level) in profile_present.into_iter().zip(level_present) {
        if profile {
            bits.skip_bits(88)?;
        }
        if level {
            bits.skip_bits(8)?;
        }
    }
    Ok(())
}

/// Parses an H.265 SPS NAL unit, two-byte header included.
pub(crate) fn parse_hevc_sps(nal: &[u8]) -> Result<HevcSps> {
    let rbsp = unescape_rbsp(nal.get(2..).unwrap_or_default());
    let mut bits = Bits::new(&rbsp);
    bits.skip_bits(4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = bits.read_bits(3)?;
    bits.skip_bits(1)?; // sps_temporal_id_nesting_flag

    let profile_space = bits.read_bits(2)? as u8;
    let tier_flag = bits.read_bit()?;
    let profile_idc = bits.read_bits(5)? as u8;
    let compatibility_flags = bits.read_bits(32)?;
    let mut constraint_bytes = [0u8; 6];
    for byte in &mut constraint_bytes {
        *byte = bits.read_bits(8)? as u8;
    }
    let level_idc = bits.read_bits(8)? as u8;
    skip_sub_layers(&mut bits, max_sub_layers_minus1)?;

    bits.read_ue()?; // sps_seq_parameter_set_id
    let chroma_format_idc = bits.read_ue()?;
    if chroma_format_idc == 3 {
        bits.skip_bits(1)?; // separate_colour_plane_flag
    }
    let mut width = bits.read_ue()?;
    let mut height = bits.read_ue()?;
    if bits.read_bit()? {
        let left = bits.read_ue()?;
        let right = bits.read_ue()?;
        let top = bits.read_ue()?;
        let bottom = bits.read_ue()?;
        let sub_width = if chroma_format_idc == 1 || chroma_format_idc == 2 { 2 } else { 1 };
        let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
        width = width.saturating_sub(sub_width * (left + right));
        height = height.saturating_sub(sub_height * (top + bottom));
    }

    Ok(HevcSps {
        profile_space,
        tier_flag,
        profile_idc,
        compatibility_flags,
        constraint_bytes,
        level_idc,
        width,
        height,
    })
}

/// NAL unit type of an H.265 NAL header.
pub(crate) fn hevc_nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| (b >> 1) & 0x3f)
}
