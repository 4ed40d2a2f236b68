//! Xing/Info and VBRI header frames.

use crate::seek::{scale, IndexSeekMap, SeekMap, TocSeekMap};
use crate::util::cursor::ByteCursor;
use crate::util::mpeg_audio::MpegAudioHeader;

const XING_FRAMES: u32 = 0x1;
const XING_BYTES: u32 = 0x2;
const XING_TOC: u32 = 0x4;
const XING_QUALITY: u32 = 0x8;

/// Contents of a Xing or Info frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XingFrame {
    /// `Info` tags are written by encoders for constant bitrate streams.
    pub is_info: bool,
    pub frame_count: Option<u32>,
    pub data_size: Option<u32>,
    pub toc: Option<[u8; 100]>,
    /// Encoder delay and padding from the LAME extension.
    pub gapless: Option<(u32, u32)>,
}

impl XingFrame {
    pub fn duration_us(&self, header: &MpegAudioHeader) -> Option<i64> {
        self.frame_count
            .filter(|&frames| frames > 0)
            .map(|frames| frame_count_us(u64::from(frames), header))
    }

    /// A table-of-contents map when the frame carries everything it needs.
    pub fn seek_map(&self, frame_start: u64, header: &MpegAudioHeader) -> Option<SeekMap> {
        let (toc, data_size, duration_us) = (self.toc?, self.data_size?, self.duration_us(header)?);
        Some(SeekMap::toc(TocSeekMap::new(
            frame_start,
            header.frame_size as u64,
            u64::from(data_size),
            duration_us,
            toc,
        )))
    }
}

fn frame_count_us(frames: u64, header: &MpegAudioHeader) -> i64 {
    scale(
        (frames * u64::from(header.samples_per_frame)) as i64,
        1_000_000,
        i64::from(header.sample_rate),
    )
}

fn xing_offset(header: &MpegAudioHeader) -> usize {
    match (header.version == 3, header.channels == 1) {
        (true, true) => 21,
        (true, false) => 36,
        (false, true) => 13,
        (false, false) => 21,
    }
}

/// Parses a Xing/Info tag from the first frame, header included.
pub(crate) fn parse_xing(frame: &[u8], header: &MpegAudioHeader) -> Option<XingFrame> {
    let mut c = ByteCursor::new(frame.get(xing_offset(header)..)?);
    let tag = c.read_fourcc().ok()?;
    if &tag != b"Xing" && &tag != b"Info" {
        return None;
    }
    let flags = c.read_u32().ok()?;
    let frame_count = if flags & XING_FRAMES != 0 { Some(c.read_u32().ok()?) } else { None };
    let data_size = if flags & XING_BYTES != 0 { Some(c.read_u32().ok()?) } else { None };
    let toc = if flags & XING_TOC != 0 {
        let mut table = [0u8; 100];
        table.copy_from_slice(c.read_bytes(100).ok()?);
        Some(table)
    } else {
        None
    };
    if flags & XING_QUALITY != 0 {
        c.skip(4).ok()?;
    }
    let gapless = if c.remaining() >= 24 {
        c.skip(21).ok()?;
        let packed = c.read_u24().ok()?;
        let (delay, padding) = (packed >> 12, packed & 0x0FFF);
        (delay > 0 || padding > 0).then_some((delay, padding))
    } else {
        None
    };
    Some(XingFrame {
        is_info: &tag == b"Info",
        frame_count,
        data_size,
        toc,
        gapless,
    })
}

/// Parses a VBRI header into an index map. Entry positions start after the
/// VBRI frame itself.
pub(crate) fn parse_vbri(frame: &[u8], frame_start: u64, header: &MpegAudioHeader) -> Option<SeekMap> {
    let mut c = ByteCursor::new(frame.get(36..)?);
    if &c.read_fourcc().ok()? != b"VBRI" {
        return None;
    }
    c.skip(6).ok()?;
    let _data_size = c.read_u32().ok()?;
    let frame_count = c.read_u32().ok()?;
    if frame_count == 0 {
        return None;
    }
    let entry_count = u64::from(c.read_u16().ok()?);
    let entry_scale = u64::from(c.read_u16().ok()?);
    let entry_size = c.read_u16().ok()?;
    c.skip(2).ok()?;
    let duration_us = frame_count_us(u64::from(frame_count), header);
    let mut index = IndexSeekMap::new(Some(duration_us));
    let mut position = frame_start + header.frame_size as u64;
    for i in 0..entry_count {
        let time_us = scale(i as i64, duration_us, entry_count as i64);
        index.push(time_us, position);
        let segment = match entry_size {
            1 => u64::from(c.read_u8().ok()?),
            2 => u64::from(c.read_u16().ok()?),
            3 => u64::from(c.read_u24().ok()?),
            4 => u64::from(c.read_u32().ok()?),
            _ => return None,
        };
        position += segment * entry_scale;
    }
    Some(SeekMap::index(index))
}
