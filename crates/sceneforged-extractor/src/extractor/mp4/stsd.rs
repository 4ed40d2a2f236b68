//! Sample descriptions: codec entries, decoder configuration and the
//! protection scheme of encrypted entries.

use bytes::Bytes;

use super::boxes::{children, find, full_box, BoxType};
use crate::error::{Error, Result};
use crate::sample::{CryptoMode, EncryptionPattern};
use crate::track::{avc_codec_string, mime, MediaType, TrackFormat};
use crate::util::aac;
use crate::util::cursor::ByteCursor;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Default protection of a track, from `sinf/schi/tenc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrackEncryption {
    pub scheme_type: String,
    pub mode: CryptoMode,
    pub is_protected: bool,
    pub per_sample_iv_size: u8,
    pub key_id: [u8; 16],
    pub constant_iv: Option<[u8; 16]>,
    pub pattern: Option<EncryptionPattern>,
}

/// Format and protection of the first sample entry of an `stsd`.
#[derive(Debug, Clone)]
pub(crate) struct SampleDescription {
    pub format: TrackFormat,
    pub encryption: Option<TrackEncryption>,
    /// Length field size of length-prefixed NAL units, for AVC/HEVC.
    pub nal_length_size: Option<u8>,
}

/// Parses `tenc` under the given scheme.
pub(crate) fn parse_tenc(body: &[u8], scheme_type: &str) -> Result<TrackEncryption> {
    let (version, _, mut c) = full_box(body)?;
    c.skip(1)?;
    let pattern_byte = c.read_u8()?;
    let is_protected = c.read_u8()? == 1;
    let per_sample_iv_size = c.read_u8()?;
    let mut key_id = [0u8; 16];
    key_id.copy_from_slice(c.read_bytes(16)?);
    let constant_iv = if is_protected && per_sample_iv_size == 0 {
        let len = usize::from(c.read_u8()?);
        Some(crate::sample::CryptoInfo::iv_from(c.read_bytes(len)?))
    } else {
        None
    };
    let pattern = (version > 0 && pattern_byte != 0).then_some(EncryptionPattern {
        crypt_blocks: pattern_byte >> 4,
        skip_blocks: pattern_byte & 0x0F,
    });
    Ok(TrackEncryption {
        scheme_type: scheme_type.to_string(),
        mode: CryptoMode::from_scheme(scheme_type).unwrap_or(CryptoMode::AesCtr),
        is_protected,
        per_sample_iv_size,
        key_id,
        constant_iv,
        pattern,
    })
}

/// Parses `sinf`, returning the original format code and the protection.
fn parse_sinf(body: &[u8]) -> Result<Option<([u8; 4], TrackEncryption)>> {
    let mut original = None;
    let mut scheme_type = String::from("cenc");
    let mut schi = None;
    for child in children(body) {
        match child.box_type {
            BoxType::FRMA if child.body.len() >= 4 => {
                original = Some([child.body[0], child.body[1], child.body[2], child.body[3]]);
            }
            BoxType::SCHM if child.body.len() >= 8 => {
                scheme_type = String::from_utf8_lossy(&child.body[4..8]).into_owned();
            }
            BoxType::SCHI => schi = Some(child.body),
            _ => {}
        }
    }
    let Some(original) = original else {
        return Ok(None);
    };
    if CryptoMode::from_scheme(&scheme_type).is_none() {
        tracing::warn!(scheme = %scheme_type, "unsupported protection scheme");
        return Ok(None);
    }
    let Some(tenc) = schi.and_then(|schi| find(schi, BoxType::TENC)) else {
        return Ok(None);
    };
    Ok(Some((original, parse_tenc(tenc, &scheme_type)?)))
}

/// Parses the first entry of an `stsd` body for a track of `media_type`.
pub(crate) fn parse_stsd(body: &[u8], media_type: MediaType) -> Result<Option<SampleDescription>> {
    let (_, _, mut c) = full_box(body)?;
    let count = c.read_u32()?;
    if count == 0 {
        return Ok(None);
    }
    let Some(entry) = children(c.rest()).next() else {
        return Err(Error::parsing("stsd entry overruns its box"));
    };
    let mut code = entry.box_type.0;
    let protected = matches!(&code, b"encv" | b"enca" | b"enct");
    let (fields, child_start) = match media_type {
        MediaType::Video => (entry.body, 78),
        MediaType::Audio => {
            let version = entry.body.get(8..10).map_or(0, |v| u16::from_be_bytes([v[0], v[1]]));
            (entry.body, if version == 1 { 44 } else if version == 2 { 64 } else { 28 })
        }
        _ => (entry.body, 8),
    };
    let child_data = fields.get(child_start..).unwrap_or(&[]);

    let mut encryption = None;
    if protected {
        if let Some(sinf) = find(child_data, BoxType::SINF) {
            if let Some((original, protection)) = parse_sinf(sinf)? {
                code = original;
                encryption = Some(protection);
            }
        }
    }

    let (format, nal_length_size) = match media_type {
        MediaType::Video => video_entry(&code, fields, child_data)?,
        MediaType::Audio => (audio_entry(&code, fields, child_data)?, None),
        _ => (text_entry(&code), None),
    };
    Ok(format.map(|format| SampleDescription {
        format,
        encryption,
        nal_length_size,
    }))
}

fn video_entry(code: &[u8; 4], fields: &[u8], boxes: &[u8]) -> Result<(Option<TrackFormat>, Option<u8>)> {
    if fields.len() < 28 {
        return Err(Error::parsing("visual sample entry too short"));
    }
    let width = u32::from(crate::util::be_u16(fields, 24));
    let height = u32::from(crate::util::be_u16(fields, 26));
    let mut nal_length_size = None;
    let mut format = match code {
        b"avc1" | b"avc3" => {
            let mut format = TrackFormat::video(mime::VIDEO_H264, width, height);
            if let Some(avcc) = find(boxes, BoxType(*b"avcC")) {
                let (init, length_size) = parse_avcc(avcc)?;
                nal_length_size = Some(length_size);
                if avcc.len() >= 4 {
                    format.codecs = Some(avc_codec_string(avcc[1], avcc[2], avcc[3]));
                }
                format.initialization_data = init;
            }
            format
        }
        b"hvc1" | b"hev1" => {
            let mut format = TrackFormat::video(mime::VIDEO_H265, width, height);
            if let Some(hvcc) = find(boxes, BoxType(*b"hvcC")) {
                let (init, length_size, codecs) = parse_hvcc(hvcc)?;
                nal_length_size = Some(length_size);
                format.codecs = codecs;
                format.initialization_data = vec![init];
            }
            format
        }
        b"vp08" => TrackFormat::video(mime::VIDEO_VP8, width, height),
        b"vp09" => {
            let mut format = TrackFormat::video(mime::VIDEO_VP9, width, height);
            if let Some(vpcc) = find(boxes, BoxType(*b"vpcC")) {
                if vpcc.len() >= 7 {
                    format.codecs = Some(format!("vp09.{:02}.{:02}.{:02}", vpcc[4], vpcc[5], vpcc[6] >> 4));
                }
            }
            format
        }
        b"av01" => {
            let mut format = TrackFormat::video(mime::VIDEO_AV1, width, height);
            if let Some(av1c) = find(boxes, BoxType(*b"av1C")) {
                format.initialization_data = vec![Bytes::copy_from_slice(av1c)];
            }
            format
        }
        b"mp4v" => {
            let mut format = TrackFormat::video(mime::VIDEO_MP4V, width, height);
            if let Some(esds) = find(boxes, BoxType(*b"esds")) {
                let config = parse_esds(esds)?;
                if let Some(mime) = config.mime_type {
                    format.sample_mime_type = Some(mime.to_string());
                }
                format.initialization_data = config.decoder_specific_info.into_iter().collect();
            }
            format
        }
        other => {
            tracing::debug!(code = %String::from_utf8_lossy(other), "unsupported video sample entry");
            return Ok((None, None));
        }
    };
    if let Some(pasp) = find(boxes, BoxType(*b"pasp")) {
        if pasp.len() >= 8 {
            let h = crate::util::be_u32(pasp, 0);
            let v = crate::util::be_u32(pasp, 4);
            if h != v && v != 0 {
                format.metadata.push(("pixel_aspect_ratio".into(), format!("{h}:{v}")));
            }
        }
    }
    Ok((Some(format), nal_length_size))
}

fn audio_entry(code: &[u8; 4], fields: &[u8], boxes: &[u8]) -> Result<Option<TrackFormat>> {
    if fields.len() < 28 {
        return Err(Error::parsing("audio sample entry too short"));
    }
    let channels = u32::from(crate::util::be_u16(fields, 16));
    let sample_size = crate::util::be_u16(fields, 18);
    let sample_rate = crate::util::be_u32(fields, 24) >> 16;
    let mut format = TrackFormat::audio(mime::AUDIO_AAC, sample_rate, channels);
    match code {
        b"mp4a" => {
            if let Some(esds) = find(boxes, BoxType(*b"esds")) {
                let config = parse_esds(esds)?;
                if let Some(mime) = config.mime_type {
                    format.sample_mime_type = Some(mime.to_string());
                }
                if let Some(asc) = &config.decoder_specific_info {
                    if config.mime_type == Some(mime::AUDIO_AAC) {
                        let parsed = aac::parse_audio_specific_config(asc)?;
                        format.sample_rate = Some(parsed.sample_rate);
                        if parsed.channel_count > 0 {
                            format.channel_count = Some(parsed.channel_count);
                        }
                        format.codecs = Some(parsed.codec_string());
                    }
                }
                format.average_bitrate = config.average_bitrate;
                format.initialization_data = config.decoder_specific_info.into_iter().collect();
            }
        }
        b"ac-3" => format.sample_mime_type = Some(mime::AUDIO_AC3.into()),
        b"ec-3" => format.sample_mime_type = Some(mime::AUDIO_E_AC3.into()),
        b"ac-4" => format.sample_mime_type = Some(mime::AUDIO_AC4.into()),
        b".mp3" => format.sample_mime_type = Some(mime::AUDIO_MPEG.into()),
        b"Opus" => {
            format.sample_mime_type = Some(mime::AUDIO_OPUS.into());
            format.sample_rate = Some(48_000);
            if let Some(dops) = find(boxes, BoxType(*b"dOps")) {
                let mut head = b"OpusHead".to_vec();
                head.extend_from_slice(dops);
                // dOps carries version 0 and a big-endian layout; OpusHead is
                // version 1 with little-endian fields.
                if head.len() >= 19 {
                    let pre_skip = crate::util::be_u16(&head, 10).to_le_bytes();
                    let input_rate = crate::util::be_u32(&head, 12).to_le_bytes();
                    let gain = crate::util::be_u16(&head, 16).to_le_bytes();
                    head[8] = 1;
                    head[10..12].copy_from_slice(&pre_skip);
                    head[12..16].copy_from_slice(&input_rate);
                    head[16..18].copy_from_slice(&gain);
                }
                format.initialization_data = vec![Bytes::from(head)];
            }
        }
        b"fLaC" => {
            format.sample_mime_type = Some(mime::AUDIO_FLAC.into());
            if let Some(dfla) = find(boxes, BoxType(*b"dfLa")) {
                let mut init = b"fLaC".to_vec();
                init.extend_from_slice(dfla.get(4..).unwrap_or(&[]));
                format.initialization_data = vec![Bytes::from(init)];
            }
        }
        b"lpcm" | b"sowt" | b"twos" => {
            format.sample_mime_type = Some(mime::AUDIO_RAW.into());
            format.pcm_encoding = match (code, sample_size) {
                (b"twos", 16) => Some(crate::track::PcmEncoding::S16Be),
                (_, bits) => crate::track::PcmEncoding::from_bits(u32::from(bits)),
            };
        }
        b"alaw" => format.sample_mime_type = Some(mime::AUDIO_ALAW.into()),
        b"ulaw" => format.sample_mime_type = Some(mime::AUDIO_MLAW.into()),
        b"samr" => format.sample_mime_type = Some(mime::AUDIO_AMR_NB.into()),
        b"sawb" => format.sample_mime_type = Some(mime::AUDIO_AMR_WB.into()),
        other => {
            tracing::debug!(code = %String::from_utf8_lossy(other), "unsupported audio sample entry");
            return Ok(None);
        }
    }
    Ok(Some(format))
}

fn text_entry(code: &[u8; 4]) -> Option<TrackFormat> {
    let mime = match code {
        b"tx3g" => mime::TEXT_TX3G,
        b"wvtt" => mime::TEXT_VTT,
        b"stpp" => mime::TEXT_TTML,
        b"c608" => "application/cea-608",
        _ => return None,
    };
    Some(TrackFormat::new(mime))
}

/// Splits an `avcC` record into start-code-prefixed SPS/PPS units.
pub(crate) fn parse_avcc(body: &[u8]) -> Result<(Vec<Bytes>, u8)> {
    let mut c = ByteCursor::new(body);
    c.skip(4)?;
    let length_size = (c.read_u8()? & 0x03) + 1;
    let mut units = Vec::new();
    let sps_count = c.read_u8()? & 0x1F;
    for _ in 0..sps_count {
        let len = usize::from(c.read_u16()?);
        units.push(prefixed(c.read_bytes(len)?));
    }
    let pps_count = c.read_u8()?;
    for _ in 0..pps_count {
        let len = usize::from(c.read_u16()?);
        units.push(prefixed(c.read_bytes(len)?));
    }
    Ok((units, length_size))
}

/// Flattens the NAL arrays of an `hvcC` record into one start-code
/// delimited blob and derives the codecs string.
pub(crate) fn parse_hvcc(body: &[u8]) -> Result<(Bytes, u8, Option<String>)> {
    let mut c = ByteCursor::new(body);
    c.skip(21)?;
    let length_size = (c.read_u8()? & 0x03) + 1;
    let arrays = c.read_u8()?;
    let mut blob = Vec::new();
    let mut codecs = None;
    for _ in 0..arrays {
        let nal_type = c.read_u8()? & 0x3F;
        let count = c.read_u16()?;
        for _ in 0..count {
            let len = usize::from(c.read_u16()?);
            let nal = c.read_bytes(len)?;
            if nal_type == crate::util::nal::H265_SPS && codecs.is_none() {
                codecs = crate::util::nal::parse_hevc_sps(nal).ok().map(|sps| sps.codec_string());
            }
            blob.extend_from_slice(&START_CODE);
            blob.extend_from_slice(nal);
        }
    }
    Ok((Bytes::from(blob), length_size, codecs))
}

fn prefixed(nal: &[u8]) -> Bytes {
    let mut unit = Vec::with_capacity(nal.len() + 4);
    unit.extend_from_slice(&START_CODE);
    unit.extend_from_slice(nal);
    Bytes::from(unit)
}

/// Decoder configuration carried by an `esds` box.
#[derive(Debug, Default)]
struct EsdsConfig {
    mime_type: Option<&'static str>,
    average_bitrate: Option<u32>,
    decoder_specific_info: Option<Bytes>,
}

fn descriptor_len(c: &mut ByteCursor<'_>) -> Result<usize> {
    let mut len = 0usize;
    for _ in 0..4 {
        let b = c.read_u8()?;
        len = (len << 7) | usize::from(b & 0x7F);
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(len)
}

fn object_type_mime(object_type: u8) -> Option<&'static str> {
    Some(match object_type {
        0x20 => mime::VIDEO_MP4V,
        0x21 => mime::VIDEO_H264,
        0x23 => mime::VIDEO_H265,
        0x60..=0x65 | 0x6A => mime::VIDEO_MPEG2,
        0x40 | 0x66 | 0x67 | 0x68 => mime::AUDIO_AAC,
        0x69 | 0x6B => mime::AUDIO_MPEG,
        0xA5 => mime::AUDIO_AC3,
        0xA6 => mime::AUDIO_E_AC3,
        0xA9 | 0xAC => mime::AUDIO_DTS,
        0xAD => mime::AUDIO_OPUS,
        0xAE => mime::AUDIO_AC4,
        _ => return None,
    })
}

fn parse_esds(body: &[u8]) -> Result<EsdsConfig> {
    let (_, _, mut c) = full_box(body)?;
    let mut config = EsdsConfig::default();
    if c.read_u8()? != 0x03 {
        return Ok(config);
    }
    descriptor_len(&mut c)?;
    c.skip(2)?;
    let flags = c.read_u8()?;
    if flags & 0x80 != 0 {
        c.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = usize::from(c.read_u8()?);
        c.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        c.skip(2)?;
    }
    if c.read_u8()? != 0x04 {
        return Ok(config);
    }
    descriptor_len(&mut c)?;
    config.mime_type = object_type_mime(c.read_u8()?);
    c.skip(8)?;
    let average = c.read_u32()?;
    config.average_bitrate = (average > 0).then_some(average);
    if c.remaining() > 0 && c.read_u8()? == 0x05 {
        let len = descriptor_len(&mut c)?;
        config.decoder_specific_info = Some(Bytes::copy_from_slice(c.read_bytes(len)?));
    }
    Ok(config)
}
