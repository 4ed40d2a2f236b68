//! `Tracks` element: codec ids mapped to track formats.

use bytes::Bytes;

use super::ebml::{children, find, float, id, string, uint};
use crate::error::{Error, Result};
use crate::extractor::mp4::{parse_avcc, parse_hvcc};
use crate::track::{mime, MediaType, PcmEncoding, SelectionFlags, TrackFormat};
use crate::util::aac;

/// One `TrackEntry` the extractor can emit samples for.
#[derive(Debug, Clone)]
pub(crate) struct MkvTrack {
    pub number: u64,
    pub media_type: MediaType,
    pub codec_id: String,
    pub format: TrackFormat,
    pub default_duration_ns: Option<u64>,
    /// Key id of a ContentEncryption (AES) encoding.
    pub key_id: Option<Vec<u8>>,
}

impl MkvTrack {
    pub fn is_encrypted(&self) -> bool {
        self.key_id.is_some()
    }
}

#[derive(Debug, Default)]
struct Entry {
    number: u64,
    codec_id: String,
    codec_private: Option<Vec<u8>>,
    codec_delay_ns: u64,
    seek_pre_roll_ns: u64,
    default_duration_ns: Option<u64>,
    language: Option<String>,
    name: Option<String>,
    flags: SelectionFlags,
    width: u32,
    height: u32,
    sample_rate: f64,
    channels: u32,
    bit_depth: Option<u32>,
    key_id: Option<Vec<u8>>,
}

/// Parses a `Tracks` body; entries with unsupported codecs are dropped.
pub(crate) fn parse_tracks(body: &[u8]) -> Result<Vec<MkvTrack>> {
    let mut tracks = Vec::new();
    for child in children(body).filter(|c| c.id == id::TRACK_ENTRY) {
        let entry = parse_entry(child.body)?;
        if entry.number == 0 {
            return Err(Error::parsing("TrackEntry without a track number"));
        }
        match build_format(&entry)? {
            Some((media_type, format)) => tracks.push(MkvTrack {
                number: entry.number,
                media_type,
                codec_id: entry.codec_id.clone(),
                format,
                default_duration_ns: entry.default_duration_ns,
                key_id: entry.key_id,
            }),
            None => tracing::debug!(track = entry.number, codec = %entry.codec_id, "skipping unsupported codec"),
        }
    }
    Ok(tracks)
}

fn parse_entry(body: &[u8]) -> Result<Entry> {
    let mut entry = Entry {
        flags: SelectionFlags {
            default: true,
            forced: false,
        },
        channels: 1,
        sample_rate: 8_000.0,
        ..Entry::default()
    };
    for child in children(body) {
        match child.id {
            id::TRACK_NUMBER => entry.number = uint(child.body)?,
            id::CODEC_ID => entry.codec_id = string(child.body),
            id::CODEC_PRIVATE => entry.codec_private = Some(child.body.to_vec()),
            id::CODEC_DELAY => entry.codec_delay_ns = uint(child.body)?,
            id::SEEK_PRE_ROLL => entry.seek_pre_roll_ns = uint(child.body)?,
            id::DEFAULT_DURATION => entry.default_duration_ns = Some(uint(child.body)?).filter(|&d| d > 0),
            id::LANGUAGE => entry.language = Some(string(child.body)),
            id::NAME => entry.name = Some(string(child.body)),
            id::FLAG_DEFAULT => entry.flags.default = uint(child.body)? != 0,
            id::FLAG_FORCED => entry.flags.forced = uint(child.body)? != 0,
            id::VIDEO => {
                for v in children(child.body) {
                    match v.id {
                        id::PIXEL_WIDTH => entry.width = uint(v.body)? as u32,
                        id::PIXEL_HEIGHT => entry.height = uint(v.body)? as u32,
                        _ => {}
                    }
                }
            }
            id::AUDIO => {
                for a in children(child.body) {
                    match a.id {
                        id::SAMPLING_FREQUENCY => entry.sample_rate = float(a.body)?,
                        id::CHANNELS => entry.channels = uint(a.body)? as u32,
                        id::BIT_DEPTH => entry.bit_depth = Some(uint(a.body)? as u32),
                        _ => {}
                    }
                }
            }
            id::CONTENT_ENCODINGS => entry.key_id = parse_encryption(child.body)?,
            _ => {}
        }
    }
    Ok(entry)
}

/// Returns the key id of an AES ContentEncryption, if any.
fn parse_encryption(encodings: &[u8]) -> Result<Option<Vec<u8>>> {
    let Some(encoding) = find(encodings, id::CONTENT_ENCODING) else {
        return Ok(None);
    };
    let Some(encryption) = find(encoding, id::CONTENT_ENCRYPTION) else {
        return Err(Error::parsing("ContentEncoding without ContentEncryption is not supported"));
    };
    let algorithm = find(encryption, id::CONTENT_ENC_ALGO).map(uint).transpose()?.unwrap_or(0);
    if algorithm != 5 {
        return Err(Error::parsing(format!("ContentEncAlgo {algorithm} is not supported")));
    }
    let key_id = find(encryption, id::CONTENT_ENC_KEY_ID)
        .ok_or_else(|| Error::parsing("encrypted track without a key id"))?;
    Ok(Some(key_id.to_vec()))
}

/// Splits Vorbis CodecPrivate (Xiph-laced identification, comment and
/// setup headers) into the identification and setup headers.
fn vorbis_headers(private: &[u8]) -> Result<Vec<Bytes>> {
    let malformed = || Error::parsing("malformed Vorbis CodecPrivate");
    if private.first() != Some(&2) {
        return Err(malformed());
    }
    let mut pos = 1;
    let mut lace = || -> Result<usize> {
        let mut len = 0usize;
        loop {
            let b = *private.get(pos).ok_or_else(malformed)?;
            pos += 1;
            len += usize::from(b);
            if b != 0xFF {
                return Ok(len);
            }
        }
    };
    let ident_len = lace()?;
    let comment_len = lace()?;
    let ident = private.get(pos..pos + ident_len).ok_or_else(malformed)?;
    if ident.first() != Some(&1) {
        return Err(malformed());
    }
    let setup = private.get(pos + ident_len + comment_len..).ok_or_else(malformed)?;
    if setup.first() != Some(&5) {
        return Err(malformed());
    }
    Ok(vec![Bytes::copy_from_slice(ident), Bytes::copy_from_slice(setup)])
}

fn build_format(entry: &Entry) -> Result<Option<(MediaType, TrackFormat)>> {
    let private = entry.codec_private.as_deref();
    let private_blob = || private.map(Bytes::copy_from_slice).into_iter().collect::<Vec<_>>();
    let audio = |mime: &str| TrackFormat::audio(mime, entry.sample_rate as u32, entry.channels);
    let video = |mime: &str| TrackFormat::video(mime, entry.width, entry.height);
    let mut format = match entry.codec_id.as_str() {
        "V_VP8" => video(mime::VIDEO_VP8),
        "V_VP9" => video(mime::VIDEO_VP9).with_initialization_data(private_blob()),
        "V_AV1" => video(mime::VIDEO_AV1).with_initialization_data(private_blob()),
        "V_MPEG2" => video(mime::VIDEO_MPEG2),
        "V_MPEG4/ISO/SP" | "V_MPEG4/ISO/ASP" | "V_MPEG4/ISO/AP" => {
            video(mime::VIDEO_MP4V).with_initialization_data(private_blob())
        }
        "V_MPEG4/ISO/AVC" => {
            let private = private.ok_or_else(|| Error::parsing("AVC track without CodecPrivate"))?;
            let (init, _) = parse_avcc(private)?;
            let mut format = video(mime::VIDEO_H264).with_initialization_data(init);
            if private.len() >= 4 {
                format.codecs = Some(crate::track::avc_codec_string(private[1], private[2], private[3]));
            }
            format
        }
        "V_MPEGH/ISO/HEVC" => {
            let private = private.ok_or_else(|| Error::parsing("HEVC track without CodecPrivate"))?;
            let (init, _, codecs) = parse_hvcc(private)?;
            let mut format = video(mime::VIDEO_H265).with_initialization_data(vec![init]);
            format.codecs = codecs;
            format
        }
        "A_OPUS" => {
            let mut init = private_blob();
            init.push(Bytes::copy_from_slice(&entry.codec_delay_ns.to_le_bytes()));
            init.push(Bytes::copy_from_slice(&entry.seek_pre_roll_ns.to_le_bytes()));
            let mut format = audio(mime::AUDIO_OPUS).with_initialization_data(init);
            format.sample_rate = Some(48_000);
            format
        }
        "A_VORBIS" => {
            let private = private.ok_or_else(|| Error::parsing("Vorbis track without CodecPrivate"))?;
            audio(mime::AUDIO_VORBIS).with_initialization_data(vorbis_headers(private)?)
        }
        "A_AAC" | "A_AAC/MPEG2/LC" | "A_AAC/MPEG4/LC" | "A_AAC/MPEG4/LC/SBR" => {
            let mut format = audio(mime::AUDIO_AAC).with_initialization_data(private_blob());
            if let Some(config) = private.map(aac::parse_audio_specific_config).transpose()? {
                format.sample_rate = Some(config.sample_rate);
                if config.channel_count > 0 {
                    format.channel_count = Some(config.channel_count);
                }
                format.codecs = Some(config.codec_string());
            }
            format
        }
        "A_MPEG/L3" => audio(mime::AUDIO_MPEG),
        "A_MPEG/L2" => audio(mime::AUDIO_MPEG_L2),
        "A_AC3" => audio(mime::AUDIO_AC3),
        "A_EAC3" => audio(mime::AUDIO_E_AC3),
        "A_DTS" | "A_DTS/EXPRESS" | "A_DTS/LOSSLESS" => audio(mime::AUDIO_DTS),
        "A_FLAC" => audio(mime::AUDIO_FLAC).with_initialization_data(private_blob()),
        "A_PCM/INT/LIT" | "A_PCM/INT/BIG" | "A_PCM/FLOAT/IEEE" => {
            let bits = entry.bit_depth.unwrap_or(16);
            let encoding = match entry.codec_id.as_str() {
                "A_PCM/INT/BIG" if bits == 16 => Some(PcmEncoding::S16Be),
                "A_PCM/INT/BIG" if bits == 8 => Some(PcmEncoding::U8),
                "A_PCM/INT/BIG" => None,
                "A_PCM/FLOAT/IEEE" if bits == 32 => Some(PcmEncoding::F32Le),
                "A_PCM/FLOAT/IEEE" => None,
                _ => PcmEncoding::from_bits(bits),
            };
            let Some(encoding) = encoding else {
                tracing::warn!(codec = %entry.codec_id, bits, "unsupported PCM layout");
                return Ok(None);
            };
            let mut format = audio(mime::AUDIO_RAW);
            format.pcm_encoding = Some(encoding);
            format
        }
        "S_TEXT/UTF8" => TrackFormat::new(mime::TEXT_SUBRIP),
        "S_TEXT/ASS" | "S_TEXT/SSA" => TrackFormat::new(mime::TEXT_SSA).with_initialization_data(private_blob()),
        "S_TEXT/WEBVTT" => TrackFormat::new(mime::TEXT_VTT),
        _ => return Ok(None),
    };
    format.id = Some(entry.number.to_string());
    format = format.with_language(entry.language.clone().or_else(|| Some("eng".to_string())));
    format.label = entry.name.clone();
    format.selection_flags = entry.flags;
    if let Some(ns) = entry.default_duration_ns {
        if format.media_type() == MediaType::Video {
            format.frame_rate = Some((1_000_000_000.0 / ns as f64) as f32);
        }
    }
    Ok(Some((format.media_type(), format)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::matroska::ebml::tests::{element, uint_element};

    #[test]
    fn test_opus_entry() {
        let entry = [
            uint_element(id::TRACK_NUMBER, 1),
            element(id::CODEC_ID, b"A_OPUS"),
            element(id::CODEC_PRIVATE, b"OpusHead\x01\x02"),
            uint_element(id::CODEC_DELAY, 6_500_000),
            element(id::LANGUAGE, b"fre"),
            element(id::AUDIO, &[element(id::CHANNELS, &[2]), element(id::SAMPLING_FREQUENCY, &48_000f32.to_bits().to_be_bytes())].concat()),
        ]
        .concat();
        let tracks = parse_tracks(&element(id::TRACK_ENTRY, &entry)).unwrap();
        assert_eq!(tracks.len(), 1);
        let format = &tracks[0].format;
        assert_eq!(format.sample_mime_type.as_deref(), Some(mime::AUDIO_OPUS));
        assert_eq!(format.channel_count, Some(2));
        assert_eq!(format.initialization_data.len(), 3);
        assert_eq!(&format.initialization_data[1][..], &6_500_000u64.to_le_bytes());
        assert_eq!(format.language.as_deref(), Some("fre"));
        assert!(!tracks[0].is_encrypted());
    }

    #[test]
    fn test_vorbis_private_split() {
        let mut private = vec![2, 3, 2];
        private.extend_from_slice(&[1, 0xAA, 0xBB]);
        private.extend_from_slice(&[3, 0xCC]);
        private.extend_from_slice(&[5, 0xDD]);
        let headers = vorbis_headers(&private).unwrap();
        assert_eq!(&headers[0][..], &[1, 0xAA, 0xBB]);
        assert_eq!(&headers[1][..], &[5, 0xDD]);
    }

    #[test]
    fn test_encrypted_entry_and_unknown_codec() {
        let encryption = element(
            id::CONTENT_ENCRYPTION,
            &[uint_element(id::CONTENT_ENC_ALGO, 5), element(id::CONTENT_ENC_KEY_ID, &[7; 16])].concat(),
        );
        let encodings = element(id::CONTENT_ENCODINGS, &element(id::CONTENT_ENCODING, &encryption));
        let video = [uint_element(id::TRACK_NUMBER, 1), element(id::CODEC_ID, b"V_VP9"), encodings].concat();
        let other = [uint_element(id::TRACK_NUMBER, 2), element(id::CODEC_ID, b"V_QUICKTIME")].concat();
        let body = [element(id::TRACK_ENTRY, &video), element(id::TRACK_ENTRY, &other)].concat();
        let tracks = parse_tracks(&body).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].key_id.as_deref(), Some(&[7u8; 16][..]));
        assert_eq!(tracks[0].media_type, MediaType::Video);
    }
}
