//! Named tuning parameters.
//!
//! Every parameter is declared once with its value domain and the formats it
//! applies to. Values are validated when set; names that are not declared are
//! accepted and ignored so callers can target newer engine versions.

use std::fmt;

use crate::error::{Error, Result};
use crate::format::Format;

/// A parameter value as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Demultiplexing mode of the MPEG-TS extractor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TsMode {
    /// Only the first program map table is honoured.
    #[default]
    SinglePmt,
    /// Every program in the PAT is demultiplexed.
    MultiPmt,
    /// HLS segment semantics: single program, unseekable, no duration scan.
    Hls,
}

impl TsMode {
    pub const NAMES: [&'static str; 3] = ["single_pmt", "multi_pmt", "hls"];

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "single_pmt" => Some(Self::SinglePmt),
            "multi_pmt" => Some(Self::MultiPmt),
            "hls" => Some(Self::Hls),
            _ => None,
        }
    }
}

pub const IN_BAND_CRYPTO_INFO: &str = "in_band_crypto_info";
pub const INCLUDE_SUPPLEMENTAL_DATA: &str = "include_supplemental_data";
pub const ADTS_ENABLE_CBR_SEEKING: &str = "adts.enable_cbr_seeking";
pub const AMR_ENABLE_CBR_SEEKING: &str = "amr.enable_cbr_seeking";
pub const FLAC_DISABLE_ID3: &str = "flac.disable_id3";
pub const MP3_DISABLE_ID3: &str = "mp3.disable_id3";
pub const MP3_ENABLE_CBR_SEEKING: &str = "mp3.enable_cbr_seeking";
pub const MP3_ENABLE_INDEX_SEEKING: &str = "mp3.enable_index_seeking";
pub const MP4_IGNORE_EDIT_LISTS: &str = "mp4.ignore_edit_lists";
pub const MP4_IGNORE_TFDT_BOX: &str = "mp4.ignore_tfdt_box";
pub const MP4_TREAT_VIDEO_FRAMES_AS_KEYFRAMES: &str = "mp4.treat_video_frames_as_keyframes";
pub const MATROSKA_DISABLE_CUES_SEEKING: &str = "matroska.disable_cues_seeking";
pub const TS_MODE: &str = "ts.mode";
pub const TS_ALLOW_NON_IDR_AVC_KEYFRAMES: &str = "ts.allow_non_idr_avc_keyframes";
pub const TS_IGNORE_AAC_STREAM: &str = "ts.ignore_aac_stream";
pub const TS_IGNORE_AVC_STREAM: &str = "ts.ignore_avc_stream";
pub const TS_IGNORE_SPLICE_INFO_STREAM: &str = "ts.ignore_splice_info_stream";
pub const TS_DETECT_ACCESS_UNITS: &str = "ts.detect_access_units";
pub const TS_ENABLE_HDMV_DTS_AUDIO_STREAMS: &str = "ts.enable_hdmv_dts_audio_streams";
pub const TS_TIMESTAMP_SEARCH_BYTES: &str = "ts.timestamp_search_bytes";

const TS_PACKET_SIZE: i64 = 188;

#[derive(Debug, Clone, Copy)]
enum Domain {
    Bool,
    TsMode,
    AtLeast(i64),
}

struct Declaration {
    name: &'static str,
    domain: Domain,
    /// Empty for parameters that apply to every format.
    formats: &'static [Format],
}

const MP4_FAMILY: &[Format] = &[Format::Mp4, Format::FragmentedMp4];

const DECLARATIONS: &[Declaration] = &[
    Declaration { name: IN_BAND_CRYPTO_INFO, domain: Domain::Bool, formats: &[] },
    Declaration { name: INCLUDE_SUPPLEMENTAL_DATA, domain: Domain::Bool, formats: &[] },
    Declaration { name: ADTS_ENABLE_CBR_SEEKING, domain: Domain::Bool, formats: &[Format::Adts] },
    Declaration { name: AMR_ENABLE_CBR_SEEKING, domain: Domain::Bool, formats: &[Format::Amr] },
    Declaration { name: FLAC_DISABLE_ID3, domain: Domain::Bool, formats: &[Format::Flac] },
    Declaration { name: MP3_DISABLE_ID3, domain: Domain::Bool, formats: &[Format::Mp3] },
    Declaration { name: MP3_ENABLE_CBR_SEEKING, domain: Domain::Bool, formats: &[Format::Mp3] },
    Declaration { name: MP3_ENABLE_INDEX_SEEKING, domain: Domain::Bool, formats: &[Format::Mp3] },
    Declaration { name: MP4_IGNORE_EDIT_LISTS, domain: Domain::Bool, formats: MP4_FAMILY },
    Declaration { name: MP4_IGNORE_TFDT_BOX, domain: Domain::Bool, formats: MP4_FAMILY },
    Declaration { name: MP4_TREAT_VIDEO_FRAMES_AS_KEYFRAMES, domain: Domain::Bool, formats: MP4_FAMILY },
    Declaration { name: MATROSKA_DISABLE_CUES_SEEKING, domain: Domain::Bool, formats: &[Format::Matroska] },
    Declaration { name: TS_MODE, domain: Domain::TsMode, formats: &[Format::Ts] },
    Declaration { name: TS_ALLOW_NON_IDR_AVC_KEYFRAMES, domain: Domain::Bool, formats: &[Format::Ts] },
    Declaration { name: TS_IGNORE_AAC_STREAM, domain: Domain::Bool, formats: &[Format::Ts] },
    Declaration { name: TS_IGNORE_AVC_STREAM, domain: Domain::Bool, formats: &[Format::Ts] },
    Declaration { name: TS_IGNORE_SPLICE_INFO_STREAM, domain: Domain::Bool, formats: &[Format::Ts] },
    Declaration { name: TS_DETECT_ACCESS_UNITS, domain: Domain::Bool, formats: &[Format::Ts] },
    Declaration { name: TS_ENABLE_HDMV_DTS_AUDIO_STREAMS, domain: Domain::Bool, formats: &[Format::Ts] },
    Declaration { name: TS_TIMESTAMP_SEARCH_BYTES, domain: Domain::AtLeast(TS_PACKET_SIZE), formats: &[Format::Ts] },
];

fn declaration(name: &str) -> Option<&'static Declaration> {
    DECLARATIONS.iter().find(|d| d.name == name)
}

/// Names of the parameters that affect `format`, global ones included.
pub fn declared_for(format: Format) -> impl Iterator<Item = &'static str> {
    DECLARATIONS
        .iter()
        .filter(move |d| d.formats.is_empty() || d.formats.contains(&format))
        .map(|d| d.name)
}

/// True if `name` is global or declared by one of `formats`.
pub fn is_declared_for(name: &str, formats: &[Format]) -> bool {
    declaration(name).is_some_and(|d| d.formats.is_empty() || d.formats.iter().any(|f| formats.contains(f)))
}

/// Options of the MP4 and fragmented MP4 extractors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Options {
    pub ignore_edit_lists: bool,
    pub ignore_tfdt_box: bool,
    pub treat_video_frames_as_keyframes: bool,
}

/// Options of the MP3 extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp3Options {
    pub disable_id3: bool,
    pub enable_cbr_seeking: bool,
    pub enable_index_seeking: bool,
}

/// Options of the MPEG-TS extractor.
#[derive(Debug, Clone, Copy)]
pub struct TsOptions {
    pub mode: TsMode,
    pub allow_non_idr_avc_keyframes: bool,
    pub ignore_aac_stream: bool,
    pub ignore_avc_stream: bool,
    pub ignore_splice_info_stream: bool,
    pub detect_access_units: bool,
    pub enable_hdmv_dts_audio_streams: bool,
    pub timestamp_search_bytes: usize,
}

impl Default for TsOptions {
    fn default() -> Self {
        Self {
            mode: TsMode::SinglePmt,
            allow_non_idr_avc_keyframes: false,
            ignore_aac_stream: false,
            ignore_avc_stream: false,
            ignore_splice_info_stream: false,
            detect_access_units: false,
            enable_hdmv_dts_audio_streams: false,
            timestamp_search_bytes: 600 * TS_PACKET_SIZE as usize,
        }
    }
}

/// Validated parameter values of one session.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub in_band_crypto_info: bool,
    pub include_supplemental_data: bool,
    pub adts_enable_cbr_seeking: bool,
    pub amr_enable_cbr_seeking: bool,
    pub flac_disable_id3: bool,
    pub matroska_disable_cues_seeking: bool,
    pub mp3: Mp3Options,
    pub mp4: Mp4Options,
    pub ts: TsOptions,
}

impl Parameters {
    /// Validates and stores one parameter. Undeclared names are ignored.
    pub fn set(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        let Some(declaration) = declaration(name) else {
            tracing::debug!(name, %value, "ignoring unrecognised parameter");
            return Ok(());
        };
        match (declaration.domain, value) {
            (Domain::Bool, ParameterValue::Bool(v)) => {
                if let Some(slot) = self.bool_slot(name) {
                    *slot = v;
                }
                Ok(())
            }
            (Domain::TsMode, ParameterValue::String(ref v)) => match TsMode::from_name(v) {
                Some(mode) => {
                    self.ts.mode = mode;
                    Ok(())
                }
                None => Err(Error::invalid_parameter(
                    name,
                    format!("expected one of {}, got {v:?}", TsMode::NAMES.join(", ")),
                )),
            },
            (Domain::AtLeast(min), ParameterValue::Int(v)) => {
                if v < min {
                    return Err(Error::invalid_parameter(name, format!("expected at least {min}, got {v}")));
                }
                self.ts.timestamp_search_bytes = usize::try_from(v)
                    .map_err(|_| Error::invalid_parameter(name, format!("{v} does not fit in memory")))?;
                Ok(())
            }
            (domain, value) => Err(Error::invalid_parameter(
                name,
                format!("expected {}, got {value}", domain_label(domain)),
            )),
        }
    }

    fn bool_slot(&mut self, name: &str) -> Option<&mut bool> {
        let slot = match name {
            IN_BAND_CRYPTO_INFO => &mut self.in_band_crypto_info,
            INCLUDE_SUPPLEMENTAL_DATA => &mut self.include_supplemental_data,
            ADTS_ENABLE_CBR_SEEKING => &mut self.adts_enable_cbr_seeking,
            AMR_ENABLE_CBR_SEEKING => &mut self.amr_enable_cbr_seeking,
            FLAC_DISABLE_ID3 => &mut self.flac_disable_id3,
            MP3_DISABLE_ID3 => &mut self.mp3.disable_id3,
            MP3_ENABLE_CBR_SEEKING => &mut self.mp3.enable_cbr_seeking,
            MP3_ENABLE_INDEX_SEEKING => &mut self.mp3.enable_index_seeking,
            MP4_IGNORE_EDIT_LISTS => &mut self.mp4.ignore_edit_lists,
            MP4_IGNORE_TFDT_BOX => &mut self.mp4.ignore_tfdt_box,
            MP4_TREAT_VIDEO_FRAMES_AS_KEYFRAMES => &mut self.mp4.treat_video_frames_as_keyframes,
            MATROSKA_DISABLE_CUES_SEEKING => &mut self.matroska_disable_cues_seeking,
            TS_ALLOW_NON_IDR_AVC_KEYFRAMES => &mut self.ts.allow_non_idr_avc_keyframes,
            TS_IGNORE_AAC_STREAM => &mut self.ts.ignore_aac_stream,
            TS_IGNORE_AVC_STREAM => &mut self.ts.ignore_avc_stream,
            TS_IGNORE_SPLICE_INFO_STREAM => &mut self.ts.ignore_splice_info_stream,
            TS_DETECT_ACCESS_UNITS => &mut self.ts.detect_access_units,
            TS_ENABLE_HDMV_DTS_AUDIO_STREAMS => &mut self.ts.enable_hdmv_dts_audio_streams,
            _ => return None,
        };
        Some(slot)
    }
}

fn domain_label(domain: Domain) -> String {
    match domain {
        Domain::Bool => "a boolean".to_string(),
        Domain::TsMode => format!("one of {}", TsMode::NAMES.join(", ")),
        Domain::AtLeast(min) => format!("an integer of at least {min}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn bool_names() -> impl Iterator<Item = &'static str> {
        DECLARATIONS
            .iter()
            .filter(|d| matches!(d.domain, Domain::Bool))
            .map(|d| d.name)
    }

    #[test]
    fn test_every_bool_accepts_true_and_false() {
        for name in bool_names() {
            let mut params = Parameters::default();
            params.set(name, true.into()).unwrap();
            params.set(name, false.into()).unwrap();
        }
    }

    #[test]
    fn test_every_bool_rejects_strings() {
        for name in bool_names() {
            let mut params = Parameters::default();
            assert_matches!(
                params.set(name, "true".into()),
                Err(Error::InvalidParameter { .. }),
                "{name}"
            );
        }
    }

    #[test]
    fn test_bool_slots_are_distinct() {
        let mut params = Parameters::default();
        params.set(TS_ENABLE_HDMV_DTS_AUDIO_STREAMS, true.into()).unwrap();
        params.set(MP3_ENABLE_INDEX_SEEKING, true.into()).unwrap();
        assert!(params.ts.enable_hdmv_dts_audio_streams);
        assert!(params.mp3.enable_index_seeking);
        assert!(!params.ts.detect_access_units);
        assert!(!params.mp3.enable_cbr_seeking);
    }

    #[test]
    fn test_ts_mode() {
        let mut params = Parameters::default();
        params.set(TS_MODE, "hls".into()).unwrap();
        assert_eq!(params.ts.mode, TsMode::Hls);
        assert_matches!(params.set(TS_MODE, "dvb".into()), Err(Error::InvalidParameter { .. }));
        assert_matches!(params.set(TS_MODE, true.into()), Err(Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_timestamp_search_bytes_domain() {
        let mut params = Parameters::default();
        params.set(TS_TIMESTAMP_SEARCH_BYTES, 1880.into()).unwrap();
        assert_eq!(params.ts.timestamp_search_bytes, 1880);
        assert_matches!(
            params.set(TS_TIMESTAMP_SEARCH_BYTES, 100.into()),
            Err(Error::InvalidParameter { .. })
        );
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let mut params = Parameters::default();
        params.set("future.option", 5.into()).unwrap();
        params.set("future.option", "x".into()).unwrap();
        params.set("future.option", true.into()).unwrap();
    }

    #[test]
    fn test_declared_for() {
        let ts: Vec<_> = declared_for(Format::Ts).collect();
        assert!(ts.contains(&TS_MODE));
        assert!(ts.contains(&IN_BAND_CRYPTO_INFO));
        assert!(!ts.contains(&MP4_IGNORE_EDIT_LISTS));
        assert!(is_declared_for(MP4_IGNORE_TFDT_BOX, &[Format::FragmentedMp4]));
        assert!(!is_declared_for(MP4_IGNORE_TFDT_BOX, &[Format::Mp3]));
        assert!(!is_declared_for("nope", &Format::ALL));
    }
}
