//! Track descriptions emitted to the sink.

use bytes::Bytes;

/// Sample mime types produced by the extractors.
pub mod mime {
    pub const VIDEO_H264: &str = "video/avc";
    pub const VIDEO_H265: &str = "video/hevc";
    pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    pub const VIDEO_AV1: &str = "video/av01";
    pub const VIDEO_MPEG2: &str = "video/mpeg2";
    pub const VIDEO_MP4V: &str = "video/mp4v-es";

    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_MPEG: &str = "audio/mpeg";
    pub const AUDIO_MPEG_L1: &str = "audio/mpeg-L1";
    pub const AUDIO_MPEG_L2: &str = "audio/mpeg-L2";
    pub const AUDIO_AC3: &str = "audio/ac3";
    pub const AUDIO_E_AC3: &str = "audio/eac3";
    pub const AUDIO_AC4: &str = "audio/ac4";
    pub const AUDIO_DTS: &str = "audio/vnd.dts";
    pub const AUDIO_OPUS: &str = "audio/opus";
    pub const AUDIO_VORBIS: &str = "audio/vorbis";
    pub const AUDIO_FLAC: &str = "audio/flac";
    pub const AUDIO_RAW: &str = "audio/raw";
    pub const AUDIO_ALAW: &str = "audio/g711-alaw";
    pub const AUDIO_MLAW: &str = "audio/g711-mlaw";
    pub const AUDIO_AMR_NB: &str = "audio/3gpp";
    pub const AUDIO_AMR_WB: &str = "audio/amr-wb";

    pub const TEXT_SUBRIP: &str = "application/x-subrip";
    pub const TEXT_SSA: &str = "text/x-ssa";
    pub const TEXT_TX3G: &str = "application/x-quicktime-tx3g";
    pub const TEXT_VTT: &str = "text/vtt";
    pub const TEXT_TTML: &str = "application/ttml+xml";

    pub const METADATA_ID3: &str = "application/id3";
    pub const METADATA_SCTE35: &str = "application/x-scte35";
}

/// Broad category of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "lowercase"))]
pub enum MediaType {
    Video,
    Audio,
    Text,
    Metadata,
    Unknown,
}

impl MediaType {
    /// Derives the media type from a sample mime type.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("text/")
            || mime == mime::TEXT_SUBRIP
            || mime == mime::TEXT_TX3G
            || mime == mime::TEXT_TTML
        {
            Self::Text
        } else if mime == mime::METADATA_ID3 || mime == mime::METADATA_SCTE35 {
            Self::Metadata
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Metadata => "metadata",
            Self::Unknown => "unknown",
        }
    }
}

/// Linear PCM layout of `audio/raw` tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum PcmEncoding {
    U8,
    S16Le,
    S16Be,
    S24Le,
    S32Le,
    F32Le,
}

impl PcmEncoding {
    /// Little-endian integer PCM for a bit depth, as stored in WAV and Matroska.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::U8),
            16 => Some(Self::S16Le),
            24 => Some(Self::S24Le),
            32 => Some(Self::S32Le),
            _ => None,
        }
    }
}

/// Default/forced selection hints, mostly for text tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SelectionFlags {
    pub default: bool,
    pub forced: bool,
}

/// Codec and presentation attributes of one track.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TrackFormat {
    /// Container-level track identifier rendered as text.
    pub id: Option<String>,
    pub sample_mime_type: Option<String>,
    /// RFC 6381 codec string when derivable.
    pub codecs: Option<String>,
    /// Codec-specific configuration blobs.
    pub initialization_data: Vec<Bytes>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    pub pcm_encoding: Option<PcmEncoding>,
    pub encoder_delay: u32,
    pub encoder_padding: u32,
    pub average_bitrate: Option<u32>,
    pub max_input_size: Option<usize>,
    pub language: Option<String>,
    pub label: Option<String>,
    pub selection_flags: SelectionFlags,
    /// Free-form key/value metadata such as ID3 text frames or Vorbis comments.
    pub metadata: Vec<(String, String)>,
}

impl TrackFormat {
    pub fn new(sample_mime_type: &str) -> Self {
        Self {
            sample_mime_type: Some(sample_mime_type.to_string()),
            ..Self::default()
        }
    }

    pub fn audio(sample_mime_type: &str, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Self::new(sample_mime_type)
        }
    }

    pub fn video(sample_mime_type: &str, width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::new(sample_mime_type)
        }
    }

    pub fn with_id(mut self, id: impl ToString) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_codecs(mut self, codecs: impl Into<String>) -> Self {
        self.codecs = Some(codecs.into());
        self
    }

    pub fn with_initialization_data(mut self, data: Vec<Bytes>) -> Self {
        self.initialization_data = data;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language.filter(|l| !l.is_empty() && l != "und");
        self
    }

    pub fn media_type(&self) -> MediaType {
        self.sample_mime_type
            .as_deref()
            .map_or(MediaType::Unknown, MediaType::from_mime)
    }
}

/// Well-known DRM system identifiers.
pub mod drm {
    pub const WIDEVINE: [u8; 16] = [
        0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21,
        0xed,
    ];
    pub const PLAYREADY: [u8; 16] = [
        0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f,
        0x95,
    ];
    pub const CLEARKEY: [u8; 16] = [
        0xe2, 0x71, 0x9d, 0x58, 0xa9, 0x85, 0xb3, 0xc9, 0x78, 0x1a, 0xb0, 0x30, 0xaf, 0x78, 0xd3,
        0x0e,
    ];
    pub const COMMON_PSSH: [u8; 16] = [
        0x10, 0x77, 0xef, 0xec, 0xc0, 0xb2, 0x4d, 0x02, 0xac, 0xe3, 0x3c, 0x1e, 0x52, 0xe2, 0xfb,
        0x4b,
    ];
}

/// Key-system specific initialisation blob, e.g. the contents of a `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SchemeData {
    /// DRM system UUID, all zeros when the container does not name one.
    pub uuid: [u8; 16],
    /// Mime type of the container the data came from.
    pub mime_type: String,
    pub data: Bytes,
}

/// Out-of-band DRM initialisation data of a track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct DrmInitData {
    /// Protection scheme four-cc, e.g. `cenc` or `cbcs`.
    pub scheme_type: Option<String>,
    pub scheme_datas: Vec<SchemeData>,
}

impl DrmInitData {
    pub fn is_empty(&self) -> bool {
        self.scheme_datas.is_empty()
    }
}

/// Everything the sink learns about one track.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TrackData {
    pub media_type: MediaType,
    pub format: TrackFormat,
    pub drm_init_data: Option<DrmInitData>,
}

/// RFC 6381 `avc1.PPCCLL` string.
pub(crate) fn avc_codec_string(profile_idc: u8, constraints: u8, level_idc: u8) -> String {
    format!("avc1.{profile_idc:02X}{constraints:02X}{level_idc:02X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_mime() {
        assert_eq!(MediaType::from_mime(mime::VIDEO_H264), MediaType::Video);
        assert_eq!(MediaType::from_mime(mime::AUDIO_OPUS), MediaType::Audio);
        assert_eq!(MediaType::from_mime(mime::TEXT_SUBRIP), MediaType::Text);
        assert_eq!(MediaType::from_mime(mime::METADATA_ID3), MediaType::Metadata);
        assert_eq!(MediaType::from_mime("application/octet-stream"), MediaType::Unknown);
    }

    #[test]
    fn test_language_filter() {
        let format = TrackFormat::new(mime::AUDIO_AAC).with_language(Some("und".into()));
        assert_eq!(format.language, None);
        let format = TrackFormat::new(mime::AUDIO_AAC).with_language(Some("eng".into()));
        assert_eq!(format.language.as_deref(), Some("eng"));
    }

    #[test]
    fn test_avc_codec_string() {
        assert_eq!(avc_codec_string(0x64, 0x00, 0x1f), "avc1.64001F");
    }
}
