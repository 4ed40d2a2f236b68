//! Registered container formats, their names and mime types.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::extractor;
use crate::input::Prefix;

/// One supported container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Matroska,
    FragmentedMp4,
    Mp4,
    Mp3,
    Adts,
    Ac3,
    Ts,
    Flv,
    Ogg,
    Ps,
    Wav,
    Amr,
    Ac4,
    Flac,
}

impl Format {
    /// Every format in registration (and auto-detection) order.
    pub const ALL: [Format; 14] = [
        Format::Matroska,
        Format::FragmentedMp4,
        Format::Mp4,
        Format::Mp3,
        Format::Adts,
        Format::Ac3,
        Format::Ts,
        Format::Flv,
        Format::Ogg,
        Format::Ps,
        Format::Wav,
        Format::Amr,
        Format::Ac4,
        Format::Flac,
    ];

    /// Registered name.
    pub fn name(self) -> &'static str {
        match self {
            Format::Matroska => "matroska",
            Format::FragmentedMp4 => "fmp4",
            Format::Mp4 => "mp4",
            Format::Mp3 => "mp3",
            Format::Adts => "adts",
            Format::Ac3 => "ac3",
            Format::Ts => "ts",
            Format::Flv => "flv",
            Format::Ogg => "ogg",
            Format::Ps => "ps",
            Format::Wav => "wav",
            Format::Amr => "amr",
            Format::Ac4 => "ac4",
            Format::Flac => "flac",
        }
    }

    /// Container mime types served by this format.
    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            Format::Matroska => &["video/x-matroska", "audio/x-matroska", "video/webm", "audio/webm"],
            Format::FragmentedMp4 | Format::Mp4 => &["video/mp4", "audio/mp4", "application/mp4"],
            Format::Mp3 => &["audio/mpeg"],
            Format::Adts => &["audio/aac", "audio/mp4a-latm"],
            Format::Ac3 => &["audio/ac3", "audio/eac3"],
            Format::Ts => &["video/mp2t"],
            Format::Flv => &["video/x-flv"],
            Format::Ogg => &["video/ogg", "audio/ogg", "application/ogg"],
            Format::Ps => &["video/mp2p"],
            Format::Wav => &["audio/wav", "audio/x-wav", "audio/vnd.wave"],
            Format::Amr => &["audio/amr", "audio/amr-wb", "audio/3gpp"],
            Format::Ac4 => &["audio/ac4"],
            Format::Flac => &["audio/flac"],
        }
    }

    /// Looks up a registered name.
    pub fn from_name(name: &str) -> Result<Format, Error> {
        Format::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnknownFormat(name.to_string()))
    }

    /// Runs this format's sniffer over a stream prefix.
    pub fn sniff(self, prefix: &Prefix) -> bool {
        match self {
            Format::Matroska => extractor::matroska::sniff(prefix),
            Format::FragmentedMp4 => extractor::mp4::sniff(prefix, true),
            Format::Mp4 => extractor::mp4::sniff(prefix, false),
            Format::Mp3 => extractor::mp3::sniff(prefix),
            Format::Adts => extractor::adts::sniff(prefix),
            Format::Ac3 => extractor::ac3::sniff(prefix),
            Format::Ts => extractor::ts::sniff(prefix),
            Format::Flv => extractor::flv::sniff(prefix),
            Format::Ogg => extractor::ogg::sniff(prefix),
            Format::Ps => extractor::ps::sniff(prefix),
            Format::Wav => extractor::wav::sniff(prefix),
            Format::Amr => extractor::amr::sniff(prefix),
            Format::Ac4 => extractor::ac4::sniff(prefix),
            Format::Flac => extractor::flac::sniff(prefix),
        }
    }

    /// Parameter names that affect this format, global ones included.
    pub fn declared_parameters(self) -> Vec<&'static str> {
        crate::params::declared_for(self).collect()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::from_name(s)
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Formats able to read `mime`, in registration order. Unmapped types yield
/// an empty list.
pub fn formats_for_mime(mime: &str) -> Vec<Format> {
    let mime = normalize_mime(mime);
    Format::ALL
        .into_iter()
        .filter(|f| f.mime_types().contains(&mime.as_str()))
        .collect()
}

/// Names of the formats compatible with `mime`, or of every format.
pub fn list_formats(mime: Option<&str>) -> Vec<&'static str> {
    match mime {
        Some(mime) => formats_for_mime(mime).into_iter().map(Format::name).collect(),
        None => Format::ALL.into_iter().map(Format::name).collect(),
    }
}
