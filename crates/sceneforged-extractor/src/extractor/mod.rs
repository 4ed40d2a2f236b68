//! Per-format extractors and the closed set dispatching between them.

pub(crate) mod ac3;
pub(crate) mod ac4;
pub(crate) mod adts;
pub(crate) mod amr;
mod elementary;
pub(crate) mod flac;
pub(crate) mod flv;
pub(crate) mod matroska;
pub(crate) mod mp3;
pub(crate) mod mp4;
pub(crate) mod ogg;
pub(crate) mod ps;
pub(crate) mod ts;
pub(crate) mod wav;

use crate::error::Result;
use crate::format::Format;
use crate::input::ExtractorInput;
use crate::output::Output;
use crate::params::Parameters;

/// Outcome of one parse step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// More steps may produce output.
    Continue,
    /// The stream is exhausted.
    EndOfInput,
}

/// Capability shared by every format.
///
/// `read` consumes one bounded parse unit. A step either completes and
/// commits its effects or fails before mutating extractor state, so the
/// session can rewind the input and retry after an I/O error.
pub(crate) trait Extract {
    fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress>;

    /// Resets partial state after the caller repositioned the input at
    /// `position`, which maps to `time_us`.
    fn seek(&mut self, position: u64, time_us: i64);
}

macro_rules! extractors {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        /// One extractor instance per session.
        pub(crate) enum Extractor {
            $($variant(Box<$ty>),)*
        }

        impl Extractor {
            pub fn read(&mut self, input: &mut dyn ExtractorInput, out: &mut Output<'_>) -> Result<Progress> {
                match self {
                    $(Self::$variant(e) => e.read(input, out),)*
                }
            }

            pub fn seek(&mut self, position: u64, time_us: i64) {
                match self {
                    $(Self::$variant(e) => e.seek(position, time_us),)*
                }
            }
        }
    };
}

extractors! {
    Matroska => matroska::MatroskaExtractor,
    FragmentedMp4 => mp4::FragmentedMp4Extractor,
    Mp4 => mp4::Mp4Extractor,
    Mp3 => mp3::Mp3Extractor,
    Adts => adts::AdtsExtractor,
    Ac3 => ac3::Ac3Extractor,
    Ts => ts::TsExtractor,
    Flv => flv::FlvExtractor,
    Ogg => ogg::OggExtractor,
    Ps => ps::PsExtractor,
    Wav => wav::WavExtractor,
    Amr => amr::AmrExtractor,
    Ac4 => ac4::Ac4Extractor,
    Flac => flac::FlacExtractor,
}

impl Extractor {
    pub fn new(format: Format, params: &Parameters) -> Self {
        match format {
            Format::Matroska => Self::Matroska(Box::new(matroska::MatroskaExtractor::new(params))),
            Format::FragmentedMp4 => Self::FragmentedMp4(Box::new(mp4::FragmentedMp4Extractor::new(params))),
            Format::Mp4 => Self::Mp4(Box::new(mp4::Mp4Extractor::new(params))),
            Format::Mp3 => Self::Mp3(Box::new(mp3::Mp3Extractor::new(params))),
            Format::Adts => Self::Adts(Box::new(adts::AdtsExtractor::new(params))),
            Format::Ac3 => Self::Ac3(Box::new(ac3::Ac3Extractor::new())),
            Format::Ts => Self::Ts(Box::new(ts::TsExtractor::new(params))),
            Format::Flv => Self::Flv(Box::new(flv::FlvExtractor::new())),
            Format::Ogg => Self::Ogg(Box::new(ogg::OggExtractor::new())),
            Format::Ps => Self::Ps(Box::new(ps::PsExtractor::new())),
            Format::Wav => Self::Wav(Box::new(wav::WavExtractor::new())),
            Format::Amr => Self::Amr(Box::new(amr::AmrExtractor::new(params))),
            Format::Ac4 => Self::Ac4(Box::new(ac4::Ac4Extractor::new())),
            Format::Flac => Self::Flac(Box::new(flac::FlacExtractor::new(params))),
        }
    }
}

/// Drives `extractor` over `input` until it reports the end of the stream.
#[cfg(test)]
pub(crate) fn run_to_end(extractor: &mut dyn Extract, input: &mut dyn ExtractorInput) -> Result<crate::output::CapturingSink> {
    let mut sink = crate::output::CapturingSink::new();
    let mut table = crate::output::TrackTable::default();
    run_into(extractor, input, &mut sink, &mut table)?;
    Ok(sink)
}

/// Like [`run_to_end`], with caller-owned session state.
#[cfg(test)]
pub(crate) fn run_into(
    extractor: &mut dyn Extract,
    input: &mut dyn ExtractorInput,
    sink: &mut crate::output::CapturingSink,
    table: &mut crate::output::TrackTable,
) -> Result<()> {
    let mut out = Output::new(sink, table, false);
    for _ in 0..1_000_000 {
        if extractor.read(input, &mut out)? == Progress::EndOfInput {
            return Ok(());
        }
    }
    Err(crate::error::Error::parsing("extractor made no progress"))
}
