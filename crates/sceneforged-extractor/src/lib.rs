//! # sceneforged-extractor
//!
//! A format-agnostic media demultiplexer.
//!
//! A [`MediaParser`] reads a container stream from an [`ExtractorInput`],
//! picks the matching format by name or by sniffing, and pushes track
//! formats, seek maps and timestamped samples to an [`OutputSink`].
//!
//! ## Quick Start
//!
//! ```
//! use sceneforged_extractor::{CapturingSink, MediaParser, SliceInput};
//!
//! // Four ADTS frames carrying four payload bytes each.
//! let frame = [0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC, 1, 2, 3, 4];
//! let stream: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 4).collect();
//!
//! let mut parser = MediaParser::create_by_auto_detection(CapturingSink::new(), &[]).unwrap();
//! let mut input = SliceInput::new(stream);
//! while parser.advance(&mut input).unwrap() {}
//!
//! assert_eq!(parser.parser_name(), Some("adts"));
//! assert_eq!(parser.sink().samples.len(), 4);
//! ```
//!
//! ## Parameters
//!
//! ```
//! use sceneforged_extractor::{params, CapturingSink, MediaParser};
//!
//! let mut parser = MediaParser::create_by_name("ts", CapturingSink::new()).unwrap();
//! parser.set_parameter(params::TS_MODE, "multi_pmt").unwrap();
//! assert!(parser.supports_parameter(params::TS_IGNORE_AAC_STREAM));
//! assert!(!parser.supports_parameter(params::MP4_IGNORE_EDIT_LISTS));
//! ```

pub mod error;
pub mod format;
pub mod input;
pub mod output;
pub mod params;
pub mod sample;
pub mod seek;
pub mod track;

mod extractor;
mod parser;
mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use format::{formats_for_mime, list_formats, Format};
pub use input::{ExtractorInput, IoInput, Prefix, ReadOutcome, SliceInput};
pub use output::{CapturedSample, CapturingSink, OutputSink};
pub use params::{ParameterValue, TsMode};
pub use parser::{MediaParser, Phase, SelectorConfig, DEFAULT_SNIFF_WINDOW};
pub use sample::{CryptoInfo, CryptoMode, EncryptionPattern, SampleFlags, Subsample};
pub use seek::{SeekMap, SeekPoint, SeekPoints};
pub use track::{drm, mime, DrmInitData, MediaType, PcmEncoding, SchemeData, SelectionFlags, TrackData, TrackFormat};
