//! Parsing sessions: format selection, the phase machine and seeking.

use std::io;

use crate::error::{Error, Result};
use crate::extractor::{Extractor, Progress};
use crate::format::Format;
use crate::input::{ExtractorInput, Prefix};
use crate::output::{Output, OutputSink, TrackTable};
use crate::params::{self, ParameterValue, Parameters};
use crate::seek::SeekPoint;

/// Bytes captured for sniffing when nothing else is configured.
pub const DEFAULT_SNIFF_WINDOW: usize = 128 * 1024;

/// Tuning of format auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Size of the prefix snapshot handed to every sniffer.
    pub sniff_window: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            sniff_window: DEFAULT_SNIFF_WINDOW,
        }
    }
}

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
pub enum Phase {
    /// Created; only parameters may be set.
    Uninitialized,
    /// Choosing the format on the first advance.
    Sniffing,
    /// Format chosen, track set not complete yet.
    ReadingMetadata,
    /// Every track is declared; advances deliver samples.
    EmittingSamples,
    /// A seek was requested and the next advance resumes from it.
    Seeking,
    /// The stream is exhausted. Further advances return `false`.
    Ended,
    /// A parsing error terminated the session.
    Failed,
    /// [`MediaParser::release`] dropped the extractor; advancing and seeking fail.
    Released,
}

/// One demultiplexing session over one stream.
///
/// The session owns its sink. Every event an extractor discovers is pushed
/// to the sink synchronously from within [`advance`](Self::advance).
pub struct MediaParser<S: OutputSink> {
    sink: S,
    candidates: Vec<Format>,
    /// Created by name: sniffing accepts the single candidate outright.
    named: bool,
    config: SelectorConfig,
    params: Parameters,
    phase: Phase,
    format: Option<Format>,
    extractor: Option<Extractor>,
    table: TrackTable,
}

impl<S: OutputSink + std::fmt::Debug> std::fmt::Debug for MediaParser<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaParser")
            .field("sink", &self.sink)
            .field("candidates", &self.candidates)
            .field("named", &self.named)
            .field("config", &self.config)
            .field("params", &self.params)
            .field("phase", &self.phase)
            .field("format", &self.format)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<S: OutputSink> MediaParser<S> {
    fn new(sink: S, candidates: Vec<Format>, named: bool) -> Self {
        Self {
            sink,
            candidates,
            named,
            config: SelectorConfig::default(),
            params: Parameters::default(),
            phase: Phase::Uninitialized,
            format: None,
            extractor: None,
            table: TrackTable::default(),
        }
    }

    /// Session committed to the format registered as `name`.
    pub fn create_by_name(name: &str, sink: S) -> Result<Self> {
        let format = Format::from_name(name)?;
        Ok(Self::new(sink, vec![format], true))
    }

    /// Session that sniffs `candidate_names` in registration order on the
    /// first advance. An empty list means every registered format.
    pub fn create_by_auto_detection(sink: S, candidate_names: &[&str]) -> Result<Self> {
        let mut chosen = Vec::with_capacity(candidate_names.len());
        for name in candidate_names {
            chosen.push(Format::from_name(name)?);
        }
        let candidates = if chosen.is_empty() {
            Format::ALL.to_vec()
        } else {
            Format::ALL.into_iter().filter(|f| chosen.contains(f)).collect()
        };
        Ok(Self::new(sink, candidates, false))
    }

    pub fn with_selector_config(mut self, config: SelectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates and stores a parameter. Unrecognised names are accepted
    /// and ignored.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<()> {
        if self.phase != Phase::Uninitialized {
            return Err(Error::InvalidState("parameters must be set before the first advance"));
        }
        self.params.set(name, value.into())
    }

    /// True if `name` is global or declared by one of the candidate formats.
    pub fn supports_parameter(&self, name: &str) -> bool {
        params::is_declared_for(name, &self.candidates)
    }

    /// Runs one parse step. Returns `false` once the stream is exhausted.
    ///
    /// An I/O error from `input` rewinds it to where the step began and
    /// leaves the session untouched, so the call may be retried.
    pub fn advance(&mut self, input: &mut dyn ExtractorInput) -> Result<bool> {
        match self.phase {
            Phase::Released => return Err(Error::InvalidState("session released")),
            Phase::Failed => return Err(Error::InvalidState("session failed")),
            Phase::Ended => return Ok(false),
            Phase::Uninitialized | Phase::Sniffing => self.select(input)?,
            Phase::ReadingMetadata | Phase::EmittingSamples | Phase::Seeking => {}
        }
        let Some(extractor) = self.extractor.as_mut() else {
            return Err(Error::InvalidState("no extractor selected"));
        };
        let position = input.position();
        let mut out = Output::new(&mut self.sink, &mut self.table, self.params.in_band_crypto_info);
        match extractor.read(input, &mut out) {
            Ok(Progress::Continue) => {
                if self.phase == Phase::Seeking || self.table.tracks_ended() {
                    self.phase = Phase::EmittingSamples;
                }
                Ok(true)
            }
            Ok(Progress::EndOfInput) => {
                tracing::debug!(format = self.parser_name(), "end of stream");
                self.phase = Phase::Ended;
                Ok(false)
            }
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!(%err, "stream ended inside a parse unit");
                self.phase = Phase::Ended;
                Ok(false)
            }
            Err(err) if err.is_io() => {
                if let Err(seek_err) = input.seek_to_position(position) {
                    tracing::warn!(%seek_err, position, "could not rewind after I/O error");
                }
                Err(err)
            }
            Err(err) => {
                tracing::debug!(%err, format = self.parser_name(), "session failed");
                self.phase = Phase::Failed;
                Err(err)
            }
        }
    }

    /// Picks the format and instantiates its extractor.
    fn select(&mut self, input: &mut dyn ExtractorInput) -> Result<()> {
        self.phase = Phase::Sniffing;
        let format = if self.named {
            self.candidates.first().copied()
        } else {
            let start = input.position();
            let prefix = match Prefix::capture(input, self.config.sniff_window) {
                Ok(prefix) => prefix,
                Err(err) => {
                    if let Err(seek_err) = input.seek_to_position(start) {
                        tracing::warn!(%seek_err, start, "could not rewind after sniffing failed");
                    }
                    return Err(err.into());
                }
            };
            self.candidates.iter().copied().find(|f| f.sniff(&prefix))
        };
        let Some(format) = format else {
            self.phase = Phase::Failed;
            return Err(Error::UnrecognizedInputFormat {
                candidates: self.candidates.iter().map(|f| f.name()).collect(),
            });
        };
        tracing::debug!(format = format.name(), named = self.named, "format selected");
        self.extractor = Some(Extractor::new(format, &self.params));
        self.format = Some(format);
        self.phase = Phase::ReadingMetadata;
        Ok(())
    }

    /// Resumes from `point` on the next advance. The caller must have moved
    /// the input to `point.position`.
    pub fn seek(&mut self, point: SeekPoint) -> Result<()> {
        match self.phase {
            Phase::Released => return Err(Error::InvalidState("session released")),
            Phase::Failed => return Err(Error::InvalidState("session failed")),
            _ => {}
        }
        let Some(extractor) = self.extractor.as_mut() else {
            return Err(Error::InvalidState("seek before the format was selected"));
        };
        if !self.table.has_seek_map() {
            return Err(Error::InvalidState("seek before a seek map was emitted"));
        }
        tracing::debug!(time_us = point.time_us, position = point.position, "seek");
        extractor.seek(point.position, point.time_us);
        self.table.reset_pending();
        self.phase = Phase::Seeking;
        Ok(())
    }

    /// Drops the extractor and its buffered state. Repeated calls are no-ops.
    pub fn release(&mut self) {
        if self.phase != Phase::Released {
            self.extractor = None;
            self.table = TrackTable::default();
            self.phase = Phase::Released;
        }
    }

    /// Name of the selected format, once known.
    pub fn parser_name(&self) -> Option<&'static str> {
        self.format.map(Format::name)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
