//! Extraction sessions over files and the reports printed by the CLI.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use sceneforged_extractor::{
    CapturedSample, CapturingSink, CryptoInfo, ExtractorInput, IoInput, MediaParser, ParameterValue, Phase, SeekMap, SeekPoint,
    SelectorConfig, TrackData,
};

use crate::config::Config;

pub type FileInput = IoInput<BufReader<File>>;

/// How a session picks its format and which parameters it receives.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Registered format name; `None` sniffs every format.
    pub format: Option<String>,
    /// Applied after the config file's `[parameters]`.
    pub parameters: Vec<(String, ParameterValue)>,
}

/// One parser bound to one open file.
pub struct Session {
    pub parser: MediaParser<CapturingSink>,
    pub input: FileInput,
}

impl Session {
    pub fn open(path: &Path, config: &Config, options: &SessionOptions) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let input = IoInput::new(BufReader::with_capacity(config.input.read_chunk, file))
            .with_context(|| format!("Failed to read {:?}", path))?;

        let sink = CapturingSink::metadata_only();
        let mut parser = match options.format.as_deref() {
            Some(name) => MediaParser::create_by_name(name, sink)?,
            None => MediaParser::create_by_auto_detection(sink, &[])?.with_selector_config(SelectorConfig {
                sniff_window: config.input.sniff_window,
            }),
        };

        let parameters = config.parameter_values()?.into_iter().chain(options.parameters.iter().cloned());
        for (name, value) in parameters {
            if !parser.supports_parameter(&name) {
                tracing::debug!("Parameter '{}' is not declared by the selected format(s)", name);
            }
            parser
                .set_parameter(&name, value)
                .with_context(|| format!("Invalid value for parameter '{}'", name))?;
        }

        Ok(Self { parser, input })
    }

    /// Advances until the stream ends or `limit` samples were captured.
    pub fn run(&mut self, limit: Option<usize>) -> Result<()> {
        loop {
            if limit.is_some_and(|n| self.parser.sink().samples.len() >= n) {
                return Ok(());
            }
            if !self.parser.advance(&mut self.input).context("Extraction failed")? {
                return Ok(());
            }
        }
    }

    /// Seeks to the floor seek point of `time_us` and extracts the rest.
    pub fn seek_and_resume(&mut self, time_us: i64) -> Result<SeekReport> {
        let seek_map = self
            .parser
            .sink()
            .seek_map()
            .cloned()
            .context("The stream did not provide a seek map")?;
        let point = seek_map.seek_points(time_us).first;
        tracing::debug!(time_us, position = point.position, "seeking");

        self.parser.sink_mut().clear_samples();
        self.input
            .seek_to_position(point.position)
            .with_context(|| format!("Failed to seek to byte {}", point.position))?;
        self.parser.seek(point)?;
        self.run(None)?;

        let samples = &self.parser.sink().samples;
        Ok(SeekReport {
            requested_us: time_us,
            seekable: seek_map.is_seekable(),
            point,
            samples_after: samples.len(),
            first_time_us: samples.iter().map(|s| s.time_us).min(),
        })
    }
}

/// Seek map summary.
#[derive(Debug, Clone, Serialize)]
pub struct SeekMapReport {
    pub strategy: &'static str,
    pub seekable: bool,
    pub duration_us: Option<i64>,
}

impl From<&SeekMap> for SeekMapReport {
    fn from(map: &SeekMap) -> Self {
        Self {
            strategy: map.strategy(),
            seekable: map.is_seekable(),
            duration_us: map.duration_us(),
        }
    }
}

/// Result of the `probe` command.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub format: Option<&'static str>,
    pub phase: Phase,
    pub track_count: Option<usize>,
    pub tracks: Vec<Option<TrackData>>,
    pub seek_map: Option<SeekMapReport>,
    pub sample_count: usize,
    pub samples_per_track: Vec<usize>,
}

impl ProbeReport {
    pub fn from_parser(parser: &MediaParser<CapturingSink>) -> Self {
        let sink = parser.sink();
        let samples_per_track = (0..sink.tracks.len()).map(|i| sink.samples_for(i).count()).collect();
        Self {
            format: parser.parser_name(),
            phase: parser.phase(),
            track_count: sink.track_count,
            tracks: sink.tracks.clone(),
            seek_map: sink.seek_map().map(SeekMapReport::from),
            sample_count: sink.samples.len(),
            samples_per_track,
        }
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Format: {}", self.format.unwrap_or("unknown"))?;
        writeln!(f, "Tracks: {}", self.tracks.len())?;
        for (i, track) in self.tracks.iter().enumerate() {
            let Some(track) = track else {
                writeln!(f, "  [{}] (no format)", i)?;
                continue;
            };
            let format = &track.format;
            write!(
                f,
                "  [{}] {} {}",
                i,
                track.media_type.as_str(),
                format.sample_mime_type.as_deref().unwrap_or("?")
            )?;
            if let Some(codecs) = &format.codecs {
                write!(f, " ({})", codecs)?;
            }
            if let (Some(w), Some(h)) = (format.width, format.height) {
                write!(f, " {}x{}", w, h)?;
            }
            if let Some(rate) = format.sample_rate {
                write!(f, " {} Hz", rate)?;
            }
            if let Some(channels) = format.channel_count {
                write!(f, " {}ch", channels)?;
            }
            if let Some(lang) = &format.language {
                write!(f, " [{}]", lang)?;
            }
            if let Some(drm) = &track.drm_init_data {
                write!(f, " drm={}", drm.scheme_type.as_deref().unwrap_or("?"))?;
            }
            writeln!(f, " samples={}", self.samples_per_track.get(i).copied().unwrap_or(0))?;
        }
        match &self.seek_map {
            Some(map) => {
                write!(f, "Seek map: {}", map.strategy)?;
                if let Some(d) = map.duration_us {
                    write!(f, ", duration {}", format_time(d))?;
                }
                writeln!(f)?;
            }
            None => writeln!(f, "Seek map: none")?,
        }
        write!(f, "Samples: {}", self.sample_count)
    }
}

/// One line of the `dump` command.
#[derive(Debug, Clone, Serialize)]
pub struct SampleLine {
    pub track: usize,
    pub time_us: i64,
    pub flags: String,
    pub size: usize,
    pub crypto: Option<CryptoInfo>,
}

impl From<&CapturedSample> for SampleLine {
    fn from(sample: &CapturedSample) -> Self {
        Self {
            track: sample.track_index,
            time_us: sample.time_us,
            flags: sample.flags.to_string(),
            size: sample.size,
            crypto: sample.crypto.clone(),
        }
    }
}

impl fmt::Display for SampleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.track, self.time_us, self.flags, self.size)?;
        match &self.crypto {
            Some(c) => write!(
                f,
                "\t{:?} iv={} subsamples={}",
                c.mode,
                hex(&c.iv),
                c.subsamples.len()
            ),
            None => Ok(()),
        }
    }
}

/// Result of the `seek` command.
#[derive(Debug, Clone, Serialize)]
pub struct SeekReport {
    pub requested_us: i64,
    pub seekable: bool,
    pub point: SeekPoint,
    pub samples_after: usize,
    pub first_time_us: Option<i64>,
}

impl fmt::Display for SeekReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Requested: {}", format_time(self.requested_us))?;
        if !self.seekable {
            writeln!(f, "Stream is not seekable, restarted from the beginning")?;
        }
        writeln!(
            f,
            "Seek point: {} at byte {}",
            format_time(self.point.time_us),
            self.point.position
        )?;
        write!(f, "Samples after seek: {}", self.samples_after)?;
        if let Some(t) = self.first_time_us {
            write!(f, " (first at {})", format_time(t))?;
        }
        Ok(())
    }
}

fn format_time(us: i64) -> String {
    format!("{}.{:06} s", us / 1_000_000, (us % 1_000_000).abs())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sceneforged_extractor::{CryptoMode, SampleFlags, Subsample};

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0.000000 s");
        assert_eq!(format_time(2_500_000), "2.500000 s");
        assert_eq!(format_time(23_219), "0.023219 s");
    }

    #[test]
    fn test_sample_line() {
        let sample = CapturedSample {
            track_index: 1,
            time_us: 40_000,
            flags: SampleFlags::KEY_FRAME,
            size: 367,
            data: Default::default(),
            crypto: None,
        };
        assert_eq!(SampleLine::from(&sample).to_string(), "1\t40000\tkey\t367");

        let encrypted = CapturedSample {
            flags: SampleFlags::KEY_FRAME | SampleFlags::ENCRYPTED,
            crypto: Some(CryptoInfo {
                mode: CryptoMode::AesCtr,
                key_id: None,
                iv: [0xab; 16],
                subsamples: vec![Subsample::new(7, 360)],
                pattern: None,
            }),
            ..sample
        };
        let line = SampleLine::from(&encrypted).to_string();
        assert!(line.starts_with("1\t40000\tkey|encrypted\t367\tAesCtr iv=abab"));
        assert!(line.ends_with("subsamples=1"));
    }
}
