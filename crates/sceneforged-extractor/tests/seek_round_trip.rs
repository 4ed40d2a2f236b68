mod common;

use sceneforged_extractor::{params, CapturingSink, MediaParser, SeekPoint, SliceInput};

use common::{
    adts_stream, amr_nb_stream, drain, flac_file, flv_file, fragmented_mp4, mp3_stream, ogg_vorbis_file,
    progressive_mp4, ps_mpeg_audio_stream, seek_to, ts_aac_stream, wav_file, webm_file,
};

/// Extracts `stream` fully, seeks to each third of the duration and
/// resumes to the end, then restarts from the beginning and compares the
/// sample count with the first pass.
fn round_trip(name: &str, stream: Vec<u8>, parameters: &[&str]) {
    let mut parser = MediaParser::create_by_name(name, CapturingSink::metadata_only()).unwrap();
    for parameter in parameters {
        parser.set_parameter(parameter, true).unwrap();
    }
    let mut input = SliceInput::new(stream);
    drain(&mut parser, &mut input).unwrap();
    let first_pass = parser.sink().samples.len();
    assert!(first_pass > 0, "{name}: no samples");
    let seek_map = parser.sink().seek_map().cloned().unwrap();

    if let (true, Some(duration)) = (seek_map.is_seekable(), seek_map.duration_us()) {
        for k in 0..=3 {
            let target = duration * k / 3;
            let point = seek_map.seek_points(target).first;
            assert!(point.time_us <= target, "{name}: {point:?} after {target}");
            parser.sink_mut().clear_samples();
            seek_to(&mut parser, &mut input, point).unwrap();
            drain(&mut parser, &mut input).unwrap_or_else(|e| panic!("{name}: resuming at {target}: {e}"));
            assert!(parser.sink().samples.len() <= first_pass);
        }
    }

    parser.sink_mut().clear_samples();
    seek_to(&mut parser, &mut input, SeekPoint::START).unwrap();
    drain(&mut parser, &mut input).unwrap();
    assert_eq!(parser.sink().samples.len(), first_pass, "{name}: second pass");
}

#[test]
fn test_adts_constant_bitrate() {
    round_trip("adts", adts_stream(200), &[params::ADTS_ENABLE_CBR_SEEKING]);
}

#[test]
fn test_adts_scanned_index() {
    round_trip("adts", adts_stream(50), &[]);
}

#[test]
fn test_mp3_constant_bitrate() {
    round_trip("mp3", mp3_stream(120), &[]);
}

#[test]
fn test_amr_constant_bitrate() {
    round_trip("amr", amr_nb_stream(150), &[params::AMR_ENABLE_CBR_SEEKING]);
}

#[test]
fn test_wav_blocks() {
    round_trip("wav", wav_file(8_000, 8_000), &[]);
}

#[test]
fn test_ts_pcr_bisection() {
    round_trip("ts", ts_aac_stream(120, 3_600), &[]);
}

#[test]
fn test_ogg_granule_bisection() {
    round_trip("ogg", ogg_vorbis_file(30), &[]);
}

#[test]
fn test_mp4_sync_sample_index() {
    round_trip("mp4", progressive_mp4(60, 0), &[]);
}

#[test]
fn test_fragmented_mp4_sidx() {
    round_trip("fmp4", fragmented_mp4(6, 0), &[]);
}

#[test]
fn test_matroska_cues() {
    round_trip("matroska", webm_file(4, true), &[]);
}

#[test]
fn test_matroska_without_cues() {
    round_trip("matroska", webm_file(2, false), &[]);
}

#[test]
fn test_flac_binary_search() {
    round_trip("flac", flac_file(40), &[]);
}

#[test]
fn test_flv_unseekable() {
    round_trip("flv", flv_file(30), &[]);
}

#[test]
fn test_ps_scr_bisection() {
    round_trip("ps", ps_mpeg_audio_stream(60), &[]);
}
