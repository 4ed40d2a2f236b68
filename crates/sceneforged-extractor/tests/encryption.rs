mod common;

use sceneforged_extractor::{params, CapturingSink, CryptoMode, MediaParser, SliceInput, Subsample};

use common::{drain, encrypted_fragmented_file, encrypted_sizes, CLEAR_BYTES, KEY_ID};

fn extract(in_band: bool) -> CapturingSink {
    let mut parser = MediaParser::create_by_auto_detection(CapturingSink::new(), &["fmp4", "mp4"]).unwrap();
    parser.set_parameter(params::IN_BAND_CRYPTO_INFO, in_band).unwrap();
    drain(&mut parser, &mut SliceInput::new(encrypted_fragmented_file())).unwrap();
    assert_eq!(parser.parser_name(), Some("fmp4"));
    parser.into_sink()
}

fn iv(hex: &str) -> [u8; 16] {
    let mut iv = [0u8; 16];
    for (i, byte) in iv.iter_mut().take(hex.len() / 2).enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).unwrap();
    }
    iv
}

#[test]
fn test_out_of_band_ivs_and_subsamples() {
    let sink = extract(false);
    assert_eq!(sink.samples.len(), encrypted_sizes().len());

    let first = sink.samples[0].crypto.as_ref().unwrap();
    assert_eq!(first.iv, iv("aab4ed0108dd5267"));
    assert_eq!(first.subsamples, vec![Subsample::new(u32::from(CLEAR_BYTES), 360)]);
    assert_eq!(first.mode, CryptoMode::AesCtr);
    assert_eq!(first.key_id, None);

    let twelfth = sink.samples[11].crypto.as_ref().unwrap();
    assert_eq!(twelfth.iv, iv("aab4ed0108dd5272"));
    assert_eq!(twelfth.subsamples, vec![Subsample::new(u32::from(CLEAR_BYTES), 488)]);
    assert_ne!(twelfth.iv, first.iv);
}

#[test]
fn test_subsamples_cover_every_sample() {
    let sink = extract(false);
    for sample in &sink.samples {
        let crypto = sample.crypto.as_ref().unwrap();
        assert!(sample.flags.is_encrypted());
        assert_eq!(crypto.total_bytes(), sample.size as u64);
        assert_eq!(sample.data.len(), sample.size);
    }
}

#[test]
fn test_drm_init_data_names_scheme() {
    let sink = extract(false);
    let track = sink.track(0).unwrap();
    assert_eq!(track.format.sample_mime_type.as_deref(), Some("audio/mp4a-latm"));
    let drm = track.drm_init_data.as_ref().unwrap();
    assert_eq!(drm.scheme_type.as_deref(), Some("cenc"));
}

#[test]
fn test_in_band_delivery_keeps_key_id() {
    let sink = extract(true);
    for sample in &sink.samples {
        assert_eq!(sample.crypto.as_ref().unwrap().key_id, Some(KEY_ID));
    }
}
