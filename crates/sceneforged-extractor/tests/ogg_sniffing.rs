mod common;

use assert_matches::assert_matches;
use sceneforged_extractor::{CapturingSink, Error, Format, MediaParser, Phase, Prefix, SliceInput};

use common::{drain, flac_mapping_header, ogg_page, ogg_vorbis_file, opus_head, OGG_FIRST};

#[test]
fn test_opus_first_page_is_rejected() {
    let mut file = ogg_page(7, 0, OGG_FIRST, 0, &[&opus_head(312)]);
    file.extend(ogg_page(7, 1, 0, 0, &[b"OpusTags\0\0\0\0\0\0\0\0"]));
    let mut parser = MediaParser::create_by_auto_detection(CapturingSink::new(), &["ogg"]).unwrap();
    let err = parser.advance(&mut SliceInput::new(file)).unwrap_err();
    assert_matches!(err, Error::UnrecognizedInputFormat { ref candidates } if candidates == &["ogg"]);
    assert_eq!(parser.phase(), Phase::Failed);
}

#[test]
fn test_vorbis_is_accepted_and_extracted() {
    let mut parser = MediaParser::create_by_auto_detection(CapturingSink::new(), &["ogg"]).unwrap();
    drain(&mut parser, &mut SliceInput::new(ogg_vorbis_file(10))).unwrap();
    assert_eq!(parser.parser_name(), Some("ogg"));
    let sink = parser.sink();
    assert_eq!(sink.track(0).unwrap().format.sample_mime_type.as_deref(), Some("audio/vorbis"));
    assert_eq!(sink.samples.len(), 20);
    assert_eq!(sink.seek_map().unwrap().duration_us(), Some(1_000_000));
}

#[test]
fn test_flac_first_page_is_accepted() {
    let page = ogg_page(7, 0, OGG_FIRST, 0, &[&flac_mapping_header()]);
    assert!(Format::Ogg.sniff(&Prefix::from_bytes(page)));
}
