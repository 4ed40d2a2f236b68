//! Byte-exact stream builders shared by the integration tests.
#![allow(dead_code)]

use sceneforged_extractor::{CapturingSink, ExtractorInput, MediaParser, Result, SeekPoint};

/// Runs `parser` until the stream ends.
pub fn drain(parser: &mut MediaParser<CapturingSink>, input: &mut dyn ExtractorInput) -> Result<()> {
    while parser.advance(input)? {}
    Ok(())
}

/// Advances until at least `count` samples were captured in total.
pub fn advance_until_samples(
    parser: &mut MediaParser<CapturingSink>,
    input: &mut dyn ExtractorInput,
    count: usize,
) -> Result<()> {
    while parser.sink().samples.len() < count {
        if !parser.advance(input)? {
            break;
        }
    }
    Ok(())
}

/// Repositions `input` at `point` and tells the session about it.
pub fn seek_to(parser: &mut MediaParser<CapturingSink>, input: &mut dyn ExtractorInput, point: SeekPoint) -> Result<()> {
    input.seek_to_position(point.position)?;
    parser.seek(point)
}

/// CRC-32, polynomial 0x04C11DB7, MSB first, no final xor.
pub fn crc32(init: u32, data: &[u8]) -> u32 {
    let mut crc = init;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }
    crc
}

// Elementary audio.

/// AAC-LC stereo 44.1 kHz ADTS frame without CRC.
pub fn adts_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() + 7;
    let mut frame = vec![
        0xFF,
        0xF1,
        (1 << 6) | (4 << 2),
        (2 << 6) | ((len >> 11) & 0x03) as u8,
        ((len >> 3) & 0xFF) as u8,
        (((len & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ];
    frame.extend_from_slice(payload);
    frame
}

pub fn adts_stream(frames: usize) -> Vec<u8> {
    (0..frames).flat_map(|i| adts_frame(&[i as u8; 64])).collect()
}

/// MPEG-1 layer III, 128 kbit/s, 44.1 kHz stereo: 417-byte frames.
pub fn mp3_stream(frames: usize) -> Vec<u8> {
    let mut frame = 0xFFFB_9064u32.to_be_bytes().to_vec();
    frame.resize(417, 0);
    frame.repeat(frames)
}

/// Narrowband AMR at 12.2 kbit/s: 32-byte frames of 20 ms.
pub fn amr_nb_stream(frames: usize) -> Vec<u8> {
    let mut frame = vec![(7 << 3) | 0x04];
    frame.resize(32, 0x5A);
    [b"#!AMR\n".to_vec(), frame.repeat(frames)].concat()
}

/// 16-bit stereo PCM WAV holding `frames` frames.
pub fn wav_file(sample_rate: u32, frames: u32) -> Vec<u8> {
    let data_len = frames * 4;
    let mut file = b"RIFF".to_vec();
    file.extend_from_slice(&(36 + data_len).to_le_bytes());
    file.extend_from_slice(b"WAVEfmt ");
    file.extend_from_slice(&16u32.to_le_bytes());
    file.extend_from_slice(&1u16.to_le_bytes());
    file.extend_from_slice(&2u16.to_le_bytes());
    file.extend_from_slice(&sample_rate.to_le_bytes());
    file.extend_from_slice(&(sample_rate * 4).to_le_bytes());
    file.extend_from_slice(&4u16.to_le_bytes());
    file.extend_from_slice(&16u16.to_le_bytes());
    file.extend_from_slice(b"data");
    file.extend_from_slice(&data_len.to_le_bytes());
    file.extend((0..data_len).map(|i| i as u8));
    file
}

// H.264.

/// Baseline SPS for 320x240.
pub const AVC_SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x1E, 0xF4, 0x0A, 0x0F, 0xC8];
pub const AVC_PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];
pub const AVC_IDR: [u8; 3] = [0x65, 0x88, 0x84];
/// P slice starting a picture.
pub const AVC_SLICE: [u8; 3] = [0x41, 0x9A, 0x02];
/// Non-IDR I slice starting a picture.
pub const AVC_INTRA_SLICE: [u8; 3] = [0x41, 0b1000_1000, 0];

pub fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
    nals.iter().flat_map(|nal| [&[0u8, 0, 0, 1][..], nal].concat()).collect()
}

// MPEG-2 transport streams.

pub const TS_PACKET: usize = 188;
pub const PMT_PID: u16 = 0x1000;
pub const AUDIO_PID: u16 = 0x101;
pub const VIDEO_PID: u16 = 0x100;
pub const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_HDMV_DTS: u8 = 0x82;
pub const STREAM_TYPE_SPLICE_INFO: u8 = 0x86;

/// Writes transport packets for one PID with a running continuity counter.
pub struct Packetizer {
    pid: u16,
    continuity: u8,
}

impl Packetizer {
    pub fn new(pid: u16) -> Self {
        Self { pid, continuity: 0 }
    }

    fn packet(&mut self, unit_start: bool, pcr: Option<i64>, payload: &[u8]) -> (Vec<u8>, usize) {
        let mut adaptation = Vec::new();
        if let Some(pcr) = pcr {
            adaptation.push(0x10);
            adaptation.extend_from_slice(&[
                (pcr >> 25) as u8,
                (pcr >> 17) as u8,
                (pcr >> 9) as u8,
                (pcr >> 1) as u8,
                (((pcr & 1) << 7) as u8) | 0x7E,
                0,
            ]);
        }
        let overhead = if adaptation.is_empty() { 0 } else { 1 + adaptation.len() };
        let take = payload.len().min(TS_PACKET - 4 - overhead);
        let mut stuffing = TS_PACKET - 4 - overhead - take;
        if adaptation.is_empty() && stuffing > 0 {
            stuffing -= 1;
            if stuffing > 0 {
                adaptation.push(0);
                stuffing -= 1;
            }
        }
        let has_adaptation = pcr.is_some() || take < TS_PACKET - 4;
        adaptation.resize(adaptation.len() + stuffing, 0xFF);
        let mut out = vec![
            0x47,
            (if unit_start { 0x40 } else { 0 }) | (self.pid >> 8) as u8,
            self.pid as u8,
            (if has_adaptation { 0x30 } else { 0x10 }) | self.continuity,
        ];
        if has_adaptation {
            out.push(adaptation.len() as u8);
            out.extend_from_slice(&adaptation);
        }
        out.extend_from_slice(&payload[..take]);
        assert_eq!(out.len(), TS_PACKET);
        self.continuity = (self.continuity + 1) & 0x0F;
        (out, take)
    }

    /// Splits `unit` over as many packets as needed; `pcr` goes on the first.
    pub fn packets(&mut self, unit: &[u8], pcr: Option<i64>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut rest = unit;
        let mut first = true;
        while first || !rest.is_empty() {
            let (packet, took) = self.packet(first, if first { pcr } else { None }, rest);
            out.extend_from_slice(&packet);
            rest = &rest[took..];
            first = false;
        }
        out
    }

    /// A PSI section behind its pointer field.
    pub fn section(&mut self, section: &[u8]) -> Vec<u8> {
        let mut unit = vec![0];
        unit.extend_from_slice(section);
        self.packets(&unit, None)
    }
}

fn long_section(table_id: u8, extension: u16, body: &[u8]) -> Vec<u8> {
    let len = 5 + body.len() + 4;
    let mut out = vec![table_id, 0xB0 | (len >> 8) as u8, len as u8];
    out.extend_from_slice(&extension.to_be_bytes());
    out.extend_from_slice(&[0xC1, 0, 0]);
    out.extend_from_slice(body);
    let crc = crc32(0xFFFF_FFFF, &out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

pub fn pat(program: u16, pmt_pid: u16) -> Vec<u8> {
    pat_programs(&[(program, pmt_pid)])
}

/// PAT listing `(program_number, pmt_pid)` pairs in order.
pub fn pat_programs(programs: &[(u16, u16)]) -> Vec<u8> {
    let body: Vec<u8> = programs
        .iter()
        .flat_map(|&(program, pmt_pid)| [program.to_be_bytes(), (0xE000 | pmt_pid).to_be_bytes()].concat())
        .collect();
    long_section(0x00, 1, &body)
}

/// PMT with one elementary stream that also carries the PCR.
pub fn pmt(program: u16, stream_type: u8, pid: u16) -> Vec<u8> {
    pmt_streams(program, pid, &[(stream_type, pid)])
}

/// PMT listing `(stream_type, pid)` pairs without descriptors.
pub fn pmt_streams(program: u16, pcr_pid: u16, streams: &[(u8, u16)]) -> Vec<u8> {
    let mut body = (0xE000 | pcr_pid).to_be_bytes().to_vec();
    body.extend_from_slice(&[0xF0, 0x00]);
    for &(stream_type, pid) in streams {
        body.push(stream_type);
        body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
        body.extend_from_slice(&[0xF0, 0x00]);
    }
    long_section(0x02, program, &body)
}

/// PAT and PMT packets of program 1, whose first stream carries the PCR.
pub fn ts_program_tables(streams: &[(u8, u16)]) -> Vec<u8> {
    let mut out = Packetizer::new(0).section(&pat(1, PMT_PID));
    out.extend(Packetizer::new(PMT_PID).section(&pmt_streams(1, streams[0].1, streams)));
    out
}

/// SCTE-35 `splice_null` command section.
pub fn splice_null_section() -> Vec<u8> {
    let body = [0, 0, 0, 0, 0, 0, 0, 0xFF, 0xF0, 0x00, 0x00, 0x00, 0x00];
    let mut out = vec![0xFC, 0x30, (body.len() + 4) as u8];
    out.extend_from_slice(&body);
    let crc = crc32(0xFFFF_FFFF, &out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// DTS core frame: 512 samples of 5.1 at 48 kHz in 1024 bytes.
pub fn dts_frame() -> Vec<u8> {
    let mut frame = vec![0x7F, 0xFE, 0x80, 0x01, 0xFC, 0x3C, 0x3F, 0xF2, 0x74, 0x00, 0x06];
    frame.resize(1024, 0);
    frame
}

fn pes_timestamp(marker: u8, ts: i64) -> [u8; 5] {
    [
        (marker << 4) | (((ts >> 29) & 0x0E) as u8) | 1,
        (ts >> 22) as u8,
        (((ts >> 14) & 0xFE) as u8) | 1,
        (ts >> 7) as u8,
        (((ts << 1) & 0xFE) as u8) | 1,
    ]
}

/// Bounded PES packet with a PTS.
pub fn pes(stream_id: u8, pts: i64, payload: &[u8]) -> Vec<u8> {
    let len = 3 + 5 + payload.len();
    let mut out = vec![0, 0, 1, stream_id];
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&[0x84, 0x80, 5]);
    out.extend_from_slice(&pes_timestamp(0x2, pts));
    out.extend_from_slice(payload);
    out
}

/// One ADTS program of `pes_count` single-frame PES packets `pts_step`
/// ticks apart. Every PES packet carries a PCR equal to its PTS; the first
/// is at one second.
pub fn ts_aac_stream(pes_count: usize, pts_step: i64) -> Vec<u8> {
    let mut pat_writer = Packetizer::new(0);
    let mut pmt_writer = Packetizer::new(PMT_PID);
    let mut audio = Packetizer::new(AUDIO_PID);
    let mut out = pat_writer.section(&pat(1, PMT_PID));
    out.extend(pmt_writer.section(&pmt(1, STREAM_TYPE_AAC_ADTS, AUDIO_PID)));
    for i in 0..pes_count {
        let pts = 90_000 + i as i64 * pts_step;
        let frame = adts_frame(&[i as u8; 40]);
        out.extend(audio.packets(&pes(0xC0, pts, &frame), Some(pts)));
    }
    out
}

// ISO base media.

pub fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

pub fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut content = flags.to_be_bytes().to_vec();
    content[0] = version;
    content.extend_from_slice(body);
    mp4_box(kind, &content)
}

pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn ftyp() -> Vec<u8> {
    mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2dash")
}

fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = words(&[0, 0, timescale, duration]);
    body.resize(96, 0);
    full_box(b"mvhd", 0, 0, &body)
}

/// `trak` for track `id` with a single sample entry. `edits` are
/// `(segment_duration, media_time)` pairs of an `elst`.
fn trak(id: u32, handler: &[u8; 4], timescale: u32, sample_entry: Vec<u8>, tables: Vec<u8>, edits: &[(u32, i32)]) -> Vec<u8> {
    let mut tkhd = words(&[0, 0, id, 0, 0]);
    tkhd.resize(80, 0);
    let mdhd = full_box(b"mdhd", 0, 0, &[words(&[0, 0, timescale, 0]), vec![0x55, 0xc4, 0, 0]].concat());
    let hdlr = full_box(b"hdlr", 0, 0, &[&[0u8; 4][..], &handler[..], &[0u8; 13][..]].concat());
    let stsd = full_box(b"stsd", 0, 0, &[words(&[1]), sample_entry].concat());
    let stbl = mp4_box(b"stbl", &[stsd, tables].concat());
    let mdia = mp4_box(b"mdia", &[mdhd, hdlr, mp4_box(b"minf", &stbl)].concat());
    let mut children = full_box(b"tkhd", 0, 7, &tkhd);
    if !edits.is_empty() {
        let mut elst = words(&[edits.len() as u32]);
        for &(segment_duration, media_time) in edits {
            elst.extend(words(&[segment_duration, media_time as u32, 0x0001_0000]));
        }
        children.extend(mp4_box(b"edts", &full_box(b"elst", 0, 0, &elst)));
    }
    mp4_box(b"trak", &[children, mdia].concat())
}

/// 320x240 `vp08` visual sample entry.
fn vp08_entry() -> Vec<u8> {
    let mut entry = vec![0u8; 78];
    entry[7] = 1;
    entry[24..26].copy_from_slice(&320u16.to_be_bytes());
    entry[26..28].copy_from_slice(&240u16.to_be_bytes());
    mp4_box(b"vp08", &entry)
}

/// Sample tables of a track whose samples all live in fragments.
fn empty_tables() -> Vec<u8> {
    [
        full_box(b"stts", 0, 0, &words(&[0])),
        full_box(b"stsc", 0, 0, &words(&[0])),
        full_box(b"stsz", 0, 0, &words(&[0, 0])),
        full_box(b"stco", 0, 0, &words(&[0])),
    ]
    .concat()
}

pub const MP4_FRAME_MS: u32 = 40;
pub const MP4_FRAME_SIZE: u32 = 8;
/// Frames between sync samples in the MP4 builders.
pub const MP4_GOP: u32 = 10;

/// Progressive MP4 with one VP8 track of `frames` 8-byte frames 40 ms
/// apart in a single chunk, sync samples every tenth frame. A non-zero
/// `delay_ms` adds an empty edit delaying the presentation.
pub fn progressive_mp4(frames: u32, delay_ms: u32) -> Vec<u8> {
    let sync: Vec<u32> = (0..frames).step_by(MP4_GOP as usize).map(|i| i + 1).collect();
    let duration = frames * MP4_FRAME_MS;
    let edits: Vec<(u32, i32)> = if delay_ms > 0 { vec![(delay_ms, -1), (duration, 0)] } else { Vec::new() };
    let build = |chunk_offset: u32| {
        let tables = [
            full_box(b"stts", 0, 0, &words(&[1, frames, MP4_FRAME_MS])),
            full_box(b"stss", 0, 0, &[words(&[sync.len() as u32]), words(&sync)].concat()),
            full_box(b"stsc", 0, 0, &words(&[1, 1, frames, 1])),
            full_box(b"stsz", 0, 0, &words(&[MP4_FRAME_SIZE, frames])),
            full_box(b"stco", 0, 0, &words(&[1, chunk_offset])),
        ]
        .concat();
        let video = trak(1, b"vide", 1_000, vp08_entry(), tables, &edits);
        mp4_box(b"moov", &[mvhd(1_000, duration + delay_ms), video].concat())
    };
    let head_len = ftyp().len() + build(0).len() + 8;
    let data: Vec<u8> = (0..frames).flat_map(|i| vec![i as u8; MP4_FRAME_SIZE as usize]).collect();
    [ftyp(), build(head_len as u32), mp4_box(b"mdat", &data)].concat()
}

/// Fragmented MP4 with one VP8 track: `fragments` fragments of ten 40 ms
/// frames, the first of each a sync sample. A `sidx` indexes the
/// fragments, and each `tfdt` is `tfdt_offset_ms` ahead of the fragment's
/// actual start.
pub fn fragmented_mp4(fragments: u32, tfdt_offset_ms: u32) -> Vec<u8> {
    const NON_SYNC: u32 = 0x0001_0000;
    let trex = full_box(b"trex", 0, 0, &words(&[1, 1, MP4_FRAME_MS, MP4_FRAME_SIZE, NON_SYNC]));
    let video = trak(1, b"vide", 1_000, vp08_entry(), empty_tables(), &[]);
    let fragment_ms = MP4_GOP * MP4_FRAME_MS;
    let moov = mp4_box(
        b"moov",
        &[mvhd(1_000, fragments * fragment_ms), mp4_box(b"mvex", &trex), video].concat(),
    );
    let fragment = |k: u32| {
        let build = |data_offset: u32| {
            let tfhd = full_box(b"tfhd", 0, 0x02_0000, &words(&[1]));
            let decode_time = u64::from(tfdt_offset_ms + k * fragment_ms);
            let tfdt = full_box(b"tfdt", 1, 0, &decode_time.to_be_bytes());
            // Data offset and first-sample flags; the first sample is a sync sample.
            let trun = full_box(b"trun", 0, 0x5, &words(&[MP4_GOP, data_offset, 0]));
            let mfhd = full_box(b"mfhd", 0, 0, &words(&[k + 1]));
            mp4_box(b"moof", &[mfhd, mp4_box(b"traf", &[tfhd, tfdt, trun].concat())].concat())
        };
        let moof = build(build(0).len() as u32 + 8);
        let data: Vec<u8> = (0..MP4_GOP)
            .flat_map(|i| vec![(k * MP4_GOP + i) as u8; MP4_FRAME_SIZE as usize])
            .collect();
        [moof, mp4_box(b"mdat", &data)].concat()
    };
    let fragments: Vec<Vec<u8>> = (0..fragments).map(fragment).collect();
    let mut sidx = words(&[1, 1_000, tfdt_offset_ms, 0]);
    sidx.extend_from_slice(&[0, 0]);
    sidx.extend_from_slice(&(fragments.len() as u16).to_be_bytes());
    for fragment in &fragments {
        sidx.extend(words(&[fragment.len() as u32, fragment_ms, 0x9000_0000]));
    }
    [ftyp(), moov, full_box(b"sidx", 0, 0, &sidx), fragments.concat()].concat()
}

/// `esds` for AAC-LC stereo 44.1 kHz.
fn esds() -> Vec<u8> {
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(&[0x03, 25, 0, 1, 0]);
    body.extend_from_slice(&[0x04, 17, 0x40, 0x15, 0, 0, 0, 0, 0, 0, 0]);
    body.extend_from_slice(&128_000u32.to_be_bytes());
    body.extend_from_slice(&[0x05, 2, 0x12, 0x10]);
    mp4_box(b"esds", &body)
}

/// Key id of the encrypted fragmented file.
pub const KEY_ID: [u8; 16] = [0x11; 16];
/// First per-sample IV; each later sample increments it.
pub const FIRST_IV: u64 = 0xaab4_ed01_08dd_5267;
pub const CLEAR_BYTES: u16 = 7;

/// `enca` audio track protected with `cenc` and 8-byte per-sample IVs.
fn encrypted_audio_trak(id: u32) -> Vec<u8> {
    let mut tenc_body = vec![0, 0, 1, 8];
    tenc_body.extend_from_slice(&KEY_ID);
    let sinf = mp4_box(
        b"sinf",
        &[
            mp4_box(b"frma", b"mp4a"),
            full_box(b"schm", 0, 0, b"cenc\0\x01\0\0"),
            mp4_box(b"schi", &full_box(b"tenc", 0, 0, &tenc_body)),
        ]
        .concat(),
    );
    let mut entry = vec![0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0, 16, 0, 0, 0, 0];
    entry.extend_from_slice(&(44_100u32 << 16).to_be_bytes());
    entry.extend(esds());
    entry.extend(sinf);
    trak(id, b"soun", 44_100, mp4_box(b"enca", &entry), empty_tables(), &[])
}

/// Encrypted sizes of the samples of [`encrypted_fragmented_file`].
pub fn encrypted_sizes() -> Vec<u32> {
    (0..16).map(|i| if i == 11 { 488 } else { 360 }).collect()
}

/// Fragmented MP4 with one `cenc` audio track and one fragment whose
/// samples each hold one subsample of 7 clear bytes. IVs live in `senc`.
pub fn encrypted_fragmented_file() -> Vec<u8> {
    let trex = full_box(b"trex", 0, 0, &words(&[1, 1, 1024, 0, 0]));
    let moov = mp4_box(b"moov", &[mvhd(1_000, 0), mp4_box(b"mvex", &trex), encrypted_audio_trak(1)].concat());

    let encrypted = encrypted_sizes();
    let sizes: Vec<u32> = encrypted.iter().map(|e| e + u32::from(CLEAR_BYTES)).collect();
    let mut senc_body = words(&[encrypted.len() as u32]);
    for (i, &enc) in encrypted.iter().enumerate() {
        senc_body.extend_from_slice(&(FIRST_IV + i as u64).to_be_bytes());
        senc_body.extend_from_slice(&1u16.to_be_bytes());
        senc_body.extend_from_slice(&CLEAR_BYTES.to_be_bytes());
        senc_body.extend_from_slice(&enc.to_be_bytes());
    }
    let build = |data_offset: u32| {
        let tfhd = full_box(b"tfhd", 0, 0x02_0000, &words(&[1]));
        let tfdt = full_box(b"tfdt", 1, 0, &[0u8; 8]);
        let mut trun_body = words(&[sizes.len() as u32, data_offset]);
        trun_body.extend(words(&sizes));
        let trun = full_box(b"trun", 0, 0x201, &trun_body);
        let senc = full_box(b"senc", 0, 0x2, &senc_body);
        let mfhd = full_box(b"mfhd", 0, 0, &words(&[1]));
        mp4_box(b"moof", &[mfhd, mp4_box(b"traf", &[tfhd, tfdt, trun, senc].concat())].concat())
    };
    let moof = build(build(0).len() as u32 + 8);
    let data: Vec<u8> = sizes
        .iter()
        .enumerate()
        .flat_map(|(i, &size)| vec![i as u8; size as usize])
        .collect();
    [ftyp(), moov, moof, mp4_box(b"mdat", &data)].concat()
}

// Ogg.

pub const OGG_FIRST: u8 = 0x02;
pub const OGG_LAST: u8 = 0x04;

/// One Ogg page carrying `packets`, each ending on this page.
pub fn ogg_page(serial: u32, sequence: u32, flags: u8, granule: i64, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut body = Vec::new();
    for packet in packets {
        let mut rest = packet.len();
        while rest >= 255 {
            lacing.push(255);
            rest -= 255;
        }
        lacing.push(rest as u8);
        body.extend_from_slice(packet);
    }
    let mut out = b"OggS".to_vec();
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(&lacing);
    out.extend_from_slice(&body);
    let crc = crc32(0, &out);
    out[22..26].copy_from_slice(&crc.to_le_bytes());
    out
}

pub fn vorbis_id(rate: u32) -> Vec<u8> {
    let mut out = b"\x01vorbis".to_vec();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(2);
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&128_000i32.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&[0xB8, 0x01]);
    out
}

pub fn opus_head(pre_skip: u16) -> Vec<u8> {
    let mut out = b"OpusHead".to_vec();
    out.extend_from_slice(&[1, 2]);
    out.extend_from_slice(&pre_skip.to_le_bytes());
    out.extend_from_slice(&48_000u32.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0]);
    out
}

/// FLAC-in-Ogg mapping header carrying STREAMINFO for 44.1 kHz stereo.
pub fn flac_mapping_header() -> Vec<u8> {
    let mut out = b"\x7fFLAC".to_vec();
    out.extend_from_slice(&[1, 0, 0, 0]);
    out.extend_from_slice(b"fLaC");
    out.extend_from_slice(&[0, 0, 0, 34]);
    out.extend_from_slice(&4096u16.to_be_bytes());
    out.extend_from_slice(&4096u16.to_be_bytes());
    out.extend_from_slice(&[0, 0, 14, 0, 0x40, 0]);
    let packed: u64 = (44_100u64 << 44) | (1 << 41) | (15 << 36);
    out.extend_from_slice(&packed.to_be_bytes());
    out.extend_from_slice(&[0; 16]);
    out
}

fn vorbis_comment_packet() -> Vec<u8> {
    let mut out = b"\x03vorbis".to_vec();
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(b"enc");
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// Vorbis at 44.1 kHz: `pages` audio pages of 100 ms with two packets each.
pub fn ogg_vorbis_file(pages: u32) -> Vec<u8> {
    const SERIAL: u32 = 0x5EED;
    let mut file = ogg_page(SERIAL, 0, OGG_FIRST, 0, &[&vorbis_id(44_100)]);
    file.extend(ogg_page(SERIAL, 1, 0, 0, &[&vorbis_comment_packet(), b"\x05vorbis-setup"]));
    for k in 0..pages {
        let granule = i64::from(k + 1) * 4_410;
        let flags = if k + 1 == pages { OGG_LAST } else { 0 };
        file.extend(ogg_page(SERIAL, k + 2, flags, granule, &[&[k as u8; 10], &[k as u8; 12]]));
    }
    file
}

// Matroska.

pub mod mkv {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const CODEC_ID: u32 = 0x86;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_ADDITIONS: u32 = 0x75A1;
    pub const BLOCK_MORE: u32 = 0xA6;
    pub const BLOCK_ADD_ID: u32 = 0xEE;
    pub const BLOCK_ADDITIONAL: u32 = 0xA5;
    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
}

fn size_vint(value: u64) -> Vec<u8> {
    let len = (1..=8).find(|&len| value < (1u64 << (7 * len)) - 1).unwrap_or(8);
    let marked = value | (1u64 << (7 * len));
    marked.to_be_bytes()[8 - len..].to_vec()
}

pub fn element(id: u32, body: &[u8]) -> Vec<u8> {
    let id_bytes = id.to_be_bytes();
    let skip = id_bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = id_bytes[skip..].to_vec();
    out.extend_from_slice(&size_vint(body.len() as u64));
    out.extend_from_slice(body);
    out
}

pub fn uint_element(id: u32, value: u64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

/// Block header for track 1 followed by `payload`.
fn block_body(relative_ms: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0x81];
    body.extend_from_slice(&relative_ms.to_be_bytes());
    body.push(flags);
    body.extend_from_slice(payload);
    body
}

fn webm_head(duration_ms: f32) -> (Vec<u8>, Vec<u8>) {
    let info = element(
        mkv::INFO,
        &[
            uint_element(mkv::TIMECODE_SCALE, 1_000_000),
            element(mkv::DURATION, &duration_ms.to_bits().to_be_bytes()),
        ]
        .concat(),
    );
    let video = [uint_element(mkv::PIXEL_WIDTH, 320), uint_element(mkv::PIXEL_HEIGHT, 240)].concat();
    let entry = [
        uint_element(mkv::TRACK_NUMBER, 1),
        element(mkv::CODEC_ID, b"V_VP8"),
        element(mkv::VIDEO, &video),
    ]
    .concat();
    (info, element(mkv::TRACKS, &element(mkv::TRACK_ENTRY, &entry)))
}

fn webm_document(segment: &[u8]) -> Vec<u8> {
    [element(mkv::EBML, &element(mkv::DOC_TYPE, b"webm")), element(mkv::SEGMENT, segment)].concat()
}

/// WebM with `clusters` one-second clusters of ten VP8 frames 100 ms apart,
/// keyframes every 500 ms. With `cued`, a SeekHead points at Cues after the
/// clusters listing every keyframe.
pub fn webm_file(clusters: u8, cued: bool) -> Vec<u8> {
    let (info, tracks) = webm_head(f32::from(clusters) * 1000.0);
    let clusters: Vec<Vec<u8>> = (0..clusters)
        .map(|c| {
            let blocks: Vec<u8> = (0..10u8)
                .flat_map(|i| {
                    let flags = if i % 5 == 0 { 0x80 } else { 0 };
                    element(mkv::SIMPLE_BLOCK, &block_body(i16::from(i) * 100, flags, &[c * 10 + i; 16]))
                })
                .collect();
            element(mkv::CLUSTER, &[uint_element(mkv::TIMECODE, u64::from(c) * 1000), blocks].concat())
        })
        .collect();
    if !cued {
        return webm_document(&[info, tracks, clusters.concat()].concat());
    }
    let seek_head = |cues: u64| {
        let seek = [
            element(mkv::SEEK_ID, &mkv::CUES.to_be_bytes()),
            uint_element(mkv::SEEK_POSITION, cues),
        ]
        .concat();
        element(mkv::SEEK_HEAD, &element(mkv::SEEK, &seek))
    };
    let mut position = (seek_head(0).len() + info.len() + tracks.len()) as u64;
    let mut cue_points = Vec::new();
    for (c, cluster) in clusters.iter().enumerate() {
        for offset in [0, 500] {
            let positions = element(mkv::CUE_TRACK_POSITIONS, &uint_element(mkv::CUE_CLUSTER_POSITION, position));
            let time = c as u64 * 1000 + offset;
            cue_points.extend(element(mkv::CUE_POINT, &[uint_element(mkv::CUE_TIME, time), positions].concat()));
        }
        position += cluster.len() as u64;
    }
    let segment = [
        seek_head(position),
        info,
        tracks,
        clusters.concat(),
        element(mkv::CUES, &cue_points),
    ]
    .concat();
    webm_document(&segment)
}

/// WebM holding one BlockGroup frame whose BlockAdditions carry
/// `additional` under BlockAddID 1.
pub fn webm_with_block_additions(payload: &[u8], additional: &[u8]) -> Vec<u8> {
    let (info, tracks) = webm_head(100.0);
    let more = [uint_element(mkv::BLOCK_ADD_ID, 1), element(mkv::BLOCK_ADDITIONAL, additional)].concat();
    let group = [
        element(mkv::BLOCK, &block_body(0, 0, payload)),
        element(mkv::BLOCK_ADDITIONS, &element(mkv::BLOCK_MORE, &more)),
    ]
    .concat();
    let cluster = element(
        mkv::CLUSTER,
        &[uint_element(mkv::TIMECODE, 0), element(mkv::BLOCK_GROUP, &group)].concat(),
    );
    webm_document(&[info, tracks, cluster].concat())
}

// FLAC.

/// CRC-8, polynomial 0x07, as protecting FLAC frame headers.
fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
        crc
    })
}

fn flac_block(kind: u8, last: bool, body: &[u8]) -> Vec<u8> {
    let mut out = vec![kind | if last { 0x80 } else { 0 }];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

/// Native FLAC, 44.1 kHz stereo 16-bit, with `frames` fixed 4096-sample
/// frames of 46 bytes and no seek table.
pub fn flac_file(frames: u8) -> Vec<u8> {
    assert!(frames < 0x80);
    let mut streaminfo = Vec::new();
    streaminfo.extend_from_slice(&4096u16.to_be_bytes());
    streaminfo.extend_from_slice(&4096u16.to_be_bytes());
    streaminfo.extend_from_slice(&[0, 0, 14, 0, 0x40, 0]);
    let packed: u64 = (44_100u64 << 44) | (1 << 41) | (15 << 36) | (u64::from(frames) * 4096);
    streaminfo.extend_from_slice(&packed.to_be_bytes());
    streaminfo.extend_from_slice(&[0; 16]);

    let mut file = b"fLaC".to_vec();
    file.extend(flac_block(0, false, &streaminfo));
    file.extend(flac_block(4, true, &[3, 0, 0, 0, b'e', b'n', b'c', 0, 0, 0, 0]));
    for number in 0..frames {
        let mut frame = vec![0xFF, 0xF8, 0xC9, 0x18, number];
        frame.push(crc8(&frame));
        frame.extend_from_slice(&[number; 40]);
        file.extend(frame);
    }
    file
}

// FLV.

fn flv_tag(kind: u8, millis: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![kind];
    out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&millis.to_be_bytes()[1..]);
    out.push((millis >> 24) as u8);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(data);
    out.extend_from_slice(&((11 + data.len()) as u32).to_be_bytes());
    out
}

/// FLV with H.264 video every 40 ms, a keyframe every tenth, and AAC audio
/// every 23 ms.
pub fn flv_file(frames: u32) -> Vec<u8> {
    const AUDIO: u8 = 8;
    const VIDEO: u8 = 9;
    let mut out = b"FLV\x01\x05".to_vec();
    out.extend_from_slice(&9u32.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);

    let mut config = vec![0x17, 0, 0, 0, 0, 1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1];
    config.extend_from_slice(&(AVC_SPS.len() as u16).to_be_bytes());
    config.extend_from_slice(&AVC_SPS);
    config.push(1);
    config.extend_from_slice(&(AVC_PPS.len() as u16).to_be_bytes());
    config.extend_from_slice(&AVC_PPS);
    out.extend(flv_tag(VIDEO, 0, &config));
    out.extend(flv_tag(AUDIO, 0, &[0xAF, 0, 0x12, 0x10]));
    for i in 0..frames {
        let key = i % 10 == 0;
        let nal: &[u8] = if key { &AVC_IDR } else { &AVC_SLICE };
        let mut video = vec![if key { 0x17 } else { 0x27 }, 1, 0, 0, 0];
        video.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        video.extend_from_slice(nal);
        out.extend(flv_tag(VIDEO, i * 40, &video));
        let mut audio = vec![0xAF, 1];
        audio.extend_from_slice(&[i as u8; 20]);
        out.extend(flv_tag(AUDIO, i * 23, &audio));
    }
    out
}

// MPEG program streams.

/// 26.12 ms MPEG audio frames in 90 kHz ticks.
pub const PS_FRAME_TICKS: i64 = 2_351;

fn pack_header(scr: i64) -> Vec<u8> {
    vec![
        0,
        0,
        1,
        0xBA,
        0x44 | ((scr >> 27) & 0x38) as u8 | ((scr >> 28) & 0x03) as u8,
        (scr >> 20) as u8,
        ((scr >> 12) & 0xF8) as u8 | 0x04 | ((scr >> 13) & 0x03) as u8,
        (scr >> 5) as u8,
        ((scr & 0x1F) << 3) as u8 | 0x04,
        0x01,
        0x01,
        0x89,
        0xC3,
        0xF8,
    ]
}

/// Program stream with one pack per 417-byte MPEG audio frame, each PES
/// timed at its pack's SCR, the first at one second.
pub fn ps_mpeg_audio_stream(packs: usize) -> Vec<u8> {
    let mut frame = 0xFFFB_9064u32.to_be_bytes().to_vec();
    frame.resize(417, 0);
    let mut out = Vec::new();
    for i in 0..packs {
        let scr = 90_000 + i as i64 * PS_FRAME_TICKS;
        out.extend(pack_header(scr));
        if i == 0 {
            out.extend_from_slice(&[0, 0, 1, 0xBB, 0, 6, 0x80, 0x01, 0x01, 0x04, 0xE1, 0xFF]);
        }
        out.extend(pes(0xC0, scr, &frame));
    }
    out.extend_from_slice(&[0, 0, 1, 0xB9]);
    out
}
