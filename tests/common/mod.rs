//! Shared fixtures: synthetic Steam recording sessions on disk.
//!
//! The byte builders produce minimal but structurally valid fragmented-MP4
//! pieces: an `ftyp`+`moov` init segment for one H.264 video track and
//! `styp`+`moof`+`mdat` media fragments with three samples each. Timescale is
//! 15360 with 256-unit samples, so one fragment contributes 768 units
//! (0.05 s) to the timeline.

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use std::fs;
use std::path::{Path, PathBuf};

pub const TIMESCALE: u32 = 15360;
pub const FRAGMENT_UNITS: u64 = 768;

fn begin(buf: &mut BytesMut, fourcc: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(fourcc);
    start
}

fn end(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_matrix(buf: &mut BytesMut) {
    buf.put_u32(0x00010000);
    buf.put_bytes(0, 12);
    buf.put_u32(0x00010000);
    buf.put_bytes(0, 12);
    buf.put_u32(0x40000000);
}

/// An `ftyp` + `moov` init segment for one avc1 video track.
pub fn video_init() -> Vec<u8> {
    let mut buf = BytesMut::new();

    let b = begin(&mut buf, b"ftyp");
    buf.put_slice(b"iso5");
    buf.put_u32(0x200);
    buf.put_slice(b"iso6");
    buf.put_slice(b"mp41");
    end(&mut buf, b);

    let moov = begin(&mut buf, b"moov");

    let b = begin(&mut buf, b"mvhd");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(1000); // movie timescale
    buf.put_u32(0); // duration, patched by assembly
    buf.put_u32(0x00010000);
    buf.put_u16(0x0100);
    buf.put_bytes(0, 10);
    put_matrix(&mut buf);
    buf.put_bytes(0, 24);
    buf.put_u32(2); // next_track_ID
    end(&mut buf, b);

    let trak = begin(&mut buf, b"trak");

    let b = begin(&mut buf, b"tkhd");
    buf.put_u32(0x0000_0007);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(1); // track_ID
    buf.put_u32(0);
    buf.put_u32(0); // duration
    buf.put_bytes(0, 8);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);
    put_matrix(&mut buf);
    buf.put_u32(1920 << 16);
    buf.put_u32(1080 << 16);
    end(&mut buf, b);

    let mdia = begin(&mut buf, b"mdia");

    let b = begin(&mut buf, b"mdhd");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(TIMESCALE);
    buf.put_u32(0); // duration
    buf.put_u16(0x55C4);
    buf.put_u16(0);
    end(&mut buf, b);

    let b = begin(&mut buf, b"hdlr");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(b"vide");
    buf.put_bytes(0, 12);
    buf.put_slice(b"Handler\0");
    end(&mut buf, b);

    let minf = begin(&mut buf, b"minf");

    let b = begin(&mut buf, b"vmhd");
    buf.put_u32(1);
    buf.put_bytes(0, 8);
    end(&mut buf, b);

    let dinf = begin(&mut buf, b"dinf");
    let dref = begin(&mut buf, b"dref");
    buf.put_u32(0);
    buf.put_u32(1);
    let url = begin(&mut buf, b"url ");
    buf.put_u32(1);
    end(&mut buf, url);
    end(&mut buf, dref);
    end(&mut buf, dinf);

    let stbl = begin(&mut buf, b"stbl");

    let b = begin(&mut buf, b"stsd");
    buf.put_u32(0);
    buf.put_u32(1);
    let entry = begin(&mut buf, b"avc1");
    buf.put_bytes(0, 6);
    buf.put_u16(1);
    buf.put_bytes(0, 16);
    buf.put_u16(1920);
    buf.put_u16(1080);
    buf.put_u32(0x0048_0000);
    buf.put_u32(0x0048_0000);
    buf.put_u32(0);
    buf.put_u16(1);
    buf.put_bytes(0, 32);
    buf.put_u16(0x0018);
    buf.put_i16(-1);
    end(&mut buf, entry);
    end(&mut buf, b);

    for fourcc in [b"stts", b"stsc", b"stco"] {
        let b = begin(&mut buf, fourcc);
        buf.put_u32(0);
        buf.put_u32(0);
        end(&mut buf, b);
    }
    let b = begin(&mut buf, b"stsz");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    end(&mut buf, b);

    end(&mut buf, stbl);
    end(&mut buf, minf);
    end(&mut buf, mdia);
    end(&mut buf, trak);

    let mvex = begin(&mut buf, b"mvex");
    let b = begin(&mut buf, b"trex");
    buf.put_u32(0);
    buf.put_u32(1); // track_ID
    buf.put_u32(1);
    buf.put_u32(256); // default_sample_duration
    buf.put_u32(0);
    buf.put_u32(0);
    end(&mut buf, b);
    end(&mut buf, mvex);

    end(&mut buf, moov);
    buf.to_vec()
}

/// A `styp` + `moof` + `mdat` fragment with three 256-unit samples.
pub fn video_fragment(sequence: u32) -> Vec<u8> {
    let sample_sizes = [100u32, 120, 80];
    let mut buf = BytesMut::new();

    let b = begin(&mut buf, b"styp");
    buf.put_slice(b"msdh");
    buf.put_u32(0);
    buf.put_slice(b"msdh");
    buf.put_slice(b"msix");
    end(&mut buf, b);

    let moof = begin(&mut buf, b"moof");

    let b = begin(&mut buf, b"mfhd");
    buf.put_u32(0);
    buf.put_u32(sequence);
    end(&mut buf, b);

    let traf = begin(&mut buf, b"traf");

    let b = begin(&mut buf, b"tfhd");
    buf.put_u32(0x020000); // default-base-is-moof
    buf.put_u32(1); // track_ID
    end(&mut buf, b);

    let b = begin(&mut buf, b"tfdt");
    buf.put_u32(0x0100_0000); // version 1
    buf.put_u64(u64::from(sequence - 1) * FRAGMENT_UNITS);
    end(&mut buf, b);

    let b = begin(&mut buf, b"trun");
    buf.put_u32(0x0001 | 0x0100 | 0x0200); // data-offset, duration, size
    buf.put_u32(sample_sizes.len() as u32);
    let data_offset_at = buf.len();
    buf.put_i32(0);
    for &size in &sample_sizes {
        buf.put_u32(256);
        buf.put_u32(size);
    }
    end(&mut buf, b);

    end(&mut buf, traf);
    end(&mut buf, moof);

    let data_offset = (buf.len() - moof + 8) as i32;
    buf[data_offset_at..data_offset_at + 4].copy_from_slice(&data_offset.to_be_bytes());

    let b = begin(&mut buf, b"mdat");
    for (i, &size) in sample_sizes.iter().enumerate() {
        buf.put_bytes(i as u8, size as usize);
    }
    end(&mut buf, b);

    buf.to_vec()
}

/// A session manifest declaring one video track with `chunks` media segments.
pub fn session_xml(chunks: u32) -> String {
    format!(
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <Period>
    <AdaptationSet contentType="video">
      <Representation id="0" mimeType="video/mp4" codecs="avc1.64002A">
        <SegmentTemplate timescale="{TIMESCALE}" initialization="init-stream$RepresentationID$.m4s" media="chunk-stream$RepresentationID$-$Number%05d$.m4s" startNumber="1">
          <SegmentTimeline><S t="0" d="{FRAGMENT_UNITS}" r="{}" /></SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#,
        chunks - 1
    )
}

/// Write a complete session (manifest, init, `chunks` fragments) into `dir`.
pub fn write_session(dir: &Path, chunks: u32) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("session.mpd"), session_xml(chunks)).unwrap();
    fs::write(dir.join("init-stream0.m4s"), video_init()).unwrap();
    for i in 1..=chunks {
        fs::write(dir.join(format!("chunk-stream0-{i:05}.m4s")), video_fragment(i)).unwrap();
    }
}

/// Lay out a fake Steam userdata tree with one manual clip and return the
/// clip's folder.
pub fn write_userdata(root: &Path, steam_id: &str, folder: &str, chunks: u32) -> PathBuf {
    let clips = root.join(steam_id).join("gamerecordings").join("clips");
    let clip_dir = clips.join(folder);
    write_session(&clip_dir, chunks);
    clip_dir
}

/// Write an offline clipforge config pointing at `userdata` and `output_dir`.
pub fn write_config(path: &Path, userdata: &Path, output_dir: &Path) {
    let cache = path.parent().unwrap().join("game_names.json");
    fs::write(
        path,
        format!(
            "output_dir = {:?}\nuserdata_path = {:?}\nname_cache = {:?}\noffline = true\n",
            output_dir, userdata, cache
        ),
    )
    .unwrap();
}
