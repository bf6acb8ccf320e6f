//! Synthetic fragmented-MP4 fixtures shared by unit tests.

use bytes::{BufMut, BytesMut};

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
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0x00010000);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0x40000000);
}

/// Shape of a synthetic initialization segment.
pub(crate) struct InitSpec {
    pub track_id: u32,
    pub movie_timescale: u32,
    pub timescale: u32,
    pub handler: [u8; 4],
    pub codec: [u8; 4],
    pub default_sample_duration: u32,
    pub with_mvex: bool,
}

impl Default for InitSpec {
    fn default() -> Self {
        Self {
            track_id: 1,
            movie_timescale: 1000,
            timescale: 15360,
            handler: *b"vide",
            codec: *b"avc1",
            default_sample_duration: 256,
            with_mvex: true,
        }
    }
}

/// Build an `ftyp` + `moov` initialization segment with one track.
pub(crate) fn build_init(spec: &InitSpec) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let audio = &spec.handler == b"soun";

    let b = begin(&mut buf, b"ftyp");
    buf.put_slice(b"iso5");
    buf.put_u32(0x200);
    buf.put_slice(b"iso6");
    buf.put_slice(b"mp41");
    end(&mut buf, b);

    let moov = begin(&mut buf, b"moov");

    let b = begin(&mut buf, b"mvhd");
    buf.put_u32(0); // version 0
    buf.put_u32(0); // creation_time
    buf.put_u32(0); // modification_time
    buf.put_u32(spec.movie_timescale);
    buf.put_u32(0); // duration, patched after assembly
    buf.put_u32(0x00010000); // rate
    buf.put_u16(0x0100); // volume
    buf.put_bytes(0, 10); // reserved
    put_matrix(&mut buf);
    buf.put_bytes(0, 24); // pre_defined
    buf.put_u32(spec.track_id + 1); // next_track_ID
    end(&mut buf, b);

    let trak = begin(&mut buf, b"trak");

    let b = begin(&mut buf, b"tkhd");
    buf.put_u32(0x0000_0007); // enabled, in movie, in preview
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(spec.track_id);
    buf.put_u32(0); // reserved
    buf.put_u32(0); // duration
    buf.put_bytes(0, 8); // reserved
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate_group
    buf.put_u16(if audio { 0x0100 } else { 0 }); // volume
    buf.put_u16(0); // reserved
    put_matrix(&mut buf);
    if audio {
        buf.put_u32(0);
        buf.put_u32(0);
    } else {
        buf.put_u32(1920 << 16);
        buf.put_u32(1080 << 16);
    }
    end(&mut buf, b);

    let mdia = begin(&mut buf, b"mdia");

    let b = begin(&mut buf, b"mdhd");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(spec.timescale);
    buf.put_u32(0); // duration
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0);
    end(&mut buf, b);

    let b = begin(&mut buf, b"hdlr");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(&spec.handler);
    buf.put_bytes(0, 12);
    buf.put_slice(b"Handler\0");
    end(&mut buf, b);

    let minf = begin(&mut buf, b"minf");

    if audio {
        let b = begin(&mut buf, b"smhd");
        buf.put_u32(0);
        buf.put_u32(0);
        end(&mut buf, b);
    } else {
        let b = begin(&mut buf, b"vmhd");
        buf.put_u32(1);
        buf.put_bytes(0, 8);
        end(&mut buf, b);
    }

    let dinf = begin(&mut buf, b"dinf");
    let dref = begin(&mut buf, b"dref");
    buf.put_u32(0);
    buf.put_u32(1);
    let url = begin(&mut buf, b"url ");
    buf.put_u32(1); // self-contained
    end(&mut buf, url);
    end(&mut buf, dref);
    end(&mut buf, dinf);

    let stbl = begin(&mut buf, b"stbl");

    let b = begin(&mut buf, b"stsd");
    buf.put_u32(0);
    buf.put_u32(1);
    let entry = begin(&mut buf, &spec.codec);
    if audio {
        buf.put_bytes(0, 6);
        buf.put_u16(1); // data_reference_index
        buf.put_bytes(0, 8);
        buf.put_u16(2); // channel count
        buf.put_u16(16); // sample size
        buf.put_u32(0);
        buf.put_u32(48000 << 16); // sample rate
    } else {
        buf.put_bytes(0, 6);
        buf.put_u16(1); // data_reference_index
        buf.put_bytes(0, 16);
        buf.put_u16(1920);
        buf.put_u16(1080);
        buf.put_u32(0x0048_0000); // horizresolution
        buf.put_u32(0x0048_0000); // vertresolution
        buf.put_u32(0);
        buf.put_u16(1); // frame_count
        buf.put_bytes(0, 32); // compressorname
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1);
    }
    end(&mut buf, entry);
    end(&mut buf, b);

    let b = begin(&mut buf, b"stts");
    buf.put_u32(0);
    buf.put_u32(0);
    end(&mut buf, b);
    let b = begin(&mut buf, b"stsc");
    buf.put_u32(0);
    buf.put_u32(0);
    end(&mut buf, b);
    let b = begin(&mut buf, b"stsz");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(0);
    end(&mut buf, b);
    let b = begin(&mut buf, b"stco");
    buf.put_u32(0);
    buf.put_u32(0);
    end(&mut buf, b);

    end(&mut buf, stbl);
    end(&mut buf, minf);
    end(&mut buf, mdia);
    end(&mut buf, trak);

    if spec.with_mvex {
        let mvex = begin(&mut buf, b"mvex");
        let b = begin(&mut buf, b"trex");
        buf.put_u32(0);
        buf.put_u32(spec.track_id);
        buf.put_u32(1); // default_sample_description_index
        buf.put_u32(spec.default_sample_duration);
        buf.put_u32(0); // default_sample_size
        buf.put_u32(0); // default_sample_flags
        end(&mut buf, b);
        end(&mut buf, mvex);
    }

    end(&mut buf, moov);
    buf.to_vec()
}

/// Shape of a synthetic media fragment.
pub(crate) struct FragmentSpec {
    pub sequence: u32,
    pub track_id: u32,
    pub base_decode_time: u64,
    pub tfdt_version: u8,
    pub sample_sizes: Vec<u32>,
    /// Per-sample durations written into trun; `None` leaves durations to
    /// the tfhd or trex default.
    pub trun_durations: Option<Vec<u32>>,
    pub tfhd_default_duration: Option<u32>,
    pub with_styp: bool,
    pub with_cts: bool,
}

impl Default for FragmentSpec {
    fn default() -> Self {
        Self {
            sequence: 1,
            track_id: 1,
            base_decode_time: 0,
            tfdt_version: 1,
            sample_sizes: vec![100, 120, 80],
            trun_durations: Some(vec![256, 256, 256]),
            tfhd_default_duration: None,
            with_styp: true,
            with_cts: false,
        }
    }
}

/// Build a `styp` + `moof` + `mdat` media fragment with one traf.
pub(crate) fn build_fragment(spec: &FragmentSpec) -> Vec<u8> {
    let mut buf = BytesMut::new();

    if spec.with_styp {
        let b = begin(&mut buf, b"styp");
        buf.put_slice(b"msdh");
        buf.put_u32(0);
        buf.put_slice(b"msdh");
        buf.put_slice(b"msix");
        end(&mut buf, b);
    }

    let moof = begin(&mut buf, b"moof");

    let b = begin(&mut buf, b"mfhd");
    buf.put_u32(0);
    buf.put_u32(spec.sequence);
    end(&mut buf, b);

    let data_offset_at;
    let traf = begin(&mut buf, b"traf");

    let mut tfhd_flags = 0x020000u32; // default-base-is-moof
    if spec.tfhd_default_duration.is_some() {
        tfhd_flags |= 0x8;
    }
    let b = begin(&mut buf, b"tfhd");
    buf.put_u32(tfhd_flags);
    buf.put_u32(spec.track_id);
    if let Some(duration) = spec.tfhd_default_duration {
        buf.put_u32(duration);
    }
    end(&mut buf, b);

    let b = begin(&mut buf, b"tfdt");
    if spec.tfdt_version == 1 {
        buf.put_u32(0x0100_0000);
        buf.put_u64(spec.base_decode_time);
    } else {
        buf.put_u32(0);
        buf.put_u32(spec.base_decode_time as u32);
    }
    end(&mut buf, b);

    let mut trun_flags = 0x0001 | 0x0200; // data-offset + sample-size
    if spec.trun_durations.is_some() {
        trun_flags |= 0x0100;
    }
    if spec.with_cts {
        trun_flags |= 0x0800;
    }
    let b = begin(&mut buf, b"trun");
    buf.put_u32(trun_flags);
    buf.put_u32(spec.sample_sizes.len() as u32);
    data_offset_at = buf.len();
    buf.put_i32(0); // patched below once the moof size is known
    for (i, &size) in spec.sample_sizes.iter().enumerate() {
        if let Some(durations) = &spec.trun_durations {
            buf.put_u32(durations[i]);
        }
        buf.put_u32(size);
        if spec.with_cts {
            buf.put_u32(0);
        }
    }
    end(&mut buf, b);

    end(&mut buf, traf);
    end(&mut buf, moof);

    let data_offset = (buf.len() - moof + 8) as i32;
    buf[data_offset_at..data_offset_at + 4].copy_from_slice(&data_offset.to_be_bytes());

    let b = begin(&mut buf, b"mdat");
    for (i, &size) in spec.sample_sizes.iter().enumerate() {
        buf.put_bytes(i as u8, size as usize);
    }
    end(&mut buf, b);

    buf.to_vec()
}
