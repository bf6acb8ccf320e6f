//! Session manifest parsing.
//!
//! A recording session is described by an MPD-style XML manifest: a single
//! period holding one representation per elementary stream, each declaring its
//! segment files either through a `SegmentTemplate` (with a timeline or a
//! uniform duration) or an explicit `SegmentList`. The parser normalizes both
//! shapes into per-track descriptor sequences with expanded file names, so
//! later stages never touch the naming convention again.
//!
//! Parsing is pure: no filesystem access, no clock reads.

mod template;

pub use template::{expand_template, parse_duration, validate_template};

use roxmltree::{Document, Node};

use crate::error::ParseError;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Per-track cap on declared segments; a session lasting days at one-second
/// fragments stays well below this.
const MAX_SEGMENTS_PER_TRACK: usize = 1 << 18;

/// What a segment descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum SegmentKind {
    /// Initialization segment: `ftyp` + `moov`, no samples.
    Init,
    /// Media fragment: `moof` + `mdat`.
    Media,
}

/// Stream kind of a track, from `contentType` or the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One manifest-declared segment, with its file name already expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct SegmentDescriptor {
    /// Init or Media.
    pub kind: SegmentKind,
    /// Declared index; contiguous from the track's start number for Media.
    pub index: u64,
    /// Declared start in timescale units. Informational: assembly trusts the
    /// timing inside the fragments, not the manifest.
    pub start_time: u64,
    /// Declared duration in timescale units, when the manifest carries one.
    pub expected_duration: Option<u64>,
    /// Declared byte size, when the manifest carries one. Validation only.
    pub expected_size: Option<u64>,
    /// File name within the clip's segment directory.
    pub file_name: String,
}

/// One track (representation) of a session manifest.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct TrackManifest {
    /// Representation ID; doubles as the template substitution value.
    pub id: String,
    /// Video, audio or other.
    pub kind: TrackKind,
    /// RFC 6381 codec string, when declared.
    pub codecs: Option<String>,
    /// MIME type, when declared.
    pub mime_type: Option<String>,
    /// Manifest timescale for this track's declared times.
    pub timescale: u32,
    /// Index of the first media segment.
    pub start_number: u64,
    /// Init (at most one, first) followed by media in ascending index order.
    pub segments: Vec<SegmentDescriptor>,
}

impl TrackManifest {
    /// The initialization descriptor, when the track declares one.
    pub fn init(&self) -> Option<&SegmentDescriptor> {
        self.segments.iter().find(|s| s.kind == SegmentKind::Init)
    }

    /// Media descriptors in ascending index order.
    pub fn media(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        self.segments.iter().filter(|s| s.kind == SegmentKind::Media)
    }

    /// Number of media descriptors.
    pub fn media_count(&self) -> usize {
        self.media().count()
    }

    /// Sum of declared media durations, when every media segment has one.
    pub fn declared_duration_units(&self) -> Option<u64> {
        self.media()
            .map(|s| s.expected_duration)
            .sum::<Option<u64>>()
    }

    /// Declared track duration in seconds, when derivable.
    pub fn declared_duration_secs(&self) -> Option<f64> {
        self.declared_duration_units()
            .map(|units| units as f64 / f64::from(self.timescale))
    }
}

/// Parsed representation of one session manifest.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct SegmentManifest {
    /// `mediaPresentationDuration` in seconds, when declared.
    pub presentation_duration: Option<f64>,
    /// Tracks in declaration order.
    pub tracks: Vec<TrackManifest>,
}

impl SegmentManifest {
    /// Parse a manifest document.
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        let doc = Document::parse(xml).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let root = doc.root_element();
        if root.tag_name().name() != "MPD" {
            return Err(ParseError::Malformed(format!(
                "expected MPD root element, found {:?}",
                root.tag_name().name()
            )));
        }

        let presentation_duration = root
            .attribute("mediaPresentationDuration")
            .map(parse_duration)
            .transpose()?;

        let periods: Vec<Node> = root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "Period")
            .collect();
        if periods.is_empty() {
            return Err(ParseError::MissingField("Period"));
        }
        if periods.len() > 1 {
            return Err(ParseError::InvalidTopology(
                "manifest declares multiple periods".into(),
            ));
        }

        let mut tracks = Vec::new();
        for set in periods[0]
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "AdaptationSet")
        {
            let set_template = child_element(set, "SegmentTemplate");
            let set_list = child_element(set, "SegmentList");
            for rep in set
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "Representation")
            {
                tracks.push(parse_representation(
                    set,
                    rep,
                    set_template,
                    set_list,
                    presentation_duration,
                )?);
            }
        }
        if tracks.is_empty() {
            return Err(ParseError::MissingField("Representation"));
        }
        for (i, track) in tracks.iter().enumerate() {
            if tracks[..i].iter().any(|t| t.id == track.id) {
                return Err(ParseError::InvalidTopology(format!(
                    "duplicate representation id {:?}",
                    track.id
                )));
            }
        }

        Ok(Self {
            presentation_duration,
            tracks,
        })
    }

    /// Total number of media descriptors across all tracks.
    pub fn total_media_segments(&self) -> usize {
        self.tracks.iter().map(TrackManifest::media_count).sum()
    }

    /// Session duration in seconds: the declared presentation duration, or
    /// the longest track's declared duration.
    pub fn duration_secs(&self) -> Option<f64> {
        self.presentation_duration.or_else(|| {
            self.tracks
                .iter()
                .filter_map(TrackManifest::declared_duration_secs)
                .max_by(|a, b| a.total_cmp(b))
        })
    }
}

fn parse_representation(
    set: Node,
    rep: Node,
    set_template: Option<Node>,
    set_list: Option<Node>,
    presentation_duration: Option<f64>,
) -> Result<TrackManifest, ParseError> {
    let id = rep
        .attribute("id")
        .ok_or(ParseError::MissingField("Representation id"))?
        .to_owned();
    let kind = track_kind(set, rep);
    let codecs = rep
        .attribute("codecs")
        .or_else(|| set.attribute("codecs"))
        .map(str::to_owned);
    let mime_type = rep
        .attribute("mimeType")
        .or_else(|| set.attribute("mimeType"))
        .map(str::to_owned);

    let template = child_element(rep, "SegmentTemplate").or(set_template);
    let list = child_element(rep, "SegmentList").or(set_list);
    match (template, list) {
        (Some(_), Some(_)) => Err(ParseError::InvalidTopology(format!(
            "representation {id:?} declares both SegmentTemplate and SegmentList"
        ))),
        (Some(template), None) => {
            parse_template_track(template, id, kind, codecs, mime_type, presentation_duration)
        }
        (None, Some(list)) => parse_list_track(list, id, kind, codecs, mime_type),
        (None, None) => Err(ParseError::MissingField("SegmentTemplate or SegmentList")),
    }
}

fn parse_template_track(
    template: Node,
    id: String,
    kind: TrackKind,
    codecs: Option<String>,
    mime_type: Option<String>,
    presentation_duration: Option<f64>,
) -> Result<TrackManifest, ParseError> {
    let timescale = nonzero_timescale(parse_opt_attr(template, "timescale")?)?;
    let start_number: u64 = parse_opt_attr(template, "startNumber")?.unwrap_or(1);

    let media_template = template
        .attribute("media")
        .ok_or(ParseError::MissingField("SegmentTemplate media"))?;
    validate_template(media_template)?;
    let init_template = template.attribute("initialization");
    if let Some(init) = init_template {
        validate_template(init)?;
    }

    let mut segments = Vec::new();
    if let Some(init) = init_template {
        segments.push(SegmentDescriptor {
            kind: SegmentKind::Init,
            index: 0,
            start_time: 0,
            expected_duration: None,
            expected_size: None,
            file_name: expand_template(init, &id, None, None),
        });
    }

    let mut media_count = 0usize;
    if let Some(timeline) = child_element(template, "SegmentTimeline") {
        let mut time = 0u64;
        let mut index = start_number;
        let mut first = true;
        for s in timeline
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "S")
        {
            let d: u64 = parse_attr(s, "d", "S d")?;
            if d == 0 {
                return Err(ParseError::Malformed(
                    "segment timeline declares a zero duration".into(),
                ));
            }
            let r: i64 = parse_opt_attr(s, "r")?.unwrap_or(0);
            if r < 0 {
                return Err(ParseError::InvalidTopology(
                    "open-ended repeat (r < 0) in segment timeline".into(),
                ));
            }
            if let Some(t) = parse_opt_attr::<u64>(s, "t")? {
                if first {
                    time = t;
                } else if t > time {
                    return Err(ParseError::InvalidTopology(format!(
                        "gap in segment timeline: expected t={time}, found t={t}"
                    )));
                } else if t < time {
                    return Err(ParseError::InvalidTopology(format!(
                        "overlap in segment timeline: expected t={time}, found t={t}"
                    )));
                }
            }
            first = false;

            media_count += r as usize + 1;
            if media_count > MAX_SEGMENTS_PER_TRACK {
                return Err(ParseError::InvalidTopology(format!(
                    "track declares more than {MAX_SEGMENTS_PER_TRACK} segments"
                )));
            }
            for _ in 0..=r {
                segments.push(SegmentDescriptor {
                    kind: SegmentKind::Media,
                    index,
                    start_time: time,
                    expected_duration: Some(d),
                    expected_size: None,
                    file_name: expand_template(media_template, &id, Some(index), Some(time)),
                });
                index += 1;
                time += d;
            }
        }
    } else if let Some(segment_duration) = parse_opt_attr::<u64>(template, "duration")? {
        if segment_duration == 0 {
            return Err(ParseError::Malformed(
                "SegmentTemplate declares a zero segment duration".into(),
            ));
        }
        let total_secs = presentation_duration
            .ok_or(ParseError::MissingField("mediaPresentationDuration"))?;
        let total_units = (total_secs * f64::from(timescale)).round() as u64;
        let count = total_units.div_ceil(segment_duration);
        if count as usize > MAX_SEGMENTS_PER_TRACK {
            return Err(ParseError::InvalidTopology(format!(
                "track declares more than {MAX_SEGMENTS_PER_TRACK} segments"
            )));
        }
        for i in 0..count {
            let start = i * segment_duration;
            let duration = if i + 1 == count {
                total_units - start
            } else {
                segment_duration
            };
            segments.push(SegmentDescriptor {
                kind: SegmentKind::Media,
                index: start_number + i,
                start_time: start,
                expected_duration: Some(duration),
                expected_size: None,
                file_name: expand_template(
                    media_template,
                    &id,
                    Some(start_number + i),
                    Some(start),
                ),
            });
        }
    } else {
        return Err(ParseError::MissingField("SegmentTimeline or duration"));
    }

    Ok(TrackManifest {
        id,
        kind,
        codecs,
        mime_type,
        timescale,
        start_number,
        segments,
    })
}

fn parse_list_track(
    list: Node,
    id: String,
    kind: TrackKind,
    codecs: Option<String>,
    mime_type: Option<String>,
) -> Result<TrackManifest, ParseError> {
    let timescale = nonzero_timescale(parse_opt_attr(list, "timescale")?)?;
    let start_number: u64 = parse_opt_attr(list, "startNumber")?.unwrap_or(1);
    let default_duration: Option<u64> = parse_opt_attr(list, "duration")?;

    let inits: Vec<Node> = list
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "Initialization")
        .collect();
    if inits.len() > 1 {
        return Err(ParseError::InvalidTopology(format!(
            "representation {id:?} declares {} initialization entries",
            inits.len()
        )));
    }

    let mut segments = Vec::new();
    if let Some(init) = inits.first() {
        let source = init
            .attribute("sourceURL")
            .ok_or(ParseError::MissingField("Initialization sourceURL"))?;
        segments.push(SegmentDescriptor {
            kind: SegmentKind::Init,
            index: 0,
            start_time: 0,
            expected_duration: None,
            expected_size: None,
            file_name: source.to_owned(),
        });
    }

    let mut index = start_number;
    let mut time = 0u64;
    for url in list
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "SegmentURL")
    {
        let media = url
            .attribute("media")
            .ok_or(ParseError::MissingField("SegmentURL media"))?;
        let expected_size = parse_opt_attr(url, "size")?;
        let expected_duration = parse_opt_attr::<u64>(url, "d")?.or(default_duration);
        segments.push(SegmentDescriptor {
            kind: SegmentKind::Media,
            index,
            start_time: time,
            expected_duration,
            expected_size,
            file_name: media.to_owned(),
        });
        index += 1;
        time += expected_duration.unwrap_or(0);
        if segments.len() > MAX_SEGMENTS_PER_TRACK {
            return Err(ParseError::InvalidTopology(format!(
                "track declares more than {MAX_SEGMENTS_PER_TRACK} segments"
            )));
        }
    }

    Ok(TrackManifest {
        id,
        kind,
        codecs,
        mime_type,
        timescale,
        start_number,
        segments,
    })
}

fn track_kind(set: Node, rep: Node) -> TrackKind {
    if let Some(content_type) = rep
        .attribute("contentType")
        .or_else(|| set.attribute("contentType"))
    {
        return match content_type {
            "video" => TrackKind::Video,
            "audio" => TrackKind::Audio,
            _ => TrackKind::Other,
        };
    }
    let mime = rep
        .attribute("mimeType")
        .or_else(|| set.attribute("mimeType"))
        .unwrap_or("");
    if mime.starts_with("video/") {
        TrackKind::Video
    } else if mime.starts_with("audio/") {
        TrackKind::Audio
    } else {
        TrackKind::Other
    }
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn nonzero_timescale(value: Option<u32>) -> Result<u32, ParseError> {
    match value {
        Some(0) => Err(ParseError::Malformed("timescale must be non-zero".into())),
        Some(ts) => Ok(ts),
        None => Ok(1),
    }
}

fn parse_attr<T: std::str::FromStr>(
    node: Node,
    attr: &str,
    field: &'static str,
) -> Result<T, ParseError> {
    let value = node.attribute(attr).ok_or(ParseError::MissingField(field))?;
    value.parse().map_err(|_| {
        ParseError::Malformed(format!("attribute {attr}={value:?} is not a valid number"))
    })
}

fn parse_opt_attr<T: std::str::FromStr>(node: Node, attr: &str) -> Result<Option<T>, ParseError> {
    match node.attribute(attr) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            ParseError::Malformed(format!("attribute {attr}={value:?} is not a valid number"))
        }),
    }
}
