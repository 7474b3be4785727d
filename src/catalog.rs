use std::collections::HashSet;

use serde::Serialize;

use crate::models::{CatalogKind, Format};

const ALLOWED_CONTAINERS: [&str; 3] = ["mp4", "webm", "m4a"];
const SPLIT_AUDIO_CONTAINERS: [&str; 2] = ["m4a", "mp4"];

/// Usable formats split into three disjoint groups.
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub video_only: Vec<&'a Format>,
    pub audio_only: Vec<&'a Format>,
    pub muxed: Vec<&'a Format>,
}

/// A row of the audio catalog.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioRow {
    pub id: String,
    pub format: String,
    pub abr: f64,
    pub filesize: Option<u64>,
    pub note: String,
}

/// A row of the video-only catalog.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VideoRow {
    pub id: String,
    pub format: String,
    pub resolution: Option<u32>,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    pub note: String,
}

/// Where the bytes of a merged row come from.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Tracks {
    /// One identifier carrying audio and video.
    Muxed { format_id: String },
    /// Separate video and audio identifiers, merged by the extractor.
    Split {
        video_id: String,
        audio_id: String,
        filesize_video: Option<u64>,
        filesize_audio: Option<u64>,
    },
}

/// A row of the merged catalog. Build it through [`FormatDescriptor::muxed`]
/// or [`FormatDescriptor::split`] so `is_muxed` always agrees with `tracks`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    #[serde(rename = "isMuxed")]
    is_muxed: bool,
    #[serde(flatten)]
    pub tracks: Tracks,
    pub format: String,
    pub resolution: u32,
    pub fps: Option<f64>,
    pub abr: Option<f64>,
    pub filesize: Option<u64>,
    /// Selector to pass back as the `format` of a download request.
    pub selector: String,
    pub label: String,
}

impl FormatDescriptor {
    pub fn muxed(format: &Format, resolution: u32) -> Self {
        Self {
            is_muxed: true,
            tracks: Tracks::Muxed { format_id: format.format_id.clone() },
            format: format.ext.clone(),
            resolution,
            fps: format.fps,
            abr: format.abr,
            filesize: format.size(),
            selector: format.format_id.clone(),
            label: format!("{}p {}", resolution, format.ext),
        }
    }

    pub fn split(video: &Format, audio: &Format, resolution: u32) -> Self {
        let filesize = match (video.size(), audio.size()) {
            (Some(v), Some(a)) => Some(v + a),
            (v, a) => v.or(a),
        };
        Self {
            is_muxed: false,
            tracks: Tracks::Split {
                video_id: video.format_id.clone(),
                audio_id: audio.format_id.clone(),
                filesize_video: video.size(),
                filesize_audio: audio.size(),
            },
            format: video.ext.clone(),
            resolution,
            fps: video.fps,
            abr: audio.abr,
            filesize,
            selector: format!("{}+{}", video.format_id, audio.format_id),
            label: format!("{}p {}", resolution, video.ext),
        }
    }

    pub fn is_muxed(&self) -> bool {
        self.is_muxed
    }
}

/// The response body of `GET /api/formats`; serializes as a bare array.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Catalog {
    Audio(Vec<AudioRow>),
    Video(Vec<VideoRow>),
    Merged(Vec<FormatDescriptor>),
}

impl Catalog {
    pub fn len(&self) -> usize {
        match self {
            Catalog::Audio(rows) => rows.len(),
            Catalog::Video(rows) => rows.len(),
            Catalog::Merged(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the catalog of the requested kind. Unusable records are dropped,
/// never reported.
pub fn build(formats: &[Format], kind: CatalogKind) -> Catalog {
    let partition = partition(formats);
    match kind {
        CatalogKind::Audio => Catalog::Audio(audio_rows(&partition)),
        CatalogKind::Video => Catalog::Video(video_rows(&partition)),
        CatalogKind::Both => Catalog::Merged(dedup_by_resolution(merged_rows(&partition))),
    }
}

fn is_usable(format: &Format) -> bool {
    if format.url.as_deref().map_or(true, str::is_empty) {
        return false;
    }
    if !format.has_video() && !format.has_audio() {
        return false;
    }
    let storyboard = format
        .format_note
        .as_deref()
        .is_some_and(|note| note.to_lowercase().contains("storyboard"));
    !storyboard && ALLOWED_CONTAINERS.contains(&format.ext.as_str())
}

/// Descriptive-audio tracks are published with a `-drc` id suffix.
fn is_descriptive_audio(format: &Format) -> bool {
    format.format_id.contains("-drc")
}

pub fn partition(formats: &[Format]) -> Partition<'_> {
    let mut out = Partition::default();
    for f in formats.iter().filter(|f| is_usable(f)) {
        match (f.has_video(), f.has_audio()) {
            (true, true) => out.muxed.push(f),
            (true, false) if f.size().is_some() => out.video_only.push(f),
            (false, true)
                if f.abr.is_some_and(|abr| abr > 0.0)
                    && f.size().is_some()
                    && !is_descriptive_audio(f) =>
            {
                out.audio_only.push(f)
            }
            _ => {}
        }
    }
    out
}

pub fn audio_rows(partition: &Partition<'_>) -> Vec<AudioRow> {
    partition
        .audio_only
        .iter()
        .map(|a| {
            let abr = a.abr.unwrap_or_default();
            AudioRow {
                id: a.format_id.clone(),
                format: a.ext.clone(),
                abr,
                filesize: a.size(),
                note: format!("{} kbps {}", abr, a.ext),
            }
        })
        .collect()
}

pub fn video_rows(partition: &Partition<'_>) -> Vec<VideoRow> {
    partition
        .video_only
        .iter()
        .map(|v| VideoRow {
            id: v.format_id.clone(),
            format: v.ext.clone(),
            resolution: v.height,
            fps: v.fps,
            filesize: v.size(),
            note: match v.height {
                Some(h) => format!("{}p {}", h, v.ext),
                None => v.ext.clone(),
            },
        })
        .collect()
}

/// Best audio track to pair with mp4 video; the first one wins on equal bitrate.
fn best_split_audio<'a>(audio_only: &[&'a Format]) -> Option<&'a Format> {
    audio_only
        .iter()
        .copied()
        .filter(|a| SPLIT_AUDIO_CONTAINERS.contains(&a.ext.as_str()))
        .fold(None, |best: Option<&Format>, a| match best {
            Some(b) if b.abr.unwrap_or_default() >= a.abr.unwrap_or_default() => Some(b),
            _ => Some(a),
        })
}

/// Muxed rows plus one synthesized split row per mp4 video resolution, sorted
/// by resolution, highest first. May still hold several rows per resolution.
pub fn merged_rows(partition: &Partition<'_>) -> Vec<FormatDescriptor> {
    let mut merged: Vec<FormatDescriptor> = partition
        .muxed
        .iter()
        .filter(|m| !m.format_id.is_empty())
        .filter_map(|m| m.height.map(|h| FormatDescriptor::muxed(m, h)))
        .collect();

    let mut videos: Vec<(u32, &Format)> = partition
        .video_only
        .iter()
        .filter(|v| v.ext == "mp4")
        .filter_map(|v| v.height.map(|h| (h, *v)))
        .collect();
    videos.sort_by(|a, b| b.0.cmp(&a.0));

    let audio = best_split_audio(&partition.audio_only);
    let mut seen = HashSet::new();
    for (height, video) in videos {
        if seen.contains(&height) {
            continue;
        }
        let Some(audio) = audio else { continue };
        merged.push(FormatDescriptor::split(video, audio, height));
        seen.insert(height);
    }

    merged.sort_by(|a, b| b.resolution.cmp(&a.resolution));
    merged
}

/// Keeps one row per resolution, preferring muxed over split. Expects the
/// input sorted by resolution.
pub fn dedup_by_resolution(mut rows: Vec<FormatDescriptor>) -> Vec<FormatDescriptor> {
    rows.dedup_by(|current, kept| {
        if current.resolution != kept.resolution {
            return false;
        }
        if current.is_muxed() && !kept.is_muxed() {
            std::mem::swap(current, kept);
        }
        true
    });
    rows
}
