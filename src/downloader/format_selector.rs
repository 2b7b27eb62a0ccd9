// StreamSelector - maps a quality request onto concrete catalog streams
//
// Handles:
// - Easy tier: one progressive stream, exact resolution or highest available
// - Max tier: best video-only stream plus best audio-only stream
// - Audio-only: highest average bitrate
//
// All picks are pure functions over the snapshot's stream order. Ties go to
// the stream listed first by the catalog.

use serde::{Deserialize, Serialize};

use super::errors::SelectionError;
use super::models::{
    CatalogSnapshot, QualityRequest, QualitySelector, Resolution, Selection, SelectionResult,
    StreamDescriptor, StreamRole, Tier,
};

/// Resolutions available per tier, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMenu {
    /// Distinct progressive resolutions, highest first
    pub progressive: Vec<Resolution>,
    /// Distinct video-only resolutions, highest first
    pub adaptive: Vec<Resolution>,
    pub audio_available: bool,
}

impl QualityMenu {
    pub fn from_snapshot(snapshot: &CatalogSnapshot) -> Self {
        Self {
            progressive: distinct_resolutions(&snapshot.streams, StreamRole::Progressive),
            adaptive: distinct_resolutions(&snapshot.streams, StreamRole::VideoOnly),
            audio_available: snapshot
                .streams
                .iter()
                .any(|s| s.role == StreamRole::AudioOnly),
        }
    }
}

fn distinct_resolutions(streams: &[StreamDescriptor], role: StreamRole) -> Vec<Resolution> {
    let mut resolutions: Vec<Resolution> = streams
        .iter()
        .filter(|s| s.role == role)
        .filter_map(|s| s.resolution)
        .collect();
    resolutions.sort_by(|a, b| b.cmp(a));
    resolutions.dedup();
    resolutions
}

pub struct StreamSelector;

impl StreamSelector {
    /// Resolve a request against a catalog snapshot
    pub fn select(
        snapshot: &CatalogSnapshot,
        request: &QualityRequest,
    ) -> Result<Selection, SelectionError> {
        let streams = &snapshot.streams;

        match (request.tier, request.selector) {
            (_, QualitySelector::AudioOnly) => {
                let audio = Self::find_best_audio(streams)?;
                Ok(Selection {
                    requested: *request,
                    result: SelectionResult::Single(audio.clone()),
                    effective_resolution: None,
                })
            }
            (Tier::Easy, QualitySelector::Resolution(wanted)) => {
                let stream = Self::find_progressive(streams, wanted)?;
                Ok(Selection {
                    requested: *request,
                    effective_resolution: stream.resolution,
                    result: SelectionResult::Single(stream.clone()),
                })
            }
            (Tier::Max, QualitySelector::Resolution(wanted)) => {
                let video = Self::find_video_only(streams, wanted)?;
                let audio = Self::find_best_audio(streams)?;
                Ok(Selection {
                    requested: *request,
                    effective_resolution: video.resolution,
                    result: SelectionResult::Pair {
                        video: video.clone(),
                        audio: audio.clone(),
                    },
                })
            }
        }
    }

    /// Exact progressive match, else the highest progressive; mp4 preferred among equals
    fn find_progressive(
        streams: &[StreamDescriptor],
        wanted: Resolution,
    ) -> Result<&StreamDescriptor, SelectionError> {
        let progressive = Self::with_role(streams, StreamRole::Progressive);

        let target = if progressive.iter().any(|s| s.resolution == Some(wanted)) {
            Some(wanted)
        } else {
            Self::highest_resolution(&progressive)
                .ok_or(SelectionError::NotFound(StreamRole::Progressive))?
                .resolution
        };

        let candidates: Vec<&StreamDescriptor> = progressive
            .into_iter()
            .filter(|s| s.resolution == target)
            .collect();

        candidates
            .iter()
            .find(|s| s.mime_subtype().as_deref() == Some("mp4"))
            .or_else(|| candidates.first())
            .copied()
            .ok_or(SelectionError::NotFound(StreamRole::Progressive))
    }

    /// Exact video-only match, else the highest video-only stream
    fn find_video_only(
        streams: &[StreamDescriptor],
        wanted: Resolution,
    ) -> Result<&StreamDescriptor, SelectionError> {
        let video = Self::with_role(streams, StreamRole::VideoOnly);

        if let Some(exact) = video.iter().find(|s| s.resolution == Some(wanted)) {
            return Ok(*exact);
        }

        Self::highest_resolution(&video).ok_or(SelectionError::NotFound(StreamRole::VideoOnly))
    }

    /// Audio-only stream with the highest average bitrate
    fn find_best_audio(streams: &[StreamDescriptor]) -> Result<&StreamDescriptor, SelectionError> {
        Self::with_role(streams, StreamRole::AudioOnly)
            .into_iter()
            .fold(None, |best: Option<&StreamDescriptor>, candidate| match best {
                Some(current) if candidate.abr_kbps.unwrap_or(0.0) <= current.abr_kbps.unwrap_or(0.0) => {
                    Some(current)
                }
                _ => Some(candidate),
            })
            .ok_or(SelectionError::NotFound(StreamRole::AudioOnly))
    }

    fn with_role(streams: &[StreamDescriptor], role: StreamRole) -> Vec<&StreamDescriptor> {
        streams.iter().filter(|s| s.role == role).collect()
    }

    // Unresolved streams rank below any resolved one; first wins on ties.
    fn highest_resolution<'a>(streams: &[&'a StreamDescriptor]) -> Option<&'a StreamDescriptor> {
        streams.iter().copied().fold(None, |best, candidate| match best {
            Some(current) if candidate.resolution <= current.resolution => Some(current),
            _ => Some(candidate),
        })
    }
}
