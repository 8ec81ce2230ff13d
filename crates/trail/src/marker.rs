use crate::error::TrailError;
use crate::span::Span;
use crate::stake::Stake;
use crate::trail::{Trail, TrailEvent};
use crossbeam_channel::Receiver;

/// A point marker on the frame axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub pos: i64,
    pub label: String,
}

/// Region stake of a [`MarkerTrail`]; a labeled stake carries the marker
/// sitting at its start boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStake {
    span: Span,
    label: Option<String>,
}

impl MarkerStake {
    pub fn unlabeled(span: Span) -> Self {
        Self { span, label: None }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Stake for MarkerStake {
    fn span(&self) -> Span {
        self.span
    }

    fn shifted(&self, delta: i64) -> Self {
        Self {
            span: self.span.shift(delta),
            label: self.label.clone(),
        }
    }

    fn split_at(&self, pos: i64) -> (Self, Self) {
        (
            Self {
                span: Span::new(self.span.start, pos),
                label: self.label.clone(),
            },
            // The marker stays with the original start boundary.
            Self {
                span: Span::new(pos, self.span.stop),
                label: None,
            },
        )
    }
}

/// Ordered marker index over the same axis as an audio trail.
///
/// Markers are not decimated; the trail is only used so markers shift
/// consistently with content edits (an insert or delete on the audio trail is
/// mirrored here).
#[derive(Debug, Clone)]
pub struct MarkerTrail {
    trail: Trail<MarkerStake>,
}

impl MarkerTrail {
    pub fn with_length(length: i64) -> Self {
        let trail = if length > 0 {
            Trail::from_stakes(vec![MarkerStake::unlabeled(Span::new(0, length))])
                .expect("single stake is contiguous")
        } else {
            Trail::new()
        };
        Self { trail }
    }

    pub fn len(&self) -> i64 {
        self.trail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trail.is_empty()
    }

    pub fn subscribe(&mut self) -> Receiver<TrailEvent> {
        self.trail.subscribe()
    }

    /// Place (or rename) a marker at `pos`. Splitting the containing region
    /// is a structural no-op, so no trail event fires.
    pub fn add_marker(&mut self, pos: i64, label: impl Into<String>) -> Result<(), TrailError> {
        if pos < 0 || pos >= self.trail.len() {
            return Err(TrailError::OutOfRange {
                span: Span::new(pos, pos),
                length: self.trail.len(),
            });
        }
        let idx = self.trail.split_boundary(pos);
        self.trail.stakes_mut()[idx].label = Some(label.into());
        Ok(())
    }

    /// Remove the marker at `pos` if one exists; returns whether one did.
    pub fn remove_marker(&mut self, pos: i64) -> Result<bool, TrailError> {
        if pos < 0 || pos >= self.trail.len() {
            return Err(TrailError::OutOfRange {
                span: Span::new(pos, pos),
                length: self.trail.len(),
            });
        }
        for stake in self.trail.stakes_mut() {
            if stake.span.start == pos && stake.label.is_some() {
                stake.label = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Markers inside `span`, in ascending position order.
    pub fn markers_in(&self, span: Span) -> Vec<Marker> {
        self.trail
            .stakes()
            .iter()
            .filter(|s| span.contains(s.span.start))
            .filter_map(|s| {
                s.label.as_ref().map(|label| Marker {
                    pos: s.span.start,
                    label: label.clone(),
                })
            })
            .collect()
    }

    /// Mirror a content insertion: markers at or after `at` shift right.
    pub fn insert_gap(&mut self, at: i64, length: i64) -> Result<(), TrailError> {
        if length <= 0 {
            return Ok(());
        }
        self.trail
            .insert(at, vec![MarkerStake::unlabeled(Span::new(0, length))])
    }

    /// Mirror a content deletion: markers inside `span` vanish, later ones
    /// shift left.
    pub fn delete(&mut self, span: Span) -> Result<(), TrailError> {
        self.trail.delete(span)
    }

    pub fn verify_contiguity(&self) -> Result<(), TrailError> {
        self.trail.verify_contiguity()
    }
}
