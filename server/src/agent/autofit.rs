//! Frame auto-fit — grow frames to enclose their children with padding.
//!
//! DESIGN
//! ======
//! Runs once over the merged board view (snapshot ∪ pending plan) before the
//! agent's batch commit. Child assignment is two-phase:
//!
//! 1. *Strict containment.* Every non-connector object (frames included) is
//!    assigned to the smallest frame whose current rectangle strictly
//!    contains the object's top-left corner. Smallest-wins resolves nested
//!    frames without letting sibling frames steal one another's children.
//! 2. *Spillover, non-frame objects only.* An object left unassigned goes to
//!    the nearest frame by summed axis-wise gap, but only when the gap along
//!    each axis is at most the object's own extent along that axis. This
//!    recovers objects the model placed slightly outside an under-sized
//!    frame. Ties keep the first frame in processing order.
//!
//! Frames are processed in increasing current-area order so inner frames
//! grow before the outer frames that contain them; the merged view is
//! updated in place between frames. Frames only grow, never shrink: the new
//! rectangle is the element-wise min/max of the current rectangle and the
//! child-padded bounds.

use std::collections::HashMap;

use serde_json::json;

use crate::model::{self, BBox, Fields, ObjectType};

/// Padding applied between children and the frame border. The top band is
/// taller to leave room for the frame title.
#[derive(Debug, Clone, Copy)]
pub struct AutofitParams {
    pub pad_side: f64,
    pub pad_top: f64,
    pub pad_bottom: f64,
}

/// Compute frame growth patches over the merged board view, mutating it in
/// place. Returns `(frame_id, {x, y, width, height})` for each frame whose
/// rectangle changed.
#[must_use]
pub fn auto_fit_frames(objects: &mut HashMap<String, Fields>, params: &AutofitParams) -> Vec<(String, Fields)> {
    // Frames in increasing current-area order; this is both the assignment
    // tie-break order and the growth processing order.
    let mut frames: Vec<(String, BBox)> = objects
        .iter()
        .filter(|(_, fields)| model::object_type_of(fields) == Some(ObjectType::Frame))
        .filter_map(|(id, fields)| model::world_bbox(fields).map(|bbox| (id.clone(), bbox)))
        .collect();
    frames.sort_by(|a, b| {
        a.1.area()
            .partial_cmp(&b.1.area())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    if frames.is_empty() {
        return Vec::new();
    }

    let mut assignment: HashMap<String, Vec<String>> = HashMap::new();

    // Phase 1 — strict containment, smallest frame wins.
    for (id, fields) in objects.iter() {
        let ty = model::object_type_of(fields);
        if ty == Some(ObjectType::Connector) || ty.is_none() {
            continue;
        }
        let Some(bbox) = model::world_bbox(fields) else {
            continue;
        };
        let home = frames
            .iter()
            .filter(|(frame_id, _)| frame_id != id)
            .find(|(_, frame_bbox)| frame_bbox.contains_point_strict(bbox.x, bbox.y));
        if let Some((frame_id, _)) = home {
            assignment.entry(frame_id.clone()).or_default().push(id.clone());
        }
    }

    // Phase 2 — spillover for unassigned non-frame objects.
    let assigned: std::collections::HashSet<&String> = assignment.values().flatten().collect();
    let mut spillover: Vec<(String, String)> = Vec::new();
    for (id, fields) in objects.iter() {
        let ty = model::object_type_of(fields);
        if !matches!(
            ty,
            Some(ObjectType::Sticky | ObjectType::Rectangle | ObjectType::Circle | ObjectType::Line | ObjectType::Text)
        ) {
            continue;
        }
        if assigned.contains(id) {
            continue;
        }
        let Some(bbox) = model::world_bbox(fields) else {
            continue;
        };

        let mut best: Option<(&String, f64)> = None;
        for (frame_id, frame_bbox) in &frames {
            let gap_x = frame_bbox.gap_x(&bbox);
            let gap_y = frame_bbox.gap_y(&bbox);
            if gap_x > bbox.w || gap_y > bbox.h {
                continue;
            }
            let distance = gap_x + gap_y;
            // Strict less-than keeps the first frame on ties.
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((frame_id, distance));
            }
        }
        if let Some((frame_id, _)) = best {
            spillover.push((frame_id.clone(), id.clone()));
        }
    }
    for (frame_id, object_id) in spillover {
        assignment.entry(frame_id).or_default().push(object_id);
    }

    // Growth — inner frames first, merged view updated between frames.
    let mut patches = Vec::new();
    for (frame_id, _) in &frames {
        let Some(children) = assignment.get(frame_id) else {
            continue;
        };
        let child_bounds: Vec<BBox> = children
            .iter()
            .filter_map(|child_id| objects.get(child_id).and_then(|f| model::world_bbox(f)))
            .collect();
        if child_bounds.is_empty() {
            continue;
        }

        let Some(current) = objects.get(frame_id).and_then(|f| model::world_bbox(f)) else {
            continue;
        };

        let required_x = fold_min(child_bounds.iter().map(|b| b.x)) - params.pad_side;
        let required_y = fold_min(child_bounds.iter().map(|b| b.y)) - params.pad_top;
        let required_right = fold_max(child_bounds.iter().map(BBox::right)) + params.pad_side;
        let required_bottom = fold_max(child_bounds.iter().map(BBox::bottom)) + params.pad_bottom;

        let new_x = current.x.min(required_x);
        let new_y = current.y.min(required_y);
        let new_right = current.right().max(required_right);
        let new_bottom = current.bottom().max(required_bottom);
        let grown = BBox { x: new_x, y: new_y, w: new_right - new_x, h: new_bottom - new_y };

        if grown == current {
            continue;
        }

        if let Some(fields) = objects.get_mut(frame_id) {
            fields.insert(model::F_X.into(), json!(grown.x));
            fields.insert(model::F_Y.into(), json!(grown.y));
            fields.insert(model::F_WIDTH.into(), json!(grown.w));
            fields.insert(model::F_HEIGHT.into(), json!(grown.h));
        }
        let patch: Fields = [
            (model::F_X.to_owned(), json!(grown.x)),
            (model::F_Y.to_owned(), json!(grown.y)),
            (model::F_WIDTH.to_owned(), json!(grown.w)),
            (model::F_HEIGHT.to_owned(), json!(grown.h)),
        ]
        .into_iter()
        .collect();
        patches.push((frame_id.clone(), patch));
    }

    patches
}

fn fold_min(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::INFINITY, f64::min)
}

fn fold_max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
#[path = "autofit_test.rs"]
mod tests;
