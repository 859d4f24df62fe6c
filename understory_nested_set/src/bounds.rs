// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bound arithmetic: where placed nodes land and how far rows shift.
//!
//! Every structural mutation is described by a target left bound and a gap
//! width. Inserting a leaf opens a gap of [`LEAF_GAP`]; moving a subtree opens
//! (and first closes) a gap of [`subtree_gap`]. These functions do no I/O.

use crate::types::Bounds;

/// Width of the gap a single new leaf occupies.
pub const LEAF_GAP: i64 = 2;

/// Bounds of a fresh tree's first root.
pub const fn root() -> Bounds {
    Bounds::new(1, 2)
}

/// Where a node goes relative to a reference node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// First child of the reference.
    FirstChild,
    /// Last child of the reference.
    LastChild,
    /// Sibling immediately before the reference.
    PreviousSibling,
    /// Sibling immediately after the reference.
    NextSibling,
}

impl Placement {
    /// All placements, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::FirstChild,
        Self::LastChild,
        Self::PreviousSibling,
        Self::NextSibling,
    ];

    /// Left bound at which the placed node starts, given the reference's current bounds.
    ///
    /// This is also where the gap for the placed node is opened.
    pub const fn target_left(self, reference: Bounds) -> i64 {
        match self {
            Self::FirstChild => reference.left + 1,
            Self::LastChild => reference.right,
            Self::PreviousSibling => reference.left,
            Self::NextSibling => reference.right + 1,
        }
    }

    /// Bounds of the reference after a gap of `gap` opened at [`target_left`](Self::target_left).
    pub const fn reference_after_gap(self, reference: Bounds, gap: i64) -> Bounds {
        match self {
            Self::FirstChild | Self::LastChild => {
                Bounds::new(reference.left, reference.right + gap)
            }
            Self::PreviousSibling => reference.shifted(gap),
            Self::NextSibling => reference,
        }
    }

    /// `true` for the child placements.
    pub const fn is_child(self) -> bool {
        matches!(self, Self::FirstChild | Self::LastChild)
    }
}

/// Bounds for a new leaf placed relative to `reference`.
pub const fn leaf_at(placement: Placement, reference: Bounds) -> Bounds {
    let left = placement.target_left(reference);
    Bounds::new(left, left + 1)
}

/// Space a subtree occupies in the numbering: `right - left + 1`.
pub const fn subtree_gap(bounds: Bounds) -> i64 {
    bounds.size() + 1
}

/// Delta that parks a subtree so its right bound lands on `0`.
pub const fn park_delta(bounds: Bounds) -> i64 {
    -bounds.right
}

/// Delta that moves a parked subtree so its left bound lands on `target_left`.
pub const fn unpark_delta(bounds: Bounds, target_left: i64) -> i64 {
    bounds.size() + target_left
}
