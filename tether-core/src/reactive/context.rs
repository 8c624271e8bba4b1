//! Tracking Context
//!
//! The tracking context records which derivation is currently running.
//! This enables automatic dependency tracking: when an observable is read,
//! it is appended to the running derivation's accumulator.
//!
//! # Implementation
//!
//! The runtime owns a stack of frames. Running a derivation pushes a frame
//! carrying its run id and an empty accumulator; finishing the run pops it,
//! which restores the previous derivation. Untracked regions push a frame
//! with no derivation, so reads inside them are not recorded.
//!
//! Only the top frame is ever "tracking"; nested runs never see each
//! other's accumulators.

use smallvec::SmallVec;

use crate::graph::NodeId;

/// Observables read during one derivation run, in first-read order.
pub(crate) type Accumulator = SmallVec<[NodeId; 8]>;

/// An entry in the tracking stack.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The derivation being run, or `None` for an untracked region.
    derivation: Option<NodeId>,
    /// Run id assigned when the frame was entered.
    run_id: u64,
    /// Observables read so far during this run.
    new_observing: Accumulator,
}

impl Frame {
    pub(crate) fn into_new_observing(self) -> Accumulator {
        self.new_observing
    }
}

/// Stack of tracking frames.
#[derive(Debug, Default)]
pub(crate) struct TrackingStack {
    frames: Vec<Frame>,
}

impl TrackingStack {
    /// Enter a run of `derivation`.
    pub(crate) fn enter(&mut self, derivation: NodeId, run_id: u64) {
        self.frames.push(Frame {
            derivation: Some(derivation),
            run_id,
            new_observing: Accumulator::new(),
        });
    }

    /// Enter a region where reads are not recorded.
    pub(crate) fn enter_untracked(&mut self) {
        self.frames.push(Frame {
            derivation: None,
            run_id: 0,
            new_observing: Accumulator::new(),
        });
    }

    /// Leave the current frame.
    ///
    /// `expected` is the derivation the caller entered with.
    pub(crate) fn exit(&mut self, expected: Option<NodeId>) -> Option<Frame> {
        let frame = self.frames.pop();
        if let Some(frame) = &frame {
            debug_assert_eq!(
                frame.derivation, expected,
                "tracking frame mismatch: expected {:?}, got {:?}",
                expected, frame.derivation
            );
        }
        frame
    }

    /// The running derivation and its run id, if the top frame tracks.
    pub(crate) fn current(&self) -> Option<(NodeId, u64)> {
        let frame = self.frames.last()?;
        frame.derivation.map(|derivation| (derivation, frame.run_id))
    }

    /// Append an observable to the top frame's accumulator.
    pub(crate) fn record(&mut self, observable: NodeId) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.derivation.is_some() {
                frame.new_observing.push(observable);
            }
        }
    }

    /// Accumulator of the innermost run of `derivation`.
    pub(crate) fn pending(&self, derivation: NodeId) -> Option<&[NodeId]> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.derivation == Some(derivation))
            .map(|frame| frame.new_observing.as_slice())
    }

    pub(crate) fn is_tracking(&self) -> bool {
        self.current().is_some()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}
