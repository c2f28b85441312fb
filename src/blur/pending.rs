//! Parameter changes handed from control threads to the render thread.
//!
//! Setters never touch GPU state. They push a [`ParameterUpdate`] into a
//! channel that the render thread drains, in order, right before the first
//! draw of the next frame.

use crossbeam_channel::{Receiver, Sender, unbounded};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParameterUpdate {
    BlurSize(f32),
    /// Radius of the sharp circle, in normalised coordinates.
    Radius(f32),
    Center([f32; 2]),
    TransitionWidth(f32),
}

/// Cloneable, thread-safe handle for queueing parameter changes.
#[derive(Clone, Debug)]
pub struct BlurController {
    tx: Sender<ParameterUpdate>,
}

impl BlurController {
    pub fn set_blur_size(&self, value: f32) {
        self.push(ParameterUpdate::BlurSize(value));
    }

    pub fn set_radius(&self, radius: f32) {
        self.push(ParameterUpdate::Radius(radius));
    }

    pub fn set_center(&self, x: f32, y: f32) {
        self.push(ParameterUpdate::Center([x, y]));
    }

    pub fn set_transition_width(&self, width: f32) {
        self.push(ParameterUpdate::TransitionWidth(width));
    }

    pub fn push(&self, update: ParameterUpdate) {
        if self.tx.send(update).is_err() {
            tracing::warn!(?update, "blur parameter update dropped: render side is gone");
        }
    }
}

/// The render-thread end of the queue.
#[derive(Debug)]
pub struct PendingUpdates {
    tx: Sender<ParameterUpdate>,
    rx: Receiver<ParameterUpdate>,
}

impl Default for PendingUpdates {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingUpdates {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn controller(&self) -> BlurController {
        BlurController { tx: self.tx.clone() }
    }

    /// Take every queued update, oldest first.
    pub fn drain(&self) -> Vec<ParameterUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            updates.push(update);
        }
        if !updates.is_empty() {
            tracing::debug!(count = updates.len(), "drained pending blur updates");
        }
        updates
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
