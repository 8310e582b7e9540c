//! Lock-free producer -> single consumer mailbox (spec.md §2 row 4, §5).
//!
//! Backed by `tokio::sync::mpsc::unbounded_channel`: producers never
//! block, the consumer wakes and drains. Used both for UpTrack control
//! actions (AddLocal/DelLocal/RequestKeyframe) and WriterPool worker
//! action channels.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Actions a subscriber-facing component accepts out of band from its hot
/// path, per spec.md §4.6 step 9 and §5 ("async notification ... sent to
/// the writer pool via the unbounded mailbox").
#[derive(Debug, Clone)]
pub enum TrackAction<T> {
    AddLocal(T),
    DelLocal(u32),
    RequestKeyframe,
}

pub struct Mailbox<T> {
    tx: UnboundedSender<T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Mailbox { tx: self.tx.clone() }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (tx, rx) = unbounded_channel();
        (Mailbox { tx }, rx)
    }

    /// Never blocks; returns `false` if the consumer has been dropped.
    pub fn send(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }
}

#[cfg(test)]
mod mailbox_test;
