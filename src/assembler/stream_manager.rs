//! Multiplexes incoming content streams by id.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::PayloadAssembler;
use crate::buffer::SubscribableBuffer;
use crate::protocol::{Header, PayloadType};

/// Callback fired when a stream is closed before it completed.
pub type CancelStreamHandler = Box<dyn Fn(&PayloadAssembler) + Send + Sync>;

/// Maximum closed ids remembered while waiting for their terminal frame.
pub const MAX_CLOSED_STREAMS: usize = 1024;

/// Maximum finished streams kept for a parent payload that never claimed them.
pub const MAX_UNCLAIMED_STREAMS: usize = 256;

#[derive(Default)]
struct Tables {
    active: HashMap<Uuid, Arc<PayloadAssembler>>,
    /// Streams closed early whose remaining frames are still in flight.
    closed: HashSet<Uuid>,
    /// Insertion order of `closed`, oldest first.
    closed_order: VecDeque<Uuid>,
    /// Finished streams no parent payload has claimed yet, oldest first.
    unclaimed: VecDeque<Uuid>,
}

impl Tables {
    fn mark_closed(&mut self, id: Uuid) {
        if !self.closed.insert(id) {
            return;
        }
        // Ids already released by their terminal frame.
        while let Some(front) = self.closed_order.front() {
            if self.closed.contains(front) {
                break;
            }
            self.closed_order.pop_front();
        }
        self.closed_order.push_back(id);
        while self.closed_order.len() > MAX_CLOSED_STREAMS {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }

    fn mark_unclaimed(&mut self, id: Uuid) {
        self.unclaimed.push_back(id);
        while self.unclaimed.len() > MAX_UNCLAIMED_STREAMS {
            let Some(oldest) = self.unclaimed.pop_front() else {
                break;
            };
            if self.active.get(&oldest).is_some_and(|a| !a.is_claimed()) {
                tracing::warn!("Dropping content stream {}: no payload claimed it", oldest);
                self.active.remove(&oldest);
            }
        }
    }
}

/// Owns the stream assemblers of one connection.
///
/// Assemblers are created lazily, by whichever arrives first: the parent
/// payload's descriptor or the stream's own frames.
pub struct StreamManager {
    tables: Mutex<Tables>,
    on_cancel_stream: CancelStreamHandler,
}

impl StreamManager {
    /// Create a manager. `on_cancel_stream` runs for every stream closed
    /// before it completed.
    pub fn new<F>(on_cancel_stream: F) -> Arc<Self>
    where
        F: Fn(&PayloadAssembler) + Send + Sync + 'static,
    {
        Arc::new(Self {
            tables: Mutex::new(Tables::default()),
            on_cancel_stream: Box::new(on_cancel_stream),
        })
    }

    /// Get the assembler for `id`, creating it if needed.
    pub fn get_payload_assembler(self: &Arc<Self>, id: Uuid) -> Arc<PayloadAssembler> {
        self.tables
            .lock()
            .active
            .entry(id)
            .or_insert_with(|| {
                Arc::new(PayloadAssembler::new(
                    id,
                    PayloadType::Stream,
                    Arc::downgrade(self),
                ))
            })
            .clone()
    }

    /// Landing buffer for a stream frame.
    ///
    /// Returns `None` for streams the local reader already gave up on.
    pub fn get_payload_stream(self: &Arc<Self>, header: &Header) -> Option<Arc<SubscribableBuffer>> {
        if self.tables.lock().closed.contains(&header.id) {
            return None;
        }
        Some(self.get_payload_assembler(header.id).buffer().clone())
    }

    /// Forward frame progress to the stream's assembler.
    ///
    /// A stream that finishes before any parent payload claimed it is kept
    /// for a late parent, up to [`MAX_UNCLAIMED_STREAMS`] of them.
    pub fn on_receive(&self, header: &Header, content_length: usize) {
        let assembler = {
            let mut tables = self.tables.lock();
            if header.end && tables.closed.remove(&header.id) {
                return;
            }
            tables.active.get(&header.id).cloned()
        };

        let Some(assembler) = assembler else {
            return;
        };
        if assembler.on_receive(header, content_length) && !assembler.is_claimed() {
            self.tables.lock().mark_unclaimed(header.id);
        }
    }

    /// Remove the stream's assembler.
    ///
    /// A stream closed before its declared length or its end flag is
    /// cancelled, and the cancel handler is told so the remote can stop.
    pub fn close_stream(&self, id: Uuid) {
        let assembler = {
            let mut tables = self.tables.lock();
            let assembler = tables.active.remove(&id);
            if let Some(a) = &assembler {
                if !a.is_end() {
                    tables.mark_closed(id);
                }
            }
            assembler
        };

        let Some(assembler) = assembler else {
            return;
        };
        if assembler.is_incomplete() {
            assembler.buffer().cancel();
            (self.on_cancel_stream)(&assembler);
        }
    }

    /// Drop every stream, cancelling the ones still receiving.
    ///
    /// Used when the connection goes away; no cancel frames are sent.
    pub fn clear(&self) {
        let assemblers: Vec<_> = {
            let mut tables = self.tables.lock();
            tables.closed.clear();
            tables.closed_order.clear();
            tables.unclaimed.clear();
            tables.active.drain().map(|(_, a)| a).collect()
        };

        for assembler in assemblers {
            if !assembler.is_end() {
                assembler.buffer().cancel();
            }
        }
    }

    /// Number of streams being tracked.
    pub fn active_count(&self) -> usize {
        self.tables.lock().active.len()
    }

    /// Number of closed streams still waiting for their terminal frame.
    pub fn closed_count(&self) -> usize {
        self.tables.lock().closed.len()
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("active", &self.active_count())
            .field("closed", &self.closed_count())
            .finish()
    }
}
