use crate::net::{ByteWriter, ConnectionId};
use crate::objects::{ObjectId, RegistryEvent, Scene};
use crate::time::NetworkFrame;

#[derive(Debug, Clone, Copy)]
struct DeltaSpan {
    begin: usize,
    end: usize,
}

/// Per-frame scratch shared by every connection on the authority.
///
/// Deltas are encoded once per frame into a single buffer and each connection
/// reads the span for the objects it replicates. Spans only live until the
/// next [`SharedReplicationState::begin_frame`].
#[derive(Debug, Default)]
pub struct SharedReplicationState {
    recently_added: Vec<ObjectId>,
    recently_removed: Vec<ObjectId>,
    sorted_objects: Vec<ObjectId>,
    queued: Vec<Option<ObjectId>>,
    unreliable_refresh: Vec<bool>,
    reliable_spans: Vec<Option<DeltaSpan>>,
    unreliable_spans: Vec<Option<DeltaSpan>>,
    delta_buffer: ByteWriter,
}

impl SharedReplicationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds frame bookkeeping from the scene. Returns every object that
    /// was initialized this frame together with its owner, if any.
    pub fn begin_frame(&mut self, scene: &mut Scene) -> Vec<(ObjectId, Option<ConnectionId>)> {
        self.reset_frame_buffers(scene.index_upper_bound());

        self.recently_removed.clear();
        for event in scene.drain_events() {
            match event {
                RegistryEvent::Added(id) => self.recently_added.push(id),
                RegistryEvent::Removed(id) => {
                    if let Some(position) = self.recently_added.iter().position(|&added| added == id) {
                        self.recently_added.remove(position);
                    } else {
                        self.recently_removed.push(id);
                    }
                }
            }
        }

        let initialized = self.initialize_new_objects(scene);
        self.sorted_objects = scene.sorted_by_depth();
        initialized
    }

    fn reset_frame_buffers(&mut self, index_upper_bound: usize) {
        self.queued.clear();
        self.queued.resize(index_upper_bound, None);
        self.unreliable_refresh.clear();
        self.unreliable_refresh.resize(index_upper_bound, false);
        self.reliable_spans.clear();
        self.reliable_spans.resize(index_upper_bound, None);
        self.unreliable_spans.clear();
        self.unreliable_spans.resize(index_upper_bound, None);
        self.delta_buffer.clear();
    }

    fn initialize_new_objects(&mut self, scene: &mut Scene) -> Vec<(ObjectId, Option<ConnectionId>)> {
        let mut initialized = Vec::with_capacity(self.recently_added.len());
        for id in self.recently_added.drain(..) {
            let Some(object) = scene.get_mut(id) else {
                log::warn!("Recently added object {} is missing from the scene", id);
                continue;
            };
            if let Err(err) = object.initialize_on_authority() {
                log::error!("Cannot initialize object {}: {}", id, err);
                continue;
            }
            initialized.push((id, object.owner()));
        }
        initialized
    }

    pub fn index_upper_bound(&self) -> usize {
        self.queued.len()
    }

    /// Objects removed from the scene since the previous frame.
    pub fn recently_removed(&self) -> &[ObjectId] {
        &self.recently_removed
    }

    /// Live objects, parents first.
    pub fn sorted_objects(&self) -> &[ObjectId] {
        &self.sorted_objects
    }

    pub fn queue_delta_update(&mut self, id: ObjectId) {
        if let Some(slot) = self.queued.get_mut(id.index() as usize) {
            *slot = Some(id);
        }
    }

    /// Queues `id` and writes its unreliable delta this frame even if the
    /// object reports no change. Used for connections that skipped earlier
    /// changes between periodic updates.
    pub fn queue_unreliable_refresh(&mut self, id: ObjectId) {
        self.queue_delta_update(id);
        if let Some(refresh) = self.unreliable_refresh.get_mut(id.index() as usize) {
            *refresh = true;
        }
    }

    pub fn is_delta_queued(&self, index: u32) -> bool {
        matches!(self.queued.get(index as usize), Some(Some(_)))
    }

    /// Encodes the deltas of every queued object once.
    pub fn cook_delta_updates(&mut self, scene: &mut Scene, frame: NetworkFrame) {
        for (index, slot) in self.queued.iter().enumerate() {
            let Some(id) = *slot else {
                continue;
            };
            let Some(object) = scene.get_mut(id) else {
                log::warn!("Queued object {} disappeared before cooking", id);
                continue;
            };

            if object.prepare_reliable_delta(frame) {
                let begin = self.delta_buffer.len();
                object.write_reliable_delta(frame, &mut self.delta_buffer);
                self.reliable_spans[index] = Some(DeltaSpan {
                    begin,
                    end: self.delta_buffer.len(),
                });
            }

            let changed = object.prepare_unreliable_delta(frame);
            if changed || self.unreliable_refresh[index] {
                let begin = self.delta_buffer.len();
                object.write_unreliable_delta(frame, &mut self.delta_buffer);
                self.unreliable_spans[index] = Some(DeltaSpan {
                    begin,
                    end: self.delta_buffer.len(),
                });
            }
        }
    }

    pub fn reliable_delta(&self, index: u32) -> Option<&[u8]> {
        let span = (*self.reliable_spans.get(index as usize)?)?;
        Some(self.span_data(span))
    }

    pub fn unreliable_delta(&self, index: u32) -> Option<&[u8]> {
        let span = (*self.unreliable_spans.get(index as usize)?)?;
        Some(self.span_data(span))
    }

    fn span_data(&self, span: DeltaSpan) -> &[u8] {
        &self.delta_buffer.as_slice()[span.begin..span.end]
    }
}
