//! Batches of records handed from one processor to the next

use crate::event::{ComplexEvent, EventKind};

/// Ordered batch of records.
///
/// A chunk is owned by whichever processor currently holds it. Processors
/// that retain a record past the call that delivered it clone it first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventChunk {
    events: Vec<ComplexEvent>,
    /// Set when downstream must treat the chunk as one atomic window snapshot
    pub is_batch: bool,
}

impl EventChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch() -> Self {
        Self {
            events: Vec::new(),
            is_batch: true,
        }
    }

    pub fn from_events(events: Vec<ComplexEvent>) -> Self {
        Self {
            events,
            is_batch: false,
        }
    }

    pub fn single(event: impl Into<ComplexEvent>) -> Self {
        Self::from_events(vec![event.into()])
    }

    pub fn push(&mut self, event: impl Into<ComplexEvent>) {
        self.events.push(event.into());
    }

    pub fn extend<I, E>(&mut self, events: I)
    where
        I: IntoIterator<Item = E>,
        E: Into<ComplexEvent>,
    {
        self.events.extend(events.into_iter().map(Into::into));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first(&self) -> Option<&ComplexEvent> {
        self.events.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ComplexEvent> {
        self.events.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ComplexEvent> {
        self.events.iter_mut()
    }

    pub fn retain(&mut self, keep: impl FnMut(&ComplexEvent) -> bool) {
        self.events.retain(keep);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Move all records out, leaving an empty chunk with the same batch flag.
    pub fn take(&mut self) -> Vec<ComplexEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn into_events(self) -> Vec<ComplexEvent> {
        self.events
    }

    /// True when every record in the chunk is a timer tick.
    pub fn is_timer_only(&self) -> bool {
        !self.events.is_empty() && self.events.iter().all(|e| e.kind() == EventKind::Timer)
    }
}

impl IntoIterator for EventChunk {
    type Item = ComplexEvent;
    type IntoIter = std::vec::IntoIter<ComplexEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventChunk {
    type Item = &'a ComplexEvent;
    type IntoIter = std::slice::Iter<'a, ComplexEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<ComplexEvent> for EventChunk {
    fn from_iter<T: IntoIterator<Item = ComplexEvent>>(iter: T) -> Self {
        Self::from_events(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamEvent;

    #[test]
    fn test_take_preserves_batch_flag() {
        let mut chunk = EventChunk::batch();
        chunk.push(StreamEvent::new(0, 0, 0));
        let taken = chunk.take();
        assert_eq!(taken.len(), 1);
        assert!(chunk.is_empty());
        assert!(chunk.is_batch);
    }

    #[test]
    fn test_timer_only() {
        let mut chunk = EventChunk::single(StreamEvent::timer(5));
        assert!(chunk.is_timer_only());
        chunk.push(StreamEvent::new(0, 0, 0));
        assert!(!chunk.is_timer_only());
        assert!(!EventChunk::new().is_timer_only());
    }
}
