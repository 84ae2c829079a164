use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, info};

use crate::{audio::track::QueueEntry, error::SessionError};

/// Cola FIFO de una sesión.
///
/// Solo se inserta por el final, se extrae por el frente o se vacía
/// completa; nunca se reordena. La entrada que está sonando no vive aquí.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<QueueEntry>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una entrada al final y devuelve su posición (desde 1).
    pub fn enqueue(&mut self, entry: QueueEntry) -> Result<usize, SessionError> {
        if self.items.len() >= self.max_size {
            return Err(SessionError::QueueFull { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {}", entry.title());
        self.items.push_back(entry);

        Ok(self.items.len())
    }

    /// Saca la primera entrada (FIFO)
    pub fn pop_next(&mut self) -> Option<QueueEntry> {
        let next = self.items.pop_front();
        match &next {
            Some(entry) => debug!("➡️ Siguiente en cola: {}", entry.title()),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Vacía la cola y devuelve cuántas entradas se quitaron
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    /// Copia inmutable de la cola en este instante, para mostrar.
    pub fn peek_all(&self) -> QueueSnapshot {
        QueueSnapshot {
            entries: self.items.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Foto de la cola tomada con [`TrackQueue::peek_all`].
///
/// Es barata de clonar y se puede recorrer cuantas veces se quiera; los
/// cambios posteriores en la cola no la afectan.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    entries: Arc<[QueueEntry]>,
}

impl QueueSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, QueueEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Obtiene una página específica de la cola
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage<'_> {
        let items_per_page = items_per_page.max(1);
        let total_pages = self.entries.len().div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.entries.len());

        QueuePage {
            items: &self.entries[start..end],
            first_position: start + 1,
            current_page,
            total_pages,
        }
    }
}

impl<'a> IntoIterator for &'a QueueSnapshot {
    type Item = &'a QueueEntry;
    type IntoIter = std::slice::Iter<'a, QueueEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueuePage<'a> {
    pub items: &'a [QueueEntry],
    /// Posición (desde 1) del primer elemento de la página
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::{Provider, Requester, TrackRequest};
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn entry(query: &str) -> QueueEntry {
        QueueEntry::new(TrackRequest::new(
            query,
            Provider::YouTube,
            Requester { id: UserId::new(1), name: "tester".into() },
        ))
    }

    fn titles(snapshot: &QueueSnapshot) -> Vec<String> {
        snapshot.iter().map(|e| e.title().to_string()).collect()
    }

    #[test]
    fn pop_returns_entries_in_insertion_order() {
        let mut queue = TrackQueue::new(10);
        for (i, q) in ["a", "b", "c", "d"].iter().enumerate() {
            assert_eq!(queue.enqueue(entry(q)), Ok(i + 1));
        }

        let popped: Vec<String> = std::iter::from_fn(|| queue.pop_next())
            .map(|e| e.title().to_string())
            .collect();
        assert_eq!(popped, vec!["a", "b", "c", "d"]);
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn clear_reports_what_was_there() {
        let mut queue = TrackQueue::new(10);
        assert_eq!(queue.clear(), 0);

        for q in ["a", "b", "c"] {
            queue.enqueue(entry(q)).unwrap();
        }
        queue.pop_next();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let mut queue = TrackQueue::new(10);
        queue.enqueue(entry("a")).unwrap();
        queue.enqueue(entry("b")).unwrap();

        let snapshot = queue.peek_all();
        queue.pop_next();
        queue.enqueue(entry("c")).unwrap();

        assert_eq!(titles(&snapshot), vec!["a", "b"]);
        // se puede recorrer de nuevo
        assert_eq!((&snapshot).into_iter().count(), 2);
        assert_eq!(titles(&queue.peek_all()), vec!["b", "c"]);
    }

    #[test]
    fn full_queue_rejects_without_change() {
        let mut queue = TrackQueue::new(2);
        queue.enqueue(entry("a")).unwrap();
        queue.enqueue(entry("b")).unwrap();
        assert_eq!(queue.enqueue(entry("c")), Err(SessionError::QueueFull { max: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pages_are_clamped() {
        let mut queue = TrackQueue::new(50);
        for i in 0..12 {
            queue.enqueue(entry(&format!("t{i}"))).unwrap();
        }
        let snapshot = queue.peek_all();

        let second = snapshot.page(2, 5);
        assert_eq!(second.total_pages, 3);
        assert_eq!(second.first_position, 6);
        assert_eq!(second.items.len(), 5);

        let past_end = snapshot.page(9, 5);
        assert_eq!(past_end.current_page, 3);
        assert_eq!(past_end.items.len(), 2);

        let empty_snapshot = QueueSnapshot::default();
        let empty = empty_snapshot.page(1, 5);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.items.is_empty());
    }
}
