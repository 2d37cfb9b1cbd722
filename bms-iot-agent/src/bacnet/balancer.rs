//! Reader selection strategies. The balancer never owns readers; it only
//! picks from the snapshot the pool hands it.

use std::sync::Arc;
use std::sync::Mutex;

use log::{debug, warn};

use super::reader::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastBusy,
    FirstAvailable,
}

#[derive(Debug)]
pub struct LoadBalancer {
    strategy: Strategy,
    cursor: Mutex<usize>,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        LoadBalancer {
            strategy,
            cursor: Mutex::new(0),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn select(&self, readers: &[Arc<Reader>]) -> Option<Arc<Reader>> {
        if readers.is_empty() {
            warn!("No readers available for selection");
            return None;
        }

        let selected = match self.strategy {
            Strategy::RoundRobin => self.select_round_robin(readers),
            Strategy::LeastBusy => self.select_least_busy(readers),
            Strategy::FirstAvailable => readers.first().cloned(),
        };

        if let Some(reader) = &selected {
            debug!(
                "Selected reader {} ({:?} strategy, {} in flight)",
                reader.id(),
                self.strategy,
                reader.active_operations()
            );
        }
        selected
    }

    fn select_round_robin(&self, readers: &[Arc<Reader>]) -> Option<Arc<Reader>> {
        let mut cursor = self.cursor.lock().expect("balancer cursor poisoned");
        if *cursor >= readers.len() {
            warn!(
                "Round-robin cursor {} out of bounds for {} readers, resetting",
                *cursor,
                readers.len()
            );
            *cursor = 0;
        }
        let selected = readers[*cursor].clone();
        *cursor = (*cursor + 1) % readers.len();
        Some(selected)
    }

    fn select_least_busy(&self, readers: &[Arc<Reader>]) -> Option<Arc<Reader>> {
        readers
            .iter()
            .min_by_key(|reader| reader.active_operations())
            .cloned()
    }

    /// Readers with capacity left, preserving pool order.
    pub fn available(readers: &[Arc<Reader>], max_concurrent: usize) -> Vec<Arc<Reader>> {
        readers
            .iter()
            .filter(|reader| reader.active_operations() < max_concurrent)
            .cloned()
            .collect()
    }

    /// Resets the round-robin cursor; the pool calls this whenever the
    /// reader set changes.
    pub fn reset(&self) {
        *self.cursor.lock().expect("balancer cursor poisoned") = 0;
    }
}
