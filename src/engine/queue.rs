use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::driver::DriverWithDistance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Waiting,
    Accepted,
    Exhausted,
}

/// Closest-first candidates for one order's search round.
#[derive(Debug)]
pub struct DriverQueue {
    order_id: Uuid,
    drivers: Vec<DriverWithDistance>,
    cursor: usize,
    current: Option<usize>,
    assignment_id: Option<Uuid>,
    state: QueueState,
    created_at: DateTime<Utc>,
}

impl DriverQueue {
    pub fn new(order_id: Uuid, drivers: Vec<DriverWithDistance>) -> Self {
        Self {
            order_id,
            drivers,
            cursor: 0,
            current: None,
            assignment_id: None,
            state: QueueState::Idle,
            created_at: Utc::now(),
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, QueueState::Accepted | QueueState::Exhausted)
    }

    pub fn has_next(&self) -> bool {
        !self.is_terminal() && self.cursor < self.drivers.len()
    }

    /// Moves to the next candidate. Running past the end, or calling after
    /// the queue reached a terminal state, yields `None`.
    pub fn next(&mut self) -> Option<DriverWithDistance> {
        if self.is_terminal() {
            return None;
        }

        match self.drivers.get(self.cursor) {
            Some(driver) => {
                self.current = Some(self.cursor);
                self.cursor += 1;
                self.assignment_id = None;
                self.state = QueueState::Waiting;
                Some(driver.clone())
            }
            None => {
                self.current = None;
                self.assignment_id = None;
                self.state = QueueState::Exhausted;
                None
            }
        }
    }

    pub fn current(&self) -> Option<&DriverWithDistance> {
        self.current.and_then(|index| self.drivers.get(index))
    }

    pub fn set_assignment_id(&mut self, assignment_id: Uuid) {
        self.assignment_id = Some(assignment_id);
    }

    pub fn assignment_id(&self) -> Option<Uuid> {
        self.assignment_id
    }

    pub fn mark_accepted(&mut self) {
        self.state = QueueState::Accepted;
    }

    pub fn remaining_count(&self) -> usize {
        self.drivers.len().saturating_sub(self.cursor)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

pub type SharedQueue = Arc<Mutex<DriverQueue>>;

/// Live queues of every order currently being offered.
#[derive(Debug, Default)]
pub struct QueueManager {
    queues: DashMap<Uuid, SharedQueue>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh queue for the order, replacing any previous round's.
    pub fn create_queue(&self, order_id: Uuid, drivers: Vec<DriverWithDistance>) -> SharedQueue {
        let queue = Arc::new(Mutex::new(DriverQueue::new(order_id, drivers)));
        self.queues.insert(order_id, Arc::clone(&queue));
        queue
    }

    pub fn get_queue(&self, order_id: Uuid) -> Option<SharedQueue> {
        self.queues.get(&order_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Idempotent; returns whether a queue was present.
    pub fn remove_queue(&self, order_id: Uuid) -> bool {
        self.queues.remove(&order_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.queues.len()
    }
}
