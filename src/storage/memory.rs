// src/storage/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::{OutboxEvent, Payment, PaymentStatus};

use super::traits::{OutboxStore, PaymentStore, StoreError};

/// In-memory document store.
///
/// Every operation takes a single lock, which gives the same single-document
/// atomicity the real store offers. Failure injection hooks let tests drive
/// the unhappy paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    payments: Mutex<HashMap<String, Payment>>,
    outbox: Mutex<HashMap<String, OutboxEvent>>,
    update_failures: Mutex<u32>,
    insert_failures: Mutex<u32>,
    mark_failures: Mutex<u32>,
}

fn take_failure(budget: &Mutex<u32>) -> bool {
    let mut remaining = budget.lock();
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a payment (for testing).
    pub fn add_payment(&self, payment: Payment) {
        self.payments.lock().insert(payment.id.clone(), payment);
    }

    /// Make the next `n` decision updates fail as unavailable.
    pub fn fail_next_updates(&self, n: u32) {
        *self.update_failures.lock() = n;
    }

    /// Make the next `n` outbox inserts fail as unavailable.
    pub fn fail_next_inserts(&self, n: u32) {
        *self.insert_failures.lock() = n;
    }

    /// Make the next `n` publish acknowledgements fail as unavailable.
    pub fn fail_next_mark_published(&self, n: u32) {
        *self.mark_failures.lock() = n;
    }

    /// Snapshot of the outbox (for assertions).
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.outbox.lock().values().cloned().collect()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn update_decision(
        &self,
        id: &str,
        status: PaymentStatus,
        score: f64,
        reason: &str,
    ) -> Result<(), StoreError> {
        if take_failure(&self.update_failures) {
            return Err(StoreError::Unavailable("injected update failure".to_string()));
        }

        let mut payments = self.payments.lock();
        let payment = payments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        payment.status = status;
        payment.risk_score = Some(score);
        payment.risk_reason = Some(reason.to_string());
        payment.version += 1;

        Ok(())
    }

    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.lock().get(id).cloned())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut payments = self.payments.lock();
        if payments.contains_key(&payment.id) {
            return Err(StoreError::DuplicateKey(payment.id.clone()));
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn insert_event(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        if take_failure(&self.insert_failures) {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }

        let mut outbox = self.outbox.lock();
        if outbox.contains_key(&event.id) {
            return Err(StoreError::DuplicateKey(event.id.clone()));
        }
        outbox.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<OutboxEvent>, StoreError> {
        Ok(self.outbox.lock().get(id).cloned())
    }

    async fn mark_published(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if take_failure(&self.mark_failures) {
            return Err(StoreError::Unavailable("injected mark failure".to_string()));
        }

        let mut outbox = self.outbox.lock();
        let event = outbox
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        event.published = true;
        event.published_at.get_or_insert(at);
        Ok(())
    }
}
