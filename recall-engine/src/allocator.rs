//! Field-name to storage-slot assignment for one load.

use std::collections::HashMap;

use recall_core::{RecallResult, ValidationError};

/// Physical column name of a slot.
pub fn slot_column(slot: usize) -> String {
    format!("field{}", slot)
}

/// Assigns each newly seen field name the next free slot, in first-seen order.
///
/// Slots are never reassigned for the lifetime of the allocator.
#[derive(Debug, Clone)]
pub struct ColumnAllocator {
    capacity: usize,
    slots: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Slot for `field`, allocating one if the field is new.
    pub fn allocate(&mut self, field: &str) -> RecallResult<usize> {
        if let Some(&slot) = self.index.get(field) {
            return Ok(slot);
        }
        if self.slots.len() >= self.capacity {
            return Err(ValidationError::CapacityExceeded {
                capacity: self.capacity,
                field: field.to_string(),
            }
            .into());
        }
        let slot = self.slots.len();
        self.slots.push(field.to_string());
        self.index.insert(field.to_string(), slot);
        Ok(slot)
    }

    pub fn slot(&self, field: &str) -> Option<usize> {
        self.index.get(field).copied()
    }

    /// Field names in slot order.
    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<String> {
        self.slots
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
