//! Human review queue.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use policy::ActionRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Approved => "APPROVED",
            ReviewStatus::Denied => "DENIED",
        })
    }
}

/// A request parked until an operator decides on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub request: ActionRequest,
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Pending review store. Items never expire.
#[derive(Default)]
pub struct ApprovalQueue {
    items: Mutex<Vec<ReviewItem>>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: ActionRequest, reason: impl Into<String>) -> ReviewItem {
        let item = ReviewItem {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            reason: reason.into(),
            request,
            status: ReviewStatus::Pending,
            resolved_at: None,
            executed_at: None,
        };
        self.items.lock().push(item.clone());
        item
    }

    /// All items, newest first.
    pub fn list(&self) -> Vec<ReviewItem> {
        self.items.lock().iter().rev().cloned().collect()
    }

    /// Unresolved items, newest first.
    pub fn pending(&self) -> Vec<ReviewItem> {
        self.items
            .lock()
            .iter()
            .rev()
            .filter(|i| i.status == ReviewStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<ReviewItem> {
        self.items.lock().iter().find(|i| i.id == id).cloned()
    }

    pub fn approve(&self, id: Uuid) -> Result<ReviewItem> {
        self.resolve(id, ReviewStatus::Approved)
    }

    pub fn deny(&self, id: Uuid) -> Result<ReviewItem> {
        self.resolve(id, ReviewStatus::Denied)
    }

    fn resolve(&self, id: Uuid, status: ReviewStatus) -> Result<ReviewItem> {
        let mut items = self.items.lock();
        let item = items.iter_mut().find(|i| i.id == id).ok_or(Error::NotFound(id))?;
        if item.status != ReviewStatus::Pending {
            return Err(Error::AlreadyResolved {
                id,
                status: item.status.to_string(),
            });
        }
        item.status = status;
        item.resolved_at = Some(Utc::now());
        Ok(item.clone())
    }

    /// Claim an approved item for execution. Succeeds once per item.
    pub fn mark_executed(&self, id: Uuid) -> Result<ReviewItem> {
        let mut items = self.items.lock();
        let item = items.iter_mut().find(|i| i.id == id).ok_or(Error::NotFound(id))?;
        if item.status != ReviewStatus::Approved {
            return Err(Error::NotApproved(id));
        }
        if item.executed_at.is_some() {
            return Err(Error::AlreadyExecuted(id));
        }
        item.executed_at = Some(Utc::now());
        Ok(item.clone())
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
