//! Task marketplace workflow.
//!
//! Lifecycle: a task is posted `Open`; people apply; the poster accepts or
//! rejects each pending applicant. `Task.status` is `Assigned` exactly while
//! some applicant is accepted.
//!
//! Accepting is first-writer-wins: the update only commits while the task is
//! still `Open`, so two near-simultaneous accepts cannot both succeed.
//! Ratings and chat are append-only sub-collections of the task.

use crate::blob::BlobStore;
use crate::exchange::{
    now_value, optional, required, Exchange, ExchangeError, Feed, CHAT, RATINGS, TASKS,
};
use crate::models::{
    Actor, Applicant, ApplicantStatus, ChatMessage, NewRating, NewTask, Rating, Task, TaskStatus,
    MAX_TASK_POINTS,
};
use crate::store::{
    decode, encode, sub_collection, DocumentStore, Patch, Query, StoreError, Update,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of [`Exchange::apply`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationReceipt {
    pub applicant_id: String,
    /// False when an identical application already existed.
    pub created: bool,
    pub task: Task,
}

/// Applicant ids are derived from who applied and what they wrote, so an
/// identical application always lands in the same slot.
fn applicant_id(task_id: &str, name: &str, message: &str) -> String {
    let key = format!("{task_id}/{}:{name}/{message}", name.len());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).simple().to_string()
}

impl<S: DocumentStore, B: BlobStore> Exchange<S, B> {
    pub fn post_task(&self, poster: &Actor, new: NewTask) -> Result<Task, ExchangeError> {
        let title = required(&new.title, "title")?;
        let price = new
            .price
            .ok_or_else(|| ExchangeError::Validation("price is required".into()))?;
        if !price.is_finite() || price < 0.0 {
            return Err(ExchangeError::Validation("price must be a non-negative number".into()));
        }
        if let Some(points) = new.points {
            if !(1..=MAX_TASK_POINTS).contains(&points) {
                return Err(ExchangeError::Validation(format!(
                    "points must be between 1 and {MAX_TASK_POINTS}"
                )));
            }
        }
        let poster_name = required(poster.name(), "poster name")?;

        let task = Task {
            id: String::new(),
            title: title.to_string(),
            price,
            poster: poster_name.to_string(),
            status: TaskStatus::Open,
            applicants: BTreeMap::new(),
            points: new.points,
            created_at: None,
        };

        let doc = self.store().create(TASKS, encode(&task)?)?;
        let task: Task = decode(&doc)?;
        info!(task_id = %task.id, poster = %poster, price, "task posted");
        Ok(task)
    }

    pub fn task(&self, task_id: &str) -> Result<Task, ExchangeError> {
        self.load(TASKS, task_id, "task")
    }

    /// Newest first.
    pub fn tasks(&self) -> Result<Vec<Task>, ExchangeError> {
        self.list(&Query::newest_first(TASKS))
    }

    /// Record an application by `applicant`.
    ///
    /// Applying again with the same name and message returns the existing
    /// application and writes nothing.
    pub fn apply(
        &self,
        task_id: &str,
        applicant: &Actor,
        message: &str,
    ) -> Result<ApplicationReceipt, ExchangeError> {
        let name = required(applicant.name(), "name")?;
        let message = message.trim();
        let applicant_id = applicant_id(task_id, name, message);
        let record = Applicant {
            name: name.to_string(),
            message: message.to_string(),
            status: ApplicantStatus::Pending,
            applied_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        };
        let value =
            serde_json::to_value(&record).map_err(|e| StoreError::Codec(e.to_string()))?;

        let slot = format!("applicants.{applicant_id}");
        let written = self.store().update(
            TASKS,
            task_id,
            Update::new()
                .require(slot.as_str(), serde_json::Value::Null)
                .patch(Patch::set(slot.as_str(), value)),
        );
        match written {
            Ok(doc) => {
                info!(task_id, applicant_id = %applicant_id, applicant = name, "applied");
                Ok(ApplicationReceipt {
                    applicant_id,
                    created: true,
                    task: decode(&doc)?,
                })
            }
            // The same name and message already hold this slot.
            Err(StoreError::PreconditionFailed { .. }) => {
                info!(task_id, applicant = name, "duplicate application ignored");
                Ok(ApplicationReceipt {
                    applicant_id,
                    created: false,
                    task: self.task(task_id)?,
                })
            }
            Err(e) => Err(ExchangeError::from_store(e, "task", task_id)),
        }
    }

    /// Accept or reject a pending applicant.
    ///
    /// Accept commits only while the task is `Open`. Reject leaves the task
    /// `Assigned` if another applicant is already accepted. Either way the
    /// write is conditioned on the task status and applicant status that were
    /// read, so a concurrent decision makes this one fail with `Conflict`.
    pub fn decide(
        &self,
        decider: &Actor,
        task_id: &str,
        applicant_id: &str,
        decision: ApplicantStatus,
    ) -> Result<Task, ExchangeError> {
        if decision == ApplicantStatus::Pending {
            return Err(ExchangeError::Validation(
                "decision must be Accepted or Rejected".into(),
            ));
        }

        let task = self.task(task_id)?;
        let applicant = task.applicants.get(applicant_id).ok_or_else(|| ExchangeError::NotFound {
            kind: "applicant",
            id: applicant_id.to_string(),
        })?;
        if applicant.status != ApplicantStatus::Pending {
            return Err(ExchangeError::InvalidTransition(format!(
                "applicant {} is already {}",
                applicant.name,
                applicant.status.as_str()
            )));
        }

        let next_status = match decision {
            ApplicantStatus::Accepted => {
                if task.status == TaskStatus::Assigned {
                    return Err(ExchangeError::Conflict(format!(
                        "task {task_id} already has an accepted applicant"
                    )));
                }
                TaskStatus::Assigned
            }
            // The rejected applicant was pending, so the accepted set is unchanged.
            _ => task.derived_status(),
        };

        let prefix = format!("applicants.{applicant_id}");
        let update = Update::new()
            .require("status", task.status.as_str())
            .require(format!("{prefix}.status"), ApplicantStatus::Pending.as_str())
            .patch(Patch::set(format!("{prefix}.status"), decision.as_str()))
            .patch(Patch::set(format!("{prefix}.decidedAt"), now_value()))
            .patch(Patch::set(format!("{prefix}.decidedBy"), decider.name()))
            .patch(Patch::set("status", next_status.as_str()));

        let doc = self
            .store()
            .update(TASKS, task_id, update)
            .map_err(|e| ExchangeError::from_store(e, "task", task_id))?;

        info!(
            task_id,
            applicant_id,
            decision = decision.as_str(),
            status = next_status.as_str(),
            "applicant decided"
        );
        Ok(decode(&doc)?)
    }

    /// Irreversible. Confirmation is the caller's job.
    pub fn delete_task(&self, task_id: &str) -> Result<(), ExchangeError> {
        self.store()
            .delete(TASKS, task_id)
            .map_err(|e| ExchangeError::from_store(e, "task", task_id))?;

        // Ratings and chat go with the task.
        let mut swept = 0usize;
        for child in [RATINGS, CHAT] {
            let collection = sub_collection(TASKS, task_id, child);
            for doc in self.store().query(&Query::oldest_first(collection.as_str()))? {
                match self.store().delete(&collection, &doc.id) {
                    Ok(()) => swept += 1,
                    Err(StoreError::NotFound { .. }) => {}
                    Err(e) => {
                        tracing::error!(task_id, collection, "sub-collection sweep failed: {e}");
                        return Err(e.into());
                    }
                }
            }
        }
        warn!(task_id, swept, "task deleted");
        Ok(())
    }

    /// Append a rating. Any candidate name is accepted.
    pub fn submit_rating(
        &self,
        rater: &Actor,
        task_id: &str,
        new: NewRating,
    ) -> Result<Rating, ExchangeError> {
        if !(1..=5).contains(&new.rating) {
            return Err(ExchangeError::Validation("rating must be between 1 and 5".into()));
        }
        let candidate = required(&new.candidate, "candidate")?;
        self.task(task_id)?;

        let rating = Rating {
            id: String::new(),
            candidate: candidate.to_string(),
            rating: new.rating,
            comment: optional(new.comment.as_deref()),
            rated_by: optional(Some(rater.name())),
            created_at: None,
        };
        let doc = self
            .store()
            .create(&sub_collection(TASKS, task_id, RATINGS), encode(&rating)?)?;

        info!(task_id, candidate, rating = new.rating, "rating submitted");
        Ok(decode(&doc)?)
    }

    /// Oldest first.
    pub fn ratings(&self, task_id: &str) -> Result<Vec<Rating>, ExchangeError> {
        self.list(&Query::oldest_first(sub_collection(TASKS, task_id, RATINGS)))
    }

    pub fn send_chat_message(
        &self,
        sender: &Actor,
        task_id: &str,
        text: &str,
    ) -> Result<ChatMessage, ExchangeError> {
        if text.trim().is_empty() {
            return Err(ExchangeError::Validation("message text is required".into()));
        }
        let sender_name = required(sender.name(), "sender")?;
        self.task(task_id)?;

        let message = ChatMessage {
            id: String::new(),
            text: text.to_string(),
            sender: sender_name.to_string(),
            created_at: None,
        };
        let doc = self
            .store()
            .create(&sub_collection(TASKS, task_id, CHAT), encode(&message)?)?;

        info!(task_id, sender = sender_name, "chat message sent");
        Ok(decode(&doc)?)
    }

    /// Oldest first.
    pub fn chat_history(&self, task_id: &str) -> Result<Vec<ChatMessage>, ExchangeError> {
        self.list(&Query::oldest_first(sub_collection(TASKS, task_id, CHAT)))
    }
}

impl<S: DocumentStore + Clone, B: BlobStore> Exchange<S, B> {
    pub fn watch_tasks(&self) -> Feed<S, Task> {
        self.feed(Query::newest_first(TASKS))
    }

    pub fn watch_chat(&self, task_id: &str) -> Feed<S, ChatMessage> {
        self.feed(Query::oldest_first(sub_collection(TASKS, task_id, CHAT)))
    }

    pub fn watch_ratings(&self, task_id: &str) -> Feed<S, Rating> {
        self.feed(Query::oldest_first(sub_collection(TASKS, task_id, RATINGS)))
    }
}

// ── Tests ──────────────────────────────────────────────────────
