//! Persisted document shapes and request types.
//!
//! Field names are camelCase on the wire and in the store, matching the
//! documents the web client already reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Points a completed task is worth when it carries no explicit `points`.
pub const DEFAULT_TASK_POINTS: u32 = 50;

/// Upper bound for an explicit `points` value on a posted task.
pub const MAX_TASK_POINTS: u32 = 1000;

/// Session lengths a teacher can offer, in minutes.
pub const SLOT_DURATIONS: [u32; 4] = [30, 60, 90, 120];

/// Categories a teaching session can be tagged with.
pub const TEACHING_TAGS: [&str; 16] = [
    "Coding",
    "Web Development",
    "Mobile Development",
    "UI/UX Design",
    "Data Science",
    "Machine Learning",
    "Marketing",
    "Content Writing",
    "Video Editing",
    "Graphic Design",
    "Photography",
    "Business",
    "Language Learning",
    "Music",
    "Art",
    "Public Speaking",
];

// ── Identity ───────────────────────────────────────────────────

/// Who is performing an operation. There is no authentication; the name is
/// taken at face value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Actor(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tasks ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Open,
    Assigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicantStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ApplicantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicantStatus::Pending => "Pending",
            ApplicantStatus::Accepted => "Accepted",
            ApplicantStatus::Rejected => "Rejected",
        }
    }
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::Assigned => "Assigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Applicant {
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub status: ApplicantStatus,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

/// A paid micro-task. Applicants are keyed by a stable applicant id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub price: f64,
    pub poster: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub applicants: BTreeMap<String, Applicant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn reward_points(&self) -> u32 {
        self.points.unwrap_or(DEFAULT_TASK_POINTS)
    }

    pub fn accepted_applicants(&self) -> impl Iterator<Item = (&String, &Applicant)> {
        self.applicants
            .iter()
            .filter(|(_, a)| a.status == ApplicantStatus::Accepted)
    }

    /// True when `name` holds an accepted application on this task.
    pub fn is_accepted(&self, name: &str) -> bool {
        self.accepted_applicants().any(|(_, a)| a.name == name)
    }

    /// `Assigned` iff some applicant is accepted.
    pub fn derived_status(&self) -> TaskStatus {
        if self.accepted_applicants().next().is_some() {
            TaskStatus::Assigned
        } else {
            TaskStatus::Open
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    #[serde(default)]
    pub id: String,
    pub candidate: String,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub text: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// ── Swaps ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatus {
    Pending,
    Approved,
}

impl SwapStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Pending => "Pending",
            SwapStatus::Approved => "Approved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Swap {
    #[serde(default)]
    pub id: String,
    pub offers: String,
    pub wants: String,
    pub proposer: String,
    pub status: SwapStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// ── Resources ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Notes,
    Paper,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub resource_type: ResourceType,
    pub resource_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Blob key for uploaded files, so deletes can find the blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    pub shared_by: String,
    #[serde(default)]
    pub downloads: u64,
    pub college: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// ── Teaching sessions ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub date: String,
    pub time: String,
    /// e.g. "60 min"
    pub duration: String,
    pub available: bool,
    #[serde(default)]
    pub booked_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeachingResourceKind {
    Link,
    Pdf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeachingResource {
    #[serde(rename = "type")]
    pub kind: TeachingResourceKind,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teaching {
    #[serde(default)]
    pub id: String,
    pub skill_name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub time_slots: Vec<TimeSlot>,
    #[serde(default)]
    pub resources: Vec<TeachingResource>,
    pub teacher_name: String,
    #[serde(default)]
    pub total_booked: u32,
    #[serde(default)]
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// ── Requests ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(default)]
    pub title: String,
    pub price: Option<f64>,
    pub points: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRating {
    pub candidate: String,
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSwap {
    #[serde(default)]
    pub offers: String,
    #[serde(default)]
    pub wants: String,
}

/// A file handed over by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Extension and magic bytes both say PDF.
    pub fn looks_like_pdf(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(".pdf") && self.bytes.starts_with(b"%PDF")
    }
}

#[derive(Debug, Clone)]
pub struct NewResource {
    pub title: String,
    pub description: Option<String>,
    pub resource_type: ResourceType,
    pub resource_url: Option<String>,
    pub file: Option<Upload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeSlot {
    pub date: String,
    pub time: String,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeaching {
    #[serde(default)]
    pub skill_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub time_slots: Vec<NewTimeSlot>,
    #[serde(default)]
    pub resources: Vec<TeachingResource>,
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn applicant(name: &str, status: ApplicantStatus) -> Applicant {
        Applicant {
            name: name.into(),
            message: String::new(),
            status,
            applied_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        }
    }

    #[test]
    fn task_status_follows_accepted_applicants() {
        let mut task = Task {
            id: "t1".into(),
            title: "Create PPT".into(),
            price: 100.0,
            poster: "Alex Johnson".into(),
            status: TaskStatus::Open,
            applicants: BTreeMap::new(),
            points: None,
            created_at: None,
        };
        task.applicants.insert("a".into(), applicant("Rahul", ApplicantStatus::Rejected));
        assert_eq!(task.derived_status(), TaskStatus::Open);

        task.applicants.insert("b".into(), applicant("Priya", ApplicantStatus::Accepted));
        assert_eq!(task.derived_status(), TaskStatus::Assigned);
        assert!(task.is_accepted("Priya"));
        assert!(!task.is_accepted("Rahul"));
        assert_eq!(task.reward_points(), DEFAULT_TASK_POINTS);
    }

    #[test]
    fn task_reads_source_document_shape() {
        let task: Task = serde_json::from_value(json!({
            "id": "t9",
            "title": "Create PPT",
            "price": 100,
            "poster": "You (demo)",
            "status": "Open",
            "createdAt": "2026-03-01T10:00:00.000000Z"
        }))
        .unwrap();
        assert!(task.applicants.is_empty());
        assert_eq!(task.price, 100.0);
        assert!(task.created_at.is_some());
    }

    #[test]
    fn resource_type_is_lowercase() {
        assert_eq!(serde_json::to_value(ResourceType::Pdf).unwrap(), json!("pdf"));
    }

    #[test]
    fn teaching_resource_kind_is_named_type() {
        let value = serde_json::to_value(TeachingResource {
            kind: TeachingResourceKind::Link,
            title: "Docs".into(),
            url: "https://react.dev".into(),
            filename: None,
        })
        .unwrap();
        assert_eq!(value, json!({ "type": "link", "title": "Docs", "url": "https://react.dev" }));
    }

    #[test]
    fn pdf_sniffing() {
        let pdf = Upload { file_name: "Notes.PDF".into(), bytes: b"%PDF-1.7 ...".to_vec() };
        assert!(pdf.looks_like_pdf());

        let renamed = Upload { file_name: "cat.pdf".into(), bytes: b"\x89PNG".to_vec() };
        assert!(!renamed.looks_like_pdf());
    }
}
