//! Teaching sessions: a skill offered over a set of bookable time slots.

use crate::blob::BlobStore;
use crate::exchange::{blob_key, required, Exchange, ExchangeError, Feed, TEACHINGS};
use crate::models::{
    Actor, NewTeaching, NewTimeSlot, Teaching, TeachingResource, TeachingResourceKind, TimeSlot,
    Upload, SLOT_DURATIONS, TEACHING_TAGS,
};
use crate::store::{decode, encode, DocumentStore, Patch, Query, Update};
use chrono::{NaiveDate, NaiveTime};
use tracing::{info, warn};

const TEACHING_RESOURCES: &str = "teaching-resources";

fn time_slot(slot: &NewTimeSlot) -> Result<TimeSlot, ExchangeError> {
    NaiveDate::parse_from_str(slot.date.trim(), "%Y-%m-%d")
        .map_err(|_| ExchangeError::Validation(format!("bad slot date `{}`", slot.date)))?;
    NaiveTime::parse_from_str(slot.time.trim(), "%H:%M")
        .map_err(|_| ExchangeError::Validation(format!("bad slot time `{}`", slot.time)))?;
    if !SLOT_DURATIONS.contains(&slot.duration_minutes) {
        return Err(ExchangeError::Validation(format!(
            "slot duration must be one of {SLOT_DURATIONS:?} minutes"
        )));
    }
    Ok(TimeSlot {
        date: slot.date.trim().to_string(),
        time: slot.time.trim().to_string(),
        duration: format!("{} min", slot.duration_minutes),
        available: true,
        booked_by: None,
    })
}

fn teaching_resource(resource: TeachingResource) -> Result<TeachingResource, ExchangeError> {
    let title = required(&resource.title, "resource title")?.to_string();
    let url = required(&resource.url, "resource URL")?.to_string();
    Ok(TeachingResource { title, url, ..resource })
}

impl<S: DocumentStore, B: BlobStore> Exchange<S, B> {
    pub fn create_teaching(&self, teacher: &Actor, new: NewTeaching) -> Result<Teaching, ExchangeError> {
        let skill_name = required(&new.skill_name, "skill name")?;
        let description = required(&new.description, "description")?;
        let teacher_name = required(teacher.name(), "teacher name")?;

        if new.tags.is_empty() {
            return Err(ExchangeError::Validation("at least one tag is required".into()));
        }
        let mut tags: Vec<String> = Vec::with_capacity(new.tags.len());
        for tag in &new.tags {
            if !TEACHING_TAGS.contains(&tag.as_str()) {
                return Err(ExchangeError::Validation(format!("unknown tag `{tag}`")));
            }
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        if new.time_slots.is_empty() {
            return Err(ExchangeError::Validation("at least one time slot is required".into()));
        }
        let time_slots = new.time_slots.iter().map(time_slot).collect::<Result<Vec<_>, _>>()?;
        let resources = new
            .resources
            .into_iter()
            .map(teaching_resource)
            .collect::<Result<Vec<_>, _>>()?;

        let teaching = Teaching {
            id: String::new(),
            skill_name: skill_name.to_string(),
            description: description.to_string(),
            tags,
            time_slots,
            resources,
            teacher_name: teacher_name.to_string(),
            total_booked: 0,
            rating: 0.0,
            created_at: None,
        };
        let doc = self.store().create(TEACHINGS, encode(&teaching)?)?;
        let teaching: Teaching = decode(&doc)?;
        info!(
            teaching_id = %teaching.id,
            skill = %teaching.skill_name,
            slots = teaching.time_slots.len(),
            "teaching created"
        );
        Ok(teaching)
    }

    /// Store a PDF handout and return the entry to attach to a new teaching.
    pub fn upload_teaching_resource(
        &self,
        title: &str,
        upload: Upload,
    ) -> Result<TeachingResource, ExchangeError> {
        let title = required(title, "resource title")?;
        if !upload.looks_like_pdf() {
            return Err(ExchangeError::Validation(format!("{} is not a PDF", upload.file_name)));
        }
        let blob = self
            .blobs()
            .put(&blob_key(TEACHING_RESOURCES, &upload.file_name), &upload.bytes)?;
        let url = self.blobs().public_url(&blob)?;
        info!(key = %blob.key, "teaching resource uploaded");
        Ok(TeachingResource {
            kind: TeachingResourceKind::Pdf,
            title: title.to_string(),
            url,
            filename: Some(upload.file_name),
        })
    }

    pub fn teaching(&self, teaching_id: &str) -> Result<Teaching, ExchangeError> {
        self.load(TEACHINGS, teaching_id, "teaching")
    }

    /// Newest first.
    pub fn teachings(&self) -> Result<Vec<Teaching>, ExchangeError> {
        self.list(&Query::newest_first(TEACHINGS))
    }

    /// Book one slot. Commits only while the slot is still available, so a
    /// slot is never booked twice.
    pub fn book_slot(
        &self,
        student: &Actor,
        teaching_id: &str,
        slot_index: usize,
    ) -> Result<Teaching, ExchangeError> {
        let student_name = required(student.name(), "student name")?;
        let teaching = self.teaching(teaching_id)?;
        let slot = teaching.time_slots.get(slot_index).ok_or_else(|| ExchangeError::NotFound {
            kind: "time slot",
            id: format!("{teaching_id}#{slot_index}"),
        })?;
        if !slot.available {
            return Err(ExchangeError::Conflict(format!(
                "slot {} {} is already booked",
                slot.date, slot.time
            )));
        }

        let prefix = format!("timeSlots.{slot_index}");
        let update = Update::new()
            .require(format!("{prefix}.available"), true)
            .patch(Patch::set(format!("{prefix}.available"), false))
            .patch(Patch::set(format!("{prefix}.bookedBy"), student_name))
            .patch(Patch::increment("totalBooked", 1));
        let doc = self
            .store()
            .update(TEACHINGS, teaching_id, update)
            .map_err(|e| ExchangeError::from_store(e, "teaching", teaching_id))?;

        info!(teaching_id, slot_index, student = student_name, "slot booked");
        Ok(decode(&doc)?)
    }

    pub fn delete_teaching(&self, teaching_id: &str) -> Result<(), ExchangeError> {
        self.store()
            .delete(TEACHINGS, teaching_id)
            .map_err(|e| ExchangeError::from_store(e, "teaching", teaching_id))?;
        warn!(teaching_id, "teaching deleted");
        Ok(())
    }
}

impl<S: DocumentStore + Clone, B: BlobStore> Exchange<S, B> {
    pub fn watch_teachings(&self) -> Feed<S, Teaching> {
        self.feed(Query::newest_first(TEACHINGS))
    }
}

// ── Tests ──────────────────────────────────────────────────────
