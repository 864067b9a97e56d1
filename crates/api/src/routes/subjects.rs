//! Subject Routes
//!
//! Enrollment, contacts, status, and the resolve/panic signals.

use anomaly_detector::{FindingId, SubjectProfile};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use contacts::{Channel, Contact, ContactId};
use escalation::Resolution;
use safety_monitor::{IngestOutcome, SubjectStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use telemetry::SubjectId;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub subject_id: SubjectId,
    pub created: bool,
}

/// Contact as submitted; the subject comes from the path
#[derive(Debug, Deserialize)]
pub struct ContactInput {
    pub id: Option<ContactId>,
    pub name: String,
    pub address: String,
    pub channels: Vec<Channel>,
    pub priority_rank: u32,
}

#[derive(Debug, Serialize)]
pub struct ContactsResponse {
    pub count: usize,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub finding_id: FindingId,
}

pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(profile): Json<SubjectProfile>,
) -> Result<(StatusCode, Json<EnrollResponse>), ApiError> {
    let subject_id = SubjectId::from(id);
    let created = state.monitor.enroll(subject_id.clone(), profile)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(EnrollResponse { subject_id, created })))
}

pub async fn retire(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.monitor.retire(&SubjectId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SubjectStatus>, ApiError> {
    let status = state.monitor.subject_status(&SubjectId::from(id)).await?;
    Ok(Json(status))
}

/// Replace the whole contact list
pub async fn set_contacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(inputs): Json<Vec<ContactInput>>,
) -> Result<Json<ContactsResponse>, ApiError> {
    let subject_id = SubjectId::from(id);
    let list = inputs
        .into_iter()
        .map(|input| {
            let mut contact = Contact::new(
                subject_id.clone(),
                input.name,
                input.address,
                input.channels,
                input.priority_rank,
            );
            if let Some(id) = input.id {
                contact.id = id;
            }
            contact
        })
        .collect();

    state.monitor.set_contacts(&subject_id, list)?;
    let contacts = state.monitor.contacts(&subject_id)?;
    Ok(Json(ContactsResponse {
        count: contacts.len(),
        contacts,
    }))
}

pub async fn get_contacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ContactsResponse>, ApiError> {
    let contacts = state.monitor.contacts(&SubjectId::from(id))?;
    Ok(Json(ContactsResponse {
        count: contacts.len(),
        contacts,
    }))
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Resolution>, ApiError> {
    let resolution = state
        .monitor
        .resolve(&SubjectId::from(id), request.finding_id)
        .await?;
    Ok(Json(resolution))
}

pub async fn panic(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let outcome = state.monitor.panic(&SubjectId::from(id)).await?;
    Ok(Json(outcome))
}
