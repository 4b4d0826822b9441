//! Job model and the wire schema shared by the API and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

use crate::schedule::JobSchedule;

pub const MAX_JOB_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Api,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Json,
}

/// Where a job's input data comes from: an HTTP endpoint or a local
/// file. `file_type` is required for files and forbidden for APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_source_rules"))]
pub struct DataSource {
    pub source_type: SourceType,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
}

fn validate_source_rules(source: &DataSource) -> Result<(), ValidationError> {
    if source.location.trim().is_empty() {
        return Err(ValidationError::new("location")
            .with_message("location cannot be empty".into()));
    }
    match source.source_type {
        SourceType::File if source.file_type.is_none() => {
            Err(ValidationError::new("file_type")
                .with_message("file_type is required when source_type is 'file'".into()))
        }
        SourceType::Api if source.file_type.is_some() => {
            Err(ValidationError::new("file_type")
                .with_message("file_type should not be provided when source_type is 'api'".into()))
        }
        _ => Ok(()),
    }
}

/// A persisted job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_name: String,
    pub schedule_time: String,
    pub data_source: DataSource,
    pub processing_script: String,
    pub consumer_emails: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

/// Request body for creating or updating a job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobCreate {
    #[validate(custom(function = "validate_job_name"))]
    pub job_name: String,
    #[validate(custom(function = "validate_cron"))]
    pub schedule_time: String,
    #[validate(nested)]
    pub data_source: DataSource,
    #[validate(custom(function = "validate_script"))]
    pub processing_script: String,
    #[validate(custom(function = "validate_emails"))]
    pub consumer_emails: Vec<String>,
}

impl JobCreate {
    /// Turn a validated request into a fresh job record.
    pub fn into_job(self, created_at: DateTime<Utc>) -> Job {
        Job {
            job_name: self.job_name.trim().to_string(),
            schedule_time: self.schedule_time,
            data_source: self.data_source,
            processing_script: self.processing_script,
            consumer_emails: self.consumer_emails,
            created_at,
            last_run: None,
        }
    }
}

fn validate_job_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("job_name")
            .with_message("job_name cannot be empty".into()));
    }
    if trimmed.len() > MAX_JOB_NAME_LEN {
        return Err(ValidationError::new("job_name")
            .with_message("job_name cannot exceed 100 characters".into()));
    }
    Ok(())
}

fn validate_cron(expression: &str) -> Result<(), ValidationError> {
    JobSchedule::parse(expression).map(|_| ()).map_err(|e| {
        ValidationError::new("schedule_time").with_message(e.to_string().into())
    })
}

fn validate_script(script: &str) -> Result<(), ValidationError> {
    if script.trim().is_empty() {
        return Err(ValidationError::new("processing_script")
            .with_message("processing_script cannot be empty".into()));
    }
    Ok(())
}

fn validate_emails(emails: &Vec<String>) -> Result<(), ValidationError> {
    if emails.is_empty() {
        return Err(ValidationError::new("consumer_emails")
            .with_message("At least one consumer email is required".into()));
    }
    for email in emails {
        if !email.validate_email() {
            return Err(ValidationError::new("consumer_emails")
                .with_message(format!("'{email}' is not a valid email address").into()));
        }
    }
    Ok(())
}
