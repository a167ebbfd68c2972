use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl JobStatus {
    /// Execution has finished (successfully or not) and `completed_at` is set.
    pub fn is_terminal_execution(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// No further lifecycle transition exists except expiry.
    pub fn is_terminal(&self) -> bool {
        self.is_terminal_execution() || *self == JobStatus::Expired
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "Pending" => Some(JobStatus::Pending),
            "Processing" => Some(JobStatus::Processing),
            "Completed" => Some(JobStatus::Completed),
            "Failed" => Some(JobStatus::Failed),
            "Cancelled" => Some(JobStatus::Cancelled),
            "Expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Processing => write!(f, "Processing"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
            JobStatus::Expired => write!(f, "Expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceType {
    #[serde(rename = "REPORT_RUN")]
    ReportRun,
    #[serde(rename = "AUDIT_EXCERPT")]
    AuditExcerpt,
}

impl SourceType {
    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "REPORT_RUN" => Some(SourceType::ReportRun),
            "AUDIT_EXCERPT" => Some(SourceType::AuditExcerpt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::ReportRun => write!(f, "REPORT_RUN"),
            SourceType::AuditExcerpt => write!(f, "AUDIT_EXCERPT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetentionPolicy {
    #[serde(rename = "7_DAYS")]
    SevenDays,
    #[serde(rename = "30_DAYS")]
    ThirtyDays,
    #[serde(rename = "90_DAYS")]
    NinetyDays,
}

impl RetentionPolicy {
    pub fn as_duration(&self) -> Duration {
        match self {
            RetentionPolicy::SevenDays => Duration::days(7),
            RetentionPolicy::ThirtyDays => Duration::days(30),
            RetentionPolicy::NinetyDays => Duration::days(90),
        }
    }

    pub fn parse(s: &str) -> Option<RetentionPolicy> {
        match s {
            "7_DAYS" => Some(RetentionPolicy::SevenDays),
            "30_DAYS" => Some(RetentionPolicy::ThirtyDays),
            "90_DAYS" => Some(RetentionPolicy::NinetyDays),
            _ => None,
        }
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionPolicy::SevenDays => write!(f, "7_DAYS"),
            RetentionPolicy::ThirtyDays => write!(f, "30_DAYS"),
            RetentionPolicy::NinetyDays => write!(f, "90_DAYS"),
        }
    }
}

/// Opaque identity reference of the user who requested the export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub title: String,
    pub source_type: SourceType,
    pub requested_by: Requester,
    pub status: JobStatus,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retention_policy: RetentionPolicy,
    pub expires_at: Option<DateTime<Utc>>,
    pub download_count: i64,
    pub artifact_ref: Option<String>,
    pub error_message: Option<String>,
}

impl ExportJob {
    pub fn new(
        id: String,
        title: String,
        source_type: SourceType,
        retention_policy: RetentionPolicy,
        requested_by: Requester,
    ) -> Self {
        Self {
            id,
            title,
            source_type,
            requested_by,
            status: JobStatus::Pending,
            requested_at: Utc::now(),
            completed_at: None,
            retention_policy,
            expires_at: None,
            download_count: 0,
            artifact_ref: None,
            error_message: None,
        }
    }

    /// Expiry instant for a job finishing execution at `completed_at`.
    pub fn expiry_for(&self, completed_at: DateTime<Utc>) -> DateTime<Utc> {
        completed_at + self.retention_policy.as_duration()
    }

    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
    }

    pub fn mark_completed(&mut self, completed_at: DateTime<Utc>, artifact_ref: String) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(completed_at);
        self.expires_at = Some(self.expiry_for(completed_at));
        self.artifact_ref = Some(artifact_ref);
    }

    pub fn mark_failed(&mut self, completed_at: DateTime<Utc>, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(completed_at);
        self.expires_at = Some(self.expiry_for(completed_at));
        self.error_message = Some(error);
    }

    pub fn mark_cancelled(&mut self, completed_at: DateTime<Utc>, reason: String) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(completed_at);
        self.expires_at = Some(self.expiry_for(completed_at));
        self.error_message = Some(reason);
    }

    pub fn mark_expired(&mut self) {
        self.status = JobStatus::Expired;
        self.artifact_ref = None;
    }

    pub fn is_downloadable(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
