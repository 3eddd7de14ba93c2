//! Record schemas, one per [`Collection`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::collection::{Collection, CollectionSchema, Hierarchical, OwnedRecord};

// =============================================================================
// Content items
// =============================================================================

/// Kind of a content item. The string form is what gets stored and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentItemType {
    Company,
    Project,
    SkillGroup,
    Education,
    ProfileSection,
    Accomplishment,
    TextSection,
}

impl ContentItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentItemType::Company => "company",
            ContentItemType::Project => "project",
            ContentItemType::SkillGroup => "skill-group",
            ContentItemType::Education => "education",
            ContentItemType::ProfileSection => "profile-section",
            ContentItemType::Accomplishment => "accomplishment",
            ContentItemType::TextSection => "text-section",
        }
    }
}

impl fmt::Display for ContentItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a user's resume content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub user_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(rename = "type")]
    pub item_type: ContentItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ContentItem {
    pub fn new(user_id: impl Into<String>, item_type: ContentItemType) -> Self {
        Self {
            user_id: user_id.into(),
            parent_id: None,
            order: 0,
            item_type,
            title: None,
            company: None,
            role: None,
            location: None,
            start_date: None,
            end_date: None,
            description: None,
            skills: Vec::new(),
            url: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Text fields searched by free-text lookups.
    pub fn searchable_text(&self) -> impl Iterator<Item = &str> {
        [
            self.title.as_deref(),
            self.company.as_deref(),
            self.role.as_deref(),
            self.location.as_deref(),
            self.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .chain(self.skills.iter().map(String::as_str))
    }
}

impl CollectionSchema for ContentItem {
    const COLLECTION: Collection = Collection::ContentItems;
}

impl OwnedRecord for ContentItem {
    const OWNER_FIELD: &'static str = "userId";

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}

impl Hierarchical for ContentItem {
    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn kind(&self) -> &str {
        self.item_type.as_str()
    }
}

// =============================================================================
// Job queue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    /// No further processing happens once a job reaches one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

/// A job posting submitted for analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueueItem {
    pub submitted_by: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CollectionSchema for JobQueueItem {
    const COLLECTION: Collection = Collection::JobQueue;
}

impl OwnedRecord for JobQueueItem {
    const OWNER_FIELD: &'static str = "submittedBy";

    fn owner_id(&self) -> &str {
        &self.submitted_by
    }
}

// =============================================================================
// Job matches
// =============================================================================

/// Result of matching a queued posting against the user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMatch {
    pub user_id: String,
    pub job_title: String,
    pub company_name: String,
    pub url: String,
    #[serde(default)]
    pub match_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_skills: Vec<String>,
    #[serde(default)]
    pub applied: bool,
}

impl CollectionSchema for JobMatch {
    const COLLECTION: Collection = Collection::JobMatches;
}

impl OwnedRecord for JobMatch {
    const OWNER_FIELD: &'static str = "userId";

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}

// =============================================================================
// Generated documents
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratedDocumentType {
    Resume,
    CoverLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

/// Resume or cover letter written back by the generation workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorDocument {
    pub user_id: String,
    pub document_type: GeneratedDocumentType,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_match_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl CollectionSchema for GeneratorDocument {
    const COLLECTION: Collection = Collection::GeneratorDocuments;
}

impl OwnedRecord for GeneratorDocument {
    const OWNER_FIELD: &'static str = "userId";

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}

// =============================================================================
// User defaults
// =============================================================================

/// Contact details pre-filled into generated documents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefaults {
    pub user_id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl CollectionSchema for UserDefaults {
    const COLLECTION: Collection = Collection::UserDefaults;
}

impl OwnedRecord for UserDefaults {
    const OWNER_FIELD: &'static str = "userId";

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}
