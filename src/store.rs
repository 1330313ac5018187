use crate::draft::ItemPayload;
use crate::publish::CourseStatus;

/// Structured failure from a collaborator. `code()` is the stable string the
/// IPC layer reports.
#[derive(Debug)]
pub enum StoreError {
    /// A referenced entity does not exist (possibly deleted concurrently).
    NotFound(String),
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Backend(_) => "store_failed",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(m) => write!(f, "not found: {}", m),
            StoreError::Backend(m) => write!(f, "store failure: {}", m),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone)]
pub struct CourseFields {
    pub title: String,
    pub slug: String,
    pub status: CourseStatus,
    pub summary: String,
    pub description_html: String,
}

#[derive(Debug, Clone)]
pub struct TopicFields {
    pub title: String,
    pub summary: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone)]
pub struct ItemFields {
    pub title: String,
    pub position: i64,
    pub payload: ItemPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    FeatureImage,
    IntroVideo,
}

#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub id: String,
    pub title: String,
    pub position: i64,
    pub payload: ItemPayload,
}

#[derive(Debug, Clone)]
pub struct TopicRecord {
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub position: i64,
    pub items: Vec<ItemRecord>,
}

#[derive(Debug, Clone)]
pub struct CourseRecord {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub status: CourseStatus,
    pub summary: String,
    pub description_html: String,
    pub feature_image_ref: Option<String>,
    pub intro_video_ref: Option<String>,
    pub member_ids: Vec<String>,
    pub topics: Vec<TopicRecord>,
}

/// Persistence collaborator for course structure. The reconciler drives it;
/// implementations return the canonical persisted record or a structured
/// error and never invent ids the caller did not ask about.
pub trait CourseStore {
    fn create_course(&mut self, fields: &CourseFields) -> Result<String, StoreError>;
    fn update_course(&mut self, course_id: &str, fields: &CourseFields) -> Result<(), StoreError>;
    fn load_course(&self, course_id: &str) -> Result<CourseRecord, StoreError>;
    fn set_course_media(
        &mut self,
        course_id: &str,
        kind: MediaKind,
        stable_ref: Option<String>,
    ) -> Result<(), StoreError>;

    /// Full-replacement membership: the complete desired set is sent and the
    /// store computes adds/removes.
    fn replace_members(&mut self, course_id: &str, member_ids: &[String]) -> Result<(), StoreError>;

    fn create_topic(&mut self, course_id: &str, fields: &TopicFields) -> Result<String, StoreError>;
    fn update_topic(&mut self, topic_id: &str, fields: &TopicFields) -> Result<(), StoreError>;
    fn delete_topic(&mut self, topic_id: &str) -> Result<(), StoreError>;
    fn reorder_topics(&mut self, course_id: &str, ordered_ids: &[String]) -> Result<(), StoreError>;

    fn create_item(&mut self, topic_id: &str, fields: &ItemFields) -> Result<String, StoreError>;
    fn update_item(&mut self, item_id: &str, fields: &ItemFields) -> Result<(), StoreError>;
    fn delete_item(&mut self, item_id: &str) -> Result<(), StoreError>;
    fn reorder_items(&mut self, topic_id: &str, ordered_ids: &[String]) -> Result<(), StoreError>;
}

/// Blob collaborator. Uploads are tagged with the provisional upload id so a
/// retried upload of the same binary is idempotent.
pub trait AssetStore {
    fn upload_binary(&mut self, owner_id: &str, bytes: &[u8]) -> Result<String, StoreError>;
    fn delete_binary(&mut self, stable_ref: &str) -> Result<(), StoreError>;
}
