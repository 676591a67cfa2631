use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Context level of the object a log entry was recorded against.
///
/// Stored and shipped as the platform's numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ContextLevel {
    System,
    User,
    CourseCategory,
    Course,
    Module,
    Block,
    Other(i64),
}

impl ContextLevel {
    pub const SYSTEM: i64 = 10;
    pub const USER: i64 = 30;
    pub const COURSE_CATEGORY: i64 = 40;
    pub const COURSE: i64 = 50;
    pub const MODULE: i64 = 70;
    pub const BLOCK: i64 = 80;

    pub fn code(self) -> i64 {
        match self {
            ContextLevel::System => Self::SYSTEM,
            ContextLevel::User => Self::USER,
            ContextLevel::CourseCategory => Self::COURSE_CATEGORY,
            ContextLevel::Course => Self::COURSE,
            ContextLevel::Module => Self::MODULE,
            ContextLevel::Block => Self::BLOCK,
            ContextLevel::Other(code) => code,
        }
    }

    /// Which kind of activity definition a record at this level can carry.
    pub fn activity_kind(self) -> Option<ActivityType> {
        match self {
            ContextLevel::Course => Some(ActivityType::Course),
            ContextLevel::Module => Some(ActivityType::Module),
            _ => None,
        }
    }
}

impl From<i64> for ContextLevel {
    fn from(code: i64) -> Self {
        match code {
            Self::SYSTEM => ContextLevel::System,
            Self::USER => ContextLevel::User,
            Self::COURSE_CATEGORY => ContextLevel::CourseCategory,
            Self::COURSE => ContextLevel::Course,
            Self::MODULE => ContextLevel::Module,
            Self::BLOCK => ContextLevel::Block,
            other => ContextLevel::Other(other),
        }
    }
}

impl From<ContextLevel> for i64 {
    fn from(level: ContextLevel) -> Self {
        level.code()
    }
}

/// One row of the platform's standard event log.
///
/// Records are immutable facts; `id` is the cursor ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub event_name: String,
    pub component: String,
    pub action: String,
    pub target: String,
    pub crud: String,
    pub edu_level: i64,
    pub context_id: i64,
    pub context_level: ContextLevel,
    pub context_instance_id: i64,
    pub user_id: i64,
    pub course_id: Option<i64>,
    pub related_user_id: Option<i64>,
    /// Unix seconds
    pub time_created: i64,
    /// Opaque columns carried through to the wire unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Keys the typed fields of an [`EnrichedLogRecord`] occupy on the wire.
pub const RESERVED_WIRE_KEYS: &[&str] = &[
    "id",
    "eventName",
    "component",
    "action",
    "target",
    "crud",
    "eduLevel",
    "contextId",
    "contextLevel",
    "contextInstanceId",
    "userId",
    "courseId",
    "relatedUserId",
    "timeCreated",
    "userEmail",
    "userName",
    "activityDefinition",
];

impl LogRecord {
    /// Drop opaque fields that would serialize under a typed field's key.
    ///
    /// Returns the dropped keys.
    pub fn drop_shadowing_extra(&mut self) -> Vec<String> {
        let shadowing: Vec<String> = self
            .extra
            .keys()
            .filter(|key| RESERVED_WIRE_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        for key in &shadowing {
            self.extra.remove(key);
        }
        shadowing
    }

    /// Course id, treating the platform's `0` placeholder as no course.
    pub fn course(&self) -> Option<i64> {
        self.course_id.filter(|id| *id > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Course,
    Module,
}

/// Language-keyed text, e.g. `{"en": "Algebra I"}`.
pub type LangMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub name: LangMap,
    pub description: LangMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_info: Option<String>,
}

/// A log record joined with the reference data it points at.
///
/// Only ever built as the wire payload of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedLogRecord {
    #[serde(flatten)]
    pub record: LogRecord,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_definition: Option<ActivityDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: i64,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRef {
    pub id: i64,
    pub fullname: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub cmid: i64,
    pub modname: String,
    pub name: String,
    pub intro: String,
    pub url: Option<String>,
}
