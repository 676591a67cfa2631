use crate::record::{
    ActivityDefinition, ActivityType, CourseRef, EnrichedLogRecord, LangMap, LogRecord, ModuleRef,
    UserRef,
};
use crate::storage::traits::{ReferenceStore, StorageError};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

/// Reference data resolved for one batch.
#[derive(Debug, Default)]
pub struct BatchContext {
    pub users: HashMap<i64, UserRef>,
    pub courses: HashMap<i64, CourseRef>,
    pub modules: HashMap<i64, ModuleRef>,
}

/// Joins a batch of log records with users, courses and course modules.
///
/// Lookups are done in bulk: one user query, one course query and one module
/// index per distinct course in the batch.
#[derive(Clone)]
pub struct Enricher {
    references: Arc<dyn ReferenceStore>,
    lang: String,
}

impl Enricher {
    pub fn new(references: Arc<dyn ReferenceStore>, lang: impl Into<String>) -> Self {
        Self {
            references,
            lang: lang.into(),
        }
    }

    /// Enrich every record, keeping order and cardinality.
    ///
    /// A reference that no longer resolves leaves the matching fields empty;
    /// it never drops the record.
    pub async fn enrich(
        &self,
        batch: Vec<LogRecord>,
    ) -> Result<Vec<EnrichedLogRecord>, StorageError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let context = self.load_context(&batch).await?;
        Ok(batch
            .into_iter()
            .map(|record| self.attach(record, &context))
            .collect())
    }

    async fn load_context(&self, batch: &[LogRecord]) -> Result<BatchContext, StorageError> {
        let user_ids: Vec<i64> = batch
            .iter()
            .map(|log| log.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let users = self.references.users(&user_ids).await?;

        let course_ids: Vec<i64> = batch
            .iter()
            .filter_map(LogRecord::course)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let courses = self.references.courses(&course_ids).await?;

        let mut cmids_by_course: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for log in batch {
            if log.context_level.activity_kind() != Some(ActivityType::Module) {
                continue;
            }
            if let Some(course_id) = log.course() {
                cmids_by_course
                    .entry(course_id)
                    .or_default()
                    .insert(log.context_instance_id);
            }
        }

        let mut modules = HashMap::new();
        for (course_id, cmids) in cmids_by_course {
            let mut index = self.references.module_index(course_id).await?;
            for cmid in cmids {
                match index.remove(&cmid) {
                    Some(module) => {
                        modules.insert(cmid, module);
                    }
                    None => {
                        tracing::debug!(course_id, cmid, "Course module no longer exists");
                    }
                }
            }
        }

        Ok(BatchContext {
            users,
            courses,
            modules,
        })
    }

    fn attach(&self, mut record: LogRecord, context: &BatchContext) -> EnrichedLogRecord {
        record.drop_shadowing_extra();
        let user = context.users.get(&record.user_id);
        let activity_definition = self.activity_definition(&record, context);

        EnrichedLogRecord {
            user_email: user.map(|u| u.email.clone()),
            user_name: user.map(|u| u.username.clone()),
            activity_definition,
            record,
        }
    }

    fn activity_definition(
        &self,
        record: &LogRecord,
        context: &BatchContext,
    ) -> Option<ActivityDefinition> {
        match record.context_level.activity_kind()? {
            ActivityType::Course => {
                let course = context.courses.get(&record.course()?)?;
                Some(ActivityDefinition {
                    activity_type: ActivityType::Course,
                    name: self.localized(&course.fullname),
                    description: self.localized(&course.summary),
                    more_info: None,
                })
            }
            ActivityType::Module => {
                let module = context.modules.get(&record.context_instance_id)?;
                Some(ActivityDefinition {
                    activity_type: ActivityType::Module,
                    name: self.localized(&module.name),
                    description: self.localized(&strip_tags(&module.intro)),
                    more_info: module.url.clone(),
                })
            }
        }
    }

    fn localized(&self, text: &str) -> LangMap {
        LangMap::from([(self.lang.clone(), text.to_string())])
    }
}

/// Remove HTML tags and surrounding whitespace from rich text.
pub fn strip_tags(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
    tag.replace_all(html, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContextLevel;
    use crate::storage::duckdb::DuckDbStorage;

    fn log(id: i64, level: ContextLevel, course_id: Option<i64>, instance: i64) -> LogRecord {
        LogRecord {
            id,
            event_name: "\\mod_quiz\\event\\course_module_viewed".to_string(),
            component: "mod_quiz".to_string(),
            action: "viewed".to_string(),
            target: "course_module".to_string(),
            crud: "r".to_string(),
            edu_level: 2,
            context_id: 300 + id,
            context_level: level,
            context_instance_id: instance,
            user_id: 5,
            course_id,
            related_user_id: None,
            time_created: 1_700_000_000 + id,
            extra: BTreeMap::from([("ip".to_string(), serde_json::json!("10.1.1.1"))]),
        }
    }

    async fn setup() -> (Arc<DuckDbStorage>, Enricher) {
        let storage = DuckDbStorage::in_memory()
            .unwrap()
            .with_site_url(Some("https://lms.example.org".to_string()));
        storage.init_schema().await.unwrap();
        storage
            .write_users(&[UserRef {
                id: 5,
                email: "ada@example.org".to_string(),
                username: "ada".to_string(),
            }])
            .await
            .unwrap();
        storage
            .write_courses(&[CourseRef {
                id: 2,
                fullname: "Algebra I".to_string(),
                summary: "Linear equations".to_string(),
            }])
            .await
            .unwrap();
        storage
            .write_course_module(
                2,
                &ModuleRef {
                    cmid: 9,
                    modname: "quiz".to_string(),
                    name: "Quiz 1".to_string(),
                    intro: "  <p>Check <b>yourself</b></p> ".to_string(),
                    url: None,
                },
                41,
            )
            .await
            .unwrap();

        let storage = Arc::new(storage);
        let enricher = Enricher::new(storage.clone(), "en");
        (storage, enricher)
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("  <p>Check <b>yourself</b></p> "), "Check yourself");
        assert_eq!(strip_tags("plain"), "plain");
        assert_eq!(strip_tags(""), "");
    }

    #[tokio::test]
    async fn test_course_and_module_definitions() {
        let (_, enricher) = setup().await;
        let batch = vec![
            log(1, ContextLevel::Course, Some(2), 2),
            log(2, ContextLevel::Module, Some(2), 9),
            log(3, ContextLevel::System, None, 0),
        ];

        let enriched = enricher.enrich(batch.clone()).await.unwrap();
        assert_eq!(enriched.len(), 3);
        assert_eq!(
            enriched.iter().map(|e| e.record.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let course = enriched[0].activity_definition.as_ref().unwrap();
        assert_eq!(course.activity_type, ActivityType::Course);
        assert_eq!(course.name["en"], "Algebra I");
        assert_eq!(course.description["en"], "Linear equations");
        assert_eq!(course.more_info, None);

        let module = enriched[1].activity_definition.as_ref().unwrap();
        assert_eq!(module.activity_type, ActivityType::Module);
        assert_eq!(module.name["en"], "Quiz 1");
        assert_eq!(module.description["en"], "Check yourself");
        assert_eq!(
            module.more_info.as_deref(),
            Some("https://lms.example.org/mod/quiz/view.php?id=9")
        );

        assert!(enriched[2].activity_definition.is_none());
        for (e, original) in enriched.iter().zip(batch.iter()) {
            assert_eq!(e.user_email.as_deref(), Some("ada@example.org"));
            assert_eq!(e.user_name.as_deref(), Some("ada"));
            assert_eq!(&e.record, original);
        }
    }

    #[tokio::test]
    async fn test_deleted_module_keeps_record() {
        let (storage, enricher) = setup().await;
        storage.delete_course_module(9).await.unwrap();

        let batch = vec![
            log(1, ContextLevel::Course, Some(2), 2),
            log(2, ContextLevel::Module, Some(2), 9),
        ];
        let enriched = enricher.enrich(batch.clone()).await.unwrap();

        assert_eq!(enriched.len(), 2);
        assert!(enriched[0].activity_definition.is_some());
        assert!(enriched[1].activity_definition.is_none());
        assert_eq!(enriched[1].record, batch[1]);

        let json = serde_json::to_value(&enriched[1]).unwrap();
        assert!(json.get("activityDefinition").is_none());
        assert_eq!(json["ip"], "10.1.1.1");
    }

    #[tokio::test]
    async fn test_missing_references_leave_fields_empty() {
        let (_, enricher) = setup().await;
        let mut unknown_user = log(1, ContextLevel::Course, Some(77), 77);
        unknown_user.user_id = 404;

        let enriched = enricher.enrich(vec![unknown_user]).await.unwrap();
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].user_email, None);
        assert_eq!(enriched[0].user_name, None);
        assert!(enriched[0].activity_definition.is_none());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (_, enricher) = setup().await;
        assert!(enricher.enrich(Vec::new()).await.unwrap().is_empty());
    }
}
