//! Query Parser
//!
//! Regex-based extraction of structured retrieval filters from natural
//! language questions: person reference, date or relative date, action
//! keyword, intent and query type.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use regex::Regex;
use tracing::{debug, info};

use crate::application::error::AppResult;
use crate::domain::repositories::PersonRepository;

/// What the user is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    DescribeAppearance,
    QueryTime,
    QueryLocation,
    QuerySummary,
    General,
}

/// Whether to answer from daily summaries or detail events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Summary,
    Detail,
}

/// Structured filter extracted from one question.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub person_id: Option<i64>,
    pub person_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub keyword: Option<String>,
    pub intent: QueryIntent,
    pub query_type: QueryType,
}

/// Alias table entry: stable person name plus the words users call them.
struct PersonAlias {
    db_name: &'static str,
    keywords: &'static [&'static str],
}

const PERSON_ALIASES: [PersonAlias; 3] = [
    PersonAlias {
        db_name: "Family_1",
        keywords: &["爸爸", "爸", "father", "dad"],
    },
    PersonAlias {
        db_name: "Family_2",
        keywords: &["妈妈", "妈", "mother", "mom"],
    },
    PersonAlias {
        db_name: "family",
        keywords: &["家人", "家庭成员", "family"],
    },
];

const ACTION_KEYWORDS: [(&str, &[&str]); 3] = [
    ("回家", &["回家", "回来", "返回", "到家", "进门"]),
    ("出门", &["出门", "出去", "离开", "外出"]),
    ("出现", &["出现", "看到", "检测到"]),
];

const INTENT_KEYWORDS: [(QueryIntent, &[&str]); 4] = [
    (
        QueryIntent::DescribeAppearance,
        &["穿什么", "衣服", "衣着", "穿着", "打扮"],
    ),
    (QueryIntent::QueryTime, &["什么时候", "几点", "何时", "时间"]),
    (
        QueryIntent::QueryLocation,
        &["在哪里", "哪个位置", "什么地方", "位置"],
    ),
    (QueryIntent::QuerySummary, &["总结", "概况", "大概", "规律"]),
];

/// Parses natural-language questions into retrieval filters.
pub struct QueryParser {
    person_repo: Arc<dyn PersonRepository>,
    date_with_year: Regex,
    date_without_year: Regex,
    date_iso: Regex,
    recent_days: Regex,
    person_id_pattern: Regex,
}

impl QueryParser {
    pub fn new(person_repo: Arc<dyn PersonRepository>) -> Self {
        Self {
            person_repo,
            date_with_year: Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})[日号]?").expect("static regex"),
            date_without_year: Regex::new(r"(\d{1,2})月(\d{1,2})[日号]").expect("static regex"),
            date_iso: Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("static regex"),
            recent_days: Regex::new(r"最近(\d{1,3})天").expect("static regex"),
            person_id_pattern: Regex::new(r"(?i)Person[_\s]*(\d+)").expect("static regex"),
        }
    }

    /// Parses a question, resolving relative dates against the local clock.
    pub async fn parse(&self, question: &str) -> AppResult<ParsedQuery> {
        self.parse_with_today(question, chrono::Local::now().date_naive())
            .await
    }

    /// Parses with an explicit "today" anchor.
    pub async fn parse_with_today(
        &self,
        question: &str,
        today: NaiveDate,
    ) -> AppResult<ParsedQuery> {
        let (person_id, person_name) = self.extract_person(question).await?;
        let (date, date_range) = self.extract_date(question, today);
        let keyword = extract_action_keyword(question);
        let intent = detect_intent(question);

        let query_type = if intent == QueryIntent::QuerySummary
            || question.contains("总结")
            || question.contains("概况")
        {
            QueryType::Summary
        } else {
            QueryType::Detail
        };

        let parsed = ParsedQuery {
            person_id,
            person_name,
            date,
            date_range,
            keyword,
            intent,
            query_type,
        };

        info!(?parsed, question, "Parsed query");
        Ok(parsed)
    }

    async fn extract_person(&self, question: &str) -> AppResult<(Option<i64>, Option<String>)> {
        // Alias table first: role words map onto stable library names.
        for alias in &PERSON_ALIASES {
            if alias.keywords.iter().any(|kw| question.contains(kw)) {
                if let Some(person) = self.person_repo.find_by_name(alias.db_name).await? {
                    return Ok((Some(person.id()), Some(person.name().to_string())));
                }

                // Fall back to a keyword search over names and notes.
                let keywords: Vec<String> = alias
                    .keywords
                    .iter()
                    .take(2)
                    .map(|kw| kw.to_string())
                    .collect();
                if let Some(person_id) =
                    self.person_repo.search_owner_by_keywords(&keywords).await?
                {
                    let name = self
                        .person_repo
                        .find_by_id(person_id)
                        .await?
                        .map(|p| p.name().to_string());
                    return Ok((Some(person_id), name));
                }
            }
        }

        // Explicit Person_<n> references.
        if let Some(captures) = self.person_id_pattern.captures(question) {
            if let Ok(person_id) = captures[1].parse::<i64>() {
                let name = self
                    .person_repo
                    .find_by_id(person_id)
                    .await?
                    .map(|p| p.name().to_string());
                if name.is_some() {
                    return Ok((Some(person_id), name));
                }
                debug!(person_id, "Person reference not found in store");
            }
        }

        Ok((None, None))
    }

    fn extract_date(
        &self,
        question: &str,
        today: NaiveDate,
    ) -> (Option<NaiveDate>, Option<(NaiveDate, NaiveDate)>) {
        if let Some(captures) = self.recent_days.captures(question) {
            if let Ok(days) = captures[1].parse::<i64>() {
                let days = days.max(1);
                return (None, Some((today - Duration::days(days - 1), today)));
            }
        }

        for (regex, has_year) in [
            (&self.date_with_year, true),
            (&self.date_iso, true),
            (&self.date_without_year, false),
        ] {
            if let Some(captures) = regex.captures(question) {
                let parsed = if has_year {
                    NaiveDate::from_ymd_opt(
                        captures[1].parse().unwrap_or(0),
                        captures[2].parse().unwrap_or(0),
                        captures[3].parse().unwrap_or(0),
                    )
                } else {
                    NaiveDate::from_ymd_opt(
                        today.format("%Y").to_string().parse().unwrap_or(0),
                        captures[1].parse().unwrap_or(0),
                        captures[2].parse().unwrap_or(0),
                    )
                };
                if let Some(date) = parsed {
                    return (Some(date), None);
                }
            }
        }

        if question.contains("今天") || question.contains("今日") {
            return (Some(today), None);
        }
        if question.contains("昨天") || question.contains("昨日") {
            return (Some(today - Duration::days(1)), None);
        }
        if question.contains("前天") {
            return (Some(today - Duration::days(2)), None);
        }

        (None, None)
    }
}

/// Maps action phrasings onto a normalized verb used for description search.
fn extract_action_keyword(question: &str) -> Option<String> {
    for (normalized, phrasings) in ACTION_KEYWORDS {
        if phrasings.iter().any(|kw| question.contains(kw)) {
            return Some(normalized.to_string());
        }
    }
    None
}

fn detect_intent(question: &str) -> QueryIntent {
    for (intent, keywords) in INTENT_KEYWORDS {
        if keywords.iter().any(|kw| question.contains(kw)) {
            return intent;
        }
    }
    QueryIntent::General
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Person, PersonRole};
    use crate::domain::repositories::{BodyMatch, FaceMatch, RepoResult, RepositoryError};
    use crate::domain::value_objects::{BodyEmbedding, FaceEmbedding};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct StubPersonRepo;

    fn person(id: i64, name: &str) -> Person {
        let now = Utc::now();
        Person::from_db(
            id,
            name.to_string(),
            PersonRole::Owner,
            None,
            None,
            now,
            now,
            None,
        )
    }

    #[async_trait]
    impl PersonRepository for StubPersonRepo {
        async fn find_by_id(&self, id: i64) -> RepoResult<Option<Person>> {
            if id == 21 {
                Ok(Some(person(21, "Family_1")))
            } else {
                Ok(None)
            }
        }
        async fn find_by_name(&self, name: &str) -> RepoResult<Option<Person>> {
            if name == "Family_1" {
                Ok(Some(person(21, "Family_1")))
            } else {
                Ok(None)
            }
        }
        async fn upsert_owner(&self, _name: &str) -> RepoResult<Person> {
            Err(RepositoryError::NotFound("unsupported".into()))
        }
        async fn insert_face_if_absent(
            &self,
            _person_id: i64,
            _embedding: &FaceEmbedding,
            _source_image: &str,
        ) -> RepoResult<bool> {
            Ok(false)
        }
        async fn find_best_face_match(
            &self,
            _embedding: &FaceEmbedding,
            _min_similarity: f32,
        ) -> RepoResult<Option<FaceMatch>> {
            Ok(None)
        }
        async fn find_best_body_match(
            &self,
            _embedding: &BodyEmbedding,
            _since: DateTime<Utc>,
            _min_similarity: f32,
            _max_similarity: Option<f32>,
        ) -> RepoResult<Option<BodyMatch>> {
            Ok(None)
        }
        async fn update_body_cache(
            &self,
            _person_id: i64,
            _embedding: &BodyEmbedding,
            _at: DateTime<Utc>,
        ) -> RepoResult<()> {
            Ok(())
        }
        async fn search_owner_by_keywords(&self, _keywords: &[String]) -> RepoResult<Option<i64>> {
            Ok(None)
        }
        async fn count(&self) -> RepoResult<i64> {
            Ok(0)
        }
        async fn count_faces(&self) -> RepoResult<i64> {
            Ok(0)
        }
    }

    fn parser() -> QueryParser {
        QueryParser::new(Arc::new(StubPersonRepo))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 10).unwrap()
    }

    #[tokio::test]
    async fn chinese_date_is_extracted() {
        let parsed = parser()
            .parse_with_today("9月1日有什么活动？", today())
            .await
            .unwrap();
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2025, 9, 1));
    }

    #[tokio::test]
    async fn full_date_with_year_is_extracted() {
        let parsed = parser()
            .parse_with_today("2025年9月1日谁回家了", today())
            .await
            .unwrap();
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2025, 9, 1));
    }

    #[tokio::test]
    async fn iso_date_is_extracted() {
        let parsed = parser()
            .parse_with_today("2025-09-01 的记录", today())
            .await
            .unwrap();
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2025, 9, 1));
    }

    #[tokio::test]
    async fn relative_dates_resolve_against_today() {
        let parsed = parser().parse_with_today("昨天有谁来过", today()).await.unwrap();
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2025, 9, 9));

        let parsed = parser().parse_with_today("今天有访客吗", today()).await.unwrap();
        assert_eq!(parsed.date, Some(today()));
    }

    #[tokio::test]
    async fn recent_days_become_a_range() {
        let parsed = parser()
            .parse_with_today("最近3天有什么异常", today())
            .await
            .unwrap();
        assert_eq!(
            parsed.date_range,
            Some((
                NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
                today()
            ))
        );
    }

    #[tokio::test]
    async fn alias_resolves_person() {
        let parsed = parser()
            .parse_with_today("爸爸昨天什么时候回家的？", today())
            .await
            .unwrap();
        assert_eq!(parsed.person_id, Some(21));
        assert_eq!(parsed.person_name.as_deref(), Some("Family_1"));
    }

    #[tokio::test]
    async fn explicit_person_reference_resolves() {
        let parsed = parser()
            .parse_with_today("Person_21 昨天出现过吗", today())
            .await
            .unwrap();
        assert_eq!(parsed.person_id, Some(21));
    }

    #[tokio::test]
    async fn action_keyword_is_normalized() {
        let parsed = parser()
            .parse_with_today("爸爸几点到家的", today())
            .await
            .unwrap();
        assert_eq!(parsed.keyword.as_deref(), Some("回家"));
        assert_eq!(parsed.intent, QueryIntent::QueryTime);
    }

    #[tokio::test]
    async fn summary_questions_switch_query_type() {
        let parsed = parser()
            .parse_with_today("帮我总结一下9月1日的活动", today())
            .await
            .unwrap();
        assert_eq!(parsed.query_type, QueryType::Summary);
        assert_eq!(parsed.intent, QueryIntent::QuerySummary);
    }

    #[tokio::test]
    async fn plain_questions_default_to_detail_general() {
        let parsed = parser()
            .parse_with_today("9月1日有什么活动？", today())
            .await
            .unwrap();
        assert_eq!(parsed.query_type, QueryType::Detail);
        assert_eq!(parsed.intent, QueryIntent::General);
        assert_eq!(parsed.person_id, None);
    }
}
