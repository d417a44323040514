use crate::error::Error;
use crate::Id;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use session_auth::{ApiRequest, Session};

/// Semantic search over the caller's records, optionally narrowed by
/// creation date and tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchQuery {
    pub query: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub tags: Vec<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn between(mut self, start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }
}

/// A matching record, closest first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub id: Id,
    pub name: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Cosine distance to the query; smaller is closer.
    pub distance: f64,
}

pub async fn search(session: &Session, query: &SearchQuery) -> Result<Vec<SearchHit>, Error> {
    Ok(session
        .request_json(&ApiRequest::post("/search/").json(query)?)
        .await?)
}
