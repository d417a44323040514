use crate::error::Error;
use crate::Id;
use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use session_auth::{ApiRequest, Session};

/// A record as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a create or update call. Tags are sent by name and created on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewRecord {
    pub name: String,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

pub async fn get(session: &Session, id: Id) -> Result<Record, Error> {
    Ok(session
        .request_json(&ApiRequest::get(format!("/records/{id}")))
        .await?)
}

pub async fn create(session: &Session, record: &NewRecord) -> Result<Record, Error> {
    let created: Record = session
        .request_json(&ApiRequest::post("/records/").json(record)?)
        .await?;
    debug!("Created record {}", created.id);
    Ok(created)
}

pub async fn update(session: &Session, id: Id, record: &NewRecord) -> Result<Record, Error> {
    Ok(session
        .request_json(&ApiRequest::put(format!("/records/{id}")).json(record)?)
        .await?)
}

pub async fn delete(session: &Session, id: Id) -> Result<(), Error> {
    session
        .request_empty(&ApiRequest::delete(format!("/records/{id}")))
        .await?;
    debug!("Deleted record {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, ExternalErrorKind};
    use crate::test_support::{bearer, session};
    use mockito::Matcher;
    use serde_json::json;

    const RECORD_ID: &str = "7d1c3a4e-8a46-4c52-9b0c-1a2b3c4d5e6f";

    fn record_body(name: &str) -> String {
        json!({
            "id": RECORD_ID,
            "user_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "name": name,
            "notes": "steeped 4 minutes",
            "tags": ["tea", "morning"],
            "created_at": "2025-09-23T08:15:00.123456+00:00",
            "updated_at": "2025-09-23T08:15:00.123456+00:00"
        })
        .to_string()
    }

    fn id() -> Id {
        RECORD_ID.parse().unwrap()
    }

    #[tokio::test]
    async fn test_get_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("/api/records/{RECORD_ID}").as_str())
            .match_header("authorization", bearer().as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(record_body("Sencha"))
            .expect(1)
            .create_async()
            .await;
        let session = session(&server).await;

        let record = get(&session, id()).await.unwrap();

        assert_eq!(record.id, id());
        assert_eq!(record.name, "Sencha");
        assert_eq!(record.tags, vec!["tea", "morning"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", format!("/api/records/{RECORD_ID}").as_str())
            .with_status(404)
            .with_body(r#"{"detail":"Record not found"}"#)
            .create_async()
            .await;
        let session = session(&server).await;

        let err = get(&session, id()).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn test_create_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/records/")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "name": "Sencha",
                "notes": null,
                "tags": ["tea"]
            })))
            .with_status(200)
            .with_body(record_body("Sencha"))
            .expect(1)
            .create_async()
            .await;
        let session = session(&server).await;

        let record = create(
            &session,
            &NewRecord {
                name: "Sencha".to_string(),
                notes: None,
                tags: vec!["tea".to_string()],
            },
        )
        .await
        .unwrap();

        assert_eq!(record.name, "Sencha");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", format!("/api/records/{RECORD_ID}").as_str())
            .match_body(Matcher::PartialJson(json!({ "name": "Gyokuro" })))
            .with_status(200)
            .with_body(record_body("Gyokuro"))
            .expect(1)
            .create_async()
            .await;
        let session = session(&server).await;

        let record = update(
            &session,
            id(),
            &NewRecord {
                name: "Gyokuro".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(record.name, "Gyokuro");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_record_ignores_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", format!("/api/records/{RECORD_ID}").as_str())
            .with_status(200)
            .with_body(r#"{"message":"Record deleted"}"#)
            .expect(1)
            .create_async()
            .await;
        let session = session(&server).await;

        delete(&session, id()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_session_is_unauthenticated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", format!("/api/records/{RECORD_ID}").as_str())
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/api/auth/refresh")
            .with_status(401)
            .with_body(r#"{"detail":"Invalid refresh token"}"#)
            .expect(1)
            .create_async()
            .await;
        let session = session(&server).await;

        let err = delete(&session, id()).await.unwrap_err();

        assert!(err.is_unauthenticated());
        assert!(!session.is_authenticated());
        refresh.assert_async().await;
    }
}
