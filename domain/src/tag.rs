use crate::error::Error;
use crate::Id;
use serde::{Deserialize, Serialize};
use session_auth::{ApiRequest, Session};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id,
    pub name: String,
}

/// All tags used by the caller's records.
pub async fn list(session: &Session) -> Result<Vec<Tag>, Error> {
    Ok(session.request_json(&ApiRequest::get("/tags/")).await?)
}

/// Tag names only, for autocompletion.
pub async fn names(session: &Session) -> Result<Vec<String>, Error> {
    Ok(list(session).await?.into_iter().map(|tag| tag.name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, ExternalErrorKind};
    use crate::test_support::session;

    #[tokio::test]
    async fn test_names() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags/")
            .with_status(200)
            .with_body(
                r#"[{"id":"0f8fad5b-d9cb-469f-a165-70867728950e","name":"tea"},
                    {"id":"7c9e6679-7425-40de-944b-e07fc1f90ae7","name":"coffee"}]"#,
            )
            .create_async()
            .await;
        let session = session(&server).await;

        assert_eq!(names(&session).await.unwrap(), vec!["tea", "coffee"]);
    }

    #[tokio::test]
    async fn test_unexpected_shape() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags/")
            .with_status(200)
            .with_body(r#"["tea","coffee"]"#)
            .create_async()
            .await;
        let session = session(&server).await;

        let err = list(&session).await.unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::InvalidResponse)
        );
    }
}
