//! User lookup against the Supabase auth service

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

/// A user known to the auth service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("auth service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("auth service returned status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("auth service returned an invalid user id: {0}")]
    InvalidUserId(String),
}

/// Lookup of users by id
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns `None` when the user does not exist
    async fn find_user(&self, user_id: Uuid) -> Result<Option<AuthUser>, DirectoryError>;
}

/// Response from the Supabase `/auth/v1/admin/users/{id}` endpoint
#[derive(Debug, Clone, Deserialize)]
struct SupabaseUserResponse {
    id: String,
    email: Option<String>,
}

/// Supabase admin API client authenticated with the service role key
#[derive(Clone)]
pub struct SupabaseUserDirectory {
    http_client: Client,
    supabase_url: String,
    service_key: String,
}

impl SupabaseUserDirectory {
    pub fn new(
        http_client: Client,
        supabase_url: impl Into<String>,
        service_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            supabase_url: supabase_url.into(),
            service_key: service_key.into(),
        }
    }
}

#[async_trait]
impl UserDirectory for SupabaseUserDirectory {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<AuthUser>, DirectoryError> {
        let url = format!("{}/auth/v1/admin/users/{}", self.supabase_url, user_id);

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(user_id = %user_id, "User not found in auth service");
            return Ok(None);
        }
        if !response.status().is_success() {
            tracing::warn!(
                user_id = %user_id,
                status = %response.status(),
                "Supabase user lookup failed"
            );
            return Err(DirectoryError::UnexpectedStatus(response.status()));
        }

        let user = response.json::<SupabaseUserResponse>().await?;
        let id = Uuid::parse_str(&user.id).map_err(|_| DirectoryError::InvalidUserId(user.id))?;

        Ok(Some(AuthUser {
            id,
            email: user.email,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_user_with_service_key_headers() {
        let mut server = mockito::Server::new_async().await;
        let user_id = Uuid::new_v4();
        let mock = server
            .mock("GET", format!("/auth/v1/admin/users/{}", user_id).as_str())
            .match_header("apikey", "service-key")
            .match_header("authorization", "Bearer service-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"id":"{}","email":"agency@example.com","aud":"authenticated"}}"#,
                user_id
            ))
            .create_async()
            .await;

        let directory = SupabaseUserDirectory::new(Client::new(), server.url(), "service-key");
        let user = directory.find_user(user_id).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            user,
            Some(AuthUser {
                id: user_id,
                email: Some("agency@example.com".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn unknown_user_is_none() {
        let mut server = mockito::Server::new_async().await;
        let user_id = Uuid::new_v4();
        let _mock = server
            .mock("GET", format!("/auth/v1/admin/users/{}", user_id).as_str())
            .with_status(404)
            .with_body(r#"{"msg":"User not found"}"#)
            .create_async()
            .await;

        let directory = SupabaseUserDirectory::new(Client::new(), server.url(), "service-key");
        assert_eq!(directory.find_user(user_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let user_id = Uuid::new_v4();
        let _mock = server
            .mock("GET", format!("/auth/v1/admin/users/{}", user_id).as_str())
            .with_status(500)
            .create_async()
            .await;

        let directory = SupabaseUserDirectory::new(Client::new(), server.url(), "service-key");
        assert!(matches!(
            directory.find_user(user_id).await,
            Err(DirectoryError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR))
        ));
    }
}
