//! PostgREST API client using the service-role key

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::Config;

/// PostgREST client for server-side database operations
/// Uses the service-role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct PostgrestClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl PostgrestClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.database_url.clone(),
            service_key: config.database_service_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Get the RPC URL for a stored procedure
    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, PostgrestError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(PostgrestError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PostgrestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(PostgrestError::Parse)
    }

    /// Make an authenticated POST request (insert)
    pub async fn insert<T: Serialize>(&self, table: &str, data: &T) -> Result<(), PostgrestError> {
        let url = self.rest_url(table);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(data)
            .send()
            .await
            .map_err(PostgrestError::Request)?;

        // PostgREST reports unique-constraint violations as 409
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(PostgrestError::Conflict);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PostgrestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Make an authenticated PATCH request (update)
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<(), PostgrestError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .client
            .patch(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
            .json(data)
            .send()
            .await
            .map_err(PostgrestError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PostgrestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Make an authenticated DELETE request, returning whether rows matched
    pub async fn delete(&self, table: &str, query: &str) -> Result<bool, PostgrestError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .client
            .delete(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(PostgrestError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PostgrestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<serde_json::Value> = response.json().await.map_err(PostgrestError::Parse)?;
        Ok(!rows.is_empty())
    }

    /// Call a stored procedure. Multi-table writes that must commit
    /// atomically (pairing, terminal results) go through RPC so they run
    /// inside a single database transaction.
    pub async fn rpc<T: Serialize>(&self, function: &str, args: &T) -> Result<(), PostgrestError> {
        let url = self.rpc_url(function);

        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
            .json(args)
            .send()
            .await
            .map_err(PostgrestError::Request)?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(PostgrestError::Conflict);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PostgrestError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// PostgREST errors
#[derive(Debug, thiserror::Error)]
pub enum PostgrestError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("Row conflict (unique constraint)")]
    Conflict,
}
