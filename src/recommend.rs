use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Client for the external recommendation engine. The engine is an opaque
/// ranking oracle: it returns an ordered list of product ids and makes no
/// guarantee about the ordering beyond what it chose to return.
#[derive(Clone)]
pub struct RecommendationClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl RecommendationClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn related_products(&self, product_id: Uuid) -> AppResult<Vec<Uuid>> {
        let base_url = self.base_url.as_ref().ok_or_else(|| {
            AppError::Upstream("recommendation service is not configured".to_string())
        })?;

        let url = format!("{base_url}/related/{product_id}");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("recommendation request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "recommendation service returned {}",
                response.status()
            )));
        }

        let ids: Vec<Uuid> = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("recommendation response invalid: {err}")))?;
        Ok(ids)
    }
}
