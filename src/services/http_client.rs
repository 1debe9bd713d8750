// JSON-over-HTTP collaborators (classification, calculation, market search, item detail)

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{
    Classification, CompetitorDetail, Item, MarketSearch, ProfitEstimate, ShippingQuote,
};
use crate::services::{
    CalculationService, ClassificationService, ItemDetailProvider, MarketSearchService,
};

/// Thin reqwest wrapper: one request, status classified into `ServiceError`
#[derive(Clone)]
pub struct JsonHttpClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl JsonHttpClient {
    pub fn new(base_url: impl Into<String>) -> ServiceResult<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Validation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(http_client, base_url))
    }

    pub fn with_client(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> ServiceResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self.http_client.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> ServiceResult<R> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.http_client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> ServiceResult<R> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), error_text));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}

pub struct HttpClassificationService {
    client: JsonHttpClient,
}

impl HttpClassificationService {
    pub fn new(client: JsonHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClassificationService for HttpClassificationService {
    async fn classify(&self, item: &Item) -> ServiceResult<Classification> {
        let attributes: BTreeMap<&str, &str> = item
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.value.as_str()))
            .collect();
        let body = json!({
            "item_id": item.id,
            "title": item.title,
            "attributes": attributes,
        });
        self.client.post_json("classify", &body).await
    }
}

pub struct HttpCalculationService {
    client: JsonHttpClient,
}

impl HttpCalculationService {
    pub fn new(client: JsonHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CalculationService for HttpCalculationService {
    async fn compute_shipping(&self, item: &Item) -> ServiceResult<ShippingQuote> {
        let body = json!({
            "item_id": item.id,
            "category_id": item.category_id,
            "weight_g": item.weight_g,
            "dimensions": item.dimensions,
        });
        self.client.post_json("shipping", &body).await
    }

    async fn compute_profit(&self, item: &Item) -> ServiceResult<ProfitEstimate> {
        let body = json!({
            "item_id": item.id,
            "price": item.price,
            "cost": item.cost,
            "shipping_cost": item.shipping_cost,
        });
        self.client.post_json("profit", &body).await
    }
}

pub struct HttpMarketSearchService {
    client: JsonHttpClient,
}

impl HttpMarketSearchService {
    pub fn new(client: JsonHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketSearchService for HttpMarketSearchService {
    async fn search_competitors(&self, item: &Item) -> ServiceResult<MarketSearch> {
        let body = json!({
            "item_id": item.id,
            "query": item.translated_title.as_deref().unwrap_or(&item.title),
            "category_id": item.category_id,
            "price": item.price,
        });
        self.client.post_json("search", &body).await
    }
}

/// Listing detail from one named backend
pub struct HttpItemDetailProvider {
    name: String,
    client: JsonHttpClient,
}

impl HttpItemDetailProvider {
    pub fn new(name: impl Into<String>, client: JsonHttpClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait]
impl ItemDetailProvider for HttpItemDetailProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_detail(&self, external_item_id: &str) -> ServiceResult<CompetitorDetail> {
        if external_item_id.trim().is_empty() {
            return Err(ServiceError::Validation("empty external item id".to_string()));
        }
        let mut detail: CompetitorDetail = self
            .client
            .get_json(&format!("items/{}", external_item_id))
            .await?;
        detail.provider = self.name.clone();
        Ok(detail)
    }
}
