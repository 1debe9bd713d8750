// External collaborators
//
// Each trait is one remote operation. Implementations make a single attempt;
// retries, deadlines and provider fallback live in RemoteCallExecutor.

pub mod gemini;
pub mod http_client;
pub mod remote_call;
pub mod store;

use async_trait::async_trait;

use crate::core::errors::ServiceResult;
use crate::core::types::{
    Classification, CompetitorDetail, FieldCompletion, Item, MarketSearch, MarketSignal,
    ProfitEstimate, ShippingQuote,
};

// Re-export commonly used services
pub use gemini::GeminiClient;
pub use http_client::{
    HttpCalculationService, HttpClassificationService, HttpItemDetailProvider,
    HttpMarketSearchService, JsonHttpClient,
};
pub use remote_call::{RemoteCallExecutor, RetryPolicy};
pub use store::{InMemoryItemStore, ItemStore};

#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(&self, item: &Item) -> ServiceResult<Classification>;
}

#[async_trait]
pub trait CalculationService: Send + Sync {
    async fn compute_shipping(&self, item: &Item) -> ServiceResult<ShippingQuote>;
    async fn compute_profit(&self, item: &Item) -> ServiceResult<ProfitEstimate>;
}

#[async_trait]
pub trait MarketSearchService: Send + Sync {
    /// Candidates plus the demand/price signal for the item's market
    async fn search_competitors(&self, item: &Item) -> ServiceResult<MarketSearch>;
}

/// One backing source of competitor listing detail
#[async_trait]
pub trait ItemDetailProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_detail(&self, external_item_id: &str) -> ServiceResult<CompetitorDetail>;
}

/// What the AI sees besides the item itself
#[derive(Debug, Clone, Default)]
pub struct CompletionContext {
    pub competitor: Option<CompetitorDetail>,
    pub market: Option<MarketSignal>,
}

#[async_trait]
pub trait AiCompletionService: Send + Sync {
    async fn complete(
        &self,
        item: &Item,
        context: &CompletionContext,
        missing_fields: &[String],
    ) -> ServiceResult<Vec<FieldCompletion>>;
}

#[async_trait]
pub trait TranslationService: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> ServiceResult<String>;
}
