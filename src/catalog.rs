//! Read-only client for the catalog kept in the Sanity CMS.

use log::{debug, error};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SanityConfig;
use crate::errors::ApiError;
use crate::models::ItemKind;

const IMAGE_WIDTH: u32 = 800;
const IMAGE_HEIGHT: u32 = 600;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog is not configured")]
    NotConfigured,
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotConfigured => ApiError::NotFoundError("Catalog is not available".to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct AssetRef {
    #[serde(rename = "_ref")]
    reference: String,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    asset: Option<AssetRef>,
}

#[derive(Debug, Deserialize)]
struct RawSlug {
    current: String,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(rename = "_id")]
    id: String,
    name: Option<String>,
    description: Option<String>,
    price: Option<Decimal>,
    duration: Option<String>,
    available: Option<bool>,
    highlights: Option<Vec<String>>,
    capacity: Option<i32>,
    features: Option<Vec<String>>,
    image: Option<RawImage>,
    slug: Option<RawSlug>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ItemDetails {
    Activity { duration: Option<String>, available: bool },
    Tour { duration: Option<String>, highlights: Vec<String> },
    Transfer { capacity: Option<i32>, features: Vec<String> },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub kind: ItemKind,
    pub name: String,
    pub slug: Option<String>,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub image_url: Option<String>,
    #[serde(flatten)]
    pub details: ItemDetails,
}

fn projection(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Activity => "{_id, name, description, price, duration, image, available, slug}",
        ItemKind::Tour => "{_id, name, description, price, duration, highlights, image, slug}",
        ItemKind::Transfer => "{_id, name, description, price, capacity, features, image, slug}",
    }
}

fn list_query(kind: ItemKind) -> String {
    format!(r#"*[_type == "{}"] | order(_createdAt desc) {}"#, kind, projection(kind))
}

fn slug_query(kind: ItemKind) -> String {
    format!(r#"*[_type == "{}" && slug.current == $slug][0] {}"#, kind, projection(kind))
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    project_id: String,
    dataset: String,
    endpoint: String,
    token: Option<String>,
}

impl CatalogClient {
    pub fn new(config: &SanityConfig) -> Self {
        let endpoint = format!(
            "https://{}.api.sanity.io/v{}/data/query/{}",
            config.project_id, config.api_version, config.dataset
        );
        Self {
            client: Client::new(),
            project_id: config.project_id.clone(),
            dataset: config.dataset.clone(),
            endpoint,
            token: config.token.clone(),
        }
    }

    /// CDN URL for an image asset reference (`image-<id>-<w>x<h>-<ext>`).
    pub fn image_url(&self, reference: &str) -> Option<String> {
        let asset = reference.strip_prefix("image-")?;
        let (id_and_size, ext) = asset.rsplit_once('-')?;
        let (_, size) = id_and_size.rsplit_once('-')?;
        if ext.is_empty() || !size.contains('x') {
            return None;
        }
        Some(format!(
            "https://cdn.sanity.io/images/{}/{}/{}.{}?w={}&h={}",
            self.project_id, self.dataset, id_and_size, ext, IMAGE_WIDTH, IMAGE_HEIGHT
        ))
    }

    async fn query<T: DeserializeOwned>(&self, groq: &str, params: &[(&str, String)]) -> Result<T, CatalogError> {
        debug!("Catalog query: {}", groq);
        let mut request = self.client.get(&self.endpoint).query(&[("query", groq)]);
        for (name, value) in params {
            request = request.query(&[(format!("${}", name), value)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.and_then(|r| r.error_for_status()).map_err(|e| {
            error!("Catalog request failed: {}", e);
            CatalogError::from(e)
        })?;
        let body = response.json::<QueryResponse<T>>().await?;
        Ok(body.result)
    }

    pub async fn list(&self, kind: ItemKind) -> Result<Vec<CatalogItem>, CatalogError> {
        let raw: Vec<RawItem> = self.query(&list_query(kind), &[]).await?;
        Ok(raw.into_iter().map(|item| self.convert(kind, item)).collect())
    }

    pub async fn by_slug(&self, kind: ItemKind, slug: &str) -> Result<Option<CatalogItem>, CatalogError> {
        // parameters travel JSON encoded
        let param = serde_json::Value::String(slug.to_string()).to_string();
        let raw: Option<RawItem> = self.query(&slug_query(kind), &[("slug", param)]).await?;
        Ok(raw.map(|item| self.convert(kind, item)))
    }

    fn convert(&self, kind: ItemKind, raw: RawItem) -> CatalogItem {
        let image_url = raw
            .image
            .and_then(|image| image.asset)
            .and_then(|asset| self.image_url(&asset.reference));

        let details = match kind {
            ItemKind::Activity => ItemDetails::Activity {
                duration: raw.duration,
                available: raw.available.unwrap_or(true),
            },
            ItemKind::Tour => ItemDetails::Tour {
                duration: raw.duration,
                highlights: raw.highlights.unwrap_or_default(),
            },
            ItemKind::Transfer => ItemDetails::Transfer {
                capacity: raw.capacity,
                features: raw.features.unwrap_or_default(),
            },
        };

        CatalogItem {
            id: raw.id,
            kind,
            name: raw.name.unwrap_or_default(),
            slug: raw.slug.map(|s| s.current),
            description: raw.description.unwrap_or_default(),
            price: raw.price.unwrap_or_default(),
            image_url,
            details,
        }
    }
}
