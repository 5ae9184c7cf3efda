//! HTTP client for the REST table store.

use async_trait::async_trait;
use reqwest::{
    Client, Method, RequestBuilder, Response,
    header::{AUTHORIZATION, CONTENT_RANGE, HeaderMap, HeaderValue},
};
use url::Url;

use super::*;
use crate::{Error, StoreConfig};

const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

/// Page size used when counting distinct values, which the backend cannot do on its own.
const DISTINCT_PAGE_SIZE: u64 = 1000;

pub struct RestStore {
    client: Client,
    base: Url,
}

impl RestStore {
    pub fn new(config: StoreConfig) -> crate::Result<Self> {
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|_| Error::Config("the api key is not a valid header value".into()))
        };

        let mut headers = HeaderMap::new();
        headers.insert("apikey", header(&config.api_key)?);
        headers.insert(AUTHORIZATION, header(&format!("Bearer {}", config.api_key))?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| Error::Config(format!("cannot build the http client: {err}")))?;

        Ok(Self {
            client,
            base: config.url,
        })
    }

    fn url(&self, table: &str, pairs: &[(String, String)]) -> StoreResult<Url> {
        let mut url = self
            .base
            .join(table)
            .map_err(|err| StoreError::new(format!("invalid table name `{table}`: {err}")))?;

        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = serde_json::from_str::<StoreError>(&body)
            .ok()
            .filter(|err| !err.message.is_empty())
            .unwrap_or_else(|| {
                let message = if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_owned()
                } else {
                    body
                };
                StoreError::new(message)
            });

        Err(err.with_status(status.as_u16()))
    }

    async fn rows(response: Response) -> StoreResult<Vec<Row>> {
        let body = response.text().await?;

        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&body).map_err(|err| StoreError::new(format!("unexpected response body: {err}")))
    }

    async fn write(&self, method: Method, url: Url, prefer: &str, body: Option<&Row>) -> StoreResult<Vec<Row>> {
        let mut request = self.request(method, url).header("Prefer", prefer);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.send(request).await?;
        Self::rows(response).await
    }
}

#[async_trait]
impl TableStore for RestStore {
    fn name(&self) -> &str {
        "rest"
    }

    async fn select(&self, request: &SelectRequest) -> StoreResult<Vec<Row>> {
        let url = self.url(&request.table, &request.query_pairs())?;
        let response = self.send(self.request(Method::GET, url)).await?;

        Self::rows(response).await
    }

    async fn count(&self, request: &CountRequest) -> StoreResult<u64> {
        if let Some(column) = &request.distinct {
            return count_distinct_by_paging(self, request, column, DISTINCT_PAGE_SIZE).await;
        }

        let url = self.url(&request.table, &request.query_pairs())?;
        let response = self
            .send(self.request(Method::HEAD, url).header("Prefer", "count=exact"))
            .await?;

        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        parse_content_range(range)
            .ok_or_else(|| StoreError::new(format!("unexpected Content-Range header `{range}`")))
    }

    async fn insert(&self, table: &str, row: &Row) -> StoreResult<Vec<Row>> {
        let url = self.url(table, &[])?;
        self.write(Method::POST, url, RETURN_REPRESENTATION, Some(row)).await
    }

    async fn upsert(&self, table: &str, row: &Row, on_conflict: &str) -> StoreResult<Vec<Row>> {
        let url = self.url(table, &[("on_conflict".to_owned(), on_conflict.to_owned())])?;
        self.write(Method::POST, url, MERGE_DUPLICATES, Some(row)).await
    }

    async fn update(&self, table: &str, patch: &Row, filters: &[Filter]) -> StoreResult<Vec<Row>> {
        let url = self.url(table, &filter_pairs(filters))?;
        self.write(Method::PATCH, url, RETURN_REPRESENTATION, Some(patch)).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Row>> {
        let url = self.url(table, &filter_pairs(filters))?;
        self.write(Method::DELETE, url, RETURN_REPRESENTATION, None).await
    }
}

fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(|f| (f.column.clone(), f.operand_text())).collect()
}

/// Total from `0-24/3573` or `*/0`.
fn parse_content_range(range: &str) -> Option<u64> {
    range.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        RestStore::new(StoreConfig::new("https://db.example.com/rest/v1", "anon-key").unwrap()).unwrap()
    }

    #[test]
    fn urls_carry_encoded_query_pairs() {
        let request = SelectRequest::new("candidates")
            .filter(Filter::is_in("name", vec!["a b".into(), "c".into()]))
            .limit(5);

        let url = store().url(&request.table, &request.query_pairs()).unwrap();

        assert_eq!(url.path(), "/rest/v1/candidates");
        assert_eq!(
            url.query(),
            Some("select=*&name=in.%28%22a+b%22%2Cc%29&limit=5")
        );
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }

    #[test]
    fn invalid_api_keys_are_config_errors() {
        let config = StoreConfig::new("https://db.example.com", "bad\nkey").unwrap();
        assert!(matches!(RestStore::new(config), Err(Error::Config(_))));
    }
}
