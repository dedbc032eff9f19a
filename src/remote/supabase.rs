use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::json;
use tracing::{debug, info, warn};

use super::model::{AuthTokenResponse, CategoryRow};
use super::{OrderBackend, OrderPayload};
use crate::error::RemoteError;
use crate::model::MenuCategory;

const CATALOG_SELECT: &str = "*,products(*,modifiers(*,modifier_options(*)))";

/// PostgREST/GoTrue client for a hosted Supabase project.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: Url,
    anon_key: String,
    timeout: Duration,
    session: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: String, timeout: Duration) -> Result<Self, RemoteError> {
        let mut base_url =
            Url::parse(base_url).map_err(|err| RemoteError::InvalidUrl(err.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(concat!("pos-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            anon_key,
            timeout,
            session: Arc::new(RwLock::new(None)),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|err| RemoteError::InvalidUrl(err.to_string()))
    }

    fn bearer(&self) -> String {
        let session = self.session.read().ok().and_then(|guard| guard.clone());
        session.unwrap_or_else(|| self.anon_key.clone())
    }

    fn authorized(&self, builder: RequestBuilder, tenant_id: Option<&str>) -> RequestBuilder {
        let builder = builder
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()));
        match tenant_id {
            Some(tenant) => builder.header("x-tenant-id", tenant),
            None => builder,
        }
    }

    fn transport(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Transport(err)
        }
    }

    /// `host:port` of the project, for reachability probes.
    pub fn probe_addr(&self) -> Option<String> {
        let host = self.base_url.host_str()?;
        let port = self.base_url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }

    pub fn has_session(&self) -> bool {
        self.session.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Insert keyed on the order id; a repeated insert is ignored by the server.
    pub fn build_insert_request(
        &self,
        order: &OrderPayload,
    ) -> Result<reqwest::Request, RemoteError> {
        let mut url = self.endpoint("rest/v1/orders")?;
        url.query_pairs_mut().append_pair("on_conflict", "id");
        self.authorized(self.http.post(url), Some(&order.tenant_id))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(order)
            .build()
            .map_err(RemoteError::from)
    }

    pub fn build_catalog_request(&self, tenant_id: &str) -> Result<reqwest::Request, RemoteError> {
        let mut url = self.endpoint("rest/v1/categories")?;
        url.query_pairs_mut()
            .append_pair("select", CATALOG_SELECT)
            .append_pair("tenant_id", &format!("eq.{}", tenant_id))
            .append_pair("order", "sort_order.asc");
        self.authorized(self.http.get(url), Some(tenant_id))
            .build()
            .map_err(RemoteError::from)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<String, RemoteError> {
        debug!(method = %request.method(), url = %request.url(), "backend request");
        let res = self.http.execute(request).await.map_err(|err| self.transport(err))?;
        let status = res.status();
        let body = res.text().await.map_err(|err| self.transport(err))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), %body, "backend rejected request");
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Password sign-in; later requests carry the session token instead of the
    /// anon key.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(), RemoteError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let request = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .build()?;
        let body = self.execute(request).await?;
        let token: AuthTokenResponse =
            serde_json::from_str(&body).map_err(|err| RemoteError::Decode(err.to_string()))?;
        if let Ok(mut guard) = self.session.write() {
            *guard = Some(token.access_token);
        }
        info!(expires_in = ?token.expires_in, "signed in to backend");
        Ok(())
    }
}

#[async_trait]
impl OrderBackend for SupabaseClient {
    async fn submit_order(&self, order: &OrderPayload) -> Result<(), RemoteError> {
        let request = self.build_insert_request(order)?;
        self.execute(request).await?;
        Ok(())
    }

    async fn fetch_catalog(&self, tenant_id: &str) -> Result<Vec<MenuCategory>, RemoteError> {
        let request = self.build_catalog_request(tenant_id)?;
        let body = self.execute(request).await?;
        parse_catalog(&body)
    }
}

/// Decode a PostgREST category tree, ordered by sort position.
pub fn parse_catalog(body: &str) -> Result<Vec<MenuCategory>, RemoteError> {
    let rows: Vec<CategoryRow> =
        serde_json::from_str(body).map_err(|err| RemoteError::Decode(err.to_string()))?;
    let mut categories: Vec<MenuCategory> = rows.into_iter().map(MenuCategory::from).collect();
    categories.sort_by_key(|c| c.sort_order);
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Customer;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn client() -> SupabaseClient {
        SupabaseClient::new("https://demo.supabase.co", "anon-key".into(), Duration::from_secs(5))
            .unwrap()
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> &'a str {
        request.headers().get(name).and_then(|h| h.to_str().ok()).unwrap()
    }

    fn sample_payload() -> OrderPayload {
        OrderPayload {
            id: "order-1".into(),
            tenant_id: "tenant-a".into(),
            store_id: "store-1".into(),
            channel: "takeout",
            table_number: None,
            customer: Some(Customer {
                name: Some("Bia".into()),
                ..Default::default()
            }),
            items: vec![],
            subtotal_cents: 1000,
            discount_cents: 0,
            service_fee_cents: 0,
            total_cents: 1000,
        }
    }

    #[test]
    fn insert_request_is_idempotent_upsert() {
        let request = client().build_insert_request(&sample_payload()).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/orders");
        assert_eq!(request.url().query(), Some("on_conflict=id"));
        assert_eq!(header(&request, "apikey"), "anon-key");
        assert_eq!(header(&request, "Authorization"), "Bearer anon-key");
        assert_eq!(header(&request, "x-tenant-id"), "tenant-a");
        assert_eq!(
            header(&request, "Prefer"),
            "resolution=ignore-duplicates,return=minimal"
        );
        assert_eq!(header(&request, "Content-Type"), "application/json");
    }

    #[test]
    fn catalog_request_filters_by_tenant_and_sorts() {
        let request = client().build_catalog_request("tenant-a").unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/categories");
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("select".into(), CATALOG_SELECT.into())));
        assert!(pairs.contains(&("tenant_id".into(), "eq.tenant-a".into())));
        assert!(pairs.contains(&("order".into(), "sort_order.asc".into())));
    }

    #[test]
    fn base_url_path_is_preserved() {
        let client =
            SupabaseClient::new("http://localhost:54321/proxy", "k".into(), Duration::from_secs(1))
                .unwrap();
        let request = client.build_catalog_request("t").unwrap();
        assert_eq!(request.url().path(), "/proxy/rest/v1/categories");
        assert_eq!(client.probe_addr().as_deref(), Some("localhost:54321"));
        assert!(!client.has_session());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = SupabaseClient::new("not a url", "k".into(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidUrl(_)));
    }

    #[test]
    fn catalog_rows_map_to_sorted_menu() {
        let body = r#"[
            {"id":"c2","name":"Drinks","sort_order":2,"tenant_id":"t","products":[]},
            {"id":"c1","name":"Burgers","sort_order":1,"tenant_id":"t","products":[
                {"id":"p1","name":"Classic","description":null,"price":29.9,"active":true,
                 "modifiers":[{"id":"m1","name":"Doneness","required":true,"max_selections":1,
                   "modifier_options":[{"id":"o1","name":"Rare","price_diff":0},
                                       {"id":"o2","name":"Extra patty","price_diff":"8.50"}]}]}
            ]}
        ]"#;
        let menu = parse_catalog(body).unwrap();
        assert_eq!(menu.len(), 2);
        assert_eq!(menu[0].name, "Burgers");
        assert_eq!(menu[1].name, "Drinks");

        let product = &menu[0].products[0];
        assert_eq!(product.price, Decimal::from_str("29.9").unwrap());
        let modifier = &product.modifiers[0];
        assert!(modifier.required);
        assert!(!modifier.multiple);
        assert_eq!(modifier.options[1].price_delta, Decimal::from_str("8.5").unwrap());
    }

    #[test]
    fn malformed_catalog_is_a_decode_error() {
        assert!(matches!(parse_catalog("{\"oops\":1}"), Err(RemoteError::Decode(_))));
    }
}
