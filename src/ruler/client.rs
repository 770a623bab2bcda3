//! HTTP implementation of the ruler client

use async_trait::async_trait;
use prometheus::HistogramVec;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use tokio::time::Instant;
use tracing::debug;

use super::RulerClient;
use crate::config::Arguments;
use crate::rules::{RuleGroup, RuleGroupsByNamespace};
use crate::{Error, Result};

const ORG_ID_HEADER: &str = "X-Scope-OrgID";
const LEGACY_RULES_ROUTE: &str = "/api/v1/rules";
const RULES_ROUTE: &str = "/config/v1/rules";

#[derive(Clone)]
enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// Ruler client speaking Mimir's YAML configuration API
pub struct HttpRulerClient {
    http: reqwest::Client,
    base: Url,
    route: String,
    auth: Auth,
    request_duration: HistogramVec,
}

impl HttpRulerClient {
    /// Build a client from the controller configuration. `request_duration` is
    /// observed for every request, labelled by operation and status code.
    pub fn new(args: &Arguments, request_duration: HistogramVec) -> Result<Self> {
        let base = Url::parse(&args.address).map_err(|e| {
            Error::ConfigError(format!("invalid address {:?}: {}", args.address, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::ConfigError(format!(
                "address {} cannot carry a path",
                args.address
            )));
        }

        let mut headers = HeaderMap::new();
        if !args.tenant_id.is_empty() {
            let value = HeaderValue::from_str(&args.tenant_id)
                .map_err(|e| Error::ConfigError(format!("invalid tenant_id: {}", e)))?;
            headers.insert(ORG_ID_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(args.http_client.timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let route = if args.use_legacy_routes {
            LEGACY_RULES_ROUTE.to_string()
        } else {
            format!("{}{}", args.prometheus_http_prefix, RULES_ROUTE)
        };

        let auth = match (&args.http_client.bearer_token, &args.http_client.basic_auth) {
            (Some(token), _) => Auth::Bearer(token.clone()),
            (None, Some(basic)) => Auth::Basic {
                username: basic.username.clone(),
                password: basic.password.clone(),
            },
            (None, None) => Auth::None,
        };

        Ok(Self {
            http,
            base,
            route,
            auth,
            request_duration,
        })
    }

    /// URL of the rules route followed by `segments`, each as one escaped path segment
    pub fn rules_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejected cannot-be-a-base addresses, so the path is always editable.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(self.route.split('/').filter(|s| !s.is_empty()));
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let start = Instant::now();
        let result = request.send().await;
        let status = match &result {
            Ok(resp) => resp.status().as_u16().to_string(),
            Err(_) => "error".to_string(),
        };
        self.request_duration
            .with_label_values(&[operation, &status])
            .observe(start.elapsed().as_secs_f64());

        let resp = result?;
        debug!(operation, status = %status, url = %resp.url(), "ruler request");
        Ok(resp)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(Error::RulerError {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

/// Parse a rule listing. Groups are normalized like converted CRD groups.
pub fn parse_rule_listing(body: &str) -> Result<RuleGroupsByNamespace> {
    if body.trim().is_empty() {
        return Ok(RuleGroupsByNamespace::new());
    }
    let listing: RuleGroupsByNamespace = serde_yaml::from_str(body)
        .map_err(|e| Error::TransportError(format!("Failed to decode rule listing: {}", e)))?;
    Ok(listing
        .into_iter()
        .map(|(ns, groups)| (ns, groups.into_iter().map(RuleGroup::normalize).collect()))
        .collect())
}

#[async_trait]
impl RulerClient for HttpRulerClient {
    async fn create_rule_group(&self, namespace: &str, group: &RuleGroup) -> Result<()> {
        let body = serde_yaml::to_string(group)
            .map_err(|e| Error::TransportError(format!("Failed to encode rule group: {}", e)))?;
        let request = self
            .request(Method::POST, self.rules_url(&[namespace]))
            .header(CONTENT_TYPE, "application/yaml")
            .body(body);

        check(self.send("create_rule_group", request).await?).await?;
        Ok(())
    }

    async fn delete_rule_group(&self, namespace: &str, group: &str) -> Result<()> {
        let request = self.request(Method::DELETE, self.rules_url(&[namespace, group]));

        check(self.send("delete_rule_group", request).await?).await?;
        Ok(())
    }

    async fn list_rules(&self, namespace: Option<&str>) -> Result<RuleGroupsByNamespace> {
        let url = match namespace {
            Some(ns) if !ns.is_empty() => self.rules_url(&[ns]),
            _ => self.rules_url(&[]),
        };
        let resp = self.send("list_rules", self.request(Method::GET, url)).await?;

        // The ruler answers 404 when no rule groups exist.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(RuleGroupsByNamespace::new());
        }

        let body = check(resp).await?.text().await?;
        parse_rule_listing(&body)
    }
}
