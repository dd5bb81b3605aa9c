use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{ApiCall, ApiOperator, Arity, SandboxModule};
use crate::config::HttpConfig;
use crate::error::{Fault, FaultResult};
use crate::value::Value;

pub const MODULE: &str = "http";

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `{statusCode, headers, body}`; JSON bodies are decoded.
    pub fn to_value(&self) -> Value {
        let is_json = self
            .header("content-type")
            .map_or(false, |ct| ct.contains("json"));
        let body = if is_json {
            serde_json::from_str::<serde_json::Value>(&self.body)
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(self.body.clone()))
        } else {
            Value::from(self.body.clone())
        };
        Value::object([
            ("statusCode", Value::Number(self.status as f64)),
            (
                "headers",
                Value::Object(
                    self.headers
                        .iter()
                        .map(|(k, v)| (k.to_lowercase(), Value::from(v.as_str())))
                        .collect::<HashMap<_, _>>(),
                ),
            ),
            ("body", body),
        ])
    }
}

/// Transport used by the `http` module.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> FaultResult<HttpResponse>;
}

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default http client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> FaultResult<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Fault::invalid_argument(format!("Invalid HTTP method: {}", e)))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Fault::timeout(format!("HTTP request timed out: {}", request.url))
            } else {
                Fault::internal(format!("HTTP request failed: {}", e))
            }
        })?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| Fault::internal(format!("Failed to read HTTP body: {}", e)))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_request(call: &ApiCall, method: &str, args: &[Value]) -> FaultResult<HttpRequest> {
    let url = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| call.invalid("url must be a string"))?
        .to_string();
    let mut request = HttpRequest {
        method: method.to_uppercase(),
        url,
        headers: Vec::new(),
        body: None,
        timeout: None,
    };

    let options = match args.get(1) {
        None | Some(Value::Undefined) | Some(Value::Null) => return Ok(request),
        Some(Value::Object(options)) => options,
        Some(_) => return Err(call.invalid("options must be an object")),
    };
    if let Some(headers) = options.get("headers") {
        let headers = headers
            .as_object()
            .ok_or_else(|| call.invalid("headers must be an object"))?;
        request.headers = headers
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
    }
    match options.get("body") {
        None | Some(Value::Undefined) => {}
        Some(Value::String(body)) => request.body = Some(body.clone()),
        Some(body) => {
            if !request
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                request
                    .headers
                    .push(("content-type".to_string(), "application/json".to_string()));
            }
            request.body = Some(body.to_json().to_string());
        }
    }
    if let Some(timeout) = options.get("timeout").and_then(Value::as_f64) {
        if timeout < 0.0 {
            return Err(call.invalid("timeout must not be negative"));
        }
        request.timeout = Some(Duration::from_millis(timeout as u64));
    }
    Ok(request)
}

fn request_function(
    client: Arc<dyn HttpClient>,
    method: &'static str,
) -> impl Fn(ApiCall, Vec<Value>) -> BoxFuture<'static, FaultResult<Value>> + Send + Sync + 'static
{
    move |call, args| {
        let client = client.clone();
        Box::pin(async move {
            let request = build_request(&call, method, &args)?;
            debug!("{} {}", request.method, request.url);
            let response = client.send(request).await?;
            Ok(response.to_value())
        })
    }
}

/// `http` sandbox module over `client`.
pub fn module(client: Arc<dyn HttpClient>) -> SandboxModule {
    ["get", "head", "delete", "post", "put", "patch"]
        .into_iter()
        .fold(SandboxModule::builder(MODULE), |builder, method| {
            builder.function(method, Arity::Fixed(2), request_function(client.clone(), method))
        })
        .build()
}

/// `{"$http": [{"get": ["https://example.com", {"headers": {...}}]}]}`
pub struct HttpOperator;

#[async_trait]
impl ApiOperator for HttpOperator {
    fn name(&self) -> &'static str {
        "$http"
    }

    fn sandbox_module(&self) -> Option<&'static str> {
        Some(MODULE)
    }
}
