use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue},
    multipart::{Form, Part},
    Client,
};
use thiserror::Error;

use crate::http::{Method, MultipartForm, RequestBody};

/// A request with every header, credential, and the absolute URL resolved.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a response.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportError>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| TransportError(format!("invalid header name '{name}': {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| TransportError(format!("invalid header value: {err}")))?;
            builder = builder.header(name, value);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => {
                let bytes = serde_json::to_vec(&value)
                    .map_err(|err| TransportError(format!("failed to encode body: {err}")))?;
                builder.body(bytes)
            }
            RequestBody::Bytes { data, .. } => builder.body(data),
            RequestBody::Multipart(form) => builder.multipart(build_form(form)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError(format!("failed to read response body: {err}")))?;

        Ok(TransportResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn build_form(form: MultipartForm) -> Result<Form, TransportError> {
    let mut out = Form::new();
    for part in form.parts {
        let mut built = Part::bytes(part.data);
        if let Some(file_name) = part.file_name {
            built = built.file_name(file_name);
        }
        if let Some(content_type) = part.content_type {
            built = built
                .mime_str(&content_type)
                .map_err(|err| TransportError(format!("invalid part content type: {err}")))?;
        }
        out = out.part(part.name, built);
    }
    Ok(out)
}
