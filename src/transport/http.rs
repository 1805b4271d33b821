use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::{HttpRequest, HttpResponse, Transport, TransportError};

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("canvas-engine/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let mut builder = self.client.request(request.method.into(), request.url);
    if let Some(body) = request.body {
      builder = builder
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().await?;

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}
