use crate::{Error, Result};
use reqwest::{Client, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Thin REST client over reqwest for the workload's HTTP surface. The target
/// URL is resolved per request since the endpoint is only known once the
/// cluster is up.
#[derive(Clone, Debug, Default)]
pub struct RestClient {
    headers: BTreeMap<String, String>,
}

impl RestClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_header(&mut self, key: &str, value: &str) -> &mut RestClient {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn add_header_json_accept(&mut self) -> &mut RestClient {
        if self.headers.contains_key("Accept") {
            self
        } else {
            self.add_header("Accept", "application/json")
        }
    }

    fn get_client(&self) -> std::result::Result<Client, reqwest::Error> {
        Client::builder()
            .user_agent(crate::MANAGER)
            .timeout(std::time::Duration::from_secs(10))
            .build()
    }

    pub async fn http_get(&self, url: &Url) -> std::result::Result<Response, reqwest::Error> {
        tracing::debug!("http_get '{url}'");
        let mut req = self.get_client()?.get(url.as_str());
        for (key, val) in &self.headers {
            req = req.header(key, val);
        }
        req.send().await
    }

    /// Status and body of a GET, whatever the status code was.
    pub async fn status_body_get(&self, url: &Url) -> Result<(u16, String)> {
        let response = self.http_get(url).await.map_err(Error::ReqwestError)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(Error::ReqwestError)?;
        Ok((status, text))
    }

    pub async fn body_get(&self, url: &Url) -> Result<String> {
        let (status, text) = self.status_body_get(url).await?;
        if !(200..300).contains(&status) {
            return Err(Error::MethodFailed(
                "Get".to_string(),
                status,
                format!("The server returned the error: {text}"),
            ));
        }
        Ok(text)
    }

    pub async fn json_get(&self, url: &Url) -> Result<Value> {
        let text = self.body_get(url).await?;
        let json = serde_json::from_str(&text).map_err(Error::SerializationError)?;
        Ok(json)
    }
}

/// Seam the health verifier polls through; RestClient is the real thing.
pub trait HttpFetch {
    fn fetch(&self, url: &Url) -> impl std::future::Future<Output = Result<(u16, String)>> + Send;
}

impl HttpFetch for RestClient {
    async fn fetch(&self, url: &Url) -> Result<(u16, String)> {
        self.status_body_get(url).await
    }
}
