use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use meter_client::{
    db::MeterFilter,
    domain::{EnergyType, Meter, Method, MutationRequest, Reading},
};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Response, Url,
};
use time::{macros::format_description, Date};

use super::{Ack, RemoteClient, RemoteError};

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum IncomingHouseNumber {
    Text(String),
    Number(i64),
}

#[derive(serde::Deserialize)]
struct IncomingMeter {
    id: String,
    number: String,
    energy_type: String,
    street: String,
    postal_code: String,
    city: String,
    house_number: IncomingHouseNumber,
    #[serde(default)]
    addition: Option<String>,
    #[serde(default)]
    last_reading: Option<f64>,
    #[serde(default)]
    last_reading_date: Option<String>,
}

impl TryFrom<IncomingMeter> for Meter {
    type Error = String;

    fn try_from(i: IncomingMeter) -> Result<Self, Self::Error> {
        let energy_type: EnergyType = i.energy_type.parse().map_err(|e| format!("meter {}: {e}", i.id))?;
        let last_reading_date = match i.last_reading_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(
                Date::parse(s, format_description!("[year]-[month]-[day]"))
                    .map_err(|e| format!("meter {}: invalid last_reading_date '{s}': {e}", i.id))?,
            ),
        };
        let house_number = match i.house_number {
            IncomingHouseNumber::Text(s) => s,
            IncomingHouseNumber::Number(n) => n.to_string(),
        };

        Ok(Meter {
            id: i.id,
            number: i.number,
            energy_type,
            street: i.street,
            postal_code: i.postal_code,
            city: i.city,
            house_number,
            addition: i.addition.filter(|a| !a.trim().is_empty()),
            last_reading: i.last_reading,
            last_reading_date,
        })
    }
}

/// reqwest-backed client for the remote API. Every request carries the
/// configured timeout; an elapsed timeout surfaces as [`RemoteError::Network`].
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: Url,
    client: Client,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str, timeout: Duration, bearer_token: Option<&str>) -> anyhow::Result<Self> {
        let base_url = parse_base_url(base_url)?;

        let mut headers = HeaderMap::new();
        if let Some(token) = bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).context("invalid bearer token")?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { base_url, client })
    }

    /// Whether the remote answers at all. Any HTTP status counts as reachable.
    pub async fn probe(&self) -> bool {
        self.client.head(self.base_url.clone()).send().await.is_ok()
    }

    fn url(&self, endpoint: &str) -> Result<Url, RemoteError> {
        self.base_url.join(endpoint).map_err(|e| RemoteError::Server {
            status: 0,
            message: format!("invalid endpoint '{endpoint}': {e}"),
        })
    }
}

pub(crate) fn parse_base_url(base_url: &str) -> anyhow::Result<Url> {
    // Url::join only keeps the last path segment of a base that lacks a
    // trailing slash.
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalized).with_context(|| format!("invalid base url '{base_url}'"))
}

fn classify(e: reqwest::Error) -> RemoteError {
    if e.is_builder() {
        RemoteError::Server {
            status: 0,
            message: e.to_string(),
        }
    } else {
        RemoteError::Network(e.to_string())
    }
}

async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Server {
        status: status.as_u16(),
        message,
    })
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch_meters(&self, filter: &MeterFilter) -> Result<Vec<Meter>, RemoteError> {
        let location = filter.location.as_ref();
        let params: Vec<(&str, &str)> = [
            ("street", filter.street.as_deref().or(location.map(|k| k.street.as_str()))),
            ("postal_code", filter.postal_code.as_deref().or(location.map(|k| k.postal_code.as_str()))),
            ("city", filter.city.as_deref().or(location.map(|k| k.city.as_str()))),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect();

        let response = self
            .client
            .get(self.url("meters")?)
            .query(&params)
            .send()
            .await
            .map_err(classify)?;
        let response = check(response).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(classify)?;

        let incoming: Vec<IncomingMeter> = serde_json::from_slice(&bytes).map_err(|e| RemoteError::Server {
            status,
            message: format!("invalid meters payload: {e}"),
        })?;

        incoming
            .into_iter()
            .map(|m| Meter::try_from(m).map_err(|message| RemoteError::Server { status, message }))
            .collect()
    }

    async fn submit_reading(&self, reading: &Reading) -> Result<Ack, RemoteError> {
        self.send(&MutationRequest::from(reading)).await
    }

    async fn send(&self, request: &MutationRequest) -> Result<Ack, RemoteError> {
        let response = self
            .client
            .request(http_method(request.method), self.url(&request.endpoint)?)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone())
            .send()
            .await
            .map_err(classify)?;
        let response = check(response).await?;

        Ok(Ack {
            status: response.status().as_u16(),
        })
    }
}
