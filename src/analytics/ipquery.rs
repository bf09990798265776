//! HTTP geo lookup against an ipquery.io-compatible API
//!
//! Used when no MaxMind database is configured. Lookups only ever run on the
//! background recording path, never while a redirect is being served.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::geoip::{parse_ip, GeoError, GeoLookup, UNKNOWN};
use crate::models::IpLocation;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct IpQueryResponse {
    #[serde(default)]
    location: IpQueryLocation,
}

#[derive(Debug, Default, Deserialize)]
struct IpQueryLocation {
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

pub struct IpQueryLookup {
    client: reqwest::Client,
    base_url: String,
}

impl IpQueryLookup {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn or_unknown(value: String) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}

impl IpQueryLocation {
    fn into_location(self, ip: &str) -> Result<IpLocation, GeoError> {
        if self.country_code.is_empty() {
            return Err(GeoError::NotFound(ip.to_string()));
        }

        Ok(IpLocation {
            address: ip.to_string(),
            country_code: self.country_code,
            country_name: or_unknown(self.country),
            subdivision: or_unknown(self.state),
            continent: UNKNOWN.to_string(),
            city_name: or_unknown(self.city),
            latitude: self.latitude,
            longitude: self.longitude,
            source: "ipquery".to_string(),
        })
    }
}

#[async_trait]
impl GeoLookup for IpQueryLookup {
    async fn locate(&self, ip: &str) -> Result<IpLocation, GeoError> {
        let addr = parse_ip(ip)?;
        let url = format!("{}/{}?format=json", self.base_url, addr);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GeoError::Lookup(e.to_string()))?;

        let body: IpQueryResponse = response
            .json()
            .await
            .map_err(|e| GeoError::Lookup(e.to_string()))?;

        body.location.into_location(ip)
    }

    fn name(&self) -> &'static str {
        "ipquery"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_mapping() {
        let body: IpQueryResponse = serde_json::from_str(
            r#"{
                "ip": "1.1.1.1",
                "location": {
                    "country": "Australia",
                    "country_code": "AU",
                    "city": "Sydney",
                    "state": "New South Wales",
                    "latitude": -33.86,
                    "longitude": 151.2
                }
            }"#,
        )
        .unwrap();

        let location = body.location.into_location("1.1.1.1").unwrap();
        assert_eq!(location.country_code, "AU");
        assert_eq!(location.country_name, "Australia");
        assert_eq!(location.subdivision, "New South Wales");
        assert_eq!(location.continent, UNKNOWN);
        assert_eq!(location.source, "ipquery");
    }

    #[test]
    fn test_empty_location_is_not_found() {
        let body: IpQueryResponse = serde_json::from_str(r#"{"ip": "10.0.0.1"}"#).unwrap();
        assert!(matches!(
            body.location.into_location("10.0.0.1"),
            Err(GeoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_ip_rejected_before_request() {
        let lookup = IpQueryLookup::new("http://127.0.0.1:9").unwrap();
        let err = lookup.locate("garbage").await.unwrap_err();
        assert!(matches!(err, GeoError::InvalidIp(_)));
    }
}
