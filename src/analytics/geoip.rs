//! GeoIP lookup service using MaxMind GeoLite2/GeoIP2 MMDB
//!
//! This module provides thread-safe IP geolocation using memory-mapped
//! MaxMind databases, plus the `GeoLookup` seam the visit recorder depends on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::models::IpLocation;

/// Placeholder for names the database does not carry
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geoip database not loaded")]
    DatabaseNotLoaded,
    #[error("invalid ip address: {0:?}")]
    InvalidIp(String),
    #[error("no location found for {0}")]
    NotFound(String),
    #[error("geo lookup failed: {0}")]
    Lookup(String),
}

/// Maps an IP address to a location. Implementations may be unavailable.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn locate(&self, ip: &str) -> Result<IpLocation, GeoError>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

pub(crate) fn parse_ip(ip: &str) -> Result<IpAddr, GeoError> {
    ip.trim()
        .parse::<IpAddr>()
        .map_err(|_| GeoError::InvalidIp(ip.to_string()))
}

/// GeoIP lookup backed by a MaxMind City database
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Create a new GeoIP service from an MMDB file path
    ///
    /// # Arguments
    /// * `city_path` - Optional path to the MaxMind GeoLite2-City or GeoIP2-City .mmdb file
    ///
    /// Without a path every lookup reports `GeoError::DatabaseNotLoaded`.
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { city_reader })
    }

    /// Service without a database
    pub fn unloaded() -> Self {
        Self { city_reader: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.city_reader.is_some()
    }

    fn lookup(&self, ip: &str) -> Result<IpLocation, GeoError> {
        let reader = self.city_reader.as_ref().ok_or(GeoError::DatabaseNotLoaded)?;
        let addr = parse_ip(ip)?;

        let result = reader
            .lookup(addr)
            .map_err(|e| GeoError::Lookup(e.to_string()))?;
        let city = result
            .decode::<geoip2::City>()
            .map_err(|e| GeoError::Lookup(e.to_string()))?
            .ok_or_else(|| GeoError::NotFound(ip.to_string()))?;

        Ok(location_from_city(ip, &city))
    }
}

/// Extract location from City data, defaulting missing names to "Unknown"
fn location_from_city(ip: &str, city: &geoip2::City) -> IpLocation {
    let name = |value: Option<&str>| value.unwrap_or(UNKNOWN).to_string();

    IpLocation {
        address: ip.to_string(),
        country_code: city.country.iso_code.unwrap_or_default().to_string(),
        country_name: name(city.country.names.english),
        subdivision: name(
            city.subdivisions
                .first()
                .and_then(|subdivision| subdivision.names.english),
        ),
        continent: name(city.continent.names.english),
        city_name: name(city.city.names.english),
        latitude: city.location.latitude.unwrap_or_default(),
        longitude: city.location.longitude.unwrap_or_default(),
        source: "maxmind geolite2".to_string(),
    }
}

#[async_trait]
impl GeoLookup for GeoIpService {
    async fn locate(&self, ip: &str) -> Result<IpLocation, GeoError> {
        self.lookup(ip)
    }

    fn name(&self) -> &'static str {
        "maxmind"
    }
}

// Implement Clone by cloning the Arc
impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        Self {
            city_reader: self.city_reader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geoip_service_creation_invalid_path() {
        let result = GeoIpService::new(Some("/nonexistent/path.mmdb"));
        assert!(result.is_err());
    }

    #[test]
    fn test_geoip_service_creation_no_database() {
        let service = GeoIpService::new(None).unwrap();
        assert!(!service.is_loaded());
    }

    #[tokio::test]
    async fn test_locate_without_database() {
        let service = GeoIpService::new(None).unwrap();
        let err = service.locate("8.8.8.8").await.unwrap_err();
        assert!(matches!(err, GeoError::DatabaseNotLoaded));
    }

    #[test]
    fn test_parse_ip() {
        assert!(parse_ip(" 10.0.0.1 ").is_ok());
        assert!(parse_ip("::1").is_ok());
        assert!(matches!(parse_ip("not-an-ip"), Err(GeoError::InvalidIp(_))));
        assert!(matches!(parse_ip("1.2.3.4, 5.6.7.8"), Err(GeoError::InvalidIp(_))));
    }
}
