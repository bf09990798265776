//! Visit analytics
//!
//! Recording happens off the redirect path in a detached task; statistics are
//! aggregated on demand from the store.

pub mod geoip;
pub mod ipquery;
pub mod models;
pub mod recorder;
pub mod stats;
pub mod timeseries;
pub mod user_agent;

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AnalyticsConfig;

// Re-export commonly used types
pub use geoip::{GeoError, GeoIpService, GeoLookup};
pub use ipquery::IpQueryLookup;
pub use models::{OwnerOverview, StatisticsReport};
pub use recorder::VisitRecorder;
pub use stats::StatisticsAggregator;
pub use timeseries::{fill_gaps, Granularity, Period, TimeRange, TimeSeriesPoint};
pub use user_agent::{BrowserParser, WootheeParser};

/// Pick a geo provider from configuration.
///
/// A readable MaxMind database wins, then the HTTP API. With neither, the
/// returned service has no database and every lookup fails softly.
pub fn geo_lookup_from_config(config: &AnalyticsConfig) -> Arc<dyn GeoLookup> {
    if let Some(path) = config.geoip_city_db.as_deref() {
        match GeoIpService::new(Some(path)) {
            Ok(service) => {
                info!("GeoIP: using MaxMind database at {}", path);
                return Arc::new(service);
            }
            Err(e) => warn!("GeoIP: {:#}", e),
        }
    }

    if let Some(url) = config.geoip_api_url.as_deref() {
        match IpQueryLookup::new(url) {
            Ok(lookup) => {
                info!("GeoIP: using HTTP lookup at {}", url);
                return Arc::new(lookup);
            }
            Err(e) => warn!("GeoIP: failed to build HTTP client: {}", e),
        }
    }

    warn!("GeoIP: no provider configured, visits will not be located");
    Arc::new(GeoIpService::unloaded())
}
