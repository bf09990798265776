//! Off-path visit recording
//!
//! A redirect has already been answered by the time any of this runs. The
//! visit row is the only required write; browser and geo enrichment are
//! best-effort and their failures end up in the log, never in a response.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::analytics::geoip::GeoLookup;
use crate::analytics::user_agent::BrowserParser;
use crate::models::{NewVisit, RequestInfo, Visit};
use crate::storage::{LinkStore, StorageResult};

pub struct VisitRecorder {
    storage: Arc<dyn LinkStore>,
    geo: Arc<dyn GeoLookup>,
    browsers: Arc<dyn BrowserParser>,
}

impl VisitRecorder {
    pub fn new(
        storage: Arc<dyn LinkStore>,
        geo: Arc<dyn GeoLookup>,
        browsers: Arc<dyn BrowserParser>,
    ) -> Self {
        Self {
            storage,
            geo,
            browsers,
        }
    }

    /// Run `record` as a detached task. Errors are logged, not returned; the
    /// handle is only useful to callers that want to wait for completion.
    pub fn spawn(self: &Arc<Self>, link_id: i64, request: RequestInfo) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = recorder.record(link_id, request).await {
                error!(link_id, error = %err, "failed to track redirect");
            }
        })
    }

    /// Persist one visit and enrich it.
    ///
    /// Fails only if the browser upsert or the visit insert fails. A missing
    /// location is a normal outcome.
    pub async fn record(&self, link_id: i64, request: RequestInfo) -> StorageResult<Visit> {
        let client_ip = request.client_ip().to_string();

        let browser = self.browsers.parse(&request.user_agent);
        let browser_id = self.storage.upsert_browser(&browser).await?;

        let visit = self
            .storage
            .track_visit(&NewVisit {
                link_id,
                ip_address: request.ip_address,
                user_agent: request.user_agent,
                referer: request.referer.filter(|r| !r.is_empty()),
                browser_id: Some(browser_id),
                created_at: chrono::Utc::now().timestamp(),
            })
            .await?;

        let location = match self.geo.locate(&client_ip).await {
            Ok(location) => location,
            Err(err) => {
                warn!(ip = %client_ip, provider = self.geo.name(), error = %err, "failed to locate visitor");
                return Ok(visit);
            }
        };

        match self.storage.insert_visit_location(visit.id, &location).await {
            Ok(()) => debug!(visit_id = visit.id, country = %location.country_code, "visit located"),
            Err(err) => warn!(visit_id = visit.id, error = %err, "failed to insert visit location"),
        }

        Ok(visit)
    }
}
