//! Daily request quota gate.
//!
//! Non-Pro users get [`DAILY_REQUEST_LIMIT`] metered requests per UTC
//! calendar day. Pro users are never metered. The admission decision and the
//! counter update happen in one conditional UPDATE, so the gate is safe under
//! concurrent requests and across processes sharing the database.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::DAILY_REQUEST_LIMIT;
use crate::db::{self, DbPool};
use crate::services::Clock;
use crate::Result;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
}

/// Today's usage for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub is_pro: bool,
    pub used: i64,
    /// None for Pro users.
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
}

#[derive(Clone)]
pub struct QuotaService {
    db: DbPool,
    clock: Arc<dyn Clock>,
    limit: i64,
}

impl QuotaService {
    pub fn new(db: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            limit: DAILY_REQUEST_LIMIT,
        }
    }

    fn today(&self) -> String {
        self.clock.today().format("%Y-%m-%d").to_string()
    }

    /// Admit one request for `user_id`, consuming a slot when metered.
    ///
    /// Unknown users are a `NotFound` error, never a denial.
    pub async fn check_and_increase(&self, user_id: &str) -> Result<QuotaDecision> {
        let today = self.today();

        if db::take_daily_request(&self.db, user_id, &today, self.limit, self.clock.now()).await? {
            debug!(user_id, %today, "Request admitted");
            return Ok(QuotaDecision { allowed: true });
        }

        // No row changed: the user is missing, Pro, or out of requests.
        let user = db::get_user(&self.db, user_id).await?;
        if user.is_pro {
            return Ok(QuotaDecision { allowed: true });
        }

        info!(
            user_id,
            %today,
            count = user.request_count,
            limit = self.limit,
            "Daily request limit reached"
        );
        Ok(QuotaDecision { allowed: false })
    }

    /// Report today's usage without touching the counters.
    pub async fn status(&self, user_id: &str) -> Result<QuotaStatus> {
        let user = db::get_user(&self.db, user_id).await?;
        let today = self.today();

        if user.is_pro {
            return Ok(QuotaStatus {
                is_pro: true,
                used: user.requests_on(&today),
                limit: None,
                remaining: None,
            });
        }

        let used = user.requests_on(&today);
        Ok(QuotaStatus {
            is_pro: false,
            used,
            limit: Some(self.limit),
            remaining: Some((self.limit - used).max(0)),
        })
    }
}
