//! Monotonic plan ordering per component and environment.
//!
//! A plan is accepted only if its timestamp is strictly greater than the
//! newest accepted plan for the same [`StalenessKey`]. Timestamps are
//! ISO-8601 strings compared lexicographically, which orders correctly as
//! long as submitters use one precision and timezone representation.
//!
//! The guard reads the latest timestamp and the caller writes afterwards;
//! the two steps are not atomic. Two concurrent submissions for one key
//! can both pass against the same baseline. Strict ordering would need a
//! compare-and-swap in the [`PlanIndex`] backend.

use crate::error::StaleSubmissionError;
use crate::models::StalenessKey;
use crate::projection::PlanDocument;
use crate::store::PlanIndex;

pub struct StalenessGuard<'a> {
    index: &'a dyn PlanIndex,
}

impl<'a> StalenessGuard<'a> {
    pub fn new(index: &'a dyn PlanIndex) -> Self {
        Self { index }
    }

    /// Pure ordering check against a known latest timestamp.
    pub fn check(
        key: &StalenessKey,
        latest: Option<&str>,
        incoming: &str,
    ) -> Result<(), StaleSubmissionError> {
        match latest {
            Some(latest) if incoming <= latest => Err(StaleSubmissionError {
                component_id: key.component_id.clone(),
                environment: key.environment.clone(),
                incoming: incoming.to_string(),
                latest: latest.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Look up the newest accepted plan for `key` and check `incoming`
    /// against it.
    ///
    /// On success returns that previous plan, if any, so the caller can
    /// compare drift without a second read.
    pub async fn admit(
        &self,
        key: &StalenessKey,
        incoming: &str,
    ) -> Result<Option<PlanDocument>, AdmitError> {
        let previous = self
            .index
            .latest_accepted(key)
            .await
            .map_err(AdmitError::Lookup)?;
        Self::check(key, previous.as_ref().map(|p| p.timestamp.as_str()), incoming)
            .map_err(AdmitError::Stale)?;
        Ok(previous)
    }
}

/// Failure of [`StalenessGuard::admit`].
#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error(transparent)]
    Stale(StaleSubmissionError),
    #[error("failed to read latest plan: {0:#}")]
    Lookup(anyhow::Error),
}

impl From<AdmitError> for crate::error::IngestError {
    fn from(err: AdmitError) -> Self {
        match err {
            AdmitError::Stale(stale) => stale.into(),
            AdmitError::Lookup(e) => crate::error::IngestError::Storage(e),
        }
    }
}
