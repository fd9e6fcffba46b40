//! Telemetry samples

use cohort_core::{UserId, Vec3};
use serde::{Deserialize, Serialize};

/// One interval of attention on a point of the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub user_id: UserId,
    /// Lesson or activity the session belongs to
    pub context_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub target_name: String,
    /// Hit point in model-local coordinates
    pub local_hit_point: Vec3,
    pub dwell_millis: u64,
}
