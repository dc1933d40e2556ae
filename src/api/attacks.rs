use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::attack::AttackDetails;
use crate::flowspec::{Action, FlowSpecRule};
use crate::runtime::Runtime;

use super::error::AppError;

/// JSON projection of [`AttackDetails`]; mirrors its `Display` field order
/// (§9 open question (a)) without the raw packet capture ring.
#[derive(Serialize)]
pub struct AttackSummary {
    pub uuid: Uuid,
    pub host: String,
    pub host_group: String,
    pub parent_host_group: Option<String>,
    pub first_detected_at: String,
    pub ban_timestamp: String,
    pub ban_duration_seconds: u64,
    pub attack_direction: String,
    pub protocol: String,
    pub severity: String,
    pub triggering_metric: String,
    pub attack_power: f64,
    pub max_attack_power: f64,
    pub state: String,
    pub mitigation_failed: bool,
    pub captured_packets: usize,
}

impl From<&AttackDetails> for AttackSummary {
    fn from(a: &AttackDetails) -> Self {
        Self {
            uuid: a.uuid,
            host: a.host.to_string(),
            host_group: a.host_group.clone(),
            parent_host_group: a.parent_host_group.clone(),
            first_detected_at: a.first_detected_at.to_rfc3339(),
            ban_timestamp: a.ban_timestamp.to_rfc3339(),
            ban_duration_seconds: a.ban_duration.as_secs(),
            attack_direction: format!("{:?}", a.direction),
            protocol: a.protocol.to_string(),
            severity: a.severity.to_string(),
            triggering_metric: a.triggering_metric.to_string(),
            attack_power: a.first_rate,
            max_attack_power: a.peak_rate,
            state: format!("{:?}", a.state),
            mitigation_failed: a.mitigation_failed,
            captured_packets: a.captured_packets.len(),
        }
    }
}

#[derive(Serialize)]
pub struct UnbanResult {
    pub unbanned: bool,
}

pub async fn list(State(runtime): State<Arc<Runtime>>) -> Json<Vec<AttackSummary>> {
    let mut out: Vec<AttackSummary> = runtime.attacks.active_attacks().iter().map(AttackSummary::from).collect();
    out.extend(runtime.attacks.archived_attacks().iter().map(AttackSummary::from));
    Json(out)
}

fn find(runtime: &Runtime, id: Uuid) -> Option<(AttackDetails, bool)> {
    if let Some(a) = runtime.attacks.active_attacks().into_iter().find(|a| a.uuid == id) {
        return Some((a, true));
    }
    runtime
        .attacks
        .archived_attacks()
        .into_iter()
        .find(|a| a.uuid == id)
        .map(|a| (a, false))
}

pub async fn unban(
    State(runtime): State<Arc<Runtime>>,
    Path(id): Path<Uuid>,
) -> Result<Json<UnbanResult>, AppError> {
    let Some((attack, _)) = find(&runtime, id) else {
        return Err(AppError::NotFound);
    };
    let unbanned = runtime.attacks.unban(&attack.host, Utc::now());
    Ok(Json(UnbanResult { unbanned }))
}

/// Blackholed while the attack is still active, withdrawn once archived.
pub async fn flowspec(State(runtime): State<Arc<Runtime>>, Path(id): Path<Uuid>) -> Result<String, AppError> {
    let (attack, is_active) = find(&runtime, id).ok_or(AppError::NotFound)?;
    let rule = if is_active {
        FlowSpecRule::blackhole(attack.host)
    } else {
        FlowSpecRule::new(Action::Accept)
    };
    Ok(rule.to_string())
}
