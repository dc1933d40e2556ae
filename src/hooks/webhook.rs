//! Notification hook that POSTs attack lifecycle events to an operator
//! webhook URL, grounded in the `ureq` blocking client (the pack's choice
//! wherever plain outbound HTTP is needed without pulling in a full async
//! client).

use std::time::Duration;

use serde_json::json;

use crate::attack::{AttackDetails, AttackEventKind, Hook, HookError};

pub struct WebhookHook {
    url: String,
    agent: ureq::Agent,
}

impl WebhookHook {
    pub fn new(url: String, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            url,
            agent: config.into(),
        }
    }

    fn post(&self, attack: &AttackDetails, kind: AttackEventKind) -> Result<(), HookError> {
        if self.url.is_empty() {
            return Ok(());
        }
        let body = json!({
            "uuid": attack.uuid.to_string(),
            "host": attack.host.to_string(),
            "host_group": attack.host_group,
            "parent_host_group": attack.parent_host_group,
            "event": format!("{kind:?}"),
            "first_detected_at": attack.first_detected_at.to_rfc3339(),
            "triggering_metric": attack.triggering_metric.to_string(),
            "protocol": attack.protocol.to_string(),
            "severity": attack.severity.to_string(),
            "attack_direction": format!("{:?}", attack.direction),
            "first_rate": attack.first_rate,
            "peak_rate": attack.peak_rate,
        });

        self.agent
            .post(&self.url)
            .send_json(body)
            .map(|_| ())
            .map_err(|e| HookError::Rejected {
                hook: self.name().to_string(),
                reason: e.to_string(),
            })
    }
}

impl Hook for WebhookHook {
    fn name(&self) -> &str {
        "webhook"
    }

    fn on_attack_onset(&self, attack: &AttackDetails) -> Result<(), HookError> {
        self.post(attack, AttackEventKind::Onset)
    }

    fn on_attack_peak(&self, attack: &AttackDetails) -> Result<(), HookError> {
        self.post(attack, AttackEventKind::Peak)
    }

    fn on_attack_clear(&self, attack: &AttackDetails) -> Result<(), HookError> {
        self.post(attack, AttackEventKind::Clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_is_a_no_op() {
        let hook = WebhookHook::new(String::new(), Duration::from_secs(1));
        let verdict = crate::threshold::Verdict {
            metric: crate::threshold::TrippedMetric::OverallPps,
            observed: 1.0,
            threshold: 1.0,
        };
        let attack = AttackDetails::new(
            "10.0.0.1".parse().unwrap(),
            "customer_a".to_string(),
            None,
            verdict,
            crate::attack::AttackDirection::Incoming,
            chrono::Utc::now(),
            &crate::hostgroup::BanSettings::default(),
            4,
        );
        assert!(hook.on_attack_onset(&attack).is_ok());
    }
}
