//! Mitigation hook that shells out to an operator-supplied executable
//! (`mitigation.exec_script`), the same `std::process::Command` pattern the
//! scanner uses for ARP discovery, run synchronously from the attack
//! manager's own thread rather than `tokio::process`.

use std::process::Command;

use crate::attack::{AttackDetails, Hook, HookError};
use crate::flowspec::{Action, FlowSpecRule};

pub struct ExecHook {
    /// Empty disables the hook: every call is a no-op `Ok(())`.
    script: String,
}

impl ExecHook {
    pub fn new(script: String) -> Self {
        Self { script }
    }

    fn invoke(&self, attack: &AttackDetails, rule: &FlowSpecRule) -> Result<(), HookError> {
        if self.script.is_empty() {
            return Ok(());
        }
        match Command::new(&self.script)
            .arg(attack.uuid.to_string())
            .arg(rule.to_string())
            .status()
        {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(HookError::Rejected {
                hook: self.name().to_string(),
                reason: format!("exited with {status}"),
            }),
            Err(e) => Err(HookError::Rejected {
                hook: self.name().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Hook for ExecHook {
    fn name(&self) -> &str {
        "mitigation_exec"
    }

    fn on_attack_onset(&self, attack: &AttackDetails) -> Result<(), HookError> {
        self.invoke(attack, &FlowSpecRule::blackhole(attack.host))
    }

    fn on_attack_peak(&self, _attack: &AttackDetails) -> Result<(), HookError> {
        Ok(())
    }

    fn on_attack_clear(&self, attack: &AttackDetails) -> Result<(), HookError> {
        self.invoke(attack, &FlowSpecRule::new(Action::Accept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostgroup::BanSettings;
    use crate::threshold::{TrippedMetric, Verdict};
    use chrono::Utc;
    use std::net::IpAddr;

    fn sample_attack() -> AttackDetails {
        let verdict = Verdict {
            metric: TrippedMetric::OverallPps,
            observed: 1000.0,
            threshold: 500.0,
        };
        AttackDetails::new(
            "10.0.0.1".parse::<IpAddr>().unwrap(),
            "customer_a".to_string(),
            None,
            verdict,
            crate::attack::AttackDirection::Incoming,
            Utc::now(),
            &BanSettings::default(),
            4,
        )
    }

    #[test]
    fn empty_script_is_a_no_op() {
        let hook = ExecHook::new(String::new());
        assert!(hook.on_attack_onset(&sample_attack()).is_ok());
        assert!(hook.on_attack_clear(&sample_attack()).is_ok());
    }
}
