//! Flow Spec / blackhole mitigation encoder (§4.6): serialises a
//! match+action tuple into the textual form handed to the BGP speaker.

use std::net::IpAddr;

/// The action clause of a Flow Spec rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Accept,
    Discard,
    RateLimit(u64),
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Accept => write!(f, "accept;"),
            Action::Discard => write!(f, "discard;"),
            Action::RateLimit(rate) => write!(f, "rate-limit {rate};"),
        }
    }
}

/// Concatenate `prefix+v1+sep+prefix+v2+...` for a list of values, the
/// primitive every Flow Spec match-clause list (ports, protocols) is built
/// from. An empty list yields the empty string.
pub fn serialize<T: std::fmt::Display>(list: &[T], sep: &str, prefix: &str) -> String {
    list.iter()
        .map(|v| format!("{prefix}{v}"))
        .collect::<Vec<_>>()
        .join(sep)
}

/// One match clause term: a named field and its serialised value list.
#[derive(Debug, Clone)]
pub struct MatchTerm {
    pub field: String,
    pub values: String,
}

/// A full Flow Spec rule: zero or more match terms plus exactly one action.
#[derive(Debug, Clone, Default)]
pub struct FlowSpecRule {
    pub terms: Vec<MatchTerm>,
    pub action: Action,
}

impl FlowSpecRule {
    pub fn new(action: Action) -> Self {
        Self {
            terms: Vec::new(),
            action,
        }
    }

    pub fn with_term(mut self, field: &str, values: String) -> Self {
        self.terms.push(MatchTerm {
            field: field.to_string(),
            values,
        });
        self
    }

    pub fn destination_ports(mut self, ports: &[u16]) -> Self {
        let values = serialize(ports, ",", "=");
        self.terms.push(MatchTerm {
            field: "destination-port".to_string(),
            values,
        });
        self
    }

    /// A blackhole announcement is a degenerate rule: match on the host's
    /// full-width address, discard unconditionally.
    pub fn blackhole(host: IpAddr) -> Self {
        let prefix_len = if host.is_ipv4() { 32 } else { 128 };
        Self {
            terms: vec![MatchTerm {
                field: "destination".to_string(),
                values: format!("{host}/{prefix_len}"),
            }],
            action: Action::Discard,
        }
    }
}

impl std::fmt::Display for FlowSpecRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "match {{ ")?;
        for term in &self.terms {
            write!(f, "{} {}; ", term.field, term.values)?;
        }
        write!(f, "}} then {{ {} }}", self.action)
    }
}
