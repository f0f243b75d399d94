//! Connection statistics normalization
//!
//! Stacks report candidate-pair information in several shapes: the current
//! hyphenated report types with a transport report naming the selected pair,
//! older unhyphenated types with a `selected` flag, and vendor
//! `googCandidatePair` reports carrying `ip:port` strings. Everything is
//! normalized into [`CandidateRecord`] and [`PairRecord`] before selection.

use crate::types::AddressInfo;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One statistics report, with legacy `values` arrays merged into the object
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsReport {
    fields: Map<String, Value>,
}

impl StatsReport {
    /// Build from a raw JSON report; non-objects are rejected
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        if let Some(Value::Array(values)) = fields.get("values").cloned() {
            for entry in values {
                if let Value::Object(extra) = entry {
                    fields.extend(extra);
                }
            }
        }
        Some(Self { fields })
    }

    /// Report id
    #[must_use]
    pub fn id(&self) -> &str {
        self.str_field("id").unwrap_or_default()
    }

    /// Report type (`candidate-pair`, `local-candidate`, ...)
    #[must_use]
    pub fn report_type(&self) -> &str {
        self.str_field("type").unwrap_or_default()
    }

    /// Report timestamp, if present
    #[must_use]
    pub fn timestamp(&self) -> Option<f64> {
        self.fields.get("timestamp").and_then(Value::as_f64)
    }

    /// Raw field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn port_field(&self, key: &str) -> Option<u16> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn truthy(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// Normalize a batch of raw reports
#[must_use]
pub fn normalize_reports(raw: Vec<Value>) -> Vec<StatsReport> {
    raw.into_iter().filter_map(StatsReport::from_value).collect()
}

/// Canonical candidate endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    /// Report id
    pub id: String,
    /// Candidate address
    pub address: Option<String>,
    /// Candidate port
    pub port: Option<u16>,
}

impl CandidateRecord {
    fn from_report(report: &StatsReport) -> Self {
        // Standard shape first, then the older `ipAddress`/`portNumber` pair
        let (address, port) = if let Some(addr) = report
            .str_field("ip")
            .or_else(|| report.str_field("address"))
        {
            (Some(addr.to_string()), report.port_field("port"))
        } else if let Some(addr) = report.str_field("ipAddress") {
            (Some(addr.to_string()), report.port_field("portNumber"))
        } else {
            (None, None)
        };
        Self {
            id: report.id().to_string(),
            address,
            port,
        }
    }

    fn to_address(&self) -> Option<AddressInfo> {
        self.address
            .as_ref()
            .map(|addr| AddressInfo::new(addr.clone(), self.port))
    }
}

/// Canonical candidate pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    /// Report id
    pub id: String,
    /// Local candidate report id
    pub local_candidate_id: Option<String>,
    /// Remote candidate report id
    pub remote_candidate_id: Option<String>,
    /// `ip:port` of the local side, from vendor reports
    pub inline_local: Option<String>,
    /// `ip:port` of the remote side, from vendor reports
    pub inline_remote: Option<String>,
}

impl PairRecord {
    fn from_report(report: &StatsReport) -> Self {
        Self {
            id: report.id().to_string(),
            local_candidate_id: report.str_field("localCandidateId").map(str::to_string),
            remote_candidate_id: report.str_field("remoteCandidateId").map(str::to_string),
            inline_local: report.str_field("googLocalAddress").map(str::to_string),
            inline_remote: report.str_field("googRemoteAddress").map(str::to_string),
        }
    }
}

fn split_host_port(value: &str) -> AddressInfo {
    match value.rsplit_once(':') {
        Some((host, port)) => AddressInfo::new(host, port.parse().ok()),
        None => AddressInfo::new(value, None),
    }
}

/// Outcome of a candidate-pair lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSelection {
    /// A selected pair was found
    Found {
        /// Local endpoint (unresolved if the reports lack it)
        local: AddressInfo,
        /// Remote endpoint (unresolved if the reports lack it)
        remote: AddressInfo,
    },
    /// No selection yet; poll again
    Retry,
    /// The stack exposes pairs but no candidates; proceed without addresses
    Unavailable,
}

/// Candidates and pairs indexed by report id
#[derive(Debug, Default)]
pub struct CandidateIndex {
    local: HashMap<String, CandidateRecord>,
    remote: HashMap<String, CandidateRecord>,
    pairs: HashMap<String, PairRecord>,
    selected: Option<PairRecord>,
}

impl CandidateIndex {
    /// Index a batch of reports
    #[must_use]
    pub fn build(reports: &[StatsReport]) -> Self {
        let mut index = Self::default();
        for report in reports {
            match report.report_type() {
                "remotecandidate" | "remote-candidate" => {
                    index
                        .remote
                        .insert(report.id().to_string(), CandidateRecord::from_report(report));
                }
                "localcandidate" | "local-candidate" => {
                    index
                        .local
                        .insert(report.id().to_string(), CandidateRecord::from_report(report));
                }
                "candidatepair" | "candidate-pair" => {
                    index
                        .pairs
                        .insert(report.id().to_string(), PairRecord::from_report(report));
                }
                _ => {}
            }
        }

        // Later matches win
        for report in reports {
            match report.report_type() {
                "transport" => {
                    if let Some(pair) = report
                        .str_field("selectedCandidatePairId")
                        .and_then(|id| index.pairs.get(id))
                    {
                        index.selected = Some(pair.clone());
                    }
                }
                "googCandidatePair" if report.str_field("googActiveConnection") == Some("true") => {
                    index.selected = Some(PairRecord::from_report(report));
                }
                "candidatepair" | "candidate-pair" if report.truthy("selected") => {
                    index.selected = Some(PairRecord::from_report(report));
                }
                _ => {}
            }
        }
        index
    }

    /// Resolve the selected pair into endpoints
    #[must_use]
    pub fn selection(&self) -> PairSelection {
        let Some(pair) = &self.selected else {
            return if self.pairs.is_empty() || !self.local.is_empty() {
                PairSelection::Retry
            } else {
                PairSelection::Unavailable
            };
        };

        let local = pair
            .local_candidate_id
            .as_ref()
            .and_then(|id| self.local.get(id))
            .and_then(CandidateRecord::to_address)
            .or_else(|| pair.inline_local.as_deref().map(split_host_port))
            .unwrap_or_default();
        let remote = pair
            .remote_candidate_id
            .as_ref()
            .and_then(|id| self.remote.get(id))
            .and_then(CandidateRecord::to_address)
            .or_else(|| pair.inline_remote.as_deref().map(split_host_port))
            .unwrap_or_default();

        PairSelection::Found { local, remote }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::AddressFamily;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn select(raw: Vec<Value>) -> PairSelection {
        CandidateIndex::build(&normalize_reports(raw)).selection()
    }

    #[test]
    fn test_flatten_values() {
        let report = StatsReport::from_value(json!({
            "id": "legacy",
            "type": "googCandidatePair",
            "values": [{"googActiveConnection": "true"}, {"googLocalAddress": "10.0.0.1:5000"}]
        }))
        .unwrap();
        assert_eq!(report.get("googActiveConnection"), Some(&json!("true")));
        assert_eq!(report.report_type(), "googCandidatePair");
        assert!(StatsReport::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_standard_shape() {
        let selection = select(vec![
            json!({"id": "T1", "type": "transport", "selectedCandidatePairId": "P1"}),
            json!({"id": "P1", "type": "candidate-pair", "localCandidateId": "L1", "remoteCandidateId": "R1"}),
            json!({"id": "L1", "type": "local-candidate", "ip": "192.168.0.2", "port": 50000}),
            json!({"id": "R1", "type": "remote-candidate", "address": "2001:db8::1", "port": 50001}),
        ]);
        let PairSelection::Found { local, remote } = selection else {
            panic!("expected selection");
        };
        assert_eq!(local, AddressInfo::new("192.168.0.2", Some(50000)));
        assert_eq!(remote.family, Some(AddressFamily::IPv6));
        assert_eq!(remote.port, Some(50001));
    }

    #[test]
    fn test_selected_flag_and_firefox_fields() {
        let selection = select(vec![
            json!({"id": "P1", "type": "candidatepair", "selected": true, "localCandidateId": "L1", "remoteCandidateId": "R1"}),
            json!({"id": "L1", "type": "localcandidate", "ipAddress": "10.1.1.1", "portNumber": "4000"}),
            json!({"id": "R1", "type": "remotecandidate", "ipAddress": "10.1.1.2", "portNumber": 4001}),
        ]);
        assert_eq!(
            selection,
            PairSelection::Found {
                local: AddressInfo::new("10.1.1.1", Some(4000)),
                remote: AddressInfo::new("10.1.1.2", Some(4001)),
            }
        );
    }

    #[test]
    fn test_vendor_pair() {
        let selection = select(vec![json!({
            "id": "G1",
            "type": "googCandidatePair",
            "values": [
                {"googActiveConnection": "true"},
                {"googLocalAddress": "10.0.0.1:5000"},
                {"googRemoteAddress": "10.0.0.2:5001"}
            ]
        })]);
        assert_eq!(
            selection,
            PairSelection::Found {
                local: AddressInfo::new("10.0.0.1", Some(5000)),
                remote: AddressInfo::new("10.0.0.2", Some(5001)),
            }
        );
    }

    #[test]
    fn test_retry_and_unavailable() {
        assert_eq!(select(Vec::new()), PairSelection::Retry);

        // Pairs and local candidates but nothing selected yet
        assert_eq!(
            select(vec![
                json!({"id": "P1", "type": "candidate-pair"}),
                json!({"id": "L1", "type": "local-candidate", "ip": "10.0.0.1", "port": 1}),
            ]),
            PairSelection::Retry
        );

        // Pairs without any candidates: give up on addresses
        assert_eq!(
            select(vec![json!({"id": "P1", "type": "candidate-pair"})]),
            PairSelection::Unavailable
        );
    }
}
