use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Health verdict produced by the classifier for a single probe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_status_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorStatus {
    #[sea_orm(string_value = "UP")]
    Up,
    #[sea_orm(string_value = "DEGRADED")]
    Degraded,
    #[sea_orm(string_value = "DOWN")]
    Down,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorStatus::Up => "UP",
            MonitorStatus::Degraded => "DEGRADED",
            MonitorStatus::Down => "DOWN",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "service_status_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    #[sea_orm(string_value = "OPERATIONAL")]
    Operational,
    #[sea_orm(string_value = "DEGRADED")]
    Degraded,
    #[sea_orm(string_value = "OUTAGE")]
    Outage,
    /// Operator override; excluded from automatic recomputation while set.
    #[sea_orm(string_value = "MAINTENANCE")]
    Maintenance,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Operational => "OPERATIONAL",
            ServiceStatus::Degraded => "DEGRADED",
            ServiceStatus::Outage => "OUTAGE",
            ServiceStatus::Maintenance => "MAINTENANCE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "incident_status_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    #[sea_orm(string_value = "OPEN")]
    Open,
    #[sea_orm(string_value = "MONITORING")]
    Monitoring,
    #[sea_orm(string_value = "RESOLVED")]
    Resolved,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentStatus::Open => "OPEN",
            IncidentStatus::Monitoring => "MONITORING",
            IncidentStatus::Resolved => "RESOLVED",
        };
        write!(f, "{s}")
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "incident_severity_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentSeverity {
    #[sea_orm(string_value = "LOW")]
    Low,
    #[sea_orm(string_value = "MEDIUM")]
    Medium,
    #[sea_orm(string_value = "HIGH")]
    High,
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
}

impl fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentSeverity::Low => "LOW",
            IncidentSeverity::Medium => "MEDIUM",
            IncidentSeverity::High => "HIGH",
            IncidentSeverity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Probe strategy for a monitor. Only HTTP is implemented today; TCP, DNS
/// and ICMP are future cases with their own executor arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "probe_kind_enum")]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeKind {
    #[sea_orm(string_value = "HTTP")]
    Http,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Http => write!(f, "HTTP"),
        }
    }
}
