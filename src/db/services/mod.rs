//! Persistence services over the statuswatch tables.
//!
//! Each module is a set of free async functions taking a
//! `&DatabaseConnection`; the engine consumes these as its persistence
//! interface and owns no SQL elsewhere.

pub mod incident_service;
pub mod monitor_service;
pub mod monitoring_result_service;
pub mod service_service;
