//! SeaORM entities mapping the statuswatch tables.
//!
//! Each entity lives in its own module; the prelude re-exports the
//! `Entity`/`Model` pairs for convenient importing.

pub mod incident;
pub mod incident_update;
pub mod monitor;
pub mod monitoring_result;
pub mod organization;
pub mod service;
pub mod user;

pub mod prelude {
    pub use super::incident::Entity as Incident;
    pub use super::incident::Model as IncidentModel;

    pub use super::incident_update::Entity as IncidentUpdate;
    pub use super::incident_update::Model as IncidentUpdateModel;

    pub use super::monitor::Entity as Monitor;
    pub use super::monitor::Model as MonitorModel;

    pub use super::monitoring_result::Entity as MonitoringResult;
    pub use super::monitoring_result::Model as MonitoringResultModel;

    pub use super::organization::Entity as Organization;
    pub use super::organization::Model as OrganizationModel;

    pub use super::service::Entity as Service;
    pub use super::service::Model as ServiceModel;

    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;
}
