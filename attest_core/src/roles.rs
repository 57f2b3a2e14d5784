//! Client-side roles and what each one can see.
//!
//! Roles are a closed set; every mapping below is a `match`, so adding a role
//! fails to compile until each table covers it.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Permission names shared by both authorization tiers.
pub mod permissions {
    pub const AUDIT_READ: &str = "audits.read";
    pub const AUDIT_MANAGE: &str = "audits.manage";
    pub const QUESTION_ASSIGN: &str = "questions.assign";
    pub const SUBMISSION_WRITE: &str = "submissions.write";
    pub const SUBMISSION_REVIEW: &str = "submissions.review";
    pub const EVIDENCE_UPLOAD: &str = "evidence.upload";
    pub const REPORT_VIEW: &str = "reports.view";
    pub const USER_MANAGE: &str = "users.manage";
    pub const CLIENT_PROVISION: &str = "clients.provision";
}

use permissions::*;

/// Roles seeded into every client database at provisioning.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ClientRole {
    Administrator,
    #[strum(to_string = "point_of_contact", serialize = "poc")]
    PointOfContact,
    Stakeholder,
    Viewer,
}

/// Application areas a client user may be shown, in menu order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AppModule {
    Dashboard,
    Audits,
    Questions,
    Evidence,
    Reports,
    Users,
    Settings,
}

const ADMINISTRATOR_MODULES: &[AppModule] = &[
    AppModule::Dashboard,
    AppModule::Audits,
    AppModule::Questions,
    AppModule::Evidence,
    AppModule::Reports,
    AppModule::Users,
    AppModule::Settings,
];

const POINT_OF_CONTACT_MODULES: &[AppModule] = &[
    AppModule::Dashboard,
    AppModule::Audits,
    AppModule::Questions,
    AppModule::Evidence,
    AppModule::Reports,
];

const STAKEHOLDER_MODULES: &[AppModule] = &[
    AppModule::Dashboard,
    AppModule::Questions,
    AppModule::Evidence,
];

const VIEWER_MODULES: &[AppModule] = &[AppModule::Dashboard, AppModule::Reports];

const ADMINISTRATOR_PERMISSIONS: &[&str] = &[
    AUDIT_READ,
    AUDIT_MANAGE,
    QUESTION_ASSIGN,
    SUBMISSION_WRITE,
    SUBMISSION_REVIEW,
    EVIDENCE_UPLOAD,
    REPORT_VIEW,
    USER_MANAGE,
];

const POINT_OF_CONTACT_PERMISSIONS: &[&str] = &[
    AUDIT_READ,
    QUESTION_ASSIGN,
    SUBMISSION_WRITE,
    EVIDENCE_UPLOAD,
    REPORT_VIEW,
];

const STAKEHOLDER_PERMISSIONS: &[&str] = &[AUDIT_READ, SUBMISSION_WRITE, EVIDENCE_UPLOAD];

const VIEWER_PERMISSIONS: &[&str] = &[AUDIT_READ, REPORT_VIEW];

impl ClientRole {
    /// Parses a stored role name. Unknown names map to `None`, which callers
    /// treat as "no role".
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Roles that see every question of an audit without an assignment.
    pub fn sees_all_questions(&self) -> bool {
        match self {
            ClientRole::Administrator | ClientRole::PointOfContact => true,
            ClientRole::Stakeholder | ClientRole::Viewer => false,
        }
    }

    pub fn visible_modules(&self) -> &'static [AppModule] {
        match self {
            ClientRole::Administrator => ADMINISTRATOR_MODULES,
            ClientRole::PointOfContact => POINT_OF_CONTACT_MODULES,
            ClientRole::Stakeholder => STAKEHOLDER_MODULES,
            ClientRole::Viewer => VIEWER_MODULES,
        }
    }

    pub fn can_view(&self, module: AppModule) -> bool {
        self.visible_modules().contains(&module)
    }

    /// Permissions granted to the role when a client database is seeded.
    pub fn default_permissions(&self) -> &'static [&'static str] {
        match self {
            ClientRole::Administrator => ADMINISTRATOR_PERMISSIONS,
            ClientRole::PointOfContact => POINT_OF_CONTACT_PERMISSIONS,
            ClientRole::Stakeholder => STAKEHOLDER_PERMISSIONS,
            ClientRole::Viewer => VIEWER_PERMISSIONS,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ClientRole::Administrator => "Full control over the client workspace",
            ClientRole::PointOfContact => "Answers and delegates every audit question",
            ClientRole::Stakeholder => "Answers questions explicitly assigned to them",
            ClientRole::Viewer => "Read-only access to audits and reports",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_role_names_parse() {
        assert_eq!(
            ClientRole::from_name("point_of_contact"),
            Some(ClientRole::PointOfContact)
        );
        assert_eq!(ClientRole::from_name("POC"), Some(ClientRole::PointOfContact));
        assert_eq!(ClientRole::from_name("Stakeholder"), Some(ClientRole::Stakeholder));
        assert_eq!(ClientRole::from_name("auditor"), None);
        assert_eq!(ClientRole::PointOfContact.to_string(), "point_of_contact");
    }

    #[test]
    fn test_only_poc_equivalents_see_all_questions() {
        assert!(ClientRole::Administrator.sees_all_questions());
        assert!(ClientRole::PointOfContact.sees_all_questions());
        assert!(!ClientRole::Stakeholder.sees_all_questions());
        assert!(!ClientRole::Viewer.sees_all_questions());
    }

    #[test]
    fn test_every_role_has_dashboard() {
        for role in ClientRole::iter() {
            assert!(role.can_view(AppModule::Dashboard), "{role} lacks dashboard");
            assert!(!role.default_permissions().is_empty());
        }
    }

    #[test]
    fn test_stakeholder_module_table() {
        let role = ClientRole::Stakeholder;
        assert!(role.can_view(AppModule::Questions));
        assert!(!role.can_view(AppModule::Users));
        assert!(!role.can_view(AppModule::Settings));
        assert!(!ClientRole::Viewer.can_view(AppModule::Questions));
    }

    #[test]
    fn test_only_administrator_reviews_by_default() {
        for role in ClientRole::iter() {
            let reviews = role.default_permissions().contains(&SUBMISSION_REVIEW);
            assert_eq!(reviews, role == ClientRole::Administrator);
        }
    }
}
