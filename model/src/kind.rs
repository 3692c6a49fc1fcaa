use std::fmt;

/// Every entity kind the engine can manage.
///
/// Variant order is insignificant; [`Kind::priority`] is the ordering the
/// Planner and Executor actually rely on for tie-breaking (`spec.md` §4.2,
/// "fixed kind priority list").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    ApplicationAuthStrategy,
    ControlPlane,
    Portal,
    PortalPage,
    PortalSnippet,
    PortalCustomization,
    PortalCustomDomain,
    Api,
    ApiVersion,
    ApiPublication,
    ApiDocument,
    ApiImplementation,
}

impl Kind {
    /// All kinds, in declaration order. Used by loaders that need to know
    /// which top-level document keys to look for.
    pub const ALL: &'static [Kind] = &[
        Kind::ApplicationAuthStrategy,
        Kind::ControlPlane,
        Kind::Portal,
        Kind::PortalPage,
        Kind::PortalSnippet,
        Kind::PortalCustomization,
        Kind::PortalCustomDomain,
        Kind::Api,
        Kind::ApiVersion,
        Kind::ApiPublication,
        Kind::ApiDocument,
        Kind::ApiImplementation,
    ];

    /// The plural document key this kind is authored under, e.g. `portals`.
    pub fn doc_key(&self) -> &'static str {
        match self {
            Kind::ApplicationAuthStrategy => "application_auth_strategies",
            Kind::ControlPlane => "control_planes",
            Kind::Portal => "portals",
            Kind::PortalPage => "pages",
            Kind::PortalSnippet => "snippets",
            Kind::PortalCustomization => "customization",
            Kind::PortalCustomDomain => "custom_domain",
            Kind::Api => "apis",
            Kind::ApiVersion => "api_versions",
            Kind::ApiPublication => "api_publications",
            Kind::ApiDocument => "api_documents",
            Kind::ApiImplementation => "api_implementations",
        }
    }

    pub fn from_doc_key(key: &str) -> Option<Kind> {
        Kind::ALL.iter().copied().find(|k| k.doc_key() == key)
    }

    /// Fixed planning priority (`spec.md` §4.2 ordering tie-break). Lower
    /// sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            Kind::ApplicationAuthStrategy => 0,
            Kind::ControlPlane => 1,
            Kind::Portal => 2,
            Kind::Api => 3,
            Kind::ApiVersion => 4,
            Kind::ApiPublication => 5,
            Kind::ApiDocument => 6,
            Kind::ApiImplementation => 7,
            // Portal children plan after their parent portal but are not
            // otherwise ordered against API children.
            Kind::PortalPage => 8,
            Kind::PortalSnippet => 9,
            Kind::PortalCustomization => 10,
            Kind::PortalCustomDomain => 11,
        }
    }

    /// Whether a resource of this kind may exist at most once per parent
    /// (`spec.md` §4.2 step 5).
    pub fn is_singleton_child(&self) -> bool {
        matches!(self, Kind::PortalCustomization | Kind::PortalCustomDomain)
    }

    /// The parent kind this kind is nested under, if any.
    pub fn parent_kind(&self) -> Option<Kind> {
        match self {
            Kind::PortalPage
            | Kind::PortalSnippet
            | Kind::PortalCustomization
            | Kind::PortalCustomDomain => Some(Kind::Portal),
            Kind::ApiVersion | Kind::ApiPublication | Kind::ApiDocument | Kind::ApiImplementation => {
                Some(Kind::Api)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.doc_key())
    }
}
