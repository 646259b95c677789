use server_api::ApiContext;

/// Page-level configuration handed to every handler.
#[derive(Debug, Clone)]
pub(crate) struct SiteConfig {
    pub(crate) app_name: String,
    pub(crate) default_locale: String,
    pub(crate) registration_enabled: bool,
    pub(crate) admin_token: String,
    pub(crate) public_url: Option<String>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) site: SiteConfig,
}
