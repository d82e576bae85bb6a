/// The auth routes the CRM backend serves. Each one maps to a request path
/// for [`Homebase::request`](crate::Homebase::request) and friends.
#[derive(
    strum::AsRefStr,
    Clone,
    Debug,
    strum::EnumIter,
    strum::EnumString,
    PartialEq,
    Eq,
    strum::VariantNames,
)]
pub enum Endpoint {
    #[strum(serialize = "login")]
    Login,
    #[strum(serialize = "register")]
    Register,
    #[strum(serialize = "logout")]
    Logout,
    #[strum(serialize = "profile")]
    Profile,
}

impl Endpoint {
    /// Returns the request path for this endpoint, starting with a `/`.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Login => "/auth/login",
            Endpoint::Register => "/auth/register",
            Endpoint::Logout => "/auth/logout",
            Endpoint::Profile => "/auth/profile",
        }
    }
}
