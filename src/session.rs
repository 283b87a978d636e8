use crate::db::Caller;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;

pub struct AdminToken(pub String);

/// Identity of the request, taken from `X-User-Id`. Presenting the admin
/// token in `X-Api-Key` grants the team-admin role.
pub struct Session(pub Caller);

/// A session that holds the team-admin role.
pub struct AdminSession(pub Caller);

impl Session {
    #[tracing::instrument("parse_session", skip_all)]
    pub fn from_request_sync(request: &Request) -> Option<Self> {
        let admin_token = request.rocket().state::<AdminToken>();
        let admin_token = admin_token.map(|t| t.0.as_str());

        let x_api_key = request.headers().get_one("X-Api-Key");
        let is_admin = x_api_key.is_some() && x_api_key == admin_token;
        let user_id = request
            .headers()
            .get_one("X-User-Id")
            .map(str::trim)
            .filter(|id| !id.is_empty());

        match (user_id, is_admin) {
            (Some(user_id), is_admin) => {
                tracing::debug!(user_id, is_admin, "Caller identified");
                Some(Session(Caller::new(user_id, is_admin)))
            }
            (None, true) => {
                tracing::info!("Admin logged with API key");
                Some(Session(Caller::admin("admin")))
            }
            (None, false) => None,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Session {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match Session::from_request_sync(request) {
            Some(session) => Outcome::Success(session),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminSession {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match Session::from_request_sync(request) {
            Some(Session(caller)) if caller.is_team_admin => Outcome::Success(AdminSession(caller)),
            Some(_) => Outcome::Error((Status::Forbidden, ())),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
