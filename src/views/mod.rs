use crate::Context;
use diesel::IntoSql;
use diesel_async::RunQueryDsl;
use rocket::http::Status;
use rocket::routes;
use rocket::serde::json::Json;
use rocket::{catch, get, Request, State};
use serde::Serialize;

use crate::error::ApiError;

pub mod api;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    db: &'static str,
}

#[get("/health")]
async fn health(ctx: &State<Context>) -> (Status, Json<HealthResponse>) {
    let db_ok = match ctx.db_pool.get().await {
        Ok(mut conn) => diesel::select(1.into_sql::<diesel::sql_types::Integer>())
            .execute(&mut conn)
            .await
            .is_ok(),
        Err(_) => false,
    };

    let response = HealthResponse {
        status: if db_ok { "healthy" } else { "unhealthy" },
        db: if db_ok { "ok" } else { "error" },
    };

    let status = if db_ok {
        Status::Ok
    } else {
        Status::ServiceUnavailable
    };

    (status, Json(response))
}

#[catch(401)]
pub(crate) fn unauthorized(_req: &Request) -> ApiError {
    ApiError::new(
        Status::Unauthorized,
        "UNAUTHORIZED",
        "Missing X-User-Id or X-Api-Key header",
    )
}

#[catch(403)]
pub(crate) fn forbidden(_req: &Request) -> ApiError {
    ApiError::new(
        Status::Forbidden,
        "FORBIDDEN",
        "This operation requires the team admin role",
    )
}

pub fn routes() -> Vec<rocket::Route> {
    routes![health]
}
