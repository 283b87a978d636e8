use crate::config::ReviewConfig;
use crate::db::{Caller, ReviewerPicker};
use crate::instrumentation::TeamGauges;
use crate::session::{AdminSession, AdminToken};
use anyhow::Context as _;
use common::db::DbPool;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use dotenvy::dotenv;
use otlp::TracingFairing;
use rocket::http::{Method, Status};
use rocket::route::{Handler, Outcome};
use rocket::{catchers, Request};
use rocket::{Data, Route};
use rocket_prometheus::PrometheusMetrics;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/");

pub mod config;
pub mod db;
pub mod error;
pub mod instrumentation;
pub mod otlp;
pub mod schema;
pub mod session;
pub mod views;

pub struct Context {
    db_pool: DbPool,
    picker: ReviewerPicker,
    config: ReviewConfig,
}

#[derive(Clone)]
struct MetricsRoute(PrometheusMetrics, TeamGauges);

#[rocket::async_trait]
impl Handler for MetricsRoute {
    async fn handle<'r>(&self, req: &'r Request<'_>, data: Data<'r>) -> Outcome<'r> {
        let rocket::outcome::Outcome::Success(AdminSession(caller)) =
            req.guard::<AdminSession>().await
        else {
            return Outcome::Error(Status::Forbidden);
        };

        let Some(ctx) = req.rocket().state::<Context>() else {
            return Outcome::Error(Status::InternalServerError);
        };
        if let Err(e) = refresh_gauges(&self.1, &caller, ctx).await {
            tracing::error!(error = %e, "Couldn't refresh team gauges");
            return Outcome::Error(Status::InternalServerError);
        }

        self.0.handle(req, data).await
    }
}

async fn refresh_gauges(
    gauges: &TeamGauges,
    caller: &Caller,
    ctx: &Context,
) -> crate::error::Result<()> {
    error::within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        gauges.refresh(caller, &mut conn).await
    })
    .await
}

impl From<MetricsRoute> for Vec<Route> {
    fn from(val: MetricsRoute) -> Self {
        vec![Route::new(Method::Get, "/", val)]
    }
}

#[rocket::main]
pub async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").ok();
    let _guard = otlp::init_tracing_subscriber(otlp_endpoint)?;

    let db_url = std::env::var("DATABASE_URL").context("Provide a DATABASE_URL env variable")?;
    let admin_token =
        AdminToken(std::env::var("ADMIN_TOKEN").context("Provide a ADMIN_TOKEN env variable")?);

    let figment = rocket::Config::figment();
    let config = ReviewConfig::from_figment(&figment)?;

    let db_pool = common::db::get_database_pool(&db_url, config.pool_size, MIGRATIONS).await?;

    let prometheus = PrometheusMetrics::new()
        .with_request_filter(|request| request.uri().path() != "/metrics");
    prometheus
        .registry()
        .register(Box::new(common::db::QUERY_HISTOGRAM.clone()))
        .context("Failed to register query histogram")?;
    let team_gauges = TeamGauges::new(prometheus.registry())?;

    let ctx = Context {
        db_pool,
        picker: ReviewerPicker::new(config.rng_seed),
        config,
    };

    rocket::custom(figment)
        .attach(TracingFairing)
        .attach(prometheus.clone())
        .mount("/", views::routes())
        .mount("/", views::api::routes())
        .mount("/metrics", MetricsRoute(prometheus, team_gauges))
        .register("/", catchers![views::unauthorized, views::forbidden])
        .manage(ctx)
        .manage(admin_token)
        .launch()
        .await?;

    Ok(())
}
