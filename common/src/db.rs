use anyhow::anyhow;
use diesel::connection::{Instrumentation, InstrumentationEvent};
use diesel::{ConnectionError, ConnectionResult};
use diesel_async::AsyncPgConnection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::deadpool::Pool as DieselPool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use std::fmt::Display;
use std::sync::{Arc, Once};
use std::time::Instant;

pub type DbPool = DieselPool<AsyncPgConnection>;
type PooledConnection = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Latency of every statement, labelled by its normalized SQL.
pub static QUERY_HISTOGRAM: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("diesel_query_seconds", "SQL query duration").buckets(vec![
            0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
        ]),
        &["query"],
    )
    .expect("Failed to create query histogram")
});

static GLOBAL_SETUP: Once = Once::new();

#[derive(Default)]
struct QueryTimer {
    started: Option<Instant>,
}

/// One-line SQL with diesel's trailing `-- binds` comment removed.
fn query_label<Q: Display + ?Sized>(query: &Q) -> String {
    let query = query.to_string();
    let statement = query.split("--").next().unwrap_or_default();
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Instrumentation for QueryTimer {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { .. } => {
                self.started = Some(Instant::now());
            }
            InstrumentationEvent::FinishQuery { query, error, .. } => {
                let Some(started) = self.started.take() else {
                    return;
                };
                let query = query_label(query);
                QUERY_HISTOGRAM
                    .with_label_values(&[&query])
                    .observe(started.elapsed().as_secs_f64());
                if let Some(error) = error {
                    tracing::warn!(%query, %error, "Query failed");
                }
            }
            InstrumentationEvent::RollbackTransaction { depth, .. } => {
                tracing::debug!(depth = depth.get(), "Transaction rolled back");
            }
            _ => {}
        }
    }
}

/// Encrypts the database link without checking the server certificate.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

async fn connect(url: &str) -> ConnectionResult<AsyncPgConnection> {
    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(Arc::new(
            ring::default_provider(),
        ))))
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "Database connection closed");
        }
    });

    AsyncPgConnection::try_from(client).await
}

fn establish_connection(url: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    connect(url).boxed()
}

// The crypto provider and diesel instrumentation are process-wide, while
// tests build one pool per case.
fn install_global_hooks() {
    GLOBAL_SETUP.call_once(|| {
        let _ = ring::default_provider().install_default();

        let installed = diesel::connection::set_default_instrumentation(|| {
            Some(Box::new(QueryTimer::default()))
        });
        if installed.is_err() {
            tracing::warn!("Diesel instrumentation was already set");
        }
    });
}

async fn run_migrations(
    connection: PooledConnection,
    migrations: EmbeddedMigrations,
) -> anyhow::Result<usize> {
    let mut harness: AsyncConnectionWrapper<PooledConnection> =
        AsyncConnectionWrapper::from(connection);

    tokio::task::spawn_blocking(move || {
        harness
            .run_pending_migrations(migrations)
            .map(|applied| applied.len())
            .map_err(|e| anyhow!("Failed to run migrations: {e}"))
    })
    .await?
}

/// Builds a pool of at most `max_size` TLS connections and brings the
/// schema up to date before handing it out.
pub async fn get_database_pool(
    db_url: &str,
    max_size: usize,
    migrations: EmbeddedMigrations,
) -> anyhow::Result<DbPool> {
    install_global_hooks();

    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(establish_connection);
    let manager =
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(db_url, config);
    let db_pool = DieselPool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow!("Failed to create database pool: {e}"))?;

    let connection = db_pool
        .get()
        .await
        .map_err(|e| anyhow!("Failed to get database connection to run migrations: {e}"))?;
    let applied = run_migrations(connection, migrations).await?;

    tracing::info!(max_size, applied, "Database pool ready");
    Ok(db_pool)
}
