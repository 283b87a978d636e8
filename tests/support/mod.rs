//! Store-backed tests need a Postgres server. They are `#[ignore]`d by
//! default and run with:
//!
//! ```text
//! TEST_DATABASE_URL=postgres://postgres@localhost/review_roster_test cargo test -- --ignored
//! ```

use common::db::DbPool;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use review_roster::db::{self, Caller, NewMember};
use review_roster::MIGRATIONS;
use tokio::sync::Mutex;
use uuid::Uuid;

// Migrations must not run concurrently against the same database.
static POOL_SETUP: Mutex<()> = Mutex::const_new(());

fn database_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a Postgres database to run store-backed tests")
}

/// Pool against `TEST_DATABASE_URL`, shared by every test in the binary.
#[allow(dead_code)]
pub async fn test_pool() -> DbPool {
    let url = database_url();

    let _lock = POOL_SETUP.lock().await;
    common::db::get_database_pool(&url, 8, MIGRATIONS)
        .await
        .expect("Failed to create test database pool")
}

/// A database of its own on the `TEST_DATABASE_URL` server, for tests that
/// need exact totals. Call [`ScratchDatabase::drop_database`] once done.
#[allow(dead_code)]
pub struct ScratchDatabase {
    pub pool: DbPool,
    name: String,
    admin_url: String,
}

#[allow(dead_code)]
impl ScratchDatabase {
    pub async fn create() -> Self {
        let admin_url = database_url();
        let name = format!("review_roster_scratch_{}", Uuid::new_v4().simple());

        let mut admin = AsyncPgConnection::establish(&admin_url)
            .await
            .expect("Failed to connect to the test server");
        diesel::sql_query(format!("CREATE DATABASE {}", name))
            .execute(&mut admin)
            .await
            .expect("Failed to create scratch database");

        let pool = common::db::get_database_pool(&with_database(&admin_url, &name), 4, MIGRATIONS)
            .await
            .expect("Failed to create scratch database pool");

        Self {
            pool,
            name,
            admin_url,
        }
    }

    pub async fn drop_database(self) {
        let Self {
            pool,
            name,
            admin_url,
        } = self;
        drop(pool);

        let mut admin = AsyncPgConnection::establish(&admin_url)
            .await
            .expect("Failed to connect to the test server");
        diesel::sql_query(format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", name))
            .execute(&mut admin)
            .await
            .expect("Failed to drop scratch database");
    }
}

/// Swaps the database name in a `postgres://…/name?params` url.
fn with_database(url: &str, database: &str) -> String {
    let (base, params) = match url.split_once('?') {
        Some((base, params)) => (base, Some(params)),
        None => (url, None),
    };
    let authority_end = base.find("://").map(|i| i + 3).unwrap_or(0);
    let server = match base[authority_end..].find('/') {
        Some(slash) => &base[..authority_end + slash],
        None => base,
    };

    match params {
        Some(params) => format!("{}/{}?{}", server, database, params),
        None => format!("{}/{}", server, database),
    }
}

#[allow(dead_code)]
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

#[allow(dead_code)]
pub fn caller() -> Caller {
    Caller::admin("tests")
}

#[allow(dead_code)]
pub fn member(user_id: &str, is_active: bool) -> NewMember {
    NewMember {
        user_id: user_id.to_string(),
        username: format!("user {}", user_id),
        is_active,
        is_admin: false,
    }
}

/// Provisions every member and creates the team, panicking on failure.
#[allow(dead_code)]
pub async fn seed_team(pool: &DbPool, name: &str, members: &[NewMember]) {
    let mut conn = pool.get().await.unwrap();
    for member in members {
        db::provision_user(&member.user_id, &member.username, member.is_active, &mut conn)
            .await
            .unwrap();
    }

    let created = db::create_team(&caller(), name, members, &mut conn)
        .await
        .unwrap();
    assert!(created, "team {} should not exist yet", name);
}

#[test]
fn test_with_database_replaces_the_path() {
    assert_eq!(
        with_database("postgres://u:p@localhost:5432/main", "scratch"),
        "postgres://u:p@localhost:5432/scratch"
    );
    assert_eq!(
        with_database("postgres://localhost/main?sslmode=disable", "scratch"),
        "postgres://localhost/scratch?sslmode=disable"
    );
    assert_eq!(
        with_database("postgres://localhost", "scratch"),
        "postgres://localhost/scratch"
    );
}
