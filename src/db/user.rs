use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel::{Insertable, Queryable};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::{Caller, PrStatus, PullRequestShort};
use crate::error::{Error, Result, WithContext};
use crate::schema::{
    pull_request_assigned_reviewers, pull_request_statuses, pull_requests, team_members, teams,
    users,
};

#[derive(Insertable, Queryable, Debug)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub user_id: String,
    pub username: String,
    pub team_name: String,
    pub is_active: bool,
}

#[tracing::instrument(skip(conn))]
pub async fn provision_user(
    user_id: &str,
    username: &str,
    is_active: bool,
    conn: &mut AsyncPgConnection,
) -> Result<()> {
    if user_id.is_empty() {
        return Err(Error::InvalidInput("User id cannot be empty".to_string()));
    }

    let user = User {
        id: user_id.to_string(),
        name: username.to_string(),
        is_active,
    };

    diesel::insert_into(users::table)
        .values(&user)
        .on_conflict(users::id)
        .do_update()
        .set((users::name.eq(username), users::is_active.eq(is_active)))
        .execute(conn)
        .await?;

    Ok(())
}

#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn get_user(
    caller: &Caller,
    user_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<UserSnapshot> {
    let row = users::table
        .left_join(team_members::table.left_join(teams::table))
        .filter(users::id.eq(user_id))
        .select((
            users::id,
            users::name,
            users::is_active,
            teams::name.nullable(),
        ))
        .order_by(teams::name.nullable())
        .first::<(String, String, bool, Option<String>)>(conn)
        .await
        .optional()
        .map_err(Error::from)
        .context("Couldn't load user")?;

    let Some((user_id, username, is_active, team_name)) = row else {
        return Err(Error::NotFound(format!("User {} not found", user_id)));
    };

    Ok(UserSnapshot {
        user_id,
        username,
        team_name: team_name.unwrap_or_default(),
        is_active,
    })
}

#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn set_user_active(
    caller: &Caller,
    user_id: &str,
    is_active: bool,
    conn: &mut AsyncPgConnection,
) -> Result<UserSnapshot> {
    let updated = diesel::update(users::table.find(user_id))
        .set(users::is_active.eq(is_active))
        .execute(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't update user activity")?;

    if updated == 0 {
        return Err(Error::NotFound(format!("User {} not found", user_id)));
    }

    tracing::info!(user_id, is_active, "User activity changed");

    get_user(caller, user_id, conn).await
}

/// Every pull request `user_id` is assigned to review.
#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn reviews_for_user(
    caller: &Caller,
    user_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<Vec<PullRequestShort>> {
    let known = diesel::select(diesel::dsl::exists(users::table.find(user_id)))
        .get_result::<bool>(conn)
        .await?;
    if !known {
        return Err(Error::NotFound(format!("User {} not found", user_id)));
    }

    let rows = pull_request_assigned_reviewers::table
        .inner_join(pull_requests::table.inner_join(pull_request_statuses::table))
        .filter(pull_request_assigned_reviewers::user_id.eq(user_id))
        .select((
            pull_requests::id,
            pull_requests::name,
            pull_requests::author_id,
            pull_request_statuses::name,
        ))
        .order_by(pull_requests::created_at)
        .then_order_by(pull_requests::id)
        .load::<(String, String, String, String)>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't load reviews for user")?;

    rows.into_iter()
        .map(|(id, name, author_id, status)| {
            Ok(PullRequestShort {
                id,
                name,
                author_id,
                status: status.parse::<PrStatus>()?,
            })
        })
        .collect()
}
