use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel::Insertable;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::{exists_entity, is_active_member, reviewers_for, Caller, Entity, PrStatus};
use crate::error::{Error, Result, WithContext};
use crate::schema::{pull_request_statuses, pull_requests};

#[derive(Insertable, Debug)]
#[diesel(table_name = pull_requests)]
struct NewPullRequest<'a> {
    id: &'a str,
    name: &'a str,
    author_id: &'a str,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PullRequestShort {
    pub id: String,
    pub name: String,
    pub author_id: String,
    pub status: PrStatus,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub id: String,
    pub name: String,
    pub author_id: String,
    pub status: PrStatus,
    pub merged_at: Option<DateTime<Utc>>,
    pub assigned_reviewers: Vec<String>,
}

/// State of a pull request row read under `FOR UPDATE`.
#[derive(Debug, Clone)]
pub(crate) struct LockedPullRequest {
    pub author_id: String,
    pub status: PrStatus,
}

/// Takes the exclusive row lock on `pr_id` for the rest of the enclosing
/// transaction. Merge, assignment and reassignment all go through here so
/// they serialize against each other.
pub(crate) async fn lock_pull_request(
    pr_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<LockedPullRequest> {
    let row = pull_requests::table
        .find(pr_id)
        .select((pull_requests::author_id, pull_requests::status))
        .for_update()
        .first::<(String, i16)>(conn)
        .await
        .optional()?;

    let Some((author_id, status)) = row else {
        return Err(Error::NotFound(format!("Pull request {} not found", pr_id)));
    };

    Ok(LockedPullRequest {
        author_id,
        status: PrStatus::from_code(status)?,
    })
}

#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn create_pull_request(
    caller: &Caller,
    pr_id: &str,
    name: &str,
    author_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<PullRequestShort> {
    if pr_id.is_empty() || name.is_empty() || author_id.is_empty() {
        return Err(Error::InvalidInput(
            "Pull request id, name and author are required".to_string(),
        ));
    }

    if exists_entity(Entity::PullRequest, pr_id, conn).await? {
        return Err(Error::Conflict(format!(
            "Pull request {} already exists",
            pr_id
        )));
    }

    if !is_active_member(author_id, conn).await? {
        return Err(Error::NotFound(format!(
            "Author {} is not an active team member",
            author_id
        )));
    }

    // A concurrent insert of the same id surfaces as a unique violation,
    // which the error conversion turns into `Conflict`.
    diesel::insert_into(pull_requests::table)
        .values(&NewPullRequest {
            id: pr_id,
            name,
            author_id,
        })
        .execute(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't create pull request")?;

    tracing::info!(pr_id, author_id, "Pull request created");

    let status = pull_request_statuses::table
        .inner_join(pull_requests::table)
        .filter(pull_requests::id.eq(pr_id))
        .select(pull_request_statuses::name)
        .first::<String>(conn)
        .await?;

    Ok(PullRequestShort {
        id: pr_id.to_string(),
        name: name.to_string(),
        author_id: author_id.to_string(),
        status: status.parse()?,
    })
}

/// Moves `pr_id` to `MERGED`. Merging an already merged pull request
/// returns it unchanged without writing.
#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn merge_pull_request(
    caller: &Caller,
    pr_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<PullRequest> {
    conn.transaction::<_, Error, _>(|conn| {
        async move {
            let locked = lock_pull_request(pr_id, conn).await?;

            match locked.status {
                PrStatus::Merged => {
                    tracing::debug!(pr_id, "Pull request already merged");
                }
                PrStatus::Open => {
                    diesel::update(pull_requests::table.find(pr_id))
                        .set((
                            pull_requests::status.eq(PrStatus::Merged.code()),
                            pull_requests::merged_at.eq(Some(Utc::now())),
                        ))
                        .execute(conn)
                        .await?;
                    tracing::info!(pr_id, "Pull request merged");
                }
            }

            load_pull_request(pr_id, conn).await
        }
        .scope_boxed()
    })
    .await
    .context("Couldn't merge pull request")
}

#[tracing::instrument(skip(conn))]
pub async fn is_open(pr_id: &str, conn: &mut AsyncPgConnection) -> Result<bool> {
    let status = pull_requests::table
        .find(pr_id)
        .select(pull_requests::status)
        .first::<i16>(conn)
        .await
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("Pull request {} not found", pr_id)))?;

    Ok(PrStatus::from_code(status)? == PrStatus::Open)
}

#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn full_info(
    caller: &Caller,
    pr_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<PullRequest> {
    load_pull_request(pr_id, conn)
        .await
        .context("Couldn't load pull request")
}

pub(crate) async fn load_pull_request(
    pr_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<PullRequest> {
    let row = pull_requests::table
        .inner_join(pull_request_statuses::table)
        .filter(pull_requests::id.eq(pr_id))
        .select((
            pull_requests::id,
            pull_requests::name,
            pull_requests::author_id,
            pull_request_statuses::name,
            pull_requests::merged_at,
        ))
        .first::<(String, String, String, String, Option<DateTime<Utc>>)>(conn)
        .await
        .optional()?;

    let Some((id, name, author_id, status, merged_at)) = row else {
        return Err(Error::NotFound(format!("Pull request {} not found", pr_id)));
    };

    let assigned_reviewers = reviewers_for(pr_id, conn).await?;

    Ok(PullRequest {
        id,
        name,
        author_id,
        status: status.parse()?,
        merged_at,
        assigned_reviewers,
    })
}
