use diesel::dsl::exists;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{Error, Result, WithContext};
use crate::schema::{pull_request_assigned_reviewers, pull_requests, team_members, users};

/// Tables a caller-supplied reference can point into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    User,
    PullRequest,
}

#[tracing::instrument(skip(conn))]
pub async fn exists_entity(entity: Entity, id: &str, conn: &mut AsyncPgConnection) -> Result<bool> {
    let found = match entity {
        Entity::User => {
            diesel::select(exists(users::table.find(id)))
                .get_result::<bool>(conn)
                .await
        }
        Entity::PullRequest => {
            diesel::select(exists(pull_requests::table.find(id)))
                .get_result::<bool>(conn)
                .await
        }
    };

    Ok(found?)
}

/// True when the user holds an admin membership in any team.
#[tracing::instrument(skip(conn))]
pub async fn is_admin(user_id: &str, conn: &mut AsyncPgConnection) -> Result<bool> {
    let flags = team_members::table
        .filter(team_members::user_id.eq(user_id))
        .select(team_members::is_admin)
        .load::<bool>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't look up membership role")?;

    if flags.is_empty() {
        return Err(Error::NotFound(format!(
            "User {} is not a member of any team",
            user_id
        )));
    }

    Ok(flags.into_iter().any(|is_admin| is_admin))
}

// Loaded up front: `team_members` cannot be filtered by a subselect on itself
// without an alias.
async fn team_ids_of(user_id: &str, conn: &mut AsyncPgConnection) -> Result<Vec<i32>> {
    team_members::table
        .filter(team_members::user_id.eq(user_id))
        .select(team_members::team_id)
        .load::<i32>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't load team memberships")
}

/// Active users sharing at least one team with `user_id`, excluding `user_id`.
#[tracing::instrument(skip(conn))]
pub async fn teammates_of(user_id: &str, conn: &mut AsyncPgConnection) -> Result<Vec<String>> {
    let user_teams = team_ids_of(user_id, conn).await?;

    team_members::table
        .inner_join(users::table)
        .filter(team_members::team_id.eq_any(user_teams))
        .filter(users::is_active.eq(true))
        .filter(users::id.ne(user_id))
        .select(users::id)
        .distinct()
        .order_by(users::id)
        .load::<String>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't load teammates")
}

/// Teammates of `author_id` that are not yet reviewing `pr_id`.
///
/// This is the eligibility predicate for both initial assignment and
/// reassignment, so it must stay in one place.
#[tracing::instrument(skip(conn))]
pub async fn candidate_reviewers(
    pr_id: &str,
    author_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<Vec<String>> {
    let author_teams = team_ids_of(author_id, conn).await?;
    let already_assigned = pull_request_assigned_reviewers::table
        .filter(pull_request_assigned_reviewers::pull_request_id.eq(pr_id))
        .select(pull_request_assigned_reviewers::user_id);

    team_members::table
        .inner_join(users::table)
        .filter(team_members::team_id.eq_any(author_teams))
        .filter(users::is_active.eq(true))
        .filter(users::id.ne(author_id))
        .filter(users::id.ne_all(already_assigned))
        .select(users::id)
        .distinct()
        .order_by(users::id)
        .load::<String>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't load candidate reviewers")
}

/// Candidates for a pull request looked up by id, using its stored author.
#[tracing::instrument(skip(conn))]
pub async fn candidate_reviewers_for_pr(
    pr_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<Vec<String>> {
    let author_id = pull_requests::table
        .find(pr_id)
        .select(pull_requests::author_id)
        .first::<String>(conn)
        .await
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("Pull request {} not found", pr_id)))?;

    candidate_reviewers(pr_id, &author_id, conn).await
}

/// Whether the user is active and belongs to at least one team.
#[tracing::instrument(skip(conn))]
pub async fn is_active_member(user_id: &str, conn: &mut AsyncPgConnection) -> Result<bool> {
    let found = diesel::select(exists(
        users::table
            .inner_join(team_members::table)
            .filter(users::id.eq(user_id))
            .filter(users::is_active.eq(true)),
    ))
    .get_result::<bool>(conn)
    .await?;

    Ok(found)
}
