use std::sync::Mutex;

use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel::{Insertable, Queryable};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::db::pull_request::lock_pull_request;
use crate::db::{candidate_reviewers, Caller, PrStatus};
use crate::error::{Error, Result, WithContext};
use crate::schema::pull_request_assigned_reviewers;

/// Process-wide source of randomness for reviewer selection. Seeded once.
pub struct ReviewerPicker {
    rng: Mutex<StdRng>,
}

impl ReviewerPicker {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draws `min(n, candidates.len())` distinct ids uniformly at random.
    pub fn pick(&self, mut candidates: Vec<String>, n: usize) -> Vec<String> {
        candidates.sort();
        candidates.dedup();

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        candidates
            .choose_multiple(&mut *rng, n.min(candidates.len()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ReviewerPicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewerPicker").finish_non_exhaustive()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = pull_request_assigned_reviewers)]
struct NewAssignment<'a> {
    pull_request_id: &'a str,
    user_id: &'a str,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReviewAssignment {
    pub id: i32,
    pub pull_request_id: String,
    pub reviewer_id: String,
}

/// Assigns up to `n` reviewers to `pr_id` from the author's active
/// teammates. A short candidate pool is not an error, every candidate is
/// assigned instead.
#[tracing::instrument(skip(caller, picker, conn), fields(caller = %caller))]
pub async fn assign_reviewers(
    caller: &Caller,
    pr_id: &str,
    author_id: &str,
    n: usize,
    picker: &ReviewerPicker,
    conn: &mut AsyncPgConnection,
) -> Result<Vec<String>> {
    conn.transaction::<_, Error, _>(|conn| {
        async move {
            let locked = lock_pull_request(pr_id, conn).await?;
            if locked.author_id != author_id {
                return Err(Error::InvalidInput(format!(
                    "{} is not the author of pull request {}",
                    author_id, pr_id
                )));
            }
            if locked.status == PrStatus::Merged {
                return Err(Error::Conflict(format!(
                    "Pull request {} is already merged",
                    pr_id
                )));
            }

            let candidates = candidate_reviewers(pr_id, author_id, conn).await?;
            let chosen = picker.pick(candidates, n);
            if chosen.is_empty() {
                tracing::debug!(pr_id, "No reviewer available");
                return Ok(chosen);
            }

            let rows = chosen
                .iter()
                .map(|user_id| NewAssignment {
                    pull_request_id: pr_id,
                    user_id: user_id.as_str(),
                })
                .collect::<Vec<_>>();
            diesel::insert_into(pull_request_assigned_reviewers::table)
                .values(&rows)
                .execute(conn)
                .await?;

            tracing::info!(pr_id, reviewers = ?chosen, "Reviewers assigned");
            Ok(chosen)
        }
        .scope_boxed()
    })
    .await
    .context("Couldn't assign reviewers")
}

/// Swaps `old_reviewer_id` for `new_reviewer_id` on `pr_id`, keeping the
/// assignment row (and its id) in place.
#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn reassign_reviewer(
    caller: &Caller,
    pr_id: &str,
    old_reviewer_id: &str,
    new_reviewer_id: &str,
    conn: &mut AsyncPgConnection,
) -> Result<ReviewAssignment> {
    conn.transaction::<_, Error, _>(|conn| {
        async move {
            let locked = lock_pull_request(pr_id, conn).await?;
            if locked.status == PrStatus::Merged {
                return Err(Error::Conflict(format!(
                    "Cannot reassign on merged pull request {}",
                    pr_id
                )));
            }

            let assignment_id = pull_request_assigned_reviewers::table
                .filter(pull_request_assigned_reviewers::pull_request_id.eq(pr_id))
                .filter(pull_request_assigned_reviewers::user_id.eq(old_reviewer_id))
                .select(pull_request_assigned_reviewers::id)
                .first::<i32>(conn)
                .await
                .optional()?
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "{} is not assigned to pull request {}",
                        old_reviewer_id, pr_id
                    ))
                })?;

            let candidates = candidate_reviewers(pr_id, &locked.author_id, conn).await?;
            if !candidates.iter().any(|c| c == new_reviewer_id) {
                return Err(Error::InvalidInput(format!(
                    "{} cannot review pull request {}",
                    new_reviewer_id, pr_id
                )));
            }

            let assignment =
                diesel::update(pull_request_assigned_reviewers::table.find(assignment_id))
                    .set(pull_request_assigned_reviewers::user_id.eq(new_reviewer_id))
                    .returning((
                        pull_request_assigned_reviewers::id,
                        pull_request_assigned_reviewers::pull_request_id,
                        pull_request_assigned_reviewers::user_id,
                    ))
                    .get_result::<ReviewAssignment>(conn)
                    .await?;

            tracing::info!(
                pr_id,
                old_reviewer_id,
                new_reviewer_id,
                assignment_id,
                "Reviewer reassigned"
            );
            Ok(assignment)
        }
        .scope_boxed()
    })
    .await
    .context("Couldn't reassign reviewer")
}

/// Reviewer ids of `pr_id` in assignment order.
#[tracing::instrument(skip(conn))]
pub async fn reviewers_for(pr_id: &str, conn: &mut AsyncPgConnection) -> Result<Vec<String>> {
    pull_request_assigned_reviewers::table
        .filter(pull_request_assigned_reviewers::pull_request_id.eq(pr_id))
        .select(pull_request_assigned_reviewers::user_id)
        .order_by(pull_request_assigned_reviewers::id)
        .load::<String>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't load reviewers")
}
