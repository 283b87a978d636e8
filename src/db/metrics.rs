use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::Caller;
use crate::error::{Error, Result, WithContext};
use crate::schema::{pull_request_assigned_reviewers, pull_requests, team_members, teams};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TeamMetrics {
    pub team_id: i32,
    pub team_name: String,
    pub admin_count: i64,
    pub participant_count: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub teams: Vec<TeamMetrics>,
    pub total_pull_requests: i64,
    pub total_teams: i64,
}

/// Per-team admin and participant counts plus global totals, all read from
/// one repeatable-read snapshot.
///
/// A participant is a member who authored or reviews at least one pull
/// request, counted once per team.
#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn team_metrics(
    caller: &Caller,
    conn: &mut AsyncPgConnection,
) -> Result<MetricsSnapshot> {
    conn.build_transaction()
        .read_only()
        .repeatable_read()
        .run::<_, Error, _>(|conn| {
            async move {
                let total_pull_requests = pull_requests::table
                    .count()
                    .get_result::<i64>(conn)
                    .await?;

                let all_teams = teams::table
                    .select((teams::id, teams::name))
                    .order_by(teams::id)
                    .load::<(i32, String)>(conn)
                    .await?;

                let admins = team_members::table
                    .filter(team_members::is_admin.eq(true))
                    .group_by(team_members::team_id)
                    .select((team_members::team_id, count_star()))
                    .load::<(i32, i64)>(conn)
                    .await?
                    .into_iter()
                    .collect::<HashMap<_, _>>();

                let authors = pull_requests::table.select(pull_requests::author_id);
                let reviewers = pull_request_assigned_reviewers::table
                    .select(pull_request_assigned_reviewers::user_id);
                // (team_id, user_id) is the membership key, so counting rows
                // counts distinct users.
                let participants = team_members::table
                    .filter(
                        team_members::user_id
                            .eq_any(authors)
                            .or(team_members::user_id.eq_any(reviewers)),
                    )
                    .group_by(team_members::team_id)
                    .select((team_members::team_id, count_star()))
                    .load::<(i32, i64)>(conn)
                    .await?
                    .into_iter()
                    .collect::<HashMap<_, _>>();

                let total_teams = all_teams.len() as i64;
                let teams = all_teams
                    .into_iter()
                    .map(|(team_id, team_name)| TeamMetrics {
                        team_id,
                        team_name,
                        admin_count: admins.get(&team_id).copied().unwrap_or(0),
                        participant_count: participants.get(&team_id).copied().unwrap_or(0),
                    })
                    .collect();

                Ok(MetricsSnapshot {
                    teams,
                    total_pull_requests,
                    total_teams,
                })
            }
            .scope_boxed()
        })
        .await
        .context("Couldn't compute team metrics")
}
