use rocket::{get, http::Status, post, routes, serde::json::Json, State};
use serde::{Deserialize, Serialize};

use crate::{
    db::{self, MetricsSnapshot, NewMember, PullRequest, PullRequestShort, TeamWithMembers},
    error::{within, ApiError, ApiResult, Error},
    session::{AdminSession, Session},
    Context,
};

#[derive(Deserialize, Serialize, Debug)]
pub struct TeamPayload {
    team_name: String,
    members: Vec<NewMember>,
}

#[derive(Serialize)]
pub struct TeamCreated {
    team: TeamPayload,
}

#[derive(Deserialize, Debug)]
pub struct SetActiveRequest {
    user_id: String,
    is_active: bool,
}

#[derive(Serialize)]
pub struct UserResponse {
    user: db::UserSnapshot,
}

#[derive(Serialize)]
pub struct UserReviews {
    user_id: String,
    pull_requests: Vec<PullRequestShort>,
}

#[derive(Deserialize, Debug)]
pub struct CreatePullRequest {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
}

#[derive(Deserialize, Debug)]
pub struct MergePullRequest {
    pull_request_id: String,
}

#[derive(Deserialize, Debug)]
pub struct ReassignRequest {
    pull_request_id: String,
    old_user_id: String,
    new_user_id: String,
}

#[derive(Serialize)]
pub struct PullRequestResponse {
    pr: PullRequest,
}

#[derive(Serialize)]
pub struct ReassignResponse {
    pr: PullRequest,
    replaced_by: String,
}

#[post("/team/add", data = "<team>")]
#[tracing::instrument(skip_all, fields(team = %team.team_name))]
pub(crate) async fn add_team(
    team: Json<TeamPayload>,
    session: Session,
    ctx: &State<Context>,
) -> ApiResult<(Status, Json<TeamCreated>)> {
    let caller = session.0;
    let team = team.into_inner();

    let created = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        db::register_team(&caller, &team.team_name, &team.members, &mut conn).await
    })
    .await?;

    if !created {
        return Err(ApiError::new(
            Status::Conflict,
            "TEAM_EXISTS",
            format!("{} already exists", team.team_name),
        ));
    }

    Ok((Status::Created, Json(TeamCreated { team })))
}

#[get("/team/get?<team_name>")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn get_team(
    team_name: &str,
    session: Session,
    ctx: &State<Context>,
) -> ApiResult<Json<TeamWithMembers>> {
    let team = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        db::get_team(&session.0, team_name, &mut conn).await
    })
    .await?;

    Ok(Json(team))
}

#[post("/users/setIsActive", data = "<request>")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn set_is_active(
    request: Json<SetActiveRequest>,
    session: AdminSession,
    ctx: &State<Context>,
) -> ApiResult<Json<UserResponse>> {
    let user = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        db::set_user_active(&session.0, &request.user_id, request.is_active, &mut conn).await
    })
    .await?;

    Ok(Json(UserResponse { user }))
}

#[get("/users/getReview?<user_id>")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn get_review(
    user_id: &str,
    session: Session,
    ctx: &State<Context>,
) -> ApiResult<Json<UserReviews>> {
    let pull_requests = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        db::reviews_for_user(&session.0, user_id, &mut conn).await
    })
    .await?;

    Ok(Json(UserReviews {
        user_id: user_id.to_string(),
        pull_requests,
    }))
}

#[post("/pullRequest/create", data = "<request>")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn create_pull_request(
    request: Json<CreatePullRequest>,
    session: AdminSession,
    ctx: &State<Context>,
) -> ApiResult<(Status, Json<PullRequestResponse>)> {
    let caller = session.0;

    let pr = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;

        let created = db::create_pull_request(
            &caller,
            &request.pull_request_id,
            &request.pull_request_name,
            &request.author_id,
            &mut conn,
        )
        .await?;
        db::assign_reviewers(
            &caller,
            &created.id,
            &created.author_id,
            ctx.config.default_reviewers,
            &ctx.picker,
            &mut conn,
        )
        .await?;

        db::full_info(&caller, &created.id, &mut conn).await
    })
    .await
    .map_err(|error| match error {
        Error::Conflict(message) => ApiError::new(Status::Conflict, "PR_EXISTS", message),
        error => error.into(),
    })?;

    Ok((Status::Created, Json(PullRequestResponse { pr })))
}

#[post("/pullRequest/merge", data = "<request>")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn merge_pull_request(
    request: Json<MergePullRequest>,
    session: AdminSession,
    ctx: &State<Context>,
) -> ApiResult<Json<PullRequestResponse>> {
    let pr = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        db::merge_pull_request(&session.0, &request.pull_request_id, &mut conn).await
    })
    .await?;

    Ok(Json(PullRequestResponse { pr }))
}

#[post("/pullRequest/reassign", data = "<request>")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn reassign(
    request: Json<ReassignRequest>,
    session: AdminSession,
    ctx: &State<Context>,
) -> ApiResult<Json<ReassignResponse>> {
    let caller = session.0;

    let (assignment, pr) = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;

        let assignment = db::reassign_reviewer(
            &caller,
            &request.pull_request_id,
            &request.old_user_id,
            &request.new_user_id,
            &mut conn,
        )
        .await?;
        let pr = db::full_info(&caller, &request.pull_request_id, &mut conn).await?;

        Ok((assignment, pr))
    })
    .await
    .map_err(|error| match error {
        Error::Conflict(message) => ApiError::new(Status::Conflict, "PR_MERGED", message),
        Error::InvalidInput(message) => {
            ApiError::new(Status::Conflict, "NO_CANDIDATE", message)
        }
        error => error.into(),
    })?;

    Ok(Json(ReassignResponse {
        pr,
        replaced_by: assignment.reviewer_id,
    }))
}

#[get("/stats/teams")]
#[tracing::instrument(skip(session, ctx))]
pub(crate) async fn team_stats(
    session: Session,
    ctx: &State<Context>,
) -> ApiResult<Json<MetricsSnapshot>> {
    let snapshot = within(ctx.config.request_timeout(), async {
        let mut conn = ctx.db_pool.get().await?;
        db::team_metrics(&session.0, &mut conn).await
    })
    .await?;

    Ok(Json(snapshot))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        add_team,
        get_team,
        set_is_active,
        get_review,
        create_pull_request,
        merge_pull_request,
        reassign,
        team_stats,
    ]
}
