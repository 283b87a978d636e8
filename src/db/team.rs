use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use diesel::{Insertable, Queryable};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::db::Caller;
use crate::error::{Error, Result, WithContext};
use crate::schema::{team_members, teams, users};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NewMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = team_members)]
struct NewTeamMember<'a> {
    team_id: i32,
    user_id: &'a str,
    is_admin: bool,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: &'a str,
    name: &'a str,
    is_active: bool,
}

#[derive(Queryable, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
    pub is_admin: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TeamWithMembers {
    pub team_name: String,
    pub members: Vec<TeamMember>,
}

fn validate_new_team(name: &str, members: &[NewMember]) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Team name cannot be empty".to_string()));
    }

    if members.iter().any(|member| member.user_id.is_empty()) {
        return Err(Error::InvalidInput(
            "Every team member needs a user id".to_string(),
        ));
    }

    if let Some(duplicate) = members.iter().map(|m| m.user_id.as_str()).duplicates().next() {
        return Err(Error::InvalidInput(format!(
            "User {} is listed twice",
            duplicate
        )));
    }

    Ok(())
}

/// Creates `name` with its initial members in one transaction.
///
/// Every member must already exist as a user. Returns `Ok(false)` when a
/// team with that name already exists. The pre-check is only a shortcut,
/// the unique index on `teams.name` decides which of two concurrent
/// creations wins.
#[tracing::instrument(skip(caller, members, conn), fields(caller = %caller, members = members.len()))]
pub async fn create_team(
    caller: &Caller,
    name: &str,
    members: &[NewMember],
    conn: &mut AsyncPgConnection,
) -> Result<bool> {
    insert_team(name, members, MissingUsers::Reject, conn).await
}

/// Same as [`create_team`], except members unknown to the store are created
/// from the payload in the same transaction. Existing users keep their
/// stored name and activity flag.
#[tracing::instrument(skip(caller, members, conn), fields(caller = %caller, members = members.len()))]
pub async fn register_team(
    caller: &Caller,
    name: &str,
    members: &[NewMember],
    conn: &mut AsyncPgConnection,
) -> Result<bool> {
    insert_team(name, members, MissingUsers::Create, conn).await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MissingUsers {
    Reject,
    Create,
}

async fn insert_team(
    name: &str,
    members: &[NewMember],
    missing_users: MissingUsers,
    conn: &mut AsyncPgConnection,
) -> Result<bool> {
    validate_new_team(name, members)?;

    if team_exists(name, conn).await? {
        tracing::debug!(team = name, "Team already exists");
        return Ok(false);
    }

    let created = conn
        .transaction::<_, Error, _>(|conn| {
            async move {
                let Some(team_id) = diesel::insert_into(teams::table)
                    .values(teams::name.eq(name))
                    .on_conflict(teams::name)
                    .do_nothing()
                    .returning(teams::id)
                    .get_result::<i32>(conn)
                    .await
                    .optional()?
                else {
                    return Ok(false);
                };

                if missing_users == MissingUsers::Create && !members.is_empty() {
                    let new_users = members
                        .iter()
                        .map(|member| NewUser {
                            id: &member.user_id,
                            name: &member.username,
                            is_active: member.is_active,
                        })
                        .collect::<Vec<_>>();
                    diesel::insert_into(users::table)
                        .values(&new_users)
                        .on_conflict(users::id)
                        .do_nothing()
                        .execute(conn)
                        .await?;
                }

                let ids = members.iter().map(|m| m.user_id.as_str()).collect::<Vec<_>>();
                let known = users::table
                    .filter(users::id.eq_any(ids.clone()))
                    .select(users::id)
                    .load::<String>(conn)
                    .await?;
                if let Some(missing) = ids.iter().find(|id| !known.iter().any(|k| k == *id)) {
                    return Err(Error::NotFound(format!("User {} not found", missing)));
                }

                let rows = members
                    .iter()
                    .map(|member| NewTeamMember {
                        team_id,
                        user_id: &member.user_id,
                        is_admin: member.is_admin,
                    })
                    .collect::<Vec<_>>();

                if !rows.is_empty() {
                    diesel::insert_into(team_members::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;
                }

                Ok(true)
            }
            .scope_boxed()
        })
        .await
        .context("Couldn't create team")?;

    if created {
        tracing::info!(team = name, "Team created");
    } else {
        tracing::debug!(team = name, "Team created concurrently");
    }

    Ok(created)
}

#[tracing::instrument(skip(conn))]
pub async fn team_exists(name: &str, conn: &mut AsyncPgConnection) -> Result<bool> {
    let found = diesel::select(exists(teams::table.filter(teams::name.eq(name))))
        .get_result::<bool>(conn)
        .await?;

    Ok(found)
}

#[tracing::instrument(skip(conn))]
pub async fn team_id_by_name(name: &str, conn: &mut AsyncPgConnection) -> Result<Option<i32>> {
    let id = teams::table
        .filter(teams::name.eq(name))
        .select(teams::id)
        .first::<i32>(conn)
        .await
        .optional()?;

    Ok(id)
}

/// Active members of a team. Inactive members are left out.
#[tracing::instrument(skip(conn))]
pub async fn active_team_members(
    team_id: i32,
    conn: &mut AsyncPgConnection,
) -> Result<Vec<TeamMember>> {
    team_members::table
        .inner_join(users::table)
        .filter(team_members::team_id.eq(team_id))
        .filter(users::is_active.eq(true))
        .select((
            users::id,
            users::name,
            users::is_active,
            team_members::is_admin,
        ))
        .order_by(users::id)
        .load::<TeamMember>(conn)
        .await
        .map_err(Error::from)
        .context("Couldn't load team members")
}

#[tracing::instrument(skip(caller, conn), fields(caller = %caller))]
pub async fn get_team(
    caller: &Caller,
    name: &str,
    conn: &mut AsyncPgConnection,
) -> Result<TeamWithMembers> {
    let Some(team_id) = team_id_by_name(name, conn).await? else {
        return Err(Error::NotFound(format!("Team {} not found", name)));
    };

    let members = active_team_members(team_id, conn).await?;

    Ok(TeamWithMembers {
        team_name: name.to_string(),
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::{validate_new_team, NewMember};
    use crate::error::Error;

    fn member(user_id: &str) -> NewMember {
        NewMember {
            user_id: user_id.to_string(),
            username: format!("name-{}", user_id),
            is_active: true,
            is_admin: false,
        }
    }

    #[test]
    fn test_empty_member_list_is_allowed() {
        assert!(validate_new_team("Backend", &[]).is_ok());
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(matches!(
            validate_new_team("  ", &[member("u1")]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_member_without_id_is_rejected() {
        assert!(matches!(
            validate_new_team("Backend", &[member("u1"), member("")]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duplicate_member_is_rejected() {
        let err = validate_new_team("Backend", &[member("u1"), member("u2"), member("u1")])
            .unwrap_err();
        assert_eq!(err.to_string(), "User u1 is listed twice");
    }

    #[test]
    fn test_is_admin_defaults_to_false() {
        let parsed: NewMember =
            serde_json::from_str(r#"{"user_id":"u1","username":"Alice","is_active":true}"#)
                .unwrap();
        assert!(!parsed.is_admin);
    }
}
