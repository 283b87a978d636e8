use crate::db::{self, Caller};
use crate::error::Result;
use diesel_async::AsyncPgConnection;
use prometheus::{IntGauge, IntGaugeVec, Opts, Registry};

#[derive(Clone)]
pub struct TeamGauges {
    pub admins: IntGaugeVec,
    pub participants: IntGaugeVec,
    pub pull_requests: IntGauge,
    pub teams: IntGauge,
}

impl TeamGauges {
    pub fn new(registry: &Registry) -> anyhow::Result<Self> {
        let ret = Self {
            admins: IntGaugeVec::new(
                Opts::new("team_admins_count", "The number of admins per team"),
                &["team"],
            )?,
            participants: IntGaugeVec::new(
                Opts::new(
                    "team_participants_count",
                    "Members of a team that author or review a pull request",
                ),
                &["team"],
            )?,
            pull_requests: IntGauge::new("pull_requests_count", "The number of pull requests")?,
            teams: IntGauge::new("teams_count", "The number of teams")?,
        };

        registry.register(Box::new(ret.admins.clone()))?;
        registry.register(Box::new(ret.participants.clone()))?;
        registry.register(Box::new(ret.pull_requests.clone()))?;
        registry.register(Box::new(ret.teams.clone()))?;

        Ok(ret)
    }

    pub async fn refresh(&self, caller: &Caller, conn: &mut AsyncPgConnection) -> Result<()> {
        let snapshot = db::team_metrics(caller, conn).await?;

        self.admins.reset();
        self.participants.reset();
        for team in &snapshot.teams {
            self.admins
                .with_label_values(&[&team.team_name])
                .set(team.admin_count);
            self.participants
                .with_label_values(&[&team.team_name])
                .set(team.participant_count);
        }
        self.pull_requests.set(snapshot.total_pull_requests);
        self.teams.set(snapshot.total_teams);

        Ok(())
    }
}
