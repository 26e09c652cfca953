// Panel node endpoints
//
// Node description, user list, rules, and the two upstream reports
// (traffic and rule violations).

use tracing::debug;

use crate::error::Error;
use crate::models::{IllegalEntry, NodeInfoResponse, RuleResponse, TrafficEntry, UserEntry};
use crate::panel::client::PanelClient;

impl PanelClient {
    /// Fetch this node's description.
    ///
    /// `GET /api/v1/server/node`
    pub async fn get_node_info(&self) -> Result<NodeInfoResponse, Error> {
        self.get("node").await
    }

    /// Fetch the users allowed on this node.
    ///
    /// `GET /api/v1/server/users`
    pub async fn get_user_list(&self) -> Result<Vec<UserEntry>, Error> {
        let users: Vec<UserEntry> = self.get("users").await?;
        debug!(count = users.len(), "fetched user list");
        Ok(users)
    }

    /// Fetch detection rules and forbidden protocols.
    ///
    /// `GET /api/v1/server/rules`
    pub async fn get_node_rule(&self) -> Result<RuleResponse, Error> {
        self.get("rules").await
    }

    /// Report per-user traffic in one batch.
    ///
    /// `POST /api/v1/server/traffic`
    pub async fn report_user_traffic(&self, traffic: &[TrafficEntry]) -> Result<(), Error> {
        debug!(count = traffic.len(), "reporting user traffic");
        self.post("traffic", &traffic).await
    }

    /// Report rule violations in one batch.
    ///
    /// `POST /api/v1/server/illegal`
    pub async fn report_illegal(&self, results: &[IllegalEntry]) -> Result<(), Error> {
        debug!(count = results.len(), "reporting rule violations");
        self.post("illegal", &results).await
    }
}
