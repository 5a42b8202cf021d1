use crate::api_client::PerformanceApi;
use crate::credentials::Credential;
use crate::error::Error;
use crate::worker::{AccountReport, AccountWorker, RunParams};
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinSet;

/// The terminal state one account reached, success or failure.
pub struct AccountOutcome {
    pub account_id: String,
    pub result: Result<AccountReport, Error>,
}

/// Spawns one worker per account with a non-empty client id and waits for
/// all of them. Workers share nothing mutable; a failing (or panicking)
/// worker never cancels its siblings, it just shows up as a failed outcome.
pub async fn run_accounts<A: PerformanceApi>(
    api: Arc<A>,
    credentials: Vec<Credential>,
    params: RunParams,
) -> Vec<AccountOutcome> {
    let mut set = JoinSet::new();

    for credential in credentials {
        if credential.client_id.is_empty() {
            info!(
                "account {}: no performance client id, skipping",
                credential.account_id
            );
            continue;
        }

        let api = api.clone();
        let params = params.clone();
        set.spawn(async move {
            let account_id = credential.account_id.clone();
            let result = AccountWorker::new(api, credential, params).run().await;
            AccountOutcome { account_id, result }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            // a panicked worker loses its own outcome, nothing else
            Err(err) => error!("account worker aborted: {err}"),
        }
    }
    outcomes
}
