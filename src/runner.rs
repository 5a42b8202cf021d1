use crate::api_client::ApiClient;
use crate::archive;
use crate::config::Config;
use crate::credentials::{CredentialSource, JsonCredentialSource};
use crate::data;
use crate::dispatcher::{self, AccountOutcome};
use crate::error::Error;
use crate::history::{HistoryStore, ParquetHistoryStore};
use crate::reconcile;
use crate::unify;
use crate::worker::RunParams;
use chrono::NaiveDate;
use datafusion::prelude::SessionContext;
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// One full run: collect reports for every account, unify them and write
/// the incremental delta against the persisted history.
pub async fn collect_and_reconcile(
    config: Config,
    start: &NaiveDate,
    end: &NaiveDate,
) -> Result<(), Error> {
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }

    let run_dir = Path::new(&config.output_dir).join(chrono::Local::now().date_naive().to_string());
    fs::create_dir_all(&run_dir)?;

    let credentials = JsonCredentialSource::new(&config.keys_file).load()?;
    if credentials.is_empty() {
        return Err(Error::NoData {
            message: "No accounts configured for processing".to_string(),
        });
    }

    let ctx = SessionContext::new();
    let store = ParquetHistoryStore::new(&config.history_dir);
    // read once; the snapshot stays fixed for the whole run
    let history = store.load(&ctx).await?;

    let api = Arc::new(ApiClient::new(&config));
    let params = RunParams {
        date_from: *start,
        date_to: *end,
        day_limit: config.day_limit,
        campaign_limit: config.campaign_limit,
        kinds: config.reports.clone(),
        run_dir: run_dir.clone(),
    };
    let outcomes = dispatcher::run_accounts(api, credentials, params).await;
    log_outcomes(&outcomes);

    archive::extract_statistics_archives(&run_dir, !config.keep_archives)?;

    let rows = unify::build_dataset(&run_dir)?;
    info!("unified {} rows across all accounts", rows.len());
    let fresh = data::rows_to_df(&ctx, &rows)?;

    let delta = reconcile::delta(history, fresh, *start, *end).await?;
    let delta_rows = delta.clone().count().await?;

    if config.upload {
        store
            .append(delta.clone(), &format!("delta-{start}-{end}"))
            .await?;
        info!("{delta_rows} new rows appended to the history store");
    }

    let delta_path = run_dir.join("into_db.csv");
    reconcile::write_delta_csv(delta, &delta_path).await?;
    info!("{delta_rows} new rows written to {}", delta_path.display());

    Ok(())
}

fn log_outcomes(outcomes: &[AccountOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                info!(
                    "account {}: {} reports saved, {} failed units",
                    outcome.account_id,
                    report.saved.len(),
                    report.failures.len()
                );
                for failure in &report.failures {
                    warn!(
                        "account {}: {}/{} failed: {}",
                        outcome.account_id,
                        failure.kind.dir_name(),
                        failure.unit,
                        failure.reason
                    );
                }
            }
            Err(err) => error!("account {} produced nothing: {err}", outcome.account_id),
        }
    }
}
