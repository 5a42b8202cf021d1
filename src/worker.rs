use crate::api_client::{AccessToken, PerformanceApi, ReportHandle};
use crate::batch::{split_objects, split_time, ObjectMap};
use crate::config::ReportKind;
use crate::credentials::Credential;
use crate::error::Error;
use chrono::NaiveDate;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read-only parameters shared by every account worker of one run.
#[derive(Clone)]
pub struct RunParams {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub day_limit: i64,
    pub campaign_limit: usize,
    pub kinds: Vec<ReportKind>,
    pub run_dir: PathBuf,
}

/// One report unit that did not make it to disk, with the stage that lost it.
#[derive(Debug)]
pub struct UnitFailure {
    pub kind: ReportKind,
    pub unit: String,
    pub reason: String,
}

/// What one account worker produced: files on disk plus every unit that
/// failed along the way. Partial results are the expected outcome, not an
/// error state.
#[derive(Debug)]
pub struct AccountReport {
    pub saved: Vec<PathBuf>,
    pub failures: Vec<UnitFailure>,
}

/// A queued report waiting to be polled and downloaded.
struct PendingReport {
    kind: ReportKind,
    file_stem: String,
    handle: ReportHandle,
}

/// A synchronous report whose content arrived with the request.
struct SyncReport {
    kind: ReportKind,
    file_name: String,
    content: Vec<u8>,
}

#[derive(Default)]
struct Collected {
    pending: Vec<PendingReport>,
    fetched: Vec<SyncReport>,
    failures: Vec<UnitFailure>,
}

/// Drives one account through authenticate, enumerate, collect and save.
///
/// The first two stages fail the whole account; from collection on, every
/// batch and report is its own failure domain and the worker always reaches
/// the save stage with whatever succeeded.
pub struct AccountWorker<A> {
    api: Arc<A>,
    credential: Credential,
    params: RunParams,
}

impl<A: PerformanceApi> AccountWorker<A> {
    pub fn new(api: Arc<A>, credential: Credential, params: RunParams) -> Self {
        AccountWorker {
            api,
            credential,
            params,
        }
    }

    pub async fn run(self) -> Result<AccountReport, Error> {
        let token = self.api.authenticate(&self.credential).await?;
        info!("account {}: authenticated", self.credential.account_id);

        let objects = self.enumerate(&token).await?;
        let collected = self.collect(&token, &objects).await?;
        Ok(self.save(&token, collected).await)
    }

    async fn enumerate(&self, token: &AccessToken) -> Result<ObjectMap, Error> {
        let campaigns = self.api.campaigns(token).await?;
        info!(
            "account {}: {} campaigns",
            self.credential.account_id,
            campaigns.len()
        );

        let mut objects = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            let campaign_objects = self.api.objects(token, &campaign.id).await?;
            objects.push((campaign.id, campaign_objects));
        }
        Ok(objects)
    }

    async fn collect(&self, token: &AccessToken, objects: &ObjectMap) -> Result<Collected, Error> {
        let chunks = split_objects(objects, self.params.campaign_limit);
        let windows = split_time(
            self.params.date_from,
            self.params.date_to,
            self.params.day_limit,
        )?;
        let all_campaigns: Vec<String> = objects.iter().map(|(id, _)| id.clone()).collect();

        let mut collected = Collected::default();
        for kind in &self.params.kinds {
            match kind {
                ReportKind::Statistics => {
                    self.queue_campaign_reports(
                        token,
                        *kind,
                        "campaigns",
                        &chunks,
                        &windows,
                        &mut collected,
                    )
                    .await;
                }
                ReportKind::Attribution => {
                    self.queue_campaign_reports(
                        token,
                        *kind,
                        "attr",
                        &chunks,
                        &windows,
                        &mut collected,
                    )
                    .await;
                }
                ReportKind::Phrases => {
                    self.queue_phrase_reports(token, &chunks, &windows, &mut collected)
                        .await;
                }
                ReportKind::Media | ReportKind::Product | ReportKind::Daily => {
                    self.fetch_sync_report(token, *kind, &all_campaigns, &mut collected)
                        .await;
                }
            }
        }
        Ok(collected)
    }

    /// Statistics and attribution: one queued report per (campaign batch,
    /// date window) cell. A failed cell is recorded and the grid moves on.
    async fn queue_campaign_reports(
        &self,
        token: &AccessToken,
        kind: ReportKind,
        stem: &str,
        chunks: &[ObjectMap],
        windows: &[(NaiveDate, NaiveDate)],
        collected: &mut Collected,
    ) {
        let mut cell = 0usize;
        for chunk in chunks {
            let campaigns: Vec<String> = chunk.iter().map(|(id, _)| id.clone()).collect();
            for (date_from, date_to) in windows {
                let file_stem = format!("{stem}_{cell}");
                let request = match kind {
                    ReportKind::Attribution => {
                        self.api
                            .request_attribution(token, &campaigns, *date_from, *date_to)
                            .await
                    }
                    _ => {
                        self.api
                            .request_statistics(token, &campaigns, *date_from, *date_to)
                            .await
                    }
                };
                match request {
                    Ok(handle) => collected.pending.push(PendingReport {
                        kind,
                        file_stem,
                        handle,
                    }),
                    Err(err) => {
                        warn!(
                            "account {}: {} batch {cell} failed: {err}",
                            self.credential.account_id,
                            kind.dir_name()
                        );
                        collected.failures.push(UnitFailure {
                            kind,
                            unit: file_stem,
                            reason: err.to_string(),
                        });
                    }
                }
                cell += 1;
            }
        }
    }

    /// Phrases: one queued report per campaign with a non-empty object list.
    async fn queue_phrase_reports(
        &self,
        token: &AccessToken,
        chunks: &[ObjectMap],
        windows: &[(NaiveDate, NaiveDate)],
        collected: &mut Collected,
    ) {
        let mut cell = 0usize;
        for chunk in chunks {
            for (date_from, date_to) in windows {
                let mut member = 0usize;
                for (campaign_id, campaign_objects) in chunk {
                    if campaign_objects.is_empty() {
                        continue;
                    }
                    let file_stem = format!("phrases_{cell}_{member}");
                    match self
                        .api
                        .request_phrases(token, campaign_id, campaign_objects, *date_from, *date_to)
                        .await
                    {
                        Ok(handle) => collected.pending.push(PendingReport {
                            kind: ReportKind::Phrases,
                            file_stem,
                            handle,
                        }),
                        Err(err) => {
                            warn!(
                                "account {}: phrases for campaign {campaign_id} failed: {err}",
                                self.credential.account_id
                            );
                            collected.failures.push(UnitFailure {
                                kind: ReportKind::Phrases,
                                unit: file_stem,
                                reason: err.to_string(),
                            });
                        }
                    }
                    member += 1;
                }
                cell += 1;
            }
        }
    }

    /// Media, product and daily reports answer synchronously over the whole
    /// requested range.
    async fn fetch_sync_report(
        &self,
        token: &AccessToken,
        kind: ReportKind,
        campaigns: &[String],
        collected: &mut Collected,
    ) {
        let file_name = format!(
            "{}_{}-{}.csv",
            kind.dir_name(),
            self.params.date_from,
            self.params.date_to
        );
        let request = match kind {
            ReportKind::Media => {
                self.api
                    .media_report(token, campaigns, self.params.date_from, self.params.date_to)
                    .await
            }
            ReportKind::Product => {
                self.api
                    .product_report(token, campaigns, self.params.date_from, self.params.date_to)
                    .await
            }
            _ => {
                self.api
                    .daily_report(token, campaigns, self.params.date_from, self.params.date_to)
                    .await
            }
        };
        match request {
            Ok(content) => collected.fetched.push(SyncReport {
                kind,
                file_name,
                content,
            }),
            Err(err) => {
                warn!(
                    "account {}: {} report failed: {err}",
                    self.credential.account_id,
                    kind.dir_name()
                );
                collected.failures.push(UnitFailure {
                    kind,
                    unit: file_name,
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn save(&self, token: &AccessToken, collected: Collected) -> AccountReport {
        let account_dir = self.params.run_dir.join(format!(
            "{}-{}",
            self.credential.account_id, self.credential.client_id
        ));
        let mut saved = Vec::new();
        let mut failures = collected.failures;

        for report in collected.fetched {
            match write_report(&account_dir, report.kind, &report.file_name, &report.content) {
                Ok(path) => {
                    info!("saved {}", path.display());
                    saved.push(path);
                }
                Err(err) => failures.push(UnitFailure {
                    kind: report.kind,
                    unit: report.file_name,
                    reason: err.to_string(),
                }),
            }
        }

        for pending in collected.pending {
            let file_name = format!(
                "{}.{}",
                pending.file_stem,
                pending.handle.format.extension()
            );
            let content = match self.api.await_report(token, &pending.handle).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(
                        "account {}: report {} lost: {err}",
                        self.credential.account_id, pending.file_stem
                    );
                    failures.push(UnitFailure {
                        kind: pending.kind,
                        unit: pending.file_stem,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            match write_report(&account_dir, pending.kind, &file_name, &content) {
                Ok(path) => {
                    info!("saved {}", path.display());
                    saved.push(path);
                }
                Err(err) => failures.push(UnitFailure {
                    kind: pending.kind,
                    unit: file_name,
                    reason: err.to_string(),
                }),
            }
        }

        AccountReport { saved, failures }
    }
}

fn write_report(
    account_dir: &Path,
    kind: ReportKind,
    file_name: &str,
    content: &[u8],
) -> Result<PathBuf, Error> {
    let dir = account_dir.join(kind.dir_name());
    fs::create_dir_all(&dir)?;
    let path = dir.join(file_name);
    fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::{Campaign, MockPerformanceApi, ReportFormat};
    use tempfile::TempDir;

    fn token() -> AccessToken {
        AccessToken {
            token_type: "Bearer".to_string(),
            access_token: "token".to_string(),
        }
    }

    fn credential() -> Credential {
        Credential {
            account_id: "7".to_string(),
            client_id: "7-abc@advertising.performance.ozon.ru".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn params(run_dir: &Path, kinds: Vec<ReportKind>, campaign_limit: usize) -> RunParams {
        RunParams {
            date_from: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            day_limit: 30,
            campaign_limit,
            kinds,
            run_dir: run_dir.to_path_buf(),
        }
    }

    fn two_campaigns(api: &mut MockPerformanceApi) {
        api.expect_authenticate().returning(|_| Ok(token()));
        api.expect_campaigns().returning(|_| {
            Ok(vec![
                Campaign {
                    id: "101".to_string(),
                },
                Campaign {
                    id: "202".to_string(),
                },
            ])
        });
        api.expect_objects()
            .returning(|_, campaign_id| Ok(vec![format!("{campaign_id}-sku")]));
    }

    #[tokio::test]
    async fn test_statistics_batch_saved_as_zip() {
        let temp_dir = TempDir::new().unwrap();
        let mut api = MockPerformanceApi::new();
        two_campaigns(&mut api);
        api.expect_request_statistics()
            .returning(|_, campaigns, _, _| {
                Ok(ReportHandle {
                    uuid: "uuid-1".to_string(),
                    format: ReportFormat::for_campaign_count(campaigns.len()),
                })
            });
        api.expect_await_report()
            .returning(|_, _| Ok(b"zipped report".to_vec()));

        let worker = AccountWorker::new(
            Arc::new(api),
            credential(),
            params(temp_dir.path(), vec![ReportKind::Statistics], 5),
        );
        let report = worker.run().await.unwrap();

        assert_eq!(report.saved.len(), 1);
        assert!(report.failures.is_empty());
        let expected = temp_dir
            .path()
            .join("7-7-abc@advertising.performance.ozon.ru")
            .join("statistics")
            .join("campaigns_0.zip");
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_timed_out_report_leaves_siblings_saved() {
        let temp_dir = TempDir::new().unwrap();
        let mut api = MockPerformanceApi::new();
        two_campaigns(&mut api);
        // campaign_limit 1 splits the account into two single-campaign batches
        api.expect_request_statistics()
            .returning(|_, campaigns, _, _| {
                Ok(ReportHandle {
                    uuid: format!("uuid-{}", campaigns[0]),
                    format: ReportFormat::for_campaign_count(campaigns.len()),
                })
            });
        api.expect_await_report()
            .times(1)
            .returning(|_, handle| {
                Err(Error::ReportTimeout {
                    uuid: handle.uuid.clone(),
                    attempts: 3,
                })
            });
        api.expect_await_report()
            .returning(|_, _| Ok(b"csv report".to_vec()));

        let worker = AccountWorker::new(
            Arc::new(api),
            credential(),
            params(temp_dir.path(), vec![ReportKind::Statistics], 1),
        );
        let report = worker.run().await.unwrap();

        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit, "campaigns_0");
        assert!(report.failures[0].reason.contains("status checks"));
        let statistics_dir = temp_dir
            .path()
            .join("7-7-abc@advertising.performance.ozon.ru")
            .join("statistics");
        assert!(statistics_dir.join("campaigns_1.csv").exists());
        assert!(!statistics_dir.join("campaigns_0.csv").exists());
    }

    #[tokio::test]
    async fn test_auth_failure_fails_the_account() {
        let mut api = MockPerformanceApi::new();
        api.expect_authenticate().returning(|credential| {
            Err(Error::AuthFailed {
                account_id: credential.account_id.clone(),
                detail: "403: denied".to_string(),
            })
        });

        let temp_dir = TempDir::new().unwrap();
        let worker = AccountWorker::new(
            Arc::new(api),
            credential(),
            params(temp_dir.path(), vec![ReportKind::Statistics], 5),
        );
        let result = worker.run().await;
        assert!(matches!(result.unwrap_err(), Error::AuthFailed { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_batch_recorded_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut api = MockPerformanceApi::new();
        two_campaigns(&mut api);
        api.expect_request_statistics().times(1).returning(|_, _, _, _| {
            Err(Error::RateLimited {
                endpoint: "statistics",
                attempts: 5,
            })
        });
        api.expect_request_statistics()
            .returning(|_, campaigns, _, _| {
                Ok(ReportHandle {
                    uuid: "uuid-2".to_string(),
                    format: ReportFormat::for_campaign_count(campaigns.len()),
                })
            });
        api.expect_await_report()
            .returning(|_, _| Ok(b"csv report".to_vec()));

        let worker = AccountWorker::new(
            Arc::new(api),
            credential(),
            params(temp_dir.path(), vec![ReportKind::Statistics], 1),
        );
        let report = worker.run().await.unwrap();

        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unit, "campaigns_0");
    }

    #[tokio::test]
    async fn test_phrases_skip_campaigns_without_objects() {
        let temp_dir = TempDir::new().unwrap();
        let mut api = MockPerformanceApi::new();
        api.expect_authenticate().returning(|_| Ok(token()));
        api.expect_campaigns().returning(|_| {
            Ok(vec![
                Campaign {
                    id: "101".to_string(),
                },
                Campaign {
                    id: "202".to_string(),
                },
            ])
        });
        api.expect_objects().returning(|_, campaign_id| {
            if campaign_id == "101" {
                Ok(vec!["sku-1".to_string()])
            } else {
                Ok(vec![])
            }
        });
        api.expect_request_phrases()
            .times(1)
            .returning(|_, _, _, _, _| {
                Ok(ReportHandle {
                    uuid: "uuid-ph".to_string(),
                    format: ReportFormat::Csv,
                })
            });
        api.expect_await_report()
            .returning(|_, _| Ok(b"phrase report".to_vec()));

        let worker = AccountWorker::new(
            Arc::new(api),
            credential(),
            params(temp_dir.path(), vec![ReportKind::Phrases], 5),
        );
        let report = worker.run().await.unwrap();

        assert_eq!(report.saved.len(), 1);
        let expected = temp_dir
            .path()
            .join("7-7-abc@advertising.performance.ozon.ru")
            .join("phrases")
            .join("phrases_0_0.csv");
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_media_report_saved_over_whole_range() {
        let temp_dir = TempDir::new().unwrap();
        let mut api = MockPerformanceApi::new();
        two_campaigns(&mut api);
        api.expect_media_report()
            .returning(|_, _, _, _| Ok(b"media;report".to_vec()));

        let worker = AccountWorker::new(
            Arc::new(api),
            credential(),
            params(temp_dir.path(), vec![ReportKind::Media], 5),
        );
        let report = worker.run().await.unwrap();

        assert_eq!(report.saved.len(), 1);
        let expected = temp_dir
            .path()
            .join("7-7-abc@advertising.performance.ozon.ru")
            .join("media")
            .join("media_2024-05-01-2024-05-02.csv");
        assert!(expected.exists());
    }
}
