//! Sequential driver of the per-key harvest state machine.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;

use tracing::{Instrument, Span, debug, error, info};

use crate::harvest::checkpoint::CheckpointStore;
use crate::harvest::fetch::FetchClient;
use crate::harvest::key::{CheckpointScope, WorkKey};
use crate::harvest::keyspace::WorkKeySpace;
use crate::harvest::query::QueryBuilder;
use crate::harvest::router::{ResponseRouter, RouteOutcome};
use crate::harvest::throttle::Throttle;
use crate::harvest::types::{HarvestError, HarvestState, HarvestSummary, KeyDisposition};
use crate::paths::AppPaths;

/// Walks a key space one key at a time until it is exhausted.
///
/// Within one run a failed key is never retried; it stays pending for the
/// next invocation. Errors are contained per key and never abort the run.
#[derive(bon::Builder)]
pub struct Harvester {
    keyspace: WorkKeySpace,
    queries: QueryBuilder,
    client: FetchClient,
    router: ResponseRouter,
    throttle: Throttle,
    paths: AppPaths,
    #[builder(default = Span::current())]
    span: Span,
    #[builder(skip = HarvestState::Init)]
    state: HarvestState,
    #[builder(skip)]
    stores: HashMap<CheckpointScope, CheckpointStore>,
}

impl Harvester {
    pub fn state(&self) -> HarvestState {
        self.state
    }

    /// Process every key of the key space and return the run summary.
    pub async fn run(mut self) -> HarvestSummary {
        let span = self.span.clone();
        async move {
            let summary = self.run_keys().await;
            info!(
                enumerated = summary.enumerated,
                skipped_checkpoint = summary.skipped_checkpoint,
                skipped_artifact = summary.skipped_artifact,
                skipped_quarantined = summary.skipped_quarantined,
                stored = summary.stored,
                quarantined = summary.quarantined,
                failed = summary.failed,
                "harvest finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    async fn run_keys(&mut self) -> HarvestSummary {
        let mut summary = HarvestSummary::default();
        self.transition(HarvestState::Iterating);

        let keyspace = self.keyspace.clone();
        let mut current_scope: Option<CheckpointScope> = None;
        for key in keyspace.keys() {
            let scope = key.scope();
            if current_scope.as_ref() != Some(&scope) {
                if let Some(done) = current_scope.replace(scope.clone()) {
                    self.finish_scope(&done);
                }
            }

            let disposition = match self.process(&key).await {
                Ok(disposition) => disposition,
                Err(err) => {
                    error!(key = %key, error = %err, "failed to process key; leaving it pending");
                    self.throttle.after_failure().await;
                    KeyDisposition::Failed
                }
            };
            summary.record(disposition);
        }
        if let Some(done) = current_scope.take() {
            self.finish_scope(&done);
        }

        self.transition(HarvestState::Draining);
        self.stores.clear();
        self.transition(HarvestState::Done);
        summary
    }

    async fn process(&mut self, key: &WorkKey) -> Result<KeyDisposition, HarvestError> {
        let fragment = key.fragment();
        let store = match self.stores.entry(key.scope()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.paths.checkpoint_path(entry.key());
                let store = CheckpointStore::open(&path, entry.key().fragment_kind()).await?;
                info!(
                    scope = %entry.key(),
                    completed = store.len(),
                    checkpoint = %path.display(),
                    "loaded checkpoint for scope"
                );
                entry.insert(store)
            }
        };

        if store.contains(&fragment) {
            debug!(key = %key, "skipping key; already checkpointed");
            return Ok(KeyDisposition::SkippedCheckpoint);
        }

        let success_path = self.router.layout().success_path(key);
        if artifact_exists(&success_path).await? {
            info!(
                key = %key,
                path = %success_path.display(),
                "skipping key; artifact already present, recording checkpoint"
            );
            store.append(fragment).await?;
            return Ok(KeyDisposition::SkippedArtifact);
        }

        if self.router.no_data().honors_quarantine() {
            let quarantine_path = self.router.layout().quarantine_path(key);
            if artifact_exists(&quarantine_path).await? {
                debug!(
                    key = %key,
                    path = %quarantine_path.display(),
                    "skipping key; no-data reply already quarantined"
                );
                return Ok(KeyDisposition::SkippedQuarantined);
            }
        }

        let request = self.queries.build(key)?;
        info!(key = %key, url = %request.url, "requesting key");
        self.throttle.before_request().await;

        let outcome = self.client.fetch(&request).await;
        debug!(key = %key, outcome = outcome.label(), "classified response");

        match self.router.route(key, outcome, store).await? {
            RouteOutcome::Stored { .. } => {
                self.throttle.after_request().await;
                Ok(KeyDisposition::Stored)
            }
            RouteOutcome::Quarantined { .. } => {
                self.throttle.after_request().await;
                Ok(KeyDisposition::Quarantined)
            }
            RouteOutcome::Failed(_) => {
                self.throttle.after_failure().await;
                Ok(KeyDisposition::Failed)
            }
        }
    }

    fn finish_scope(&self, scope: &CheckpointScope) {
        let completed = self.stores.get(scope).map_or(0, CheckpointStore::len);
        info!(scope = %scope, completed, "finished scope");
    }

    fn transition(&mut self, next: HarvestState) {
        debug!(from = %self.state, to = %next, "harvest state change");
        self.state = next;
    }
}

/// Whether a regular file sits at `path`. Anything else there is not an artifact.
async fn artifact_exists(path: &Path) -> Result<bool, HarvestError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(HarvestError::Inspect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::harvest::artifact::DurableWrite;
    use crate::harvest::fetch::FetchClientOptions;
    use crate::harvest::key::{RegionCode, Stage};
    use crate::harvest::router::NoDataPolicy;

    // Nothing listens on the discard port, so any request fails fast.
    const UNREACHABLE: &str = "http://127.0.0.1:9/";

    fn oh() -> RegionCode {
        "OH".parse().expect("valid region")
    }

    fn harvester(
        paths: &AppPaths,
        years: std::ops::RangeInclusive<i32>,
        policy: NoDataPolicy,
    ) -> Harvester {
        let queries = QueryBuilder::builder()
            .base_url(UNREACHABLE)
            .facility_endpoint("facilities.csv")
            .dmr_endpoint("dmr.csv")
            .date_format("%m/%d/%Y")
            .build()
            .expect("query builder");
        let client = FetchClient::new(
            FetchClientOptions::builder()
                .timeout(Duration::from_secs(5))
                .build(),
        )
        .expect("http client");
        Harvester::builder()
            .keyspace(WorkKeySpace::cross_product(years, vec![oh()]))
            .queries(queries)
            .client(client)
            .router(ResponseRouter::new(
                paths.layout(Stage::Facilities),
                policy,
                DurableWrite::None,
            ))
            .throttle(Throttle::immediate(Duration::ZERO))
            .paths(paths.clone())
            .span(Span::none())
            .build()
    }

    fn touch(path: std::path::PathBuf) {
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, "kept").expect("write artifact");
    }

    #[tokio::test]
    async fn finished_keys_are_skipped_without_requests() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("paths");
        let layout = paths.layout(Stage::Facilities);
        let checkpoint = temp.path().join("checkpoints/facilities/OH_progress.txt");
        fs::create_dir_all(checkpoint.parent().expect("parent")).expect("create dir");
        fs::write(&checkpoint, "2000\n").expect("seed checkpoint");
        touch(layout.success_path(&WorkKey::facility(2001, oh())));
        touch(layout.quarantine_path(&WorkKey::facility(2002, oh())));

        let harvester = harvester(&paths, 2000..=2002, NoDataPolicy::SkipIfQuarantined);
        assert_eq!(harvester.state(), HarvestState::Init);
        let summary = harvester.run().await;

        assert_eq!(summary.enumerated, 3);
        assert_eq!(summary.skipped_checkpoint, 1);
        assert_eq!(summary.skipped_artifact, 1);
        assert_eq!(summary.skipped_quarantined, 1);
        assert_eq!(summary.fetched(), 0);
        assert_eq!(
            fs::read_to_string(&checkpoint).expect("read checkpoint"),
            "2000\n2001\n"
        );
    }

    #[tokio::test]
    async fn quarantined_key_is_fetched_again_under_retry() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("paths");
        let layout = paths.layout(Stage::Facilities);
        touch(layout.quarantine_path(&WorkKey::facility(2000, oh())));

        let summary = harvester(&paths, 2000..=2000, NoDataPolicy::Retry).run().await;

        assert_eq!(summary.skipped_quarantined, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn directory_at_an_artifact_path_is_not_a_finished_key() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("paths");
        let layout = paths.layout(Stage::Facilities);
        let key = WorkKey::facility(2000, oh());
        fs::create_dir_all(layout.quarantine_path(&key)).expect("squat quarantine path");
        fs::create_dir_all(layout.success_path(&key)).expect("squat success path");

        assert!(!artifact_exists(&layout.success_path(&key)).await.expect("inspect"));
        let summary = harvester(&paths, 2000..=2000, NoDataPolicy::SkipIfQuarantined)
            .run()
            .await;

        assert_eq!(summary.skipped_artifact + summary.skipped_quarantined, 0);
        assert_eq!(summary.failed, 1);
    }
}
