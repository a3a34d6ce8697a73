//! Resumable harvesting of ECHO discharge-monitoring data.
//!
//! A run enumerates work keys, skips the finished ones, fetches the rest one
//! at a time with polite delays, and records every terminal outcome in an
//! append-only checkpoint so the next run picks up where this one stopped.

pub mod artifact;
pub mod checkpoint;
pub mod fetch;
pub mod key;
pub mod keyspace;
pub mod listing;
pub mod orchestrator;
pub mod preempt;
pub mod query;
pub mod router;
pub mod throttle;
pub mod types;

pub use artifact::DurableWrite;
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use fetch::{FetchClient, FetchClientOptions, FetchError, NoDataMarkers, ResponseOutcome};
pub use key::{CheckpointScope, EntityId, KeyFragment, RegionCode, Stage, WorkKey};
pub use keyspace::{KeySpaceError, WorkKeySpace};
pub use listing::{ListingError, ListingOptions};
pub use orchestrator::Harvester;
pub use preempt::{PreemptSignal, PreemptionGuard, PreemptionHandler};
pub use query::{FetchRequest, QueryBuilder};
pub use router::{NoDataPolicy, ResponseRouter, RouteOutcome};
pub use throttle::{DelayRange, Throttle};
pub use types::{HarvestError, HarvestState, HarvestSummary, KeyDisposition};

use tracing::{Span, info};

use crate::config::AppConfig;
use crate::paths::AppPaths;

/// Build the key space of `stage` restricted to `region`.
pub fn build_keyspace(
    config: &AppConfig,
    paths: &AppPaths,
    stage: Stage,
    region: &RegionCode,
) -> Result<WorkKeySpace, HarvestError> {
    match stage {
        Stage::Facilities => Ok(WorkKeySpace::cross_product(
            config.years(),
            vec![region.clone()],
        )),
        Stage::Dmr => {
            let listings = paths.layout(Stage::Facilities);
            Ok(WorkKeySpace::derived(
                region.clone(),
                &listings.listing_dir(region),
                config.years(),
                config.listing.options(),
            )?)
        }
    }
}

/// Assemble a [`Harvester`] for one stage and region from configuration.
/// `throttle` is taken separately so callers can shorten the delays.
pub fn build_harvester(
    config: &AppConfig,
    paths: &AppPaths,
    stage: Stage,
    region: &RegionCode,
    throttle: Throttle,
    span: Span,
) -> Result<Harvester, HarvestError> {
    let keyspace = build_keyspace(config, paths, stage, region)?;

    let service = &config.service;
    let queries = QueryBuilder::builder()
        .base_url(service.base_url.clone())
        .facility_endpoint(service.facility_endpoint.clone())
        .dmr_endpoint(service.dmr_endpoint.clone())
        .date_format(service.date_format.clone())
        .maybe_client_ip(service.client_ip.clone())
        .build()?;
    let client = FetchClient::new(
        FetchClientOptions::builder()
            .user_agent(service.user_agent.clone())
            .timeout(service.request_timeout())
            .markers(NoDataMarkers::new(service.no_data_markers.iter().cloned()))
            .build(),
    )?;

    let policy = match stage {
        Stage::Facilities => config.harvest.facility_no_data,
        Stage::Dmr => config.harvest.permit_no_data,
    };
    let router = ResponseRouter::new(paths.layout(stage), policy, config.storage.durability);

    Ok(Harvester::builder()
        .keyspace(keyspace)
        .queries(queries)
        .client(client)
        .router(router)
        .throttle(throttle)
        .paths(paths.clone())
        .span(span)
        .build())
}

/// Throttle with the configured delays.
pub fn configured_throttle(config: &AppConfig) -> Throttle {
    Throttle::new(
        config.throttle.pre_request,
        config.throttle.post_request,
        config.throttle.failure_cooldown(),
    )
}

/// Run one stage for one region to exhaustion.
pub async fn harvest_region(
    config: &AppConfig,
    paths: &AppPaths,
    stage: Stage,
    region: &RegionCode,
    throttle: Throttle,
    span: Span,
) -> Result<HarvestSummary, HarvestError> {
    let harvester = build_harvester(config, paths, stage, region, throttle, span.clone())?;
    span.in_scope(|| info!("harvest initialised"));
    Ok(harvester.run().await)
}
