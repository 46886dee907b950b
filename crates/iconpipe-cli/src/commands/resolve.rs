use std::time::Duration;

use serde::Serialize;
use tracing::info;

use iconpipe_core::{ItemId, PipelineConfig};
use iconpipe_loader::{IconPipeline, LoadState, PipelineSnapshot};

#[derive(Serialize)]
struct Resolved {
    id: ItemId,
    priority: bool,
    #[serde(flatten)]
    state: LoadState,
}

#[derive(Serialize)]
struct Report {
    items: Vec<Resolved>,
    pipeline: PipelineSnapshot,
}

pub async fn resolve(
    config: &PipelineConfig,
    ids: &[u32],
    priority: usize,
    stagger: bool,
    format: &str,
) -> anyhow::Result<()> {
    let pipeline = IconPipeline::from_config(config)?;
    info!(count = ids.len(), priority, stagger, "resolving item ids");

    let mut subscriptions = Vec::with_capacity(ids.len());
    for (index, raw) in ids.iter().enumerate() {
        let id = IconPipeline::item_id(*raw)?;
        let fast = index < priority;
        let delay = if stagger && !fast {
            pipeline.stagger_delay(index - priority)
        } else {
            Duration::ZERO
        };
        subscriptions.push((fast, pipeline.request_resolution(id, fast, delay)?));
    }

    let mut items = Vec::with_capacity(subscriptions.len());
    for (fast, mut subscription) in subscriptions {
        let state = subscription.settled().await;
        items.push(Resolved {
            id: subscription.id(),
            priority: fast,
            state,
        });
    }

    let report = Report {
        items,
        pipeline: pipeline.snapshot(),
    };
    pipeline.shutdown().await;
    info!(
        admitted = report.pipeline.scheduler.admitted,
        quota_events = report.pipeline.scheduler.quota_events,
        "resolution run finished"
    );

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            for item in &report.items {
                let lane = if item.priority { "priority" } else { "background" };
                match &item.state {
                    LoadState::Success { url } => println!("{}\t{lane}\tfound\t{url}", item.id),
                    LoadState::Fallback { url, index } => {
                        println!("{}\t{lane}\tfallback[{index}]\t{url}", item.id)
                    }
                    other => println!("{}\t{lane}\t{other:?}", item.id),
                }
            }
            println!("{}", serde_json::to_string(&report.pipeline)?);
        }
    }
    Ok(())
}
