use crate::engine::Engine;
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use clusterops_engine::scale::{ScaleDirection, ScaleOutcome};
use clusterops_engine::ScaleOrchestrator;
use serde::Serialize;
use tabled::Tabled;

#[derive(Serialize)]
struct ScaleSummary {
    cluster: String,
    pool: String,
    previous_count: u32,
    count: u32,
    deleted: Vec<String>,
    deployment: Option<String>,
}

#[derive(Tabled, Serialize)]
struct DeletedNodeRow {
    #[tabled(rename = "deleted node")]
    name: String,
    index: u32,
}

impl ScaleSummary {
    fn new(cluster: &str, outcome: &ScaleOutcome) -> Self {
        Self {
            cluster: cluster.to_string(),
            pool: outcome.plan.pool.clone(),
            previous_count: outcome.plan.current_count,
            count: outcome.plan.desired_count,
            deleted: outcome.deleted.clone(),
            deployment: outcome.deployment.clone(),
        }
    }
}

pub async fn handle_scale_command(
    engine: &Engine,
    cluster: &str,
    pool: &str,
    count: u32,
    format: OutputFormat,
) -> Result<()> {
    let spec = engine.load(cluster).await?;

    let orchestrator = ScaleOrchestrator::new(
        engine.cloud_for(&spec).await?,
        engine.control_plane(),
        engine.generator_for(&spec),
        engine.store(),
    )
    .with_options(engine.options());

    let spinner = super::spinner(format!("Scaling pool '{}' of '{}' to {} nodes...", pool, cluster, count));
    let result = orchestrator.scale_cluster(&spec, pool, count).await;
    spinner.finish_and_clear();

    let outcome = result.with_context(|| format!("failed to scale pool '{}' of cluster '{}'", pool, cluster))?;

    if format != OutputFormat::Table {
        return output::print_single(&ScaleSummary::new(cluster, &outcome), format);
    }

    match outcome.plan.direction() {
        ScaleDirection::Unchanged => {
            output::print_info(&format!("Pool '{}' already has {} nodes", pool, count));
        }
        ScaleDirection::Down(removed) => {
            let rows: Vec<DeletedNodeRow> = outcome
                .plan
                .to_delete
                .iter()
                .map(|n| DeletedNodeRow {
                    name: n.name.clone(),
                    index: n.index,
                })
                .collect();
            output::print_table(rows);
            output::print_success(&format!(
                "Pool '{}' scaled down by {} to {} nodes",
                pool, removed, count
            ));
        }
        ScaleDirection::Up(added) => {
            if let Some(deployment) = &outcome.deployment {
                output::print_info(&format!("Deployment: {}", deployment));
            }
            output::print_success(&format!(
                "Pool '{}' scaled up by {} to {} nodes",
                pool, added, count
            ));
        }
    }

    Ok(())
}
