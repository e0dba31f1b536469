use crate::engine::Engine;
use crate::output::{self, format_relative_time, OutputFormat};
use anyhow::{Context, Result};
use clusterops_common::ClusterSpecification;
use clusterops_engine::drift::{detect_drift, DriftReport};
use clusterops_engine::resolver::{resolve_masters, resolve_pool_state};
use clusterops_engine::store::SpecificationStore;
use clusterops_engine::EngineError;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct PoolRow {
    pool: String,
    topology: String,
    os: String,
    declared: u32,
    deployed: u32,
    #[tabled(rename = "next index")]
    next_index: String,
}

#[derive(Tabled, Serialize)]
struct DriftRow {
    pool: String,
    declared: u32,
    deployed: u32,
}

#[derive(Tabled, Serialize)]
struct ClusterRow {
    name: String,
    version: String,
    masters: u32,
    pools: String,
    modified: String,
}

impl From<ClusterSpecification> for ClusterRow {
    fn from(spec: ClusterSpecification) -> Self {
        Self {
            name: spec.name,
            version: spec.kubernetes_version,
            masters: spec.master.count,
            pools: spec
                .agent_pools
                .iter()
                .map(|p| format!("{}({})", p.name, p.count))
                .collect::<Vec<_>>()
                .join(", "),
            modified: spec
                .last_modified
                .map(|t| format_relative_time(t.timestamp()))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Serialize)]
struct ClusterStatus {
    cluster: String,
    version: String,
    masters: Vec<String>,
    pools: Vec<PoolRow>,
    drift: DriftReport,
}

pub async fn handle_status_command(engine: &Engine, cluster: &str, format: OutputFormat) -> Result<()> {
    let spec = engine.load(cluster).await?;
    let cloud = engine.cloud_for(&spec).await?;

    let masters = resolve_masters(cloud.as_ref(), &spec)
        .await
        .context("failed to resolve master nodes")?;

    let mut pools = Vec::with_capacity(spec.agent_pools.len());
    for pool in &spec.agent_pools {
        let (deployed, next_index) = match resolve_pool_state(cloud.as_ref(), &spec, &pool.name).await {
            Ok(state) if state.topology == clusterops_common::PoolTopology::AvailabilitySet => {
                (state.current_count, state.next_index().to_string())
            }
            Ok(state) => (state.current_count, "-".to_string()),
            Err(EngineError::EmptyPool { .. }) => (0, "0".to_string()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to resolve pool '{}'", pool.name))
            }
        };
        pools.push(PoolRow {
            pool: pool.name.clone(),
            topology: pool.topology.to_string(),
            os: pool.os_type.to_string(),
            declared: pool.count,
            deployed,
            next_index,
        });
    }

    let drift = detect_drift(cloud.as_ref(), &spec)
        .await
        .context("failed to check for drift")?;

    if format != OutputFormat::Table {
        return output::print_single(
            &ClusterStatus {
                cluster: spec.name.clone(),
                version: spec.kubernetes_version.clone(),
                masters: masters.into_iter().map(|m| m.name).collect(),
                pools,
                drift,
            },
            format,
        );
    }

    println!("Cluster:    {}", spec.name);
    println!("Version:    {}", spec.kubernetes_version);
    println!("Endpoint:   {}", spec.master_endpoint());
    println!("Masters:    {} of {} found", masters.len(), spec.master.count);
    println!();
    output::print_table(pools);

    if drift.has_drift() {
        println!();
        output::print_warning("Declared pool sizes differ from what is deployed");
        let rows: Vec<DriftRow> = drift
            .pools
            .into_iter()
            .map(|d| DriftRow {
                pool: d.pool,
                declared: d.persisted,
                deployed: d.actual,
            })
            .collect();
        output::print_table(rows);
    } else {
        output::print_success("No drift");
    }

    Ok(())
}

pub async fn handle_list_command(engine: &Engine, format: OutputFormat) -> Result<()> {
    let store = engine.store();
    let names = store.list().await.context("failed to list clusters")?;

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let spec = engine.load(&name).await?;
        rows.push(ClusterRow::from(spec));
    }

    output::print_output(rows, format)
}
