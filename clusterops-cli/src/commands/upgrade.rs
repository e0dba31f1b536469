use crate::engine::Engine;
use crate::output::{self, format_duration, OutputFormat};
use anyhow::{Context, Result};
use clusterops_engine::upgrade::{parse_version, VersionInfoProvider};
use clusterops_engine::UpgradeOrchestrator;
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;

pub struct UpgradeArgs {
    pub target: String,
    /// Minutes
    pub step_timeout: Option<u64>,
    pub dry_run: bool,
    pub assume_yes: bool,
}

#[derive(Tabled, Serialize)]
struct VersionRow {
    version: String,
    kind: String,
}

#[derive(Serialize)]
struct UpgradeSummary {
    cluster: String,
    from: String,
    to: String,
    replaced: Vec<String>,
    deployments: Vec<String>,
}

pub async fn handle_upgrade_command(
    engine: &Engine,
    cluster: &str,
    args: UpgradeArgs,
    format: OutputFormat,
) -> Result<()> {
    let spec = engine.load(cluster).await?;

    let step_timeout = args
        .step_timeout
        .map(|m| Duration::from_secs(m * 60))
        .or(engine.config().upgrade.step_timeout());

    let orchestrator = UpgradeOrchestrator::new(
        engine.cloud_for(&spec).await?,
        engine.control_plane(),
        engine.generator_for(&spec),
        engine.store(),
        engine.versions()?,
    )
    .with_options(engine.options())
    .with_step_timeout(step_timeout);

    let plan = orchestrator
        .plan(&spec, &args.target)
        .with_context(|| format!("cannot upgrade cluster '{}'", cluster))?;

    if args.dry_run {
        return output::print_single(&plan, format);
    }

    if format == OutputFormat::Table {
        output::print_info(&format!(
            "Upgrading '{}' from {} to {}",
            cluster, plan.current_version, plan.target_version
        ));
        output::print_info(&format!(
            "{} master(s), then pools: {}",
            spec.master.count,
            plan.agent_pools.join(", ")
        ));
        match plan.step_timeout {
            Some(timeout) => output::print_info(&format!(
                "Each node replacement is limited to {}",
                format_duration(timeout.as_secs())
            )),
            None => output::print_warning("Node replacements are not time limited"),
        }
    }

    if !args.assume_yes {
        use dialoguer::Confirm;

        let confirm = Confirm::new()
            .with_prompt(format!(
                "Every node of '{}' will be drained and recreated. Continue?",
                cluster
            ))
            .interact()?;

        if !confirm {
            output::print_info("Upgrade aborted");
            return Ok(());
        }
    }

    let spinner = super::spinner(format!("Upgrading '{}' to {}...", cluster, plan.target_version));
    let result = orchestrator.upgrade_cluster(&spec, &plan.target_version).await;
    spinner.finish_and_clear();

    let outcome = result.with_context(|| {
        format!(
            "upgrade of cluster '{}' to {} stopped; nodes already replaced stay on the new version",
            cluster, plan.target_version
        )
    })?;

    if format != OutputFormat::Table {
        return output::print_single(
            &UpgradeSummary {
                cluster: cluster.to_string(),
                from: outcome.plan.current_version.clone(),
                to: outcome.plan.target_version.clone(),
                replaced: outcome.replaced.clone(),
                deployments: outcome.deployments.clone(),
            },
            format,
        );
    }

    output::print_success(&format!(
        "Cluster '{}' upgraded to {} ({} nodes replaced)",
        cluster,
        outcome.plan.target_version,
        outcome.replaced.len()
    ));
    Ok(())
}

pub async fn handle_upgrades_command(engine: &Engine, cluster: &str, format: OutputFormat) -> Result<()> {
    let spec = engine.load(cluster).await?;
    let versions = engine.versions()?;

    let current = parse_version(&spec.kubernetes_version)?;
    let allowed = versions.allowed_upgrades(&spec.kubernetes_version)?;

    let rows: Vec<VersionRow> = allowed
        .into_iter()
        .map(|version| {
            let kind = match parse_version(&version) {
                Ok(v) if v.minor == current.minor => "patch",
                _ => "minor",
            };
            VersionRow {
                version,
                kind: kind.to_string(),
            }
        })
        .collect();

    if format == OutputFormat::Table {
        output::print_info(&format!(
            "Cluster '{}' runs Kubernetes {}",
            cluster, spec.kubernetes_version
        ));
    }
    output::print_output(rows, format)
}
