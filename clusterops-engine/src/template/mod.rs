//! Deployment template handling
//!
//! Templates are produced by a [`TemplateGenerator`] and treated as opaque
//! JSON, apart from the handful of parameters and variables that encode a
//! pool's size and where its VM indices start.

pub mod artifact;

use clusterops_common::ClusterSpecification;
use serde_json::{json, Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::scale::ScalePlan;

pub use artifact::ArtifactTemplateGenerator;

/// Produces the deployment template and parameters for a cluster
pub trait TemplateGenerator: Send + Sync {
    /// Template and parameter documents for `spec`
    fn generate(&self, spec: &ClusterSpecification) -> EngineResult<(Value, Value)>;

    /// Strip what must not be redeployed when adding nodes to a running cluster
    fn normalize_for_scale_up(&self, template: &mut Value) -> EngineResult<()>;
}

pub fn count_parameter(pool: &str) -> String {
    format!("{}Count", pool)
}

pub fn offset_parameter(pool: &str) -> String {
    format!("{}Offset", pool)
}

pub fn index_variable(pool: &str) -> String {
    format!("{}Index", pool)
}

/// Node count the template must declare for a pool.
///
/// Indexed pools deploy VMs `offset..count`, so the count has to cover the
/// gaps left below the highest index in use.
pub fn count_for_template(plan: &ScalePlan) -> u32 {
    if plan.is_indexed() {
        let gaps = plan.next_index().saturating_sub(plan.current_count);
        plan.desired_count + gaps
    } else {
        plan.desired_count
    }
}

fn object_at<'a>(doc: &'a mut Value, path: &str) -> EngineResult<&'a mut Map<String, Value>> {
    doc.as_object_mut().ok_or_else(|| EngineError::Template {
        path: path.to_string(),
        message: "expected a JSON object".to_string(),
    })
}

/// Set `parameters[name]` to `{"value": value}`
pub fn set_parameter(parameters: &mut Value, name: &str, value: Value) -> EngineResult<()> {
    object_at(parameters, "parameters")?.insert(name.to_string(), json!({ "value": value }));
    Ok(())
}

/// Set `template.variables[<pool>Index]`
fn set_index_variable(template: &mut Value, pool: &str, windows_index: u32) -> EngineResult<()> {
    let variables = object_at(template, "template")?
        .get_mut("variables")
        .ok_or_else(|| EngineError::Template {
            path: "template.variables".to_string(),
            message: "missing".to_string(),
        })?;
    object_at(variables, "template.variables")?.insert(index_variable(pool), json!(windows_index));
    Ok(())
}

/// Rewrite a generated template and parameters for a scale-up of `pool`
pub fn patch_for_scale(
    template: &mut Value,
    parameters: &mut Value,
    pool: &str,
    plan: &ScalePlan,
    generator: &dyn TemplateGenerator,
) -> EngineResult<()> {
    let count = count_for_template(plan);
    set_parameter(parameters, &count_parameter(pool), json!(count))?;

    if let Some(windows_index) = plan.windows_index {
        set_index_variable(template, pool, windows_index)?;
    }

    generator.normalize_for_scale_up(template)?;

    if plan.is_indexed() {
        set_parameter(parameters, &offset_parameter(pool), json!(plan.next_index()))?;
    }

    tracing::debug!(pool, count, offset = plan.next_index(), "Patched template for scale");
    Ok(())
}

/// Node to recreate during a rolling replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// Recreate the VM at `index` of an indexed pool
    Indexed { index: u32 },
    /// Bring a scale set back to `capacity` with the current model
    Elastic { capacity: u32 },
}

/// Rewrite a generated template and parameters so the deployment recreates
/// exactly one node of `pool`
pub fn patch_for_replacement(
    template: &mut Value,
    parameters: &mut Value,
    pool: &str,
    replacement: Replacement,
    windows_index: Option<u32>,
    generator: &dyn TemplateGenerator,
) -> EngineResult<()> {
    match replacement {
        Replacement::Indexed { index } => {
            set_parameter(parameters, &count_parameter(pool), json!(index + 1))?;
            set_parameter(parameters, &offset_parameter(pool), json!(index))?;
        }
        Replacement::Elastic { capacity } => {
            set_parameter(parameters, &count_parameter(pool), json!(capacity))?;
        }
    }

    if let Some(windows_index) = windows_index {
        set_index_variable(template, pool, windows_index)?;
    }

    generator.normalize_for_scale_up(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterops_common::PoolTopology;

    struct NoopGenerator;

    impl TemplateGenerator for NoopGenerator {
        fn generate(&self, _spec: &ClusterSpecification) -> EngineResult<(Value, Value)> {
            Ok((json!({}), json!({})))
        }

        fn normalize_for_scale_up(&self, _template: &mut Value) -> EngineResult<()> {
            Ok(())
        }
    }

    fn plan(topology: PoolTopology, current: u32, highest: Option<u32>, desired: u32) -> ScalePlan {
        ScalePlan {
            pool: "agentpool1".to_string(),
            topology,
            desired_count: desired,
            current_count: current,
            highest_used_index: highest,
            windows_index: None,
            to_delete: Vec::new(),
        }
    }

    #[test]
    fn test_count_covers_index_gaps() {
        let p = plan(PoolTopology::AvailabilitySet, 2, Some(3), 2);
        assert_eq!(count_for_template(&p), 4);

        let p = plan(PoolTopology::AvailabilitySet, 3, Some(2), 5);
        assert_eq!(count_for_template(&p), 5);

        let p = plan(PoolTopology::AvailabilitySet, 0, None, 2);
        assert_eq!(count_for_template(&p), 2);
    }

    #[test]
    fn test_scale_set_count_is_desired() {
        let p = plan(PoolTopology::VirtualMachineScaleSets, 3, Some(0), 7);
        assert_eq!(count_for_template(&p), 7);
    }

    #[test]
    fn test_patch_indexed_pool() {
        let mut template = json!({ "variables": {}, "resources": [] });
        let mut parameters = json!({ "agentpool1Count": { "value": 2 } });
        let p = plan(PoolTopology::AvailabilitySet, 2, Some(3), 3);

        patch_for_scale(&mut template, &mut parameters, "agentpool1", &p, &NoopGenerator).unwrap();

        assert_eq!(parameters["agentpool1Count"]["value"], json!(5));
        assert_eq!(parameters["agentpool1Offset"]["value"], json!(4));
        assert!(template["variables"].get("agentpool1Index").is_none());
    }

    #[test]
    fn test_patch_windows_pool_sets_index() {
        let mut template = json!({ "variables": {} });
        let mut parameters = json!({});
        let mut p = plan(PoolTopology::AvailabilitySet, 1, Some(0), 2);
        p.windows_index = Some(1);

        patch_for_scale(&mut template, &mut parameters, "winpool", &p, &NoopGenerator).unwrap();
        assert_eq!(template["variables"]["winpoolIndex"], json!(1));
    }

    #[test]
    fn test_patch_scale_set_has_no_offset() {
        let mut template = json!({ "variables": {} });
        let mut parameters = json!({});
        let p = plan(PoolTopology::VirtualMachineScaleSets, 2, Some(0), 4);

        patch_for_scale(&mut template, &mut parameters, "agentpool1", &p, &NoopGenerator).unwrap();
        assert_eq!(parameters["agentpool1Count"]["value"], json!(4));
        assert!(parameters.get("agentpool1Offset").is_none());
    }

    #[test]
    fn test_missing_variables_names_path() {
        let mut template = json!({ "resources": [] });
        let mut parameters = json!({});
        let mut p = plan(PoolTopology::AvailabilitySet, 1, Some(0), 2);
        p.windows_index = Some(0);

        let err = patch_for_scale(&mut template, &mut parameters, "winpool", &p, &NoopGenerator)
            .unwrap_err();
        match err {
            EngineError::Template { path, .. } => assert_eq!(path, "template.variables"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_replacement_recreates_single_index() {
        let mut template = json!({ "variables": {} });
        let mut parameters = json!({});

        patch_for_replacement(
            &mut template,
            &mut parameters,
            "master",
            Replacement::Indexed { index: 2 },
            None,
            &NoopGenerator,
        )
        .unwrap();
        assert_eq!(parameters["masterCount"]["value"], json!(3));
        assert_eq!(parameters["masterOffset"]["value"], json!(2));

        let mut parameters = json!({});
        patch_for_replacement(
            &mut template,
            &mut parameters,
            "pool1",
            Replacement::Elastic { capacity: 4 },
            None,
            &NoopGenerator,
        )
        .unwrap();
        assert_eq!(parameters["pool1Count"]["value"], json!(4));
        assert!(parameters.get("pool1Offset").is_none());
    }

    #[test]
    fn test_non_object_parameters_rejected() {
        let mut template = json!({});
        let mut parameters = json!([]);
        let p = plan(PoolTopology::AvailabilitySet, 1, Some(0), 2);

        let err = patch_for_scale(&mut template, &mut parameters, "agentpool1", &p, &NoopGenerator)
            .unwrap_err();
        assert!(matches!(err, EngineError::Template { ref path, .. } if path == "parameters"));
    }
}
