use clusterops_common::PoolTopology;
use clusterops_engine::naming::parse_node_name;
use clusterops_engine::scale::ScalePlan;
use clusterops_engine::template::{patch_for_scale, ArtifactTemplateGenerator, TemplateGenerator};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::time::Duration;

// Benchmark configuration
const SMALL_POOL: u32 = 10;
const MEDIUM_POOL: u32 = 100;
const LARGE_POOL: u32 = 1000;

/// Benchmark node name parsing across a whole pool
fn bench_name_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("name_parsing");

    for size in [SMALL_POOL, MEDIUM_POOL, LARGE_POOL].iter() {
        let linux: Vec<String> = (0..*size)
            .map(|i| format!("k8s-agentpool1-12345678-{}", i))
            .collect();
        group.bench_with_input(BenchmarkId::new("linux", size), &linux, |b, names| {
            b.iter(|| {
                for name in names {
                    black_box(parse_node_name(name, Some("Canonical")).ok());
                }
            });
        });

        let windows: Vec<String> = (0..*size).map(|i| format!("1234k8s901{}", i)).collect();
        group.bench_with_input(BenchmarkId::new("windows", size), &windows, |b, names| {
            b.iter(|| {
                for name in names {
                    black_box(parse_node_name(name, Some("MicrosoftWindowsServer")).ok());
                }
            });
        });
    }

    group.finish();
}

/// Generated template with `size` VMs and the shared network resources
fn template_with(size: u32) -> Value {
    let mut resources = vec![
        json!({ "type": "Microsoft.Network/networkSecurityGroups", "name": "k8s-master-nsg" }),
        json!({ "type": "Microsoft.Network/routeTables", "name": "k8s-master-routetable" }),
    ];
    for i in 0..size {
        resources.push(json!({
            "type": "Microsoft.Compute/virtualMachines",
            "name": format!("k8s-agentpool1-12345678-{}", i),
            "tags": { "poolName": "agentpool1" },
            "dependsOn": ["k8s-master-nsg", "k8s-master-routetable"],
        }));
    }
    json!({ "variables": {}, "resources": resources })
}

/// Benchmark scale-up patching of generated templates
fn bench_template_patching(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_patching");
    let generator = ArtifactTemplateGenerator::new("/nonexistent");

    for size in [SMALL_POOL, MEDIUM_POOL, LARGE_POOL].iter() {
        let template = template_with(*size);
        let plan = ScalePlan {
            pool: "agentpool1".to_string(),
            topology: PoolTopology::AvailabilitySet,
            desired_count: size + 5,
            current_count: *size,
            highest_used_index: Some(size + 2),
            windows_index: None,
            to_delete: Vec::new(),
        };

        group.bench_with_input(BenchmarkId::new("patch_for_scale", size), &template, |b, template| {
            b.iter(|| {
                let mut template = template.clone();
                let mut parameters = json!({ "agentpool1Count": { "value": size } });
                patch_for_scale(&mut template, &mut parameters, "agentpool1", &plan, &generator)
                    .ok();
                black_box((template, parameters))
            });
        });

        group.bench_with_input(BenchmarkId::new("normalize", size), &template, |b, template| {
            b.iter(|| {
                let mut template = template.clone();
                generator.normalize_for_scale_up(&mut template).ok();
                black_box(template)
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets =
        bench_name_parsing,
        bench_template_patching
}

criterion_main!(benches);
