use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use yarnix_core::lockfile::render_lockfile;
use yarnix_core::pipeline;
use yarnix_core::registry::parse_dump;
use yarnix_test::load_fixture;

/// Benchmark the graph rebuild across the fixture dumps
fn benchmark_graph_build(c: &mut Criterion) {
  let mut group = c.benchmark_group("graph_build");

  for fixture_name in [
    "two-package.json",
    "virtual-peers.json",
    "native-unplugged.json",
    "patched.json",
  ] {
    let dump = parse_dump(&load_fixture(fixture_name)).unwrap();
    group.bench_function(fixture_name, |b| {
      b.iter(|| {
        pipeline::build_graph(black_box(&dump), "app@workspace:.").unwrap()
      });
    });
  }

  group.finish();
}

/// Benchmark graph build scaling against synthetic dump sizes
fn benchmark_build_vs_size(c: &mut Criterion) {
  let mut group = c.benchmark_group("build_vs_size");

  for package_count in [10, 100, 1000] {
    let json = synthetic_dump(package_count);
    let dump = parse_dump(&json).unwrap();
    group.bench_function(format!("{package_count}_packages"), |b| {
      b.iter(|| {
        pipeline::build_graph(black_box(&dump), "app@workspace:.").unwrap()
      });
    });
  }

  group.finish();
}

/// Benchmark the artifact renderers over a prebuilt graph
fn benchmark_renderers(c: &mut Criterion) {
  let mut group = c.benchmark_group("renderers");

  let dump = parse_dump(&synthetic_dump(1000)).unwrap();
  let (snapshot, working_set) = pipeline::build_graph(&dump, "app@workspace:.").unwrap();

  group.bench_function("lockfile", |b| {
    b.iter(|| render_lockfile(black_box(&snapshot)));
  });

  group.bench_function("loader_data", |b| {
    b.iter(|| {
      pipeline::synthesize_loader_data(
        black_box(&snapshot),
        black_box(&working_set),
        "/src/app",
        "/src/app",
      )
      .unwrap()
    });
  });

  group.finish();
}

/// A chain-shaped dump: the workspace depends on every package, each
/// package depends on the next.
fn synthetic_dump(package_count: usize) -> String {
  let mut entries = Vec::with_capacity(package_count + 1);

  let workspace_edges: Vec<String> = (0..package_count)
    .map(|i| format!("\"pkg-{i}\": \"pkg-{i}@npm:1.0.{i}\""))
    .collect();
  entries.push(format!(
    "\"app@workspace:.\": {{\"languageName\": \"unknown\", \"linkType\": \"soft\", \
     \"packageLocation\": \"/src/app\", \"packageDependencies\": {{{}}}}}",
    workspace_edges.join(", ")
  ));

  for i in 0..package_count {
    let next = (i + 1) % package_count;
    entries.push(format!(
      "\"pkg-{i}@npm:1.0.{i}\": {{\"languageName\": \"node\", \"linkType\": \"hard\", \
       \"version\": \"1.0.{i}\", \"checksum\": \"{i:064x}\", \
       \"packageOut\": \"/nix/store/{i:032x}-pkg-{i}\", \
       \"packageDependencies\": {{\"pkg-{next}\": \"pkg-{next}@npm:1.0.{next}\"}}}}",
    ));
  }

  format!("{{{}}}", entries.join(", "))
}

criterion_group!(
  benches,
  benchmark_graph_build,
  benchmark_build_vs_size,
  benchmark_renderers
);
criterion_main!(benches);
