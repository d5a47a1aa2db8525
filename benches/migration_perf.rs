// Migration performance benchmarks.
//
// Run with: cargo bench
//
// Performance Targets:
// | Operation              | Target   | Description                          |
// |------------------------|----------|--------------------------------------|
// | Cluster (10k chunks)   | < 20ms   | Adjacency clustering of one world    |
// | Reconcile (1k roster)  | < 1ms    | Plan moves for one incoming faction  |
// | Dry run (500 factions) | < 200ms  | Full pipeline without writes         |
// | Import (500 factions)  | < 2s     | Full pipeline into a file-backed db  |

use chrono::Utc;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use faction_migrate::cluster::cluster_chunks;
use faction_migrate::migrate::{Collaborators, ImportOptions, MigrationLocks, MigrationPipeline};
use faction_migrate::model::{ChunkCoordinate, Faction, FactionId, Member, PlayerId, Role};
use faction_migrate::reconcile::{MembershipReconciler, Roster};
use faction_migrate::source::JsonlSource;
use faction_migrate::storage::SqliteStore;
use serde_json::json;
use std::fs;
use std::hint::black_box;
use std::sync::{Arc, Once};
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;
use uuid::Uuid;

const MEMBERS_PER_FACTION: usize = 8;

fn init_bench_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = faction_migrate::logging::init_logging(0, true, None);
    });
}

fn log_bench_start(name: &str) -> Instant {
    info!("benchmark_start: {name}");
    Instant::now()
}

fn log_bench_end(name: &str, started_at: Instant) {
    info!("benchmark_end: {name} duration={:?}", started_at.elapsed());
}

fn player(n: usize) -> PlayerId {
    PlayerId(Uuid::from_u128(n as u128 + 1))
}

fn faction_id(n: usize) -> FactionId {
    FactionId(Uuid::from_u128(0xF000_0000 + n as u128))
}

/// Square blocks of chunks separated by one-chunk gaps.
fn chunk_field(side: i32, block: i32) -> Vec<ChunkCoordinate> {
    (0..side)
        .flat_map(|x| (0..side).map(move |z| (x, z)))
        .filter(|(x, z)| x % (block + 1) != block && z % (block + 1) != block)
        .map(|(x, z)| ChunkCoordinate::new("world", x, z))
        .collect()
}

fn roster_of(factions: usize) -> Roster {
    let now = Utc::now();
    Roster::from_factions((0..factions).map(|i| {
        let mut faction = Faction::new(faction_id(i), format!("Faction{i}"), format!("F{i}"));
        for m in 0..MEMBERS_PER_FACTION {
            let p = player(i * MEMBERS_PER_FACTION + m);
            faction.members.insert(
                p,
                Member {
                    player_id: p,
                    username: format!("player{p}"),
                    role: if m == 0 { Role::Leader } else { Role::Member },
                    joined_at: now,
                    last_online: now,
                },
            );
        }
        faction
    }))
}

/// A jsonl source where every faction has claims and a leader.
fn write_source(factions: usize) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    let mut faction_lines = Vec::with_capacity(factions);
    let mut claim_lines = Vec::new();
    for i in 0..factions {
        let members: Vec<_> = (0..MEMBERS_PER_FACTION)
            .map(|m| {
                json!({
                    "id": player(i * MEMBERS_PER_FACTION + m).to_string(),
                    "name": format!("p{i}_{m}"),
                    "role": if m == 0 { "leader" } else { "member" },
                })
            })
            .collect();
        faction_lines.push(
            json!({
                "id": faction_id(i).to_string(),
                "name": format!("Faction{i}"),
                "power": 80.0,
                "members": members,
            })
            .to_string(),
        );
        for c in 0..4 {
            let x = i32::try_from(i).expect("index fits i32") * 8 + c;
            claim_lines.push(
                json!({ "faction": faction_id(i).to_string(), "world": "world", "x": x, "z": 0 })
                    .to_string(),
            );
        }
    }
    let zones: Vec<String> = chunk_field(40, 4)
        .into_iter()
        .map(|c| json!({ "world": c.world, "x": c.x, "z": c.z + 1000, "kind": "safe" }).to_string())
        .collect();

    fs::write(dir.path().join("factions.jsonl"), faction_lines.join("\n")).expect("factions");
    fs::write(dir.path().join("claims.jsonl"), claim_lines.join("\n")).expect("claims");
    fs::write(dir.path().join("zones.jsonl"), zones.join("\n")).expect("zones");
    dir
}

fn pipeline(store: &Arc<SqliteStore>) -> MigrationPipeline {
    MigrationPipeline::new(Arc::new(MigrationLocks::new()), Collaborators::from_store(store))
}

fn bench_cluster(c: &mut Criterion) {
    init_bench_logging();
    let mut group = c.benchmark_group("cluster");

    for side in [25, 50, 100] {
        let chunks = chunk_field(side, 9);
        group.throughput(Throughput::Elements(chunks.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunks.len()), &chunks, |b, chunks| {
            let bench_start = log_bench_start("cluster/chunks");
            b.iter(|| cluster_chunks(black_box(chunks.clone())));
            log_bench_end("cluster/chunks", bench_start);
        });
    }
    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    init_bench_logging();
    let mut group = c.benchmark_group("reconcile");

    for size in [100, 1000] {
        let roster = roster_of(size);
        // Takes the leader and one member from each of the first four factions.
        let mut incoming = Faction::new(faction_id(size + 1), "Incoming", "INC");
        let now = Utc::now();
        for i in 0..4 {
            for m in 0..2 {
                let p = player(i * MEMBERS_PER_FACTION + m);
                incoming.members.insert(
                    p,
                    Member {
                        player_id: p,
                        username: format!("player{p}"),
                        role: Role::Member,
                        joined_at: now,
                        last_online: now,
                    },
                );
            }
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), &roster, |b, roster| {
            let reconciler = MembershipReconciler::new(None);
            b.iter(|| reconciler.reconcile(black_box(roster), black_box(&incoming)));
        });
    }
    group.finish();
}

fn bench_dry_run(c: &mut Criterion) {
    init_bench_logging();
    let mut group = c.benchmark_group("pipeline/dry_run");
    group.sample_size(20);

    for size in [100, 500] {
        let source = write_source(size);
        let store = Arc::new(SqliteStore::open_memory().expect("store"));
        let options = ImportOptions {
            dry_run: true,
            ..Default::default()
        };
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            let bench_start = log_bench_start("pipeline/dry_run");
            b.iter(|| pipeline(&store).run(&JsonlSource, black_box(source.path()), &options));
            log_bench_end("pipeline/dry_run", bench_start);
        });
    }
    group.finish();
}

fn bench_import(c: &mut Criterion) {
    init_bench_logging();
    let mut group = c.benchmark_group("pipeline/import");
    group.sample_size(10);

    let size = 500;
    let source = write_source(size);
    let options = ImportOptions {
        create_backup: false,
        ..Default::default()
    };
    group.throughput(Throughput::Elements(size as u64));
    group.bench_function(BenchmarkId::from_parameter(size), |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("temp dir");
                let store =
                    Arc::new(SqliteStore::open(&dir.path().join("bench.db")).expect("store"));
                (dir, store)
            },
            |(_dir, store)| pipeline(&store).run(&JsonlSource, source.path(), &options),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(algorithm_benches, bench_cluster, bench_reconcile);
criterion_group!(pipeline_benches, bench_dry_run, bench_import);
criterion_main!(algorithm_benches, pipeline_benches);
