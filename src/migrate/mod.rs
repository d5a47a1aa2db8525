//! Migration pipeline.
//!
//! One run goes through these phases, in order:
//! 1. Guard: take the per-kind migration lock or reject at once
//! 2. Backup: best-effort snapshot of the target (real runs only)
//! 3. Load: read the source batch (the faction listing is required)
//! 4. Convert, reconcile, commit: one source faction at a time
//! 5. Zones: cluster zone chunks and create one zone per cluster
//! 6. Finalize: rebuild the claim index and run the completion hook
//!
//! Reconciliation is always planned against an in-memory `Roster` of the
//! target and applied to it, so a dry run sees the same state a real run
//! would and reports identical counts. Only real runs touch the stores.

pub mod convert;
pub mod guard;

pub use convert::{Converted, Converter, Skip, map_role};
pub use guard::{LeaseGuard, MigrationLocks, MigrationPermit};

use crate::cluster::{ZoneNamer, cluster_chunks};
use crate::error::MigrationError;
use crate::model::{ChunkCoordinate, Faction, FactionId, PlayerId, ZoneKind};
use crate::reconcile::{MembershipReconciler, Roster};
use crate::report::{ImportReport, ImportTally, RunOutcome, ValidationReport};
use crate::source::{SourceAdapter, SourceBatch, SourceZoneChunk};
use crate::storage::{
    BackupKind, BackupService, ClaimIndex, FactionStore, PowerLedger, RunLease, SqliteStore,
    ZoneRequest, ZoneStore,
};
use crate::validation::{ConflictValidator, is_known_world};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

/// Receives short human-readable progress messages.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Called once after a successful real run.
pub type CompletionHook = Box<dyn Fn() -> crate::error::Result<()> + Send + Sync>;

/// Per-invocation switches.
#[derive(Clone)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub overwrite_existing: bool,
    pub skip_zones: bool,
    pub skip_power: bool,
    pub create_backup: bool,
    pub progress: Option<ProgressSink>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            overwrite_existing: false,
            skip_zones: false,
            skip_power: false,
            create_backup: true,
            progress: None,
        }
    }
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("dry_run", &self.dry_run)
            .field("overwrite_existing", &self.overwrite_existing)
            .field("skip_zones", &self.skip_zones)
            .field("skip_power", &self.skip_power)
            .field("create_backup", &self.create_backup)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ImportOptions {
    fn progress(&self, message: &str) {
        if let Some(sink) = &self.progress {
            sink(message);
        }
    }
}

/// Settings that outlive one run, usually read from configuration.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Worlds zone chunks may live in. Empty accepts every world.
    pub known_worlds: Vec<String>,
    pub safe_prefix: String,
    pub war_prefix: String,
    /// Recorded on backups, log entries and created zones.
    pub actor: Option<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            known_worlds: Vec::new(),
            safe_prefix: "SafeZone".to_string(),
            war_prefix: "WarZone".to_string(),
            actor: None,
        }
    }
}

impl MigrationSettings {
    fn actor_id(&self) -> Option<PlayerId> {
        self.actor.as_deref().and_then(|a| a.parse().ok())
    }
}

/// Target-side services the pipeline writes through.
#[derive(Clone)]
pub struct Collaborators {
    pub factions: Arc<dyn FactionStore>,
    pub zones: Arc<dyn ZoneStore>,
    pub claims: Arc<dyn ClaimIndex>,
    pub power: Arc<dyn PowerLedger>,
    pub backups: Option<Arc<dyn BackupService>>,
    /// Cross-process exclusion, for targets shared by several processes.
    pub lease: Option<Arc<dyn RunLease>>,
}

impl Collaborators {
    /// Use one SQLite store for every role.
    #[must_use]
    pub fn from_store(store: &Arc<SqliteStore>) -> Self {
        Self {
            factions: store.clone(),
            zones: store.clone(),
            claims: store.clone(),
            power: store.clone(),
            backups: None,
            lease: None,
        }
    }

    #[must_use]
    pub fn with_backups(mut self, backups: Arc<dyn BackupService>) -> Self {
        self.backups = Some(backups);
        self
    }

    #[must_use]
    pub fn with_lease(mut self, lease: Arc<dyn RunLease>) -> Self {
        self.lease = Some(lease);
        self
    }
}

/// Drives one migration from a source directory into the target stores.
pub struct MigrationPipeline {
    locks: Arc<MigrationLocks>,
    targets: Collaborators,
    settings: MigrationSettings,
    on_complete: Option<CompletionHook>,
}

impl fmt::Debug for MigrationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationPipeline")
            .field("locks", &self.locks)
            .field("settings", &self.settings)
            .field("on_complete", &self.on_complete.is_some())
            .finish_non_exhaustive()
    }
}

impl MigrationPipeline {
    #[must_use]
    pub fn new(locks: Arc<MigrationLocks>, targets: Collaborators) -> Self {
        Self {
            locks,
            targets,
            settings: MigrationSettings::default(),
            on_complete: None,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: MigrationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a callback run after a real run's claim index rebuild.
    #[must_use]
    pub fn on_complete(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    /// Read-only pre-check of a source directory against the target.
    #[must_use]
    pub fn validate(&self, adapter: &dyn SourceAdapter, dir: &Path) -> ValidationReport {
        ConflictValidator::validate_source(
            adapter,
            dir,
            self.targets.factions.as_ref(),
            &self.settings.known_worlds,
        )
    }

    /// Run one migration. Never fails: every outcome lands in the report.
    #[must_use]
    pub fn run(
        &self,
        adapter: &dyn SourceAdapter,
        dir: &Path,
        options: &ImportOptions,
    ) -> ImportReport {
        let kind = adapter.kind();
        let mut tally = ImportTally::new(kind, options.dry_run);

        let _permit = match self.locks.try_begin(kind) {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(kind = %kind, "Migration rejected: {e}");
                tally.errors.push(e.to_string());
                return tally.finish(RunOutcome::Rejected);
            }
        };
        // Dry runs never write, so only real runs take the target lease.
        let _lease = match &self.targets.lease {
            Some(lease) if !options.dry_run => match LeaseGuard::acquire(lease, kind) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::warn!(kind = %kind, "Migration rejected: {e}");
                    let outcome = if matches!(e, MigrationError::MigrationInProgress { .. }) {
                        RunOutcome::Rejected
                    } else {
                        RunOutcome::Failed
                    };
                    tally.errors.push(e.to_string());
                    return tally.finish(outcome);
                }
            },
            _ => None,
        };
        tracing::info!(kind = %kind, dir = %dir.display(), dry_run = options.dry_run, "Migration started");

        if !options.dry_run && options.create_backup {
            options.progress("Creating backup");
            self.backup(kind.as_str(), &mut tally);
        }

        options.progress("Loading source data");
        let batch = match SourceBatch::load(adapter, dir) {
            Ok(batch) => batch,
            Err(e) => {
                tally.error(format!("Failed to read faction listing: {e}"));
                return tally.finish(RunOutcome::Failed);
            }
        };
        for warning in &batch.warnings {
            tally.warn(warning.clone());
        }

        let mut roster = match Roster::load(self.targets.factions.as_ref()) {
            Ok(roster) => roster,
            Err(e) => {
                tally.error(format!("Failed to read target factions: {e}"));
                return tally.finish(RunOutcome::Failed);
            }
        };

        self.import_factions(&batch, &mut roster, options, &mut tally);

        if options.skip_zones {
            tracing::debug!("Zone phase skipped");
        } else {
            options.progress("Creating zones");
            self.import_zones(&batch.zone_chunks, options.dry_run, &mut tally);
        }

        if !options.dry_run {
            options.progress("Rebuilding claim index");
            self.finalize(&mut tally);
        }

        let report = tally.finish(RunOutcome::Completed);
        tracing::info!(
            kind = %kind,
            imported = report.counts.factions_imported,
            skipped = report.counts.factions_skipped,
            zones = report.counts.zones_created,
            warnings = report.warnings.len(),
            "Migration finished"
        );
        report
    }

    fn backup(&self, label: &str, tally: &mut ImportTally) {
        let Some(backups) = &self.targets.backups else {
            tracing::debug!("No backup service configured");
            return;
        };
        match backups.create_backup(
            BackupKind::PreMigration,
            label,
            self.settings.actor.as_deref(),
        ) {
            Ok(meta) => tally.backup_path = Some(meta.path.display().to_string()),
            Err(e) => tally.warn(format!("Backup failed, continuing without one: {e}")),
        }
    }

    fn import_factions(
        &self,
        batch: &SourceBatch,
        roster: &mut Roster,
        options: &ImportOptions,
        tally: &mut ImportTally,
    ) {
        let batch_ids: HashSet<FactionId> = batch
            .factions
            .iter()
            .filter_map(|f| f.id.as_deref().and_then(|id| id.trim().parse().ok()))
            .collect();
        let reconciler = MembershipReconciler::new(self.settings.actor_id());
        let mut seen = HashSet::new();
        let total = batch.factions.len();

        for (index, source) in batch.factions.iter().enumerate() {
            options.progress(&format!("Importing faction {}/{total}", index + 1));

            let converted = {
                let converter = Converter {
                    kind: tally.source_kind,
                    roster,
                    store: self.targets.factions.as_ref(),
                    names: &batch.names,
                    claims: &batch.claims,
                    batch_ids: &batch_ids,
                    overwrite: options.overwrite_existing,
                    actor: self.settings.actor_id(),
                };
                converter.convert(source, &mut seen)
            };
            let mut converted = match converted {
                Ok(converted) => converted,
                Err(skip) => {
                    tally.counts.factions_skipped += 1;
                    if skip.warn {
                        tally.warn(skip.reason);
                    } else {
                        tracing::debug!("{}", skip.reason);
                    }
                    continue;
                }
            };

            let plan = reconciler.reconcile(roster, &converted.faction);
            let claims_dropped = converted.settle(&plan, &batch_ids);
            for warning in converted.warnings {
                tally.warn(warning);
            }
            let faction = converted.faction;

            if !options.dry_run {
                let committed = plan
                    .commit(self.targets.factions.as_ref())
                    .and_then(|()| {
                        self.targets
                            .factions
                            .import_faction(&faction, options.overwrite_existing)
                    });
                if let Err(e) = committed {
                    tally.counts.factions_skipped += 1;
                    tally.warn(format!("faction {}: commit failed: {e}", faction.name));
                    self.resync(roster);
                    continue;
                }
            }

            roster.apply(&plan);
            tally.counts.players_moved += plan.moved.len();
            tally.counts.leadership_successions += plan.successions.len();
            tally.counts.factions_disbanded += plan.disbanded.len();
            tally.counts.factions_imported += 1;
            tally.counts.claims_imported += faction.claims.len();
            tally.counts.claims_dropped += claims_dropped;

            if !options.skip_power
                && let Some(pool) = converted.legacy_power
            {
                tally.counts.players_with_power +=
                    self.redistribute_power(&faction, pool, options.dry_run, tally);
            }

            tracing::debug!(
                faction_id = %faction.id,
                members = faction.members.len(),
                moved = plan.moved.len(),
                "Faction imported"
            );
            roster.upsert(faction);
        }
    }

    /// Re-read the target after a failed commit so later factions plan
    /// against what was actually written.
    fn resync(&self, roster: &mut Roster) {
        match Roster::load(self.targets.factions.as_ref()) {
            Ok(fresh) => *roster = fresh,
            Err(e) => tracing::warn!(error = %e, "Could not reload target after failed commit"),
        }
    }

    /// Split a legacy faction power pool evenly over its members, capped per
    /// player. Returns how many players received a value.
    fn redistribute_power(
        &self,
        faction: &Faction,
        pool: f64,
        dry_run: bool,
        tally: &mut ImportTally,
    ) -> usize {
        let count = faction.members.len();
        if count == 0 || !pool.is_finite() {
            return 0;
        }
        let share = (pool / count as f64).min(self.targets.power.max_power()).max(0.0);
        if dry_run {
            return count;
        }

        let mut granted = 0;
        for player in faction.members.keys() {
            match self.targets.power.set_power(player, share) {
                Ok(()) => granted += 1,
                Err(e) => tally.warn(format!(
                    "faction {}: power for {player} not set: {e}",
                    faction.name
                )),
            }
        }
        granted
    }

    fn import_zones(&self, chunks: &[SourceZoneChunk], dry_run: bool, tally: &mut ImportTally) {
        let groups = self.group_zone_chunks(chunks, tally);
        let clusters: Vec<(ZoneKind, crate::cluster::ChunkCluster)> = groups
            .into_iter()
            .flat_map(|((_, kind), coords)| {
                cluster_chunks(coords).into_iter().map(move |c| (kind, c))
            })
            .collect();

        if dry_run {
            tally.counts.zones_created += clusters.len();
            return;
        }
        if clusters.is_empty() {
            return;
        }

        let zones = self.targets.zones.as_ref();
        let mut namer = ZoneNamer::new(&self.settings.safe_prefix, &self.settings.war_prefix);
        match zones.zone_names() {
            Ok(names) => namer = namer.with_taken(names),
            Err(e) => tally.warn(format!("Could not list existing zones: {e}")),
        }
        let creator = self.settings.actor_id();
        let requests: Vec<ZoneRequest> = clusters
            .into_iter()
            .map(|(kind, cluster)| ZoneRequest {
                name: namer.next_name(kind),
                kind,
                world: cluster.world,
                creator,
                chunks: cluster.chunks,
                flags: kind.default_flags(),
            })
            .collect();

        zones.start_batch();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            requests
                .par_iter()
                .map(|request| (request, zones.create_zone_with_chunks(request)))
                .collect::<Vec<_>>()
        }));
        zones.end_batch();

        match outcome {
            Ok(results) => {
                for (request, result) in results {
                    match result {
                        Ok(zone) => {
                            tracing::debug!(zone = %zone.name, chunks = zone.chunks.len(), "Zone created");
                            tally.counts.zones_created += 1;
                        }
                        Err(e) => tally.warn(format!("zone {}: not created: {e}", request.name)),
                    }
                }
            }
            Err(_) => tally.warn("Zone creation aborted unexpectedly; some zones may be missing"),
        }
    }

    /// Group zone chunks by world and kind, dropping unknown worlds.
    fn group_zone_chunks(
        &self,
        chunks: &[SourceZoneChunk],
        tally: &mut ImportTally,
    ) -> BTreeMap<(String, ZoneKind), Vec<ChunkCoordinate>> {
        let mut groups: BTreeMap<(String, ZoneKind), Vec<ChunkCoordinate>> = BTreeMap::new();
        let mut unknown: BTreeMap<&str, usize> = BTreeMap::new();
        for chunk in chunks {
            if is_known_world(&self.settings.known_worlds, &chunk.world) {
                groups
                    .entry((chunk.world.clone(), chunk.kind))
                    .or_default()
                    .push(chunk.coordinate());
            } else {
                *unknown.entry(chunk.world.as_str()).or_default() += 1;
            }
        }
        for (world, count) in unknown {
            tally.warn(format!(
                "{count} zone chunk(s) in unknown world '{world}' dropped"
            ));
        }
        groups
    }

    fn finalize(&self, tally: &mut ImportTally) {
        match self.targets.claims.rebuild_index() {
            Ok(indexed) => tracing::debug!(indexed, "Claim index rebuilt"),
            Err(e) => tally.warn(format!("Claim index rebuild failed: {e}")),
        }
        if let Some(hook) = &self.on_complete
            && let Err(e) = hook()
        {
            tally.warn(format!("Completion callback failed: {e}"));
        }
    }
}
