//! Knowledge store
//!
//! One rule file per vehicle identity under the knowledge directory, plus any
//! number of protocol reference rule sets shared by all vehicles. Lookups go
//! vehicle rules first, then references in registration order.
//!
//! Appends are the only mutation. They run under an exclusive advisory lock on
//! the vehicle file, re-read and re-validate the combined text while holding
//! it, and publish the recompiled record to readers only after the write has
//! been synced.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use vdiag_core::VehicleId;
use vdiag_rules::{CommandRule, ModuleDescriptor, RuleSet};

use crate::error::{StoreError, StoreResult};
use crate::procedure::{learned_blocks, Procedure};

/// Extension of per-vehicle rule files
pub const RULE_FILE_EXTENSION: &str = "vdr";

/// Lock acquisition policy for appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Attempts before giving up with lock contention
    pub retries: u32,
    /// Delay before the second attempt; doubles on each retry
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Compiled rules for one vehicle identity
#[derive(Debug, Clone)]
pub struct KnowledgeRecord {
    pub vehicle: VehicleId,
    /// 1 + number of learned blocks
    pub version: u32,
    pub path: PathBuf,
    pub rules: Arc<RuleSet>,
}

/// Which lookup tier answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Vehicle,
    Reference,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Vehicle => f.write_str("vehicle"),
            Tier::Reference => f.write_str("reference"),
        }
    }
}

/// A command found in one of the tiers
#[derive(Debug, Clone)]
pub struct ResolvedCommand {
    pub tier: Tier,
    /// Vehicle slug or reference name
    pub source: String,
    /// Rule set the command was found in; decoding uses the same set
    pub rules: Arc<RuleSet>,
    pub command: CommandRule,
    /// Target module, resolved from the same tier first
    pub module: Option<ModuleDescriptor>,
}

/// Result of a tiered lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(ResolvedCommand),
    /// Absent from every tier; the caller falls back to research
    Miss,
}

/// Outcome of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New block written; the record now has this version
    Appended { version: u32 },
    /// Identical identifier and pattern already effective
    Unchanged { version: u32 },
}

#[derive(Debug)]
struct Reference {
    name: String,
    rules: Arc<RuleSet>,
}

/// Identity-keyed knowledge store
#[derive(Debug)]
pub struct KnowledgeStore {
    dir: PathBuf,
    references: Vec<Reference>,
    records: RwLock<HashMap<VehicleId, Arc<KnowledgeRecord>>>,
    lock_policy: LockPolicy,
}

impl KnowledgeStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        info!(dir = %dir.display(), "Opened knowledge store");
        Ok(Self {
            dir,
            references: Vec::new(),
            records: RwLock::new(HashMap::new()),
            lock_policy: LockPolicy::default(),
        })
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Register a protocol reference rule set; earlier registrations win
    pub fn with_reference(mut self, name: impl Into<String>, rules: RuleSet) -> Self {
        let name = name.into();
        let counts = rules.counts();
        info!(reference = %name, commands = counts.commands, "Registered reference rules");
        self.references.push(Reference {
            name,
            rules: Arc::new(rules),
        });
        self
    }

    /// Load and register a reference rule file
    pub fn load_reference(self, path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let rules = RuleSet::parse(&text).map_err(|source| StoreError::Corrupted {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.with_reference(name, rules))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a vehicle's rule file
    pub fn path_for(&self, vehicle: &VehicleId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", vehicle.slug(), RULE_FILE_EXTENSION))
    }

    /// Compiled record for a vehicle, loading it on first use
    ///
    /// A vehicle without a file has no record. A file that fails to compile
    /// is corrupted knowledge.
    pub async fn record(&self, vehicle: &VehicleId) -> StoreResult<Option<Arc<KnowledgeRecord>>> {
        let cached = self.records.read().get(vehicle).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let path = self.path_for(vehicle);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let record = Arc::new(compile_record(vehicle, &path, &text)?);
        debug!(vehicle = %vehicle, version = record.version, "Loaded knowledge record");

        let mut records = self.records.write();
        // Another task may have published a newer record while we were reading
        let entry = records
            .entry(vehicle.clone())
            .or_insert_with(|| record.clone());
        Ok(Some(entry.clone()))
    }

    /// Tiered lookup by command identifier
    pub async fn lookup(&self, vehicle: &VehicleId, command: &str) -> StoreResult<Lookup> {
        let vehicle_rules = self.record(vehicle).await?.map(|r| r.rules.clone());

        if let Some(rules) = &vehicle_rules {
            if let Some(rule) = rules.command(command) {
                info!(vehicle = %vehicle, command, tier = "vehicle", "Lookup hit");
                return Ok(Lookup::Found(ResolvedCommand {
                    tier: Tier::Vehicle,
                    source: vehicle.slug(),
                    rules: rules.clone(),
                    command: rule.clone(),
                    module: self.resolve_module(rules, vehicle_rules.as_deref(), rule.module()),
                }));
            }
        }
        debug!(vehicle = %vehicle, command, tier = "vehicle", "Lookup miss");

        for reference in &self.references {
            if let Some(rule) = reference.rules.command(command) {
                info!(
                    vehicle = %vehicle,
                    command,
                    tier = "reference",
                    reference = %reference.name,
                    "Lookup hit"
                );
                return Ok(Lookup::Found(ResolvedCommand {
                    tier: Tier::Reference,
                    source: reference.name.clone(),
                    rules: reference.rules.clone(),
                    command: rule.clone(),
                    module: self.resolve_module(
                        &reference.rules,
                        vehicle_rules.as_deref(),
                        rule.module(),
                    ),
                }));
            }
        }

        info!(vehicle = %vehicle, command, "Command unknown in every tier");
        Ok(Lookup::Miss)
    }

    /// Module from the rule set that held the command, then the vehicle rules,
    /// then the references
    fn resolve_module(
        &self,
        own: &RuleSet,
        vehicle: Option<&RuleSet>,
        name: &str,
    ) -> Option<ModuleDescriptor> {
        own.module(name)
            .or_else(|| vehicle.and_then(|rules| rules.module(name)))
            .or_else(|| self.references.iter().find_map(|r| r.rules.module(name)))
            .cloned()
    }

    /// Append a learned procedure to the vehicle's rule file
    ///
    /// The block is validated on its own and again combined with the current
    /// file contents while the lock is held; on any failure the file is left
    /// untouched.
    pub async fn append(
        &self,
        vehicle: &VehicleId,
        procedure: &Procedure,
    ) -> StoreResult<AppendOutcome> {
        let block = procedure.render(Utc::now());
        RuleSet::parse(&block)?;

        let path = self.path_for(vehicle);
        let job = AppendJob {
            vehicle: vehicle.clone(),
            path: path.clone(),
            block,
            command: procedure.command_id().to_string(),
            pattern: procedure.pattern().to_string(),
            policy: self.lock_policy,
        };

        let (outcome, record) = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        match outcome {
            AppendOutcome::Appended { version } => info!(
                vehicle = %vehicle,
                command = procedure.command_id(),
                version,
                "Learned procedure appended"
            ),
            AppendOutcome::Unchanged { version } => info!(
                vehicle = %vehicle,
                command = procedure.command_id(),
                version,
                "Procedure already known; append skipped"
            ),
        }

        // Concurrent appends may finish out of order; keep the newest record
        let mut records = self.records.write();
        let stale = records
            .get(vehicle)
            .map_or(false, |cached| cached.version > record.version);
        if !stale {
            records.insert(vehicle.clone(), Arc::new(record));
        }
        Ok(outcome)
    }
}

fn compile_record(vehicle: &VehicleId, path: &Path, text: &str) -> StoreResult<KnowledgeRecord> {
    let rules = RuleSet::parse(text).map_err(|source| StoreError::Corrupted {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(KnowledgeRecord {
        vehicle: vehicle.clone(),
        version: 1 + learned_blocks(text) as u32,
        path: path.to_path_buf(),
        rules: Arc::new(rules),
    })
}

/// Version header written at the top of a new rule file
pub fn header_line(vehicle: &VehicleId) -> String {
    format!(
        "# vdiag rules v1 {} {} {}\n",
        vehicle.make, vehicle.model, vehicle.year
    )
}

/// Blocking half of an append, run on the blocking pool
struct AppendJob {
    vehicle: VehicleId,
    path: PathBuf,
    block: String,
    command: String,
    pattern: String,
    policy: LockPolicy,
}

impl AppendJob {
    fn run(self) -> StoreResult<(AppendOutcome, KnowledgeRecord)> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        self.lock(&file)?;
        let result = self.append_locked(&mut file);
        if let Err(e) = FileExt::unlock(&file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release knowledge file lock");
        }
        result
    }

    fn lock(&self, file: &File) -> StoreResult<()> {
        let attempts = self.policy.retries.max(1);
        let mut delay = self.policy.backoff;
        for attempt in 1..=attempts {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Knowledge file locked by another session, retrying"
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                Err(_) => break,
            }
        }
        Err(StoreError::LockContention {
            path: self.path.clone(),
            attempts,
        })
    }

    fn append_locked(&self, file: &mut File) -> StoreResult<(AppendOutcome, KnowledgeRecord)> {
        let mut existing = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut existing))
            .map_err(|e| StoreError::io(&self.path, e))?;

        let current = compile_record(&self.vehicle, &self.path, &existing)?;
        let already_known = current
            .rules
            .command(&self.command)
            .map_or(false, |rule| rule.response().source() == self.pattern);
        if already_known {
            let version = current.version;
            return Ok((AppendOutcome::Unchanged { version }, current));
        }

        let mut addition = String::new();
        if existing.trim().is_empty() {
            addition.push_str(&header_line(&self.vehicle));
        } else if !existing.ends_with('\n') {
            addition.push('\n');
        }
        addition.push_str(&self.block);

        let combined = format!("{}{}", existing, addition);
        let record = compile_record(&self.vehicle, &self.path, &combined).map_err(|e| match e {
            StoreError::Corrupted { source, .. } => StoreError::Validation(source),
            other => other,
        })?;

        file.write_all(addition.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&self.path, e))?;

        Ok((
            AppendOutcome::Appended {
                version: record.version,
            },
            record,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use vdiag_rules::Pattern;

    const REFERENCE: &str = "\
M:ECM A:7E0 P:CAN B:HS
C:ECM.READ_DTC M:03 R:43
C:ECM.READ_RPM M:01 PID:0C R:410C
C:TCM.READ_GEAR_REF M:22 PID:1E12 R:621E12
";

    fn vehicle() -> VehicleId {
        VehicleId::new("Ford", "Focus", 2015)
    }

    fn store(dir: &TempDir) -> KnowledgeStore {
        KnowledgeStore::open(dir.path())
            .unwrap()
            .with_reference("obd2", RuleSet::parse(REFERENCE).unwrap())
            .with_lock_policy(LockPolicy {
                retries: 3,
                backoff: Duration::from_millis(1),
            })
    }

    fn write_vehicle_file(dir: &TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("ford_focus_2015.vdr");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[tokio::test]
    async fn test_vehicle_tier_wins() {
        let dir = TempDir::new().unwrap();
        write_vehicle_file(
            &dir,
            "# vdiag rules v1 Ford Focus 2015\nM:ECM A:7E8 P:CAN B:HS\nC:ECM.READ_DTC M:03 R:43[0-9A-F]{4,}\n",
        );
        let store = store(&dir);

        let Lookup::Found(found) = store.lookup(&vehicle(), "ECM.READ_DTC").await.unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(found.tier, Tier::Vehicle);
        assert_eq!(found.command.response().source(), "43[0-9A-F]{4,}");
        assert_eq!(found.module.unwrap().address, 0x7E8);
    }

    #[tokio::test]
    async fn test_reference_tier_uses_vehicle_module() {
        let dir = TempDir::new().unwrap();
        write_vehicle_file(&dir, "M:TCM A:7E1 P:CAN B:HS\n");
        let store = store(&dir);

        let Lookup::Found(found) = store.lookup(&vehicle(), "ECM.READ_RPM").await.unwrap() else {
            panic!("expected a hit");
        };
        assert_eq!(found.tier, Tier::Reference);
        assert_eq!(found.source, "obd2");
        assert_eq!(found.module.unwrap().address, 0x7E0);

        let Lookup::Found(found) = store
            .lookup(&vehicle(), "TCM.READ_GEAR_REF")
            .await
            .unwrap()
        else {
            panic!("expected a hit");
        };
        assert_eq!(found.module.unwrap().address, 0x7E1);
    }

    #[tokio::test]
    async fn test_miss_in_every_tier() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.lookup(&vehicle(), "TCM.READ_GEAR").await.unwrap(),
            Lookup::Miss
        ));
        assert!(store.record(&vehicle()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_vehicle_file(&dir, "M:ECM A:7E0 P:CAN B:HS\nQ:nonsense\n");
        let store = store(&dir);
        let err = store.lookup(&vehicle(), "ECM.READ_DTC").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
        let diag: vdiag_core::DiagError = err.into();
        assert!(diag.is_fatal());
    }

    fn learned_gear() -> Procedure {
        let rules = RuleSet::parse("M:TCM A:7E1 P:CAN B:HS\nC:TCM.READ_GEAR M:22 PID:1E12 R:621E12").unwrap();
        Procedure::new(rules.command("TCM.READ_GEAR").unwrap().clone())
            .with_module(rules.module("TCM").unwrap().clone())
    }

    #[tokio::test]
    async fn test_append_creates_file_and_is_visible() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let outcome = store.append(&vehicle(), &learned_gear()).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended { version: 2 });

        let text = std::fs::read_to_string(store.path_for(&vehicle())).unwrap();
        assert!(text.starts_with("# vdiag rules v1 Ford Focus 2015\n# learned "));

        let Lookup::Found(found) = store.lookup(&vehicle(), "TCM.READ_GEAR").await.unwrap() else {
            panic!("learned command not visible");
        };
        assert_eq!(found.tier, Tier::Vehicle);
        assert_eq!(found.module.unwrap().address, 0x7E1);

        // A fresh store sees the same record from disk
        let reopened = store_reopened(&dir).await;
        assert_eq!(reopened.version, 2);
    }

    async fn store_reopened(dir: &TempDir) -> Arc<KnowledgeRecord> {
        store(dir).record(&vehicle()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_identical_append_is_noop_and_different_pattern_shadows() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.append(&vehicle(), &learned_gear()).await.unwrap();
        let before = std::fs::read_to_string(store.path_for(&vehicle())).unwrap();

        let outcome = store.append(&vehicle(), &learned_gear()).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Unchanged { version: 2 });
        assert_eq!(
            std::fs::read_to_string(store.path_for(&vehicle())).unwrap(),
            before
        );

        let shadowing = learned_gear().with_pattern(Pattern::new("621E12[0-9A-F]{2}").unwrap());
        let outcome = store.append(&vehicle(), &shadowing).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended { version: 3 });

        let record = store.record(&vehicle()).await.unwrap().unwrap();
        assert_eq!(
            record.rules.command("TCM.READ_GEAR").unwrap().response().source(),
            "621E12[0-9A-F]{2}"
        );
        assert_eq!(record.rules.all_commands().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_procedure_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_vehicle_file(&dir, "# vdiag rules v1 Ford Focus 2015\nM:TCM A:7E1 P:CAN B:HS\n");
        let store = store(&dir);

        // Whitespace in a pattern cannot survive the token grammar
        let broken = learned_gear().with_pattern(Pattern::new("621E12 [0-9A-F]{2}").unwrap());
        let err = store.append(&vehicle(), &broken).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# vdiag rules v1 Ford Focus 2015\nM:TCM A:7E1 P:CAN B:HS\n"
        );
    }

    #[tokio::test]
    async fn test_lock_contention_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_vehicle_file(&dir, "M:TCM A:7E1 P:CAN B:HS\n");
        let store = store(&dir);

        let holder = File::open(&path).unwrap();
        holder.lock_exclusive().unwrap();

        let err = store.append(&vehicle(), &learned_gear()).await.unwrap_err();
        assert!(matches!(err, StoreError::LockContention { attempts: 3, .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "M:TCM A:7E1 P:CAN B:HS\n"
        );

        FileExt::unlock(&holder).unwrap();
        assert!(store.append(&vehicle(), &learned_gear()).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_appends_serialize() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir).with_lock_policy(LockPolicy {
            retries: 50,
            backoff: Duration::from_millis(2),
        }));

        let rules = RuleSet::parse(
            "C:TCM.READ_A M:22 PID:0001 R:620001\nC:TCM.READ_B M:22 PID:0002 R:620002",
        )
        .unwrap();
        let a = Procedure::new(rules.command("TCM.READ_A").unwrap().clone());
        let b = Procedure::new(rules.command("TCM.READ_B").unwrap().clone());

        let (va, vb) = (vehicle(), vehicle());
        let (ra, rb) = tokio::join!(store.append(&va, &a), store.append(&vb, &b));
        ra.unwrap();
        rb.unwrap();

        let text = std::fs::read_to_string(store.path_for(&vehicle())).unwrap();
        let rules = RuleSet::parse(&text).unwrap();
        assert!(rules.command("TCM.READ_A").is_some());
        assert!(rules.command("TCM.READ_B").is_some());
        assert_eq!(learned_blocks(&text), 2);
    }
}
