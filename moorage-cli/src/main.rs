mod manifest;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;

use moorage_core::apply::{Applied, EffectOutcome, apply_plan};
use moorage_core::differ::{create_plan, destroy_plan};
use moorage_core::effect::Effect;
use moorage_core::plan::Plan;
use moorage_core::resource::{ResourceRecord, Value};
use moorage_core::{KeyedLockTable, ReadOutcome, Reconciler};
use moorage_provider_digitalocean::{LOGSINK_KIND, LogsinkApi, SandboxDatabases};
use moorage_state::{BackendConfig, LockInfo, StateBackend, StateFile, create_backend};

use manifest::Manifest;

type LogsinkReconciler = Reconciler<LogsinkApi<SandboxDatabases>>;

#[derive(Parser)]
#[command(name = "moorage")]
#[command(about = "Declarative management of database log sinks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show execution plan without applying changes
    Plan {
        /// Path to manifest file
        #[arg(default_value = "moorage.json")]
        file: PathBuf,
    },
    /// Apply changes to reach the declared log sinks
    Apply {
        /// Path to manifest file
        #[arg(default_value = "moorage.json")]
        file: PathBuf,
    },
    /// Delete every log sink recorded in state
    Destroy {
        /// Path to manifest file
        #[arg(default_value = "moorage.json")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Re-read recorded log sinks and drop the ones that no longer exist
    Refresh {
        /// Path to manifest file
        #[arg(default_value = "moorage.json")]
        file: PathBuf,
    },
    /// Adopt an existing log sink into state
    Import {
        /// `<cluster_id>,<logsink_name>`
        key: String,

        /// Path to manifest file
        #[arg(long, default_value = "moorage.json")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply { file } => run_apply(&file).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Refresh { file } => run_refresh(&file).await,
        Commands::Import { key, file } => run_import(&file, &key).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Everything a command needs, built from the manifest
struct Session {
    manifest: Manifest,
    reconciler: Arc<LogsinkReconciler>,
    backend: Box<dyn StateBackend>,
}

impl Session {
    async fn open(file: &Path) -> Result<Self, String> {
        let manifest = Manifest::load(file).map_err(|e| e.to_string())?;
        let settings = &manifest.settings;

        let sandbox = SandboxDatabases::open(&settings.sandbox_path)
            .map_err(|e| format!("Failed to open sandbox {}: {}", settings.sandbox_path, e))?;
        for cluster_id in manifest.cluster_ids() {
            sandbox
                .add_cluster(cluster_id)
                .map_err(|e| format!("Failed to register cluster {}: {}", cluster_id, e))?;
        }

        let reconciler = Reconciler::new(LogsinkApi::new(sandbox), Arc::new(KeyedLockTable::new()))
            .with_config(settings.reconciler.clone());

        let backend = create_backend(&BackendConfig::local(settings.state_path.clone()))
            .map_err(|e| e.to_string())?;
        backend.init().await.map_err(|e| e.to_string())?;

        Ok(Self {
            manifest,
            reconciler: Arc::new(reconciler),
            backend,
        })
    }

    async fn read_state(&self) -> Result<StateFile, String> {
        Ok(self
            .backend
            .read_state()
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?
            .unwrap_or_default())
    }

    async fn write_state(&self, state: &mut StateFile) -> Result<(), String> {
        state.increment_serial();
        self.backend
            .write_state(state)
            .await
            .map_err(|e| format!("Failed to write state: {}", e))
    }

    async fn acquire_lock(&self, operation: &str) -> Result<LockInfo, String> {
        let lock = self
            .backend
            .acquire_lock(operation)
            .await
            .map_err(|e| e.to_string())?;
        debug!("Holding state lock {}", lock);
        Ok(lock)
    }

    /// Release `lock`, keeping the command's own error if it failed first
    async fn release_lock<T>(&self, lock: &LockInfo, result: Result<T, String>) -> Result<T, String> {
        let released = self.backend.release_lock(lock).await.map_err(|e| e.to_string());
        finish_locked(result, released)
    }

    /// Read every recorded log sink, dropping the ones that vanished remotely
    async fn refresh(&self, state: &mut StateFile) -> Result<Vec<ResourceRecord>, String> {
        let records = state
            .records(LOGSINK_KIND.name)
            .map_err(|e| format!("Failed to load state: {}", e))?;

        let mut live = Vec::with_capacity(records.len());
        for mut record in records {
            let stored_as = record.local_id.clone();
            let outcome = self
                .reconciler
                .read(&mut record)
                .await
                .map_err(|e| e.to_string())?;
            if outcome == ReadOutcome::Gone {
                println!(
                    "  {} {}/{} no longer exists, removed from state",
                    "!".yellow().bold(),
                    record.parent_id,
                    record.name
                );
            }
            state
                .sync_record(LOGSINK_KIND.name, stored_as.as_ref(), &record)
                .map_err(|e| format!("Failed to update state: {}", e))?;
            if outcome == ReadOutcome::Present {
                live.push(record);
            }
        }
        Ok(live)
    }
}

async fn run_plan(file: &Path) -> Result<(), String> {
    let session = Session::open(file).await?;
    let mut state = session.read_state().await?;
    let records = session.refresh(&mut state).await?;

    let plan = create_plan(&LOGSINK_KIND, &session.manifest.specs(), &records);
    print_plan(&plan);
    Ok(())
}

async fn run_apply(file: &Path) -> Result<(), String> {
    let session = Session::open(file).await?;
    let lock = session.acquire_lock("apply").await?;
    let result = apply_locked(&session).await;
    session.release_lock(&lock, result).await
}

async fn apply_locked(session: &Session) -> Result<(), String> {
    let mut state = session.read_state().await?;
    let records = session.refresh(&mut state).await?;
    let plan = create_plan(&LOGSINK_KIND, &session.manifest.specs(), &records);

    if plan.is_empty() {
        session.write_state(&mut state).await?;
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan);
    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let outcomes = apply_plan(Arc::clone(&session.reconciler), plan).await;
    let result = report_outcomes(&mut state, &outcomes, "Apply");
    session.write_state(&mut state).await?;
    result
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let session = Session::open(file).await?;
    let lock = session.acquire_lock("destroy").await?;
    let result = destroy_locked(&session, auto_approve).await;
    session.release_lock(&lock, result).await
}

async fn destroy_locked(session: &Session, auto_approve: bool) -> Result<(), String> {
    let mut state = session.read_state().await?;
    let records = session.refresh(&mut state).await?;

    let plan = destroy_plan(&records);
    if plan.is_empty() {
        session.write_state(&mut state).await?;
        println!("{}", "No log sinks recorded in state.".yellow());
        return Ok(());
    }

    print_plan(&plan);
    println!();

    if !auto_approve {
        println!(
            "{}",
            "This action cannot be undone. Type 'yes' to confirm.".yellow()
        );
        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| format!("Failed to read input: {}", e))?;
        if input.trim() != "yes" {
            session.write_state(&mut state).await?;
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
    }

    println!("{}", "Destroying log sinks...".red().bold());
    println!();

    let outcomes = apply_plan(Arc::clone(&session.reconciler), plan).await;
    let result = report_outcomes(&mut state, &outcomes, "Destroy");
    session.write_state(&mut state).await?;
    result
}

async fn run_refresh(file: &Path) -> Result<(), String> {
    let session = Session::open(file).await?;
    let lock = session.acquire_lock("refresh").await?;
    let result = refresh_locked(&session).await;
    session.release_lock(&lock, result).await
}

async fn refresh_locked(session: &Session) -> Result<(), String> {
    let mut state = session.read_state().await?;
    let records = session.refresh(&mut state).await?;
    session.write_state(&mut state).await?;
    println!(
        "{}",
        format!("Refresh complete! {} log sinks in state.", records.len())
            .green()
            .bold()
    );
    Ok(())
}

async fn run_import(file: &Path, key: &str) -> Result<(), String> {
    let session = Session::open(file).await?;
    let lock = session.acquire_lock("import").await?;
    let result = import_locked(&session, key).await;
    session.release_lock(&lock, result).await
}

async fn import_locked(session: &Session, key: &str) -> Result<(), String> {
    let mut record = session.reconciler.import(key).map_err(|e| e.to_string())?;
    let mut state = session.read_state().await?;
    let outcome = session
        .reconciler
        .read(&mut record)
        .await
        .map_err(|e| e.to_string())?;
    if outcome == ReadOutcome::Gone {
        return Err(format!(
            "Cannot import {}: no log sink named '{}' in cluster {}",
            key, record.name, record.parent_id
        ));
    }

    state
        .sync_record(LOGSINK_KIND.name, record.local_id.as_ref(), &record)
        .map_err(|e| format!("Failed to update state: {}", e))?;
    session.write_state(&mut state).await?;
    println!(
        "{}",
        format!(
            "Imported {}.{} ({})",
            LOGSINK_KIND.name,
            record.name,
            record.remote_identifier()
        )
        .green()
        .bold()
    );
    Ok(())
}

/// Outcome of a command run under the state lock, once the lock is released
fn finish_locked<T>(result: Result<T, String>, released: Result<(), String>) -> Result<T, String> {
    match (result, released) {
        (result, Ok(())) => result,
        (Ok(_), Err(e)) => Err(format!("Failed to release state lock: {}", e)),
        (Err(cmd_err), Err(e)) => Err(format!(
            "{}; also failed to release state lock: {}",
            cmd_err, e
        )),
    }
}

/// Fold outcomes into `state` and print one line per effect
fn report_outcomes(state: &mut StateFile, outcomes: &[EffectOutcome], action: &str) -> Result<(), String> {
    let mut success_count = 0;
    let mut failure_count = 0;

    for outcome in outcomes {
        match &outcome.result {
            Ok(Applied::Record(record)) => {
                match state.sync_record(LOGSINK_KIND.name, record.local_id.as_ref(), record) {
                    Ok(()) => {
                        println!("  {} {}", "✓".green(), outcome.effect);
                        success_count += 1;
                    }
                    Err(e) => {
                        println!("  {} {} - not saved to state: {}", "✗".red(), outcome.effect, e);
                        failure_count += 1;
                    }
                }
            }
            Ok(Applied::Removed { local_id, .. }) => {
                if let Some(local_id) = local_id {
                    state.remove_resource(LOGSINK_KIND.name, local_id.as_str());
                }
                println!("  {} {}", "✓".green(), outcome.effect);
                success_count += 1;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), outcome.effect, e);
                failure_count += 1;
            }
        }
    }

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("{} complete! {} changes applied.", action, success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        println!(
            "{}",
            format!(
                "{} failed. {} succeeded, {} failed.",
                action, success_count, failure_count
            )
            .red()
            .bold()
        );
        Err(format!("{} effects failed", failure_count))
    }
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Log sinks are up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    // Group effects under their cluster
    let mut by_parent: BTreeMap<&str, Vec<&Effect>> = BTreeMap::new();
    for effect in plan.effects() {
        by_parent.entry(effect.parent_id()).or_default().push(effect);
    }

    for (parent_id, effects) in by_parent {
        println!(
            "  {} {}",
            LOGSINK_KIND.parent_kind.cyan().bold(),
            parent_id
        );
        for (i, effect) in effects.iter().enumerate() {
            let is_last = i + 1 == effects.len();
            let connector = if is_last { "└─" } else { "├─" };
            let continuation = if is_last { "   " } else { "│  " };
            print_effect(effect, connector, continuation);
        }
        println!();
    }

    println!("{}", plan.summary().to_string().bold());
}

fn print_effect(effect: &Effect, connector: &str, continuation: &str) {
    let attr_prefix = format!("  {}   ", continuation);
    match effect {
        Effect::Create(spec) => {
            println!("  {} {} {}", connector, "+".green().bold(), spec.name.bold());
            print_attributes(&spec.attributes, &attr_prefix);
        }
        Effect::Update {
            record,
            to,
            changed_attributes,
        } => {
            println!("  {} {} {}", connector, "~".yellow().bold(), record.name.bold());
            let current = record.current_attributes();
            for key in changed_attributes {
                let from = current.get(key).map(format_value).unwrap_or_else(|| "(none)".to_string());
                let to = to.attributes.get(key).map(format_value).unwrap_or_else(|| "(none)".to_string());
                println!(
                    "{}{}: {} → {}",
                    attr_prefix,
                    key,
                    from.red(),
                    to.green()
                );
            }
        }
        Effect::Delete(record) => {
            println!("  {} {} {}", connector, "-".red().bold(), record.name.strikethrough());
        }
    }
}

fn print_attributes(attributes: &std::collections::HashMap<String, Value>, prefix: &str) {
    let mut keys: Vec<_> = attributes.keys().collect();
    keys.sort();
    for key in keys {
        println!("{}{}: {}", prefix, key, format_value(&attributes[key]));
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("\"{}\"", s),
        Value::List(items) => {
            let items: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let entries: Vec<_> = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_failure_keeps_command_error() {
        let ok: Result<(), String> = finish_locked(Ok(()), Ok(()));
        assert!(ok.is_ok());

        let err = finish_locked::<()>(Ok(()), Err("lock file gone".to_string())).unwrap_err();
        assert_eq!(err, "Failed to release state lock: lock file gone");

        let err = finish_locked::<()>(Err("apply failed".to_string()), Ok(())).unwrap_err();
        assert_eq!(err, "apply failed");

        let err = finish_locked::<()>(
            Err("apply failed".to_string()),
            Err("lock file gone".to_string()),
        )
        .unwrap_err();
        assert_eq!(err, "apply failed; also failed to release state lock: lock file gone");
    }

    #[tokio::test]
    async fn session_reports_both_errors_when_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("moorage.json");
        let manifest = serde_json::json!({
            "settings": {
                "state_path": dir.path().join("moorage.state.json"),
                "sandbox_path": dir.path().join("moorage.sandbox.json"),
            },
            "log_sinks": [
                {"name": "app", "cluster_id": "c1", "type": "rsyslog"}
            ]
        });
        std::fs::write(&manifest_path, manifest.to_string()).unwrap();

        let session = Session::open(&manifest_path).await.unwrap();
        let lock = session.acquire_lock("apply").await.unwrap();
        session.backend.force_unlock(&lock.id).await.unwrap();

        let err = session
            .release_lock::<()>(&lock, Err("apply failed".to_string()))
            .await
            .unwrap_err();
        assert!(err.starts_with("apply failed; also failed to release state lock:"));
    }
}
