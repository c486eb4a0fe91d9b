use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use autopage_core::types::ExecutionMode;
use autopage_core::Config;
use autopage_dsl::Command;
use autopage_engine::{ExecRequest, Orchestrator, ScriptSource};
use autopage_memory::{ActivityLog, ProcedureScope, ProcedureStore, SqliteStore};
use tracing::warn;

/// `.json` scripts are structured; anything else goes through the text DSL.
fn script_source(path: &Path) -> anyhow::Result<ScriptSource> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let raw = serde_json::from_str(&content)
            .with_context(|| format!("Script {} is not valid JSON", path.display()))?;
        Ok(ScriptSource::Structured(raw))
    } else {
        Ok(ScriptSource::Text(content))
    }
}

fn compile_source(source: &ScriptSource) -> autopage_core::Result<Vec<Command>> {
    match source {
        ScriptSource::Structured(raw) => autopage_dsl::compile_from_structured(raw),
        ScriptSource::Text(text) => autopage_dsl::compile_from_text(text),
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let db_path = expand_home(&config.storage.db_path);
    Ok(Arc::new(SqliteStore::open(&db_path)?))
}

pub fn compile(script: &Path, as_json: bool) -> anyhow::Result<()> {
    let source = script_source(script)?;
    let commands = compile_source(&source)?;

    if as_json {
        let wire = autopage_dsl::commands_to_wire(&commands);
        println!("{}", serde_json::to_string_pretty(&wire)?);
    } else {
        for (index, command) in commands.iter().enumerate() {
            println!("{:>3}. {:<18} {}", index + 1, command.kind(), command.args());
        }
        println!("{} command(s)", commands.len());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: Config,
    script: Option<&Path>,
    instructions: Option<String>,
    mode: Option<String>,
    targets: Vec<String>,
    timeout_ms: Option<u64>,
    user: &str,
    task_key: Option<String>,
) -> anyhow::Result<()> {
    if script.is_none() && instructions.is_none() {
        bail!("Nothing to run: pass a script file or --instructions");
    }

    let mode = match mode.as_deref() {
        None => None,
        Some(raw) => match ExecutionMode::from_str(raw) {
            Some(m) => Some(m),
            None => bail!("Unknown mode '{}': expected simple or complex", raw),
        },
    };

    let task_key = task_key.unwrap_or_else(|| {
        script
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .unwrap_or("adhoc")
            .to_string()
    });

    let mut request = ExecRequest::new(&task_key, user);
    request.instructions = instructions;
    request.targets = targets;
    request.mode = mode;
    request.timeout_ms = timeout_ms;
    request.script = match script {
        Some(path) => Some(script_source(path)?),
        None => None,
    };

    let orchestrator = Orchestrator::new(config.clone());
    let execution = orchestrator.execute(request).await;

    // Failures are data; logging them must not eat the result either.
    match open_store(&config) {
        Ok(store) => {
            let backend = if execution.trace.is_some() { "local" } else { "remote" };
            if let Err(e) =
                ActivityLog::new(store).record_execution(user, &task_key, backend, &execution.result)
            {
                warn!(error = %e, "Failed to record task activity");
            }
        }
        Err(e) => warn!(error = %e, "Failed to open the item store"),
    }

    println!("{}", serde_json::to_string_pretty(&execution.result)?);
    Ok(())
}

fn parse_scope(raw: &str) -> anyhow::Result<ProcedureScope> {
    match raw {
        "user" => Ok(ProcedureScope::User),
        "project" => Ok(ProcedureScope::Project),
        "global" => Ok(ProcedureScope::Global),
        other => bail!("Unknown scope '{}': expected user, project, or global", other),
    }
}

pub fn procedures_list(config: &Config) -> anyhow::Result<()> {
    let store = ProcedureStore::new(open_store(config)?);
    let records = store.list_procedures()?;
    if records.is_empty() {
        println!("No procedures stored.");
        return Ok(());
    }
    for record in records {
        println!(
            "{:<30} scope={:<8} v{} ({} version(s))",
            record.task_key,
            record.scope.as_str(),
            record.active_version,
            record.versions.len()
        );
    }
    Ok(())
}

pub fn procedures_show(
    config: &Config,
    task_key: &str,
    user: &str,
    scope: &str,
) -> anyhow::Result<()> {
    let store = ProcedureStore::new(open_store(config)?);
    let scope = parse_scope(scope)?;
    match store.load_procedure(user, task_key, scope)? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => bail!("No procedure stored for '{}' in {} scope", task_key, scope.as_str()),
    }
}
