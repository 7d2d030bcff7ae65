use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::path::Path;

/// Tag appended to the hook command so our entries can be found and
/// removed without touching anything the user configured themselves
const HOOK_MARKER: &str = "# agrelay-hook";

fn settings_path(log_root: &Path) -> std::path::PathBuf {
    log_root.join("settings.json")
}

fn hook_command(endpoint: &str, token: &str) -> String {
    format!(
        "curl -sf -m 5 -X POST -H 'Content-Type: application/json' \
         -H 'Authorization: Bearer {}' --data-binary @- {} {}",
        token, endpoint, HOOK_MARKER
    )
}

fn entry_is_ours(entry: &Value) -> bool {
    entry["hooks"]
        .as_array()
        .is_some_and(|hooks| {
            hooks.iter().any(|hook| {
                hook["command"]
                    .as_str()
                    .is_some_and(|cmd| cmd.contains(HOOK_MARKER))
            })
        })
}

fn read_settings(path: &Path) -> Value {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_else(|| json!({}))
}

/// Register the Notification hook that makes terminal agents announce
/// their permission prompts to the daemon. Idempotent.
pub fn install(log_root: &Path, endpoint: &str, token: &str) -> Result<()> {
    let path = settings_path(log_root);
    let mut settings = read_settings(&path);

    let notification = settings
        .as_object_mut()
        .context("agent settings file is not a JSON object")?
        .entry("hooks")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .context("hooks section is not a JSON object")?
        .entry("Notification")
        .or_insert_with(|| json!([]));

    let entries = notification
        .as_array_mut()
        .context("Notification hooks are not a JSON array")?;

    if entries.iter().any(entry_is_ours) {
        return Ok(());
    }

    entries.push(json!({
        "hooks": [{
            "type": "command",
            "command": hook_command(endpoint, token),
        }],
    }));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&settings)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Remove our hook entries, leaving everything else untouched. Idempotent.
pub fn uninstall(log_root: &Path) -> Result<()> {
    let path = settings_path(log_root);
    if !path.exists() {
        return Ok(());
    }
    let mut settings = read_settings(&path);

    let Some(entries) = settings
        .get_mut("hooks")
        .and_then(|hooks| hooks.get_mut("Notification"))
        .and_then(Value::as_array_mut)
    else {
        return Ok(());
    };

    entries.retain(|entry| !entry_is_ours(entry));

    std::fs::write(&path, serde_json::to_string_pretty(&settings)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn install_is_idempotent_and_uninstall_removes_only_ours() {
        let tmp = TempDir::new().unwrap();

        // Pre-existing user hook must survive
        std::fs::write(
            tmp.path().join("settings.json"),
            serde_json::to_string(&json!({
                "hooks": {"Notification": [
                    {"hooks": [{"type": "command", "command": "notify-send done"}]},
                ]},
                "model": "sonnet",
            }))
            .unwrap(),
        )
        .unwrap();

        install(tmp.path(), "http://127.0.0.1:8787/api/claude-hook", "tok").unwrap();
        install(tmp.path(), "http://127.0.0.1:8787/api/claude-hook", "tok").unwrap();

        let settings = read_settings(&tmp.path().join("settings.json"));
        assert_eq!(settings["hooks"]["Notification"].as_array().unwrap().len(), 2);
        assert_eq!(settings["model"], "sonnet");

        uninstall(tmp.path()).unwrap();
        let settings = read_settings(&tmp.path().join("settings.json"));
        let entries = settings["hooks"]["Notification"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0]["hooks"][0]["command"].as_str().unwrap(),
            "notify-send done"
        );
    }

    #[test]
    fn install_creates_settings_when_absent() {
        let tmp = TempDir::new().unwrap();
        install(tmp.path(), "http://127.0.0.1:8787/api/claude-hook", "tok").unwrap();

        let settings = read_settings(&tmp.path().join("settings.json"));
        let entries = settings["hooks"]["Notification"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entry_is_ours(&entries[0]));
    }
}
