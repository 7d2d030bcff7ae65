/// Flag that marks a child as parented by an agrelay daemon: its
/// permission prompts go to stdio, so without a daemon on the other end
/// it is blocked forever.
pub const PERMISSION_PROMPT_FLAG: &str = "--permission-prompt-tool";

/// Terminate agent children left behind by a previous daemon instance.
///
/// Scans the process table for live processes whose cmdline carries the
/// stdio permission-prompt flag and SIGTERMs them. Runs before any
/// session is served. Returns how many processes were signalled.
#[cfg(unix)]
pub fn sweep_orphans(binary_name: &str) -> usize {
    use tracing::info;

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };

    let own_pid = std::process::id();
    let mut swept = 0;

    for entry in entries.filter_map(|e| e.ok()) {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        // cmdline is NUL-separated argv
        let argv: Vec<&str> = raw
            .split(|b| *b == 0)
            .filter_map(|part| std::str::from_utf8(part).ok())
            .filter(|part| !part.is_empty())
            .collect();

        let Some(argv0) = argv.first() else {
            continue;
        };
        let is_agent = argv0
            .rsplit('/')
            .next()
            .is_some_and(|name| name == binary_name);

        if is_agent && argv.iter().any(|arg| *arg == PERMISSION_PROMPT_FLAG) {
            info!(pid, "terminating orphaned agent child from a previous daemon");
            // SAFETY: plain SIGTERM to a pid we just read from /proc
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            swept += 1;
        }
    }

    swept
}

#[cfg(not(unix))]
pub fn sweep_orphans(_binary_name: &str) -> usize {
    0
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn sweep_with_no_orphans_is_quiet() {
        // No process named like this exists; the scan completes and
        // signals nothing
        assert_eq!(sweep_orphans("definitely-not-a-real-agent-binary"), 0);
    }
}
