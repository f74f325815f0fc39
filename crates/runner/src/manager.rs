//! Session pool: spawn, reuse, terminate, reap.
//!
//! Each session owns one child process. The map entry is an
//! `Arc<tokio::sync::Mutex<CcSession>>`; locking it is the per-session
//! mutex that serialises concurrent Execute calls and protects teardown.
//! Termination always signals the whole process group: children of the CLI
//! (subshells, build tools) must not outlive it.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use av_domain::config::RunnerConfig;
use av_domain::error::{Error, Result};
use av_domain::trace::TraceEvent;

use crate::session::{CcSession, SessionState};
use crate::stream::{decode_line, ChildLine};

pub struct SessionManager {
    config: RunnerConfig,
    sessions: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<CcSession>>>>,
    /// Session ids spawned at least once in this process: the next spawn
    /// passes `--resume` so the CLI restores its on-disk state.
    spawned_before: Mutex<HashSet<Uuid>>,
}

impl SessionManager {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            spawned_before: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn get(&self, session_id: &Uuid) -> Option<Arc<tokio::sync::Mutex<CcSession>>> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Get the live session or spawn a new child for it.
    /// Returns `(session, created)`. The map lock is held across the
    /// (synchronous) spawn so two concurrent calls cannot double-spawn.
    pub fn get_or_create(
        &self,
        session_id: Uuid,
        workdir: &std::path::Path,
    ) -> Result<(Arc<tokio::sync::Mutex<CcSession>>, bool)> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&session_id) {
            return Ok((existing.clone(), false));
        }

        let session = self.spawn_session(session_id, workdir)?;
        let arc = Arc::new(tokio::sync::Mutex::new(session));
        sessions.insert(session_id, arc.clone());
        Ok((arc, true))
    }

    /// Drop a dead session's entry so the next Execute respawns.
    pub fn forget(&self, session_id: &Uuid) {
        self.sessions.lock().remove(session_id);
    }

    // ── spawn ──────────────────────────────────────────────────────

    fn spawn_session(&self, session_id: Uuid, workdir: &std::path::Path) -> Result<CcSession> {
        std::fs::create_dir_all(workdir).map_err(Error::Io)?;

        let resume = !self.spawned_before.lock().insert(session_id);
        let id_str = session_id.to_string();

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--print").arg("--output-format").arg("stream-json");
        if resume {
            cmd.arg("--resume").arg(&id_str);
        } else {
            cmd.arg("--session-id").arg(&id_str);
        }
        cmd.current_dir(workdir);
        // Headless, telemetry off. The rest of the environment is inherited
        // so the CLI finds its own credentials and caches.
        cmd.env("CLAUDE_DISABLE_TELEMETRY", "1");
        cmd.env("CLAUDE_HEADLESS", "1");
        cmd.env_remove("CLAUDE_TELEMETRY_ENDPOINT");
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Own process group so teardown can kill the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::session(
                id_str.clone(),
                format!("spawning {}: {e}", self.config.binary),
            )
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::session(id_str.clone(), "child exited before pid was read"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::session(id_str.clone(), "child stdout not piped"))?;
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        // Stdout reader: decode JSONL into the session's line channel.
        // Exits on EOF or when the session (receiver) is dropped.
        let (line_tx, line_rx) = mpsc::channel::<ChildLine>(256);
        let reader_id = id_str.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(decoded) = decode_line(&line) {
                            if line_tx.send(decoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(session_id = %reader_id, error = %e, "stdout read failed");
                        break;
                    }
                }
            }
            tracing::debug!(session_id = %reader_id, "stdout reader exited");
        });

        // Stderr reader: log only.
        if let Some(stderr) = stderr {
            let stderr_id = id_str.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(session_id = %stderr_id, "cc stderr: {line}");
                }
            });
        }

        TraceEvent::SessionSpawned {
            session_id: id_str,
            pid,
            workdir: workdir.display().to_string(),
        }
        .emit();

        Ok(CcSession {
            session_id,
            pid,
            state: SessionState::Ready,
            last_activity: Instant::now(),
            child,
            stdin,
            lines: line_rx,
        })
    }

    // ── teardown ───────────────────────────────────────────────────

    /// Terminate a session: close stdin, SIGTERM the process group, wait
    /// out the grace window, SIGKILL what is left.
    pub async fn terminate_session(&self, session_id: &Uuid) -> Result<()> {
        let Some(arc) = self.sessions.lock().remove(session_id) else {
            return Err(Error::session(
                session_id.to_string(),
                "session not found",
            ));
        };

        let mut session = arc.lock().await;
        session.state = SessionState::Terminating;

        // Closing stdin first signals clean shutdown for CLIs that support it.
        session.stdin.take();

        let pid = session.pid;
        group_signal_term(pid);

        let grace = Duration::from_secs(self.config.terminate_grace_secs);
        let graceful = matches!(
            tokio::time::timeout(grace, session.child.wait()).await,
            Ok(Ok(_))
        );

        if !graceful {
            group_signal_kill(pid);
            let _ = session.child.wait().await;
        }

        session.state = SessionState::Dead;
        TraceEvent::SessionTerminated {
            session_id: session_id.to_string(),
            graceful,
        }
        .emit();
        Ok(())
    }

    pub async fn terminate_all(&self) {
        let ids: Vec<Uuid> = self.sessions.lock().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.terminate_session(&id).await {
                tracing::warn!(session_id = %id, error = %e, "terminate failed during shutdown");
            }
        }
    }

    // ── idle reaper ────────────────────────────────────────────────

    /// Background task evicting sessions idle past the TTL. Exits when
    /// `cancel` fires.
    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(manager.config.reaper_interval_secs.max(1));
            let ttl = manager.config.idle_ttl_secs;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let candidates: Vec<(Uuid, u64)> = {
                    let sessions = manager.sessions.lock();
                    sessions
                        .iter()
                        .filter_map(|(id, arc)| {
                            // A locked session is mid-Execute, never idle.
                            let session = arc.try_lock().ok()?;
                            let idle = session.idle_secs();
                            (session.state == SessionState::Ready && idle >= ttl)
                                .then_some((*id, idle))
                        })
                        .collect()
                };

                for (id, idle_secs) in candidates {
                    TraceEvent::SessionReaped {
                        session_id: id.to_string(),
                        idle_secs,
                    }
                    .emit();
                    if let Err(e) = manager.terminate_session(&id).await {
                        tracing::warn!(session_id = %id, error = %e, "reaper terminate failed");
                    }
                }
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process-group signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(unix)]
fn group_signal_term(pid: u32) {
    // SAFETY: signals the process group created via process_group(0); the
    // negative pid targets every process in the group.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(unix)]
fn group_signal_kill(pid: u32) {
    // SAFETY: same rationale — targets the group, not just the leader.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn group_signal_term(_pid: u32) {}

#[cfg(not(unix))]
fn group_signal_kill(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use av_domain::block::Mode;
    use crate::session::session_id_for;

    fn manager_with_fake_cli(dir: &std::path::Path) -> Arc<SessionManager> {
        // A stand-in CLI: echoes a result line for every stdin line.
        let script = dir.join("fake-cc.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nwhile read -r line; do\n  echo '{\"type\":\"answer\",\"content\":\"ok\"}'\n  echo '{\"type\":\"result\"}'\ndone\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = RunnerConfig {
            binary: script.display().to_string(),
            workdir_root: dir.join("work"),
            terminate_grace_secs: 2,
            ..RunnerConfig::default()
        };
        Arc::new(SessionManager::new(config))
    }

    #[tokio::test]
    async fn reuse_keeps_the_same_pid() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_fake_cli(dir.path());
        let id = session_id_for(1, 100, Mode::Geek);
        let work = dir.path().join("work");

        let (first, created) = manager.get_or_create(id, &work).unwrap();
        assert!(created);
        let pid1 = first.lock().await.pid;

        let (second, created) = manager.get_or_create(id, &work).unwrap();
        assert!(!created);
        let pid2 = second.lock().await.pid;
        assert_eq!(pid1, pid2);

        manager.terminate_all().await;
    }

    #[tokio::test]
    async fn terminate_removes_and_next_create_respawns() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_fake_cli(dir.path());
        let id = session_id_for(1, 100, Mode::Geek);
        let work = dir.path().join("work");

        let (first, _) = manager.get_or_create(id, &work).unwrap();
        let pid1 = first.lock().await.pid;
        drop(first);

        manager.terminate_session(&id).await.unwrap();
        assert_eq!(manager.session_count(), 0);

        let (second, created) = manager.get_or_create(id, &work).unwrap();
        assert!(created);
        let pid2 = second.lock().await.pid;
        assert_ne!(pid1, pid2);

        manager.terminate_all().await;
    }

    #[tokio::test]
    async fn terminate_unknown_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_fake_cli(dir.path());
        let id = session_id_for(9, 9, Mode::Geek);
        assert!(manager.terminate_session(&id).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn group_kill_takes_down_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        // This CLI spawns a 60s sleeper into the same process group.
        let script = dir.path().join("fake-cc.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nsleep 60 &\necho $! > \"$GRANDCHILD_PID_FILE\"\nwhile read -r line; do :; done\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let pid_file = dir.path().join("grandchild.pid");
        std::env::set_var("GRANDCHILD_PID_FILE", &pid_file);

        let config = RunnerConfig {
            binary: script.display().to_string(),
            workdir_root: dir.path().join("work"),
            terminate_grace_secs: 2,
            ..RunnerConfig::default()
        };
        let manager = Arc::new(SessionManager::new(config));
        let id = session_id_for(1, 1, Mode::Geek);
        let work = dir.path().join("work");
        let _ = manager.get_or_create(id, &work).unwrap();

        // Wait for the grandchild pid to land on disk.
        let mut grandchild = 0i32;
        for _ in 0..50 {
            if let Ok(raw) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = raw.trim().parse::<i32>() {
                    grandchild = pid;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(grandchild > 0, "grandchild never reported its pid");

        manager.terminate_session(&id).await.unwrap();

        // The sleeper must be gone within the grace window.
        let mut gone = false;
        for _ in 0..30 {
            let alive = unsafe { libc::kill(grandchild, 0) == 0 };
            if !alive {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(gone, "grandchild survived group kill");
    }
}
