use serde::Serialize;

/// Structured trace events emitted across all aviary crates.
///
/// These complement free-form `tracing` logs: each lifecycle transition is
/// a typed record so tests and dashboards can assert on them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RouteDecided {
        conversation_id: i64,
        route: String,
        method: String,
        confidence: f64,
        needs_orchestration: bool,
    },
    BlockCreated {
        block_id: String,
        conversation_id: i64,
        round_number: u32,
        mode: String,
    },
    BlockStatusChanged {
        block_id: String,
        from: String,
        to: String,
    },
    SessionSpawned {
        session_id: String,
        pid: u32,
        workdir: String,
    },
    SessionReused {
        session_id: String,
        pid: u32,
    },
    SessionTerminated {
        session_id: String,
        graceful: bool,
    },
    SessionReaped {
        session_id: String,
        idle_secs: u64,
    },
    StatsDropped {
        session_id: String,
        reason: String,
    },
    StatsDrained {
        saved: usize,
        lost: usize,
    },
    MemoryStored {
        user_id: i64,
        agent_type: String,
        summary_source: String,
    },
    CacheHit {
        parrot: String,
        fingerprint: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "av_event");
    }
}
