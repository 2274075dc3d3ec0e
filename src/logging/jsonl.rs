//! JSONL writer for tab events.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::coordination::IdleSnapshot;
use crate::engine::TabEvent;
use crate::idle::IdleEvent;

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    #[serde(rename = "session_start")]
    SessionStart {
        timestamp: DateTime<Utc>,
        version: String,
        session: String,
        tab_id: String,
    },
    #[serde(rename = "session_end")]
    SessionEnd {
        timestamp: DateTime<Utc>,
        tab_id: String,
        active_duration_seconds: u64,
        total_idle_seconds: u64,
    },
    #[serde(rename = "prompt")]
    Prompt {
        timestamp: DateTime<Utc>,
        tab_id: String,
        remaining_ms: u64,
    },
    #[serde(rename = "idle_start")]
    IdleStart {
        timestamp: DateTime<Utc>,
        tab_id: String,
        leader: bool,
    },
    #[serde(rename = "idle_end")]
    IdleEnd {
        timestamp: DateTime<Utc>,
        tab_id: String,
        idle_duration_seconds: u64,
    },
    #[serde(rename = "leader_acquired")]
    LeaderAcquired {
        timestamp: DateTime<Utc>,
        tab_id: String,
    },
    #[serde(rename = "leader_lost")]
    LeaderLost {
        timestamp: DateTime<Utc>,
        tab_id: String,
    },
    #[serde(rename = "store_degraded")]
    StoreDegraded {
        timestamp: DateTime<Utc>,
        tab_id: String,
        reason: String,
    },
}

/// JSONL logger for tab events, one file per local day.
pub struct JsonlLogger {
    logs_dir: PathBuf,
    tab_id: String,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
}

impl JsonlLogger {
    /// Create a new JSONL logger for one tab.
    pub fn new(logs_dir: PathBuf, tab_id: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        Ok(Self {
            logs_dir,
            tab_id: tab_id.into(),
            current_file: None,
            current_date: None,
        })
    }

    /// Get or create the log file for today.
    fn get_writer(&mut self) -> Result<&mut BufWriter<File>> {
        let today = Local::now().format("%Y-%m-%d").to_string();

        if self.current_date.as_ref() != Some(&today) {
            let log_path = self.logs_dir.join(format!("{}.jsonl", today));

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

            self.current_file = Some(BufWriter::new(file));
            self.current_date = Some(today);

            debug!("Opened log file: {:?}", log_path);
        }

        self.current_file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No log file available"))
    }

    /// Write a line to the JSONL log.
    pub fn write_line<T: Serialize>(&mut self, entry: &T) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let writer = self.get_writer()?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    /// Log session start event.
    pub fn log_session_start(&mut self, version: &str, session: &str) -> Result<()> {
        let event = SessionEvent::SessionStart {
            timestamp: Utc::now(),
            version: version.to_string(),
            session: session.to_string(),
            tab_id: self.tab_id.clone(),
        };
        info!("Session {:?} started in tab {}", session, self.tab_id);
        self.write_line(&event)
    }

    /// Log session end event with the final counters.
    pub fn log_session_end(&mut self, snapshot: &IdleSnapshot) -> Result<()> {
        let event = SessionEvent::SessionEnd {
            timestamp: Utc::now(),
            tab_id: self.tab_id.clone(),
            active_duration_seconds: snapshot.active_duration_sec,
            total_idle_seconds: snapshot.total_idle_duration_sec,
        };
        info!(
            "Session ended: {}s active, {}s idle",
            snapshot.active_duration_sec, snapshot.total_idle_duration_sec
        );
        self.write_line(&event)
    }

    /// Log a tab event. `leader` and `remaining_ms` describe the tab when the
    /// event was handled.
    pub fn log_tab_event(&mut self, event: &TabEvent, leader: bool, remaining_ms: u64) -> Result<()> {
        let timestamp = Utc::now();
        let tab_id = self.tab_id.clone();
        let entry = match event {
            TabEvent::Idle(IdleEvent::Prompted) => SessionEvent::Prompt {
                timestamp,
                tab_id,
                remaining_ms,
            },
            TabEvent::Idle(IdleEvent::Idle) => SessionEvent::IdleStart {
                timestamp,
                tab_id,
                leader,
            },
            TabEvent::Idle(IdleEvent::Active { idle_duration_secs }) => SessionEvent::IdleEnd {
                timestamp,
                tab_id,
                idle_duration_seconds: *idle_duration_secs,
            },
            TabEvent::LeadershipAcquired => SessionEvent::LeaderAcquired { timestamp, tab_id },
            TabEvent::LeadershipLost => SessionEvent::LeaderLost { timestamp, tab_id },
            TabEvent::StoreDegraded { reason } => SessionEvent::StoreDegraded {
                timestamp,
                tab_id,
                reason: reason.clone(),
            },
        };
        self.write_line(&entry)
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        // Flush any remaining data
        if let Some(ref mut writer) = self.current_file {
            let _ = writer.flush();
        }
    }
}
