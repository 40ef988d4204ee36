//! Supported CLI coding agents

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, SupervisorError};

/// CLI agents the supervisor knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Opencode,
}

/// Every supported agent, in display order
pub const SUPPORTED_AGENTS: [AgentKind; 4] = [
    AgentKind::Claude,
    AgentKind::Codex,
    AgentKind::Gemini,
    AgentKind::Opencode,
];

impl AgentKind {
    /// Parse an agent name from user input
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "claude" | "claude-code" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" | "gemini-cli" => Ok(Self::Gemini),
            "opencode" => Ok(Self::Opencode),
            _ => Err(SupervisorError::ExecutorUnavailable {
                agent: s.to_string(),
            }),
        }
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Opencode => "opencode",
        }
    }

    /// Executable name on PATH
    pub fn command(&self) -> &'static str {
        self.as_str()
    }

    /// Arguments for one-shot headless execution
    pub fn headless_args(&self) -> Vec<&'static str> {
        match self {
            Self::Claude => vec!["-p"],
            Self::Codex => vec!["exec"],
            Self::Gemini => vec!["-p"],
            Self::Opencode => vec!["run"],
        }
    }

    /// Check whether the agent binary is on PATH
    pub fn is_installed(&self) -> bool {
        find_in_path(self.command()).is_some()
    }

    /// Error unless the binary is installed; checked before any spawn or
    /// PTY write so a failed dispatch has no partial side effects
    pub fn require_installed(&self) -> Result<()> {
        if self.is_installed() {
            Ok(())
        } else {
            Err(SupervisorError::ExecutorUnavailable {
                agent: self.as_str().to_string(),
            })
        }
    }
}

/// Agents whose binary is currently on PATH
pub fn installed_agents() -> Vec<AgentKind> {
    SUPPORTED_AGENTS
        .iter()
        .copied()
        .filter(|a| a.is_installed())
        .collect()
}

/// Scan PATH for an executable, returning its absolute path
fn find_in_path(command: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
