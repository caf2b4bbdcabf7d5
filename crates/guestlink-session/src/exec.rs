//! JSON payloads carried on entity substreams.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Where an exec runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecTarget {
    /// Directly in the guest.
    Host,
    /// Inside the container at this index.
    Container(u8),
}

/// An exec-start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default)]
    pub tty: bool,
    pub target: ExecTarget,
}

impl ExecSpec {
    /// Run `cmd` in the guest without a TTY.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            workdir: None,
            env: Vec::new(),
            tty: false,
            target: ExecTarget::Host,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.cmd.first().is_none_or(|program| program.is_empty()) {
            return Err(SessionError::Exec("empty command".to_string()));
        }
        if let Some(bad) = self.env.iter().find(|entry| !entry.contains('=')) {
            return Err(SessionError::Exec(format!(
                "env entry '{bad}' is not KEY=VALUE"
            )));
        }
        Ok(())
    }
}

/// EXIT payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: i32,
}

/// WINCH payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

/// SIGNAL payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRequest {
    pub signal: i32,
}

/// Snapshot of an exec record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStatus {
    pub spec: ExecSpec,
    pub running: bool,
    /// Set once the exit notification arrived.
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_spec_wire_shape() {
        let mut spec = ExecSpec::new(["sh", "-c", "echo hi"]);
        spec.target = ExecTarget::Container(3);
        spec.tty = true;

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cmd": ["sh", "-c", "echo hi"],
                "tty": true,
                "target": { "container": 3 }
            })
        );
        let back: ExecSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn host_target_is_a_plain_string() {
        let json = serde_json::to_string(&ExecSpec::new(["true"]).target).unwrap();
        assert_eq!(json, "\"host\"");
    }

    #[test]
    fn validate_rejects_empty_command_and_bad_env() {
        assert!(ExecSpec::new(Vec::<String>::new()).validate().is_err());
        assert!(ExecSpec::new([""]).validate().is_err());

        let mut spec = ExecSpec::new(["env"]);
        spec.env = vec!["PATH".to_string()];
        assert!(matches!(spec.validate(), Err(SessionError::Exec(_))));

        spec.env = vec!["PATH=/bin".to_string()];
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn exit_status_parses() {
        let status: ExitStatus = serde_json::from_slice(br#"{"code":-9}"#).unwrap();
        assert_eq!(status.code, -9);
    }
}
