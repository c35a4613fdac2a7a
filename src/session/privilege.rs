//! Component D: the privilege-level state machine.

use std::collections::HashMap;

use regex::Regex;

use crate::error::ConnectError;
use crate::result::CommandResult;
use crate::session::channel::ChannelEngine;

/// One named privilege level in a platform's table (`PrivilegeLevel`).
#[derive(Clone)]
pub struct PrivilegeLevel {
    pub name: String,
    pub prompt_pattern: Regex,
    pub level: i32,
    pub escalate_from: Option<String>,
    pub escalate_cmd: Option<String>,
    pub escalate_requires_auth: bool,
    pub escalate_auth_prompt: Option<String>,
    pub deescalate_from: Option<String>,
    pub deescalate_cmd: Option<String>,
    pub is_requestable: bool,
}

impl std::fmt::Debug for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeLevel")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

/// A finite, ordered `name -> PrivilegeLevel` mapping for one device family
/// Construction validates the invariants:
/// - `level` is a total order (no two entries share a level).
/// - every non-terminal level sets `escalate_cmd` or `deescalate_cmd`.
/// - every `escalate_from` / `deescalate_from` names an existing level.
#[derive(Clone)]
pub struct PrivilegeTable {
    levels: HashMap<String, PrivilegeLevel>,
    /// Insertion order, preserved for deterministic iteration during
    /// `determine_current_privilege`'s linear scan.
    order: Vec<String>,
    pub default_operational: String,
}

impl PrivilegeTable {
    pub fn build(
        entries: Vec<PrivilegeLevel>,
        default_operational: impl Into<String>,
    ) -> Result<Self, ConnectError> {
        let mut levels = HashMap::new();
        let mut order = Vec::new();
        let mut seen_levels = std::collections::HashSet::new();

        for entry in entries {
            if !seen_levels.insert(entry.level) {
                return Err(ConnectError::ValidationError(format!(
                    "privilege level {} is not unique in the total order",
                    entry.level
                )));
            }
            order.push(entry.name.clone());
            levels.insert(entry.name.clone(), entry);
        }

        for level in levels.values() {
            let terminal = level.escalate_cmd.is_none() && level.deescalate_cmd.is_none();
            if terminal && levels.len() > 1 {
                return Err(ConnectError::ValidationError(format!(
                    "privilege level {:?} sets neither escalate_cmd nor deescalate_cmd",
                    level.name
                )));
            }
            for reference in [&level.escalate_from, &level.deescalate_from].into_iter().flatten() {
                if !levels.contains_key(reference) {
                    return Err(ConnectError::ValidationError(format!(
                        "privilege level {:?} references unknown level {:?}",
                        level.name, reference
                    )));
                }
            }
        }

        let default_operational = default_operational.into();
        if !levels.contains_key(&default_operational) {
            return Err(ConnectError::ValidationError(format!(
                "default operational level {default_operational:?} is not in the table"
            )));
        }

        Ok(Self {
            levels,
            order,
            default_operational,
        })
    }

    pub fn get(&self, name: &str) -> Option<&PrivilegeLevel> {
        self.levels.get(name)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// `determineCurrentPrivilege`: first `prompt_pattern` match wins,
    /// scanned in the table's declared order.
    pub fn determine_current_privilege(&self, prompt: &str) -> Result<&PrivilegeLevel, ConnectError> {
        for name in &self.order {
            let level = &self.levels[name];
            if level.prompt_pattern.is_match(prompt) {
                return Ok(level);
            }
        }
        Err(ConnectError::UnknownPrivLevel(prompt.to_string()))
    }
}

/// Component D. Holds only a read-only reference to its table
/// ownership rule) and borrows the channel engine for I/O.
pub struct PrivilegeFsm<'a> {
    table: &'a PrivilegeTable,
    channel: &'a ChannelEngine,
    secondary_password: Option<&'a str>,
    config_level_name: &'a str,
}

impl<'a> PrivilegeFsm<'a> {
    pub fn new(
        table: &'a PrivilegeTable,
        channel: &'a ChannelEngine,
        secondary_password: Option<&'a str>,
        config_level_name: &'a str,
    ) -> Self {
        Self {
            table,
            channel,
            secondary_password,
            config_level_name,
        }
    }

    async fn current(&self) -> Result<&'a PrivilegeLevel, ConnectError> {
        let prompt = self.channel.get_prompt().await?;
        self.table.determine_current_privilege(&prompt)
    }

    /// `escalate`.
    async fn escalate(&self, current: &PrivilegeLevel) -> Result<(), ConnectError> {
        let Some(cmd) = &current.escalate_cmd else {
            return Ok(());
        };
        if current.escalate_requires_auth {
            let auth_prompt = current.escalate_auth_prompt.as_deref().unwrap_or("assword:");
            let secondary = self.secondary_password.unwrap_or("");
            self.channel
                .send_interact(cmd, auth_prompt, secondary, "", true, true)
                .await?;
        } else {
            self.channel.send_input(cmd, true).await?;
        }
        Ok(())
    }

    /// `deescalate`: always a plain input, never secondary auth.
    async fn deescalate(&self, current: &PrivilegeLevel) -> Result<(), ConnectError> {
        if let Some(cmd) = &current.deescalate_cmd {
            self.channel.send_input(cmd, true).await?;
        }
        Ok(())
    }

    /// `acquirePrivilege`: bounded walk toward `target`, one level per
    /// step, guarding against cyclic or unreachable targets with a step
    /// budget derived from the table size.
    pub async fn acquire_privilege(&self, target_name: &str) -> Result<(), ConnectError> {
        let target = self
            .table
            .get(target_name)
            .ok_or_else(|| ConnectError::ValidationError(format!("no such privilege level {target_name:?}")))?;

        let step_budget = self.table.len().max(1) * 2;
        for _ in 0..step_budget {
            let current = self.current().await?;
            if current.name == target.name {
                return Ok(());
            }
            if current.level > target.level {
                self.deescalate(current).await?;
            } else {
                self.escalate(current).await?;
            }
        }
        Err(ConnectError::CouldNotAcquirePrivLevel(target_name.to_string()))
    }

    /// `sendCommands`: acquire the platform's default operational
    /// privilege first.
    pub async fn send_commands(
        &self,
        cmds: &[String],
        strip_prompt: bool,
    ) -> Result<Vec<CommandResult>, ConnectError> {
        self.acquire_privilege(&self.table.default_operational).await?;
        let mut results = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            results.push(self.channel.send_input(cmd, strip_prompt).await?);
        }
        Ok(results)
    }

    /// `sendConfigs`: acquire configuration privilege, send, then
    /// re-acquire the default operational privilege before returning.
    pub async fn send_configs(
        &self,
        cmds: &[String],
        strip_prompt: bool,
    ) -> Result<Vec<CommandResult>, ConnectError> {
        self.acquire_privilege(self.config_level_name).await?;
        let mut results = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            results.push(self.channel.send_input(cmd, strip_prompt).await?);
        }
        self.acquire_privilege(&self.table.default_operational).await?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(
        name: &str,
        pattern: &str,
        level: i32,
        escalate_cmd: Option<&str>,
        deescalate_cmd: Option<&str>,
    ) -> PrivilegeLevel {
        PrivilegeLevel {
            name: name.to_string(),
            prompt_pattern: Regex::new(&format!("(?mi){pattern}")).unwrap(),
            level,
            escalate_from: None,
            escalate_cmd: escalate_cmd.map(str::to_string),
            escalate_requires_auth: false,
            escalate_auth_prompt: None,
            deescalate_from: None,
            deescalate_cmd: deescalate_cmd.map(str::to_string),
            is_requestable: true,
        }
    }

    fn sample_table() -> PrivilegeTable {
        PrivilegeTable::build(
            vec![
                level("exec", r"[\w.\-]+>\s*$", 0, Some("enable"), None),
                level("privilegeExec", r"[\w.\-]+#\s*$", 1, Some("configure terminal"), Some("disable")),
                level("configuration", r"[\w.\-]+\(config\)#\s*$", 2, None, Some("end")),
            ],
            "privilegeExec",
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_levels() {
        let dup = vec![
            level("exec", r"[\w.\-]+>\s*$", 0, Some("enable"), None),
            level("privilegeExec", r"[\w.\-]+#\s*$", 0, None, Some("disable")),
        ];
        assert!(PrivilegeTable::build(dup, "exec").is_err());
    }

    #[test]
    fn rejects_dangling_references() {
        let mut bad = level("exec", r"[\w.\-]+>\s*$", 0, Some("enable"), None);
        bad.escalate_from = Some("doesNotExist".to_string());
        assert!(PrivilegeTable::build(vec![bad], "exec").is_err());
    }

    #[test]
    fn determine_current_privilege_matches_in_declared_order() {
        let table = sample_table();
        assert_eq!(table.determine_current_privilege("Router>").unwrap().name, "exec");
        assert_eq!(
            table.determine_current_privilege("Router#").unwrap().name,
            "privilegeExec"
        );
        assert_eq!(
            table.determine_current_privilege("Router(config)#").unwrap().name,
            "configuration"
        );
    }

    #[test]
    fn determine_current_privilege_fails_on_no_match() {
        let table = sample_table();
        assert!(matches!(
            table.determine_current_privilege("nonsense$$$"),
            Err(ConnectError::UnknownPrivLevel(_))
        ));
    }
}
