//! Per-platform privilege tables.
//!
//! These are illustrative driver *data*, not part of the core's
//! control-flow: consumers of the [`crate::session::privilege`] schema,
//! shipped here because the five named families are test-locked by the
//! spec's canonical names. A caller may build and supply any other table
//! from the same schema instead.

use regex::Regex;

use crate::error::ConnectError;
use crate::session::privilege::{PrivilegeLevel, PrivilegeTable};

fn level(
    name: &str,
    pattern: &str,
    order: i32,
    escalate_from: Option<&str>,
    escalate_cmd: Option<&str>,
    escalate_requires_auth: bool,
    escalate_auth_prompt: Option<&str>,
    deescalate_from: Option<&str>,
    deescalate_cmd: Option<&str>,
    is_requestable: bool,
) -> PrivilegeLevel {
    PrivilegeLevel {
        name: name.to_string(),
        prompt_pattern: Regex::new(&format!("(?mi){pattern}")).expect("static platform prompt regex"),
        level: order,
        escalate_from: escalate_from.map(str::to_string),
        escalate_cmd: escalate_cmd.map(str::to_string),
        escalate_requires_auth,
        escalate_auth_prompt: escalate_auth_prompt.map(str::to_string),
        deescalate_from: deescalate_from.map(str::to_string),
        deescalate_cmd: deescalate_cmd.map(str::to_string),
        is_requestable,
    }
}

/// Cisco IOS-XE / NX-OS: `{exec, privilegeExec, configuration,
/// specialConfiguration}`. Default operational privilege: `privilegeExec`.
pub fn cisco_ios_xe() -> Result<PrivilegeTable, ConnectError> {
    PrivilegeTable::build(
        vec![
            level(
                "exec",
                r"^[a-z0-9.\-@()/:]{1,32}>\s*$",
                0,
                None,
                Some("enable"),
                true,
                Some("^Password:"),
                None,
                None,
                true,
            ),
            level(
                "privilegeExec",
                r"^[a-z0-9.\-@/:]{1,32}#\s*$",
                1,
                Some("exec"),
                Some("configure terminal"),
                false,
                None,
                Some("exec"),
                Some("disable"),
                true,
            ),
            level(
                "configuration",
                r"^[a-z0-9.\-@/:]{1,32}\(config\)#\s*$",
                2,
                Some("privilegeExec"),
                None,
                false,
                None,
                Some("privilegeExec"),
                Some("end"),
                true,
            ),
            level(
                "specialConfiguration",
                r"^[a-z0-9.\-@/:]{1,32}\(config-[a-z0-9\-]+\)#\s*$",
                3,
                Some("configuration"),
                None,
                false,
                None,
                Some("configuration"),
                Some("exit"),
                false,
            ),
        ],
        "privilegeExec",
    )
}

/// Cisco IOS-XR: same shape as IOS-XE/NX-OS.
pub fn cisco_ios_xr() -> Result<PrivilegeTable, ConnectError> {
    cisco_ios_xe()
}

/// Arista EOS: same shape as IOS-XE/NX-OS.
pub fn arista_eos() -> Result<PrivilegeTable, ConnectError> {
    cisco_ios_xe()
}

/// Juniper Junos: `{exec, configuration}`. Default operational privilege:
/// `exec`.
pub fn junos() -> Result<PrivilegeTable, ConnectError> {
    PrivilegeTable::build(
        vec![
            level(
                "exec",
                r"^[a-z0-9.\-@()/:]{1,32}>\s*$",
                0,
                None,
                Some("configure"),
                false,
                None,
                None,
                None,
                true,
            ),
            level(
                "configuration",
                r"^[a-z0-9.\-@/:]{1,32}#\s*$",
                1,
                Some("exec"),
                None,
                false,
                None,
                Some("exec"),
                Some("exit configuration-mode"),
                true,
            ),
        ],
        "exec",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cisco_ios_xe_table_matches_canonical_prompts() {
        let table = cisco_ios_xe().unwrap();
        assert_eq!(table.determine_current_privilege("Router>").unwrap().name, "exec");
        assert_eq!(
            table.determine_current_privilege("Router#").unwrap().name,
            "privilegeExec"
        );
        assert_eq!(
            table.determine_current_privilege("Router(config)#").unwrap().name,
            "configuration"
        );
        assert_eq!(
            table
                .determine_current_privilege("Router(config-if)#")
                .unwrap()
                .name,
            "specialConfiguration"
        );
    }

    #[test]
    fn junos_table_has_two_levels_with_exec_default() {
        let table = junos().unwrap();
        assert_eq!(table.default_operational, "exec");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn ios_xr_and_eos_mirror_ios_xe_shape() {
        assert_eq!(cisco_ios_xr().unwrap().len(), cisco_ios_xe().unwrap().len());
        assert_eq!(arista_eos().unwrap().len(), cisco_ios_xe().unwrap().len());
    }
}
