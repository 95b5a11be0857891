//! Static safety scan over plan commands.
//!
//! Runs before anything touches the host. A plan is refused as a whole if
//! any step command names a protected service together with a disruptive
//! verb, or matches the deny list of destructive patterns.

use regex::Regex;
use std::sync::OnceLock;

use crate::plan::Plan;

static DISRUPTIVE_VERB: OnceLock<Regex> = OnceLock::new();
static DENY_LIST: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

/// `/`, `/*` or `/.`, optionally quoted, standing alone as an argument.
const ROOT_TARGET: &str = r#"['"]?/(\*|\.)?['"]?(\s|;|&|\||$)"#;

fn disruptive_verb() -> &'static Regex {
    DISRUPTIVE_VERB.get_or_init(|| {
        Regex::new(r"\b(restart|stop|kill|rm|down|pause)\b").expect("verb regex is valid")
    })
}

fn deny_list() -> &'static [(Regex, &'static str)] {
    DENY_LIST.get_or_init(|| {
        let rm_root = format!(
            r"\brm\s+(-[a-zA-Z]*[rR][a-zA-Z]*\s+|-[a-zA-Z]*f[a-zA-Z]*\s+|--recursive\s+|--force\s+|--no-preserve-root\s+)*{ROOT_TARGET}"
        );
        let chmod_root =
            format!(r"\bchmod\s+(-\S+\s+)*(0?777|[augo]*\+rwx)\s+(-\S+\s+)*{ROOT_TARGET}");
        let compiled: Vec<_> = [
            (rm_root.as_str(), "recursive deletion of the root filesystem"),
            (r"\bdd\b[^|;&]*\bof=/dev/", "raw write to a block device"),
            (r"\bdd\b[^|;&]*\bif=/dev/(zero|u?random)\b", "dd from a raw data source"),
            (
                r">\s*/dev/(sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d|md\d|dm-\d|disk/)",
                "redirection onto a disk device",
            ),
            (r"\b(mkfs(\.\w+)?|mkswap|wipefs)\b", "filesystem or signature formatting"),
            (r":\s*\(\s*\)\s*\{[^}]*:\s*\|\s*:", "fork bomb"),
            (chmod_root.as_str(), "world-writable root"),
            (
                r"\b(cp|cat|mv)\b[^|;&]*\s/dev/(sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d)",
                "bulk copy onto a device",
            ),
        ]
        .into_iter()
        .map(|(re, why)| (Regex::new(re).expect("deny-list regex is valid"), why))
        .collect();
        compiled
    })
}

/// Protected names and the deny list, applied to every step command.
#[derive(Debug, Clone, Default)]
pub struct SafetyPolicy {
    pub protected: Vec<String>,
}

impl SafetyPolicy {
    pub fn new(protected: Vec<String>) -> Self {
        Self { protected }
    }

    /// Check one command. `Err` carries the human-readable reason.
    pub fn check_command(&self, command: &str) -> Result<(), String> {
        let lowered = command.to_lowercase();
        if disruptive_verb().is_match(&lowered) {
            // Substring match so that `web-db-1` still protects `db`.
            if let Some(name) = self
                .protected
                .iter()
                .find(|n| !n.is_empty() && lowered.contains(&n.to_lowercase()))
            {
                return Err(format!("command touches protected service '{name}': {command}"));
            }
        }
        for (re, why) in deny_list() {
            if re.is_match(command) {
                return Err(format!("blocked pattern ({why}): {command}"));
            }
        }
        Ok(())
    }

    /// Check every step command of `plan`; the first violation wins.
    pub fn check_plan(&self, plan: &Plan) -> Result<(), String> {
        for step in &plan.draft.steps {
            if let Some(cmd) = &step.command {
                self.check_command(cmd)
                    .map_err(|reason| format!("step {}: {reason}", step.step))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SafetyPolicy {
        SafetyPolicy::new(vec!["postgres".into(), "signal-api".into()])
    }

    #[test]
    fn blocks_protected_service_with_disruptive_verb() {
        let p = policy();
        assert!(p.check_command("docker restart postgres").is_err());
        assert!(p.check_command("docker stop signal-api").is_err());
        assert!(p.check_command("docker compose -p app down postgres-main").is_err());
        assert!(p.check_command("docker logs --tail 50 postgres").is_ok());
        assert!(p.check_command("docker restart web1").is_ok());
    }

    #[test]
    fn blocks_root_deletion() {
        let p = policy();
        for cmd in [
            "rm -rf /",
            "rm -rf /*",
            "sudo rm -fr / ",
            "rm -r -f /; echo",
            "rm -rf '/'",
            "rm -rf \"/\"",
            "rm -rf /.",
            "rm -rf '/*'",
        ] {
            assert!(p.check_command(cmd).is_err(), "{cmd}");
        }
        assert!(p.check_command("rm -rf /tmp/build-cache").is_ok());
        assert!(p.check_command("rm -rf ./build").is_ok());
    }

    #[test]
    fn blocks_device_writes_and_formatting() {
        let p = policy();
        for cmd in [
            "dd if=image.iso of=/dev/sda bs=4M",
            "dd if=/dev/zero of=disk.img",
            "echo x > /dev/sda",
            "cat backup.img > /dev/nvme0n1",
            "mkfs.ext4 /dev/sdb1",
            "mkswap /dev/sdc",
            "wipefs -a /dev/sdb",
            ":(){ :|:& };:",
            "chmod -R 777 /",
            "chmod 0777 /",
            "chmod -R 0777 /",
            "chmod 777 -R /",
            "chmod -R 777 /*",
            "chmod a+rwx /",
            "cp disk.img /dev/sdb",
        ] {
            assert!(p.check_command(cmd).is_err(), "{cmd}");
        }
    }

    #[test]
    fn allows_harmless_device_redirects() {
        let p = policy();
        for cmd in [
            "docker system prune -f > /dev/null 2>&1",
            "echo done >/dev/stderr",
            "journalctl -u nginx --no-pager > /dev/stdout",
            "chmod 755 /opt/app",
            "chmod -R 777 /srv/shared",
        ] {
            assert!(p.check_command(cmd).is_ok(), "{cmd}");
        }
    }
}
