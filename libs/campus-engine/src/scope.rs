//! Disposable cluster scope for commands that touch the shared control
//! plane.
//!
//! Each sandbox run that targets the cluster gets a uniquely named
//! namespace. Provisioning is best-effort: a missing control plane degrades
//! to a warning, not a grading failure. Teardown is unconditional and must
//! never block the response; a leaked scope is recovered by the cluster
//! reaper, which lives outside this engine.

use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct EphemeralScope {
    name: String,
    kubectl: String,
    provision_attempted: bool,
}

impl EphemeralScope {
    /// Allocate a collision-resistant, DNS-label-safe scope name.
    pub fn allocate(kubectl: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            name: format!("lab-{}", &suffix[..12]),
            kubectl: kubectl.to_string(),
            provision_attempted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a command targets the shared cluster resource at all.
    pub fn applies_to(command: &str) -> bool {
        command.trim_start().starts_with("kubectl")
    }

    pub async fn provision(&mut self) {
        self.provision_attempted = true;
        let result = Command::new(&self.kubectl)
            .args(["create", "namespace", &self.name])
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => {
                debug!(namespace = %self.name, "ephemeral namespace provisioned");
            }
            Ok(out) => {
                warn!(
                    namespace = %self.name,
                    "namespace provisioning failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => {
                warn!(namespace = %self.name, "kubectl unavailable: {e}");
            }
        }
    }

    /// Rewrite a cluster command to target this scope. Commands that
    /// already pin a namespace are left alone.
    pub fn scoped_command(&self, command: &str) -> String {
        if !Self::applies_to(command) {
            return command.to_string();
        }
        let has_namespace = command.split_whitespace().any(|token| {
            token == "-n" || token == "--namespace" || token.starts_with("--namespace=")
        });
        if has_namespace {
            command.to_string()
        } else {
            format!("{} -n {}", command.trim_end(), self.name)
        }
    }
}

impl Drop for EphemeralScope {
    fn drop(&mut self) {
        if !self.provision_attempted {
            return;
        }
        let name = self.name.clone();
        let kubectl = self.kubectl.clone();
        // Detached so teardown latency never delays the verdict.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let result = Command::new(&kubectl)
                    .args([
                        "delete",
                        "namespace",
                        &name,
                        "--wait=false",
                        "--ignore-not-found=true",
                    ])
                    .output()
                    .await;
                match result {
                    Ok(out) if out.status.success() => {
                        debug!(namespace = %name, "ephemeral namespace deleted");
                    }
                    Ok(out) => {
                        warn!(
                            namespace = %name,
                            "namespace teardown failed: {}",
                            String::from_utf8_lossy(&out.stderr).trim()
                        );
                    }
                    Err(e) => {
                        warn!(namespace = %name, "namespace teardown failed: {e}");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_label_safe() {
        let a = EphemeralScope::allocate("kubectl");
        let b = EphemeralScope::allocate("kubectl");
        assert_ne!(a.name(), b.name());
        assert!(a.name().len() <= 63);
        assert!(a
            .name()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn cluster_commands_are_rewritten() {
        let scope = EphemeralScope::allocate("kubectl");
        let scoped = scope.scoped_command("kubectl get pods");
        assert_eq!(scoped, format!("kubectl get pods -n {}", scope.name()));
    }

    #[test]
    fn explicit_namespace_is_respected() {
        let scope = EphemeralScope::allocate("kubectl");
        for command in [
            "kubectl get pods -n default",
            "kubectl get pods --namespace default",
            "kubectl get pods --namespace=default",
        ] {
            assert_eq!(scope.scoped_command(command), command);
        }
    }

    #[test]
    fn non_cluster_commands_are_untouched() {
        let scope = EphemeralScope::allocate("kubectl");
        assert_eq!(scope.scoped_command("docker ps"), "docker ps");
        assert!(!EphemeralScope::applies_to("docker ps"));
        assert!(EphemeralScope::applies_to("  kubectl get pods"));
    }
}
