//! Shell-script component adapter
//!
//! Components and cluster-level hooks are declared in a `components.yaml`
//! manifest. Every probe and hook is a shell command run with `sh -c`; the
//! resource identity, generation, operation and overrides are passed in
//! `KEEL_*` environment variables.
//!
//! Exit code 0 means success (or "true" for probes). A configurable exit
//! code marks a hook failure as retryable; any other code is a plain
//! failure.

use crate::component::{Component, HookContext};
use crate::outcome::HookError;
use crate::platform::Platform;
use crate::registry::ComponentRegistry;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use camino::Utf8Path;
use keel_core::types::{ComponentState, ManagedResource};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Conventional "temporary failure" exit code (EX_TEMPFAIL)
pub const DEFAULT_RETRY_EXIT_CODE: i32 = 75;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Root of a `components.yaml` manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentManifest {
    #[serde(default)]
    pub components: Vec<ScriptComponentDef>,

    #[serde(default)]
    pub platform: PlatformCommands,
}

impl ComponentManifest {
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read component manifest {}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid component manifest {}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Self = serde_yaml_ng::from_str(content)?;
        Ok(manifest)
    }

    /// Build the validated registry of script components, in manifest order
    pub fn registry(&self) -> keel_core::Result<ComponentRegistry> {
        let components: Vec<Arc<dyn Component>> = self
            .components
            .iter()
            .cloned()
            .map(|def| Arc::new(ScriptComponent::new(def)) as Arc<dyn Component>)
            .collect();
        ComponentRegistry::new(components)
    }

    pub fn platform(&self) -> ScriptPlatform {
        ScriptPlatform::new(self.platform.clone())
    }
}

/// Declaration of one script-driven component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptComponentDef {
    pub name: String,
    pub namespace: String,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_platform_version: Option<String>,

    #[serde(default)]
    pub enabled_by_default: bool,

    #[serde(default)]
    pub external_owner: bool,

    #[serde(default = "default_true")]
    pub operator_uninstall: bool,

    #[serde(default)]
    pub install_before_upgrade: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_exit_code")]
    pub retry_exit_code: i32,

    #[serde(default)]
    pub probes: ProbeCommands,

    #[serde(default)]
    pub hooks: HookCommands,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_exit_code() -> i32 {
    DEFAULT_RETRY_EXIT_CODE
}

/// Probe commands; exit 0 answers yes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeCommands {
    /// Without it, the recorded component state decides
    pub installed: Option<String>,
    /// Without it, the component reports ready whenever it is asked; the
    /// install hook finishing is taken as readiness
    pub ready: Option<String>,
    /// Without it, `installed` is used
    pub exists: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookCommands {
    pub reconcile: Option<String>,
    pub pre_install: Option<String>,
    pub install: Option<String>,
    pub post_install: Option<String>,
    pub pre_upgrade: Option<String>,
    pub upgrade: Option<String>,
    pub post_upgrade: Option<String>,
    pub pre_uninstall: Option<String>,
    pub uninstall: Option<String>,
    pub post_uninstall: Option<String>,
}

/// Cluster-level commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformCommands {
    /// Name of the component whose owner provisioned the cluster
    pub provisioner: Option<String>,
    /// Receives the namespace in `KEEL_NAMESPACE`; exit 0 when it exists
    pub namespace_exists: Option<String>,
    pub delete_namespace: Option<String>,
    pub pre_install: Option<String>,
    pub post_install: Option<String>,
    pub post_upgrade: Option<String>,
    pub remove_co_owned: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_exit_code")]
    pub retry_exit_code: i32,
}

/// Outcome of one shell command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Success,
    Retry(i32),
    Failure(Option<i32>),
}

/// Run `command` with `sh -c`, killing it after `timeout`
async fn run_shell(
    command: &str,
    env: &[(&str, String)],
    timeout: Duration,
    retry_exit_code: i32,
) -> Result<Exit> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running: {}", command);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow!("Command timed out after {:?}: {}", timeout, command))?
        .with_context(|| format!("Failed to spawn: {}", command))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!("script: {}", line);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);

    let exit = match output.status.code() {
        Some(0) => Exit::Success,
        Some(code) if code == retry_exit_code => Exit::Retry(code),
        code => Exit::Failure(code),
    };
    if exit != Exit::Success {
        for line in stderr.lines() {
            debug!("script stderr: {}", line);
        }
    }
    Ok(exit)
}

fn hook_result(command: &str, exit: Result<Exit>) -> Result<(), HookError> {
    match exit? {
        Exit::Success => Ok(()),
        Exit::Retry(code) => Err(HookError::retryable(format!(
            "`{}` asked to be retried (exit code {})",
            command, code
        ))),
        Exit::Failure(Some(code)) => Err(HookError::Failed(anyhow!(
            "`{}` failed with exit code {}",
            command,
            code
        ))),
        Exit::Failure(None) => Err(HookError::Failed(anyhow!(
            "`{}` was terminated by a signal",
            command
        ))),
    }
}

/// A component driven entirely by shell commands
#[derive(Debug, Clone)]
pub struct ScriptComponent {
    def: ScriptComponentDef,
}

impl ScriptComponent {
    pub fn new(def: ScriptComponentDef) -> Self {
        Self { def }
    }

    pub fn def(&self) -> &ScriptComponentDef {
        &self.def
    }

    fn env(&self, ctx: &HookContext<'_>) -> Vec<(&'static str, String)> {
        let overrides = ctx
            .component_spec()
            .map(|c| serde_json::to_string(&c.overrides).unwrap_or_default())
            .unwrap_or_else(|| "[]".to_string());
        vec![
            ("KEEL_RESOURCE_NAMESPACE", ctx.resource.metadata.namespace.clone()),
            ("KEEL_RESOURCE_NAME", ctx.resource.metadata.name.clone()),
            ("KEEL_GENERATION", ctx.generation().to_string()),
            ("KEEL_COMPONENT", self.def.name.clone()),
            ("KEEL_COMPONENT_NAMESPACE", self.def.namespace.clone()),
            ("KEEL_OPERATION", ctx.operation.to_string()),
            ("KEEL_OVERRIDES", overrides),
            (
                "KEEL_TARGET_VERSION",
                ctx.target_version().unwrap_or_default().to_string(),
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.def.timeout_secs)
    }

    async fn probe(&self, command: &str, ctx: &HookContext<'_>) -> Result<bool> {
        match run_shell(command, &self.env(ctx), self.timeout(), self.def.retry_exit_code).await? {
            Exit::Success => Ok(true),
            Exit::Retry(_) | Exit::Failure(Some(_)) => Ok(false),
            Exit::Failure(None) => Err(anyhow!("Probe `{}` was terminated by a signal", command)),
        }
    }

    async fn hook(&self, command: &Option<String>, ctx: &HookContext<'_>) -> Result<(), HookError> {
        let Some(command) = command else {
            return Ok(());
        };
        let exit = run_shell(command, &self.env(ctx), self.timeout(), self.def.retry_exit_code).await;
        hook_result(command, exit)
    }
}

#[async_trait]
impl Component for ScriptComponent {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn namespace(&self) -> &str {
        &self.def.namespace
    }

    fn dependencies(&self) -> Vec<String> {
        self.def.dependencies.clone()
    }

    fn min_platform_version(&self) -> Option<&str> {
        self.def.min_platform_version.as_deref()
    }

    fn enabled_by_default(&self) -> bool {
        self.def.enabled_by_default
    }

    fn should_use_external_owner(&self) -> bool {
        self.def.external_owner
    }

    fn supports_operator_uninstall(&self) -> bool {
        self.def.operator_uninstall
    }

    fn should_install_before_upgrade(&self) -> bool {
        self.def.install_before_upgrade
    }

    async fn is_installed(&self, ctx: &HookContext<'_>) -> Result<bool> {
        match &self.def.probes.installed {
            Some(command) => self.probe(command, ctx).await,
            None => Ok(ctx
                .resource
                .component_status(&self.def.name)
                .map(|s| matches!(s.state, ComponentState::Ready | ComponentState::Upgrading))
                .unwrap_or(false)),
        }
    }

    async fn is_ready(&self, ctx: &HookContext<'_>) -> Result<bool> {
        match &self.def.probes.ready {
            Some(command) => self.probe(command, ctx).await,
            None => Ok(true),
        }
    }

    async fn exists(&self, ctx: &HookContext<'_>) -> Result<bool> {
        match &self.def.probes.exists {
            Some(command) => self.probe(command, ctx).await,
            None => self.is_installed(ctx).await,
        }
    }

    async fn reconcile(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.reconcile, ctx).await
    }

    async fn pre_install(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.pre_install, ctx).await
    }

    async fn install(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.install, ctx).await
    }

    async fn post_install(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.post_install, ctx).await
    }

    async fn pre_upgrade(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.pre_upgrade, ctx).await
    }

    async fn upgrade(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.upgrade, ctx).await
    }

    async fn post_upgrade(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.post_upgrade, ctx).await
    }

    async fn pre_uninstall(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.pre_uninstall, ctx).await
    }

    async fn uninstall(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.uninstall, ctx).await
    }

    async fn post_uninstall(&self, ctx: &HookContext<'_>) -> Result<(), HookError> {
        self.hook(&self.def.hooks.post_uninstall, ctx).await
    }
}

/// Cluster-level hooks driven by shell commands
#[derive(Debug, Clone, Default)]
pub struct ScriptPlatform {
    commands: PlatformCommands,
}

impl ScriptPlatform {
    pub fn new(commands: PlatformCommands) -> Self {
        Self { commands }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs)
    }

    fn resource_env(resource: &ManagedResource) -> Vec<(&'static str, String)> {
        vec![
            ("KEEL_RESOURCE_NAMESPACE", resource.metadata.namespace.clone()),
            ("KEEL_RESOURCE_NAME", resource.metadata.name.clone()),
            ("KEEL_GENERATION", resource.generation().to_string()),
            (
                "KEEL_TARGET_VERSION",
                resource.spec.version.clone().unwrap_or_default(),
            ),
        ]
    }

    async fn hook(&self, command: &Option<String>, resource: &ManagedResource) -> Result<(), HookError> {
        let Some(command) = command else {
            return Ok(());
        };
        let exit = run_shell(
            command,
            &Self::resource_env(resource),
            self.timeout(),
            self.commands.retry_exit_code,
        )
        .await;
        hook_result(command, exit)
    }
}

#[async_trait]
impl Platform for ScriptPlatform {
    async fn cluster_provisioner(&self) -> Result<Option<String>> {
        Ok(self.commands.provisioner.clone())
    }

    async fn pre_install(&self, resource: &ManagedResource) -> Result<(), HookError> {
        self.hook(&self.commands.pre_install, resource).await
    }

    async fn post_install(&self, resource: &ManagedResource) -> Result<(), HookError> {
        self.hook(&self.commands.post_install, resource).await
    }

    async fn post_upgrade(&self, resource: &ManagedResource) -> Result<(), HookError> {
        self.hook(&self.commands.post_upgrade, resource).await
    }

    async fn remove_co_owned_resources(&self, resource: &ManagedResource) -> Result<(), HookError> {
        self.hook(&self.commands.remove_co_owned, resource).await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let Some(command) = &self.commands.delete_namespace else {
            return Ok(());
        };
        let env = [("KEEL_NAMESPACE", namespace.to_string())];
        match run_shell(command, &env, self.timeout(), self.commands.retry_exit_code).await? {
            Exit::Success => Ok(()),
            exit => {
                warn!("Deleting namespace {} failed: {:?}", namespace, exit);
                Err(anyhow!("Failed to delete namespace {}", namespace))
            }
        }
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let Some(command) = &self.commands.namespace_exists else {
            return Ok(false);
        };
        let env = [("KEEL_NAMESPACE", namespace.to_string())];
        match run_shell(command, &env, self.timeout(), self.commands.retry_exit_code).await? {
            Exit::Success => Ok(true),
            Exit::Retry(_) | Exit::Failure(Some(_)) => Ok(false),
            Exit::Failure(None) => Err(anyhow!(
                "Namespace check for {} was terminated by a signal",
                namespace
            )),
        }
    }
}
