//! Release management through the helm CLI
//!
//! helm is treated as a black box: every operation builds an argument list,
//! logs the fully expanded command, runs it, and maps a non-zero exit to
//! [`KubeError::Process`] with stderr attached.
//!
//! Installs retry with a fixed delay between attempts. Whether an existing
//! release should be skipped or reinstalled is decided by the caller.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use helmfleet_core::values::coerce;
use helmfleet_core::{ChartRef, Defaults, Environment, HelmSettings, RenderedValues};

use crate::error::{KubeError, Result};

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Exit code, -1 when terminated by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external programs
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| KubeError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Everything helm needs to know to install one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub name: String,

    /// Chart reference (`repo/chart`, a path, or an OCI URL)
    pub chart: String,

    pub namespace: String,

    pub version: Option<String>,

    pub values_file: Option<PathBuf>,

    pub create_namespace: bool,

    /// Flattened `path=value` tokens passed with `--set`/`--set-string`
    pub set_values: Vec<String>,
}

impl ReleaseDescriptor {
    pub fn new(
        name: impl Into<String>,
        chart: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            chart: chart.into(),
            namespace: namespace.into(),
            version: None,
            values_file: None,
            create_namespace: false,
            set_values: Vec::new(),
        }
    }

    /// Descriptor for a chart from a named helm repository
    pub fn for_chart(
        name: impl Into<String>,
        chart: &ChartRef,
        namespace: impl Into<String>,
    ) -> Self {
        let mut descriptor = Self::new(name, chart.reference(), namespace);
        descriptor.version = chart.version.clone();
        descriptor
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_values_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.values_file = Some(path.into());
        self
    }

    pub fn with_create_namespace(mut self) -> Self {
        self.create_namespace = true;
        self
    }

    /// Use the flattened form of `values` as `--set`/`--set-string` arguments
    pub fn with_values(mut self, values: &RenderedValues) -> Self {
        self.set_values = values.flatten();
        self
    }

    /// Arguments shared by install and upgrade
    fn chart_args(&self) -> Vec<String> {
        let mut args = vec![
            self.name.clone(),
            self.chart.clone(),
            "--namespace".to_string(),
            self.namespace.clone(),
        ];
        if let Some(version) = &self.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        if let Some(file) = &self.values_file {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        for token in &self.set_values {
            args.push(set_flag(token).to_string());
            args.push(escape_set_token(token));
        }
        if self.create_namespace {
            args.push("--create-namespace".to_string());
        }
        args
    }
}

/// `--set` for boolean leaves, `--set-string` for everything else
///
/// Numeric-looking strings and `null` reach the chart as literal strings.
fn set_flag(token: &str) -> &'static str {
    let value = token.split_once('=').map_or(token, |(_, value)| value);
    if coerce(value).is_boolean() {
        "--set"
    } else {
        "--set-string"
    }
}

/// Escape a `path=value` token for helm's `--set` parser
///
/// helm splits on commas and treats backslashes as escapes; only the value
/// half is touched.
fn escape_set_token(token: &str) -> String {
    match token.split_once('=') {
        Some((path, value)) => {
            let escaped = value.replace('\\', "\\\\").replace(',', "\\,");
            format!("{}={}", path, escaped)
        }
        None => token.to_string(),
    }
}

/// How an install is attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPolicy {
    /// Total attempts (treated as at least 1)
    pub max_retries: u32,

    /// Fixed pause between attempts
    pub retry_delay: Duration,

    pub wait: bool,

    pub timeout: Option<Duration>,

    pub dry_run: bool,

    pub atomic: bool,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self::from_defaults(&Defaults::default())
    }
}

impl InstallPolicy {
    pub fn from_defaults(defaults: &Defaults) -> Self {
        Self {
            max_retries: defaults.max_retries,
            retry_delay: defaults.retry_delay,
            wait: defaults.wait,
            timeout: Some(defaults.helm_timeout),
            dry_run: false,
            atomic: false,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    fn flags(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.atomic {
            args.push("--atomic".to_string());
        }
        if self.wait {
            args.push("--wait".to_string());
        }
        if let Some(timeout) = self.timeout {
            args.push("--timeout".to_string());
            args.push(format_timeout(timeout));
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }
}

fn format_timeout(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs().max(1))
}

/// Render a command line for logs, quoting arguments with whitespace
fn render_command(program: &Path, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.display().to_string());
    for arg in args {
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("'{}'", arg.replace('\'', "'\\''")));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

/// Wrapper around the helm CLI
pub struct ReleaseManager<R: CommandRunner = SystemRunner> {
    runner: R,
    binary: PathBuf,
    kube_context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl ReleaseManager<SystemRunner> {
    /// helm from PATH, real child processes
    pub fn new() -> Self {
        Self::with_runner(SystemRunner)
    }

    pub fn from_settings(settings: &HelmSettings) -> Self {
        Self::new().with_binary(settings.binary.clone())
    }
}

impl Default for ReleaseManager<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> ReleaseManager<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            binary: PathBuf::from("helm"),
            kube_context: None,
            kubeconfig: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Target the same cluster context as `env`
    pub fn for_environment(mut self, env: &Environment) -> Self {
        self.kube_context = Some(env.context.clone());
        self.kubeconfig = env.kubeconfig.clone();
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn kube_context(&self) -> Option<&str> {
        self.kube_context.as_deref()
    }

    /// Run helm once, mapping a non-zero exit to an error
    async fn invoke(&self, mut args: Vec<String>) -> Result<CommandOutput> {
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }

        let command = render_command(&self.binary, &args);
        tracing::info!(%command, "running helm");

        let output = self.runner.run(&self.binary, &args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(KubeError::Process {
                command,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Check whether a release exists (read-only)
    pub async fn exists(&self, name: &str, namespace: &str) -> Result<bool> {
        let args = vec![
            "status".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        match self.invoke(args).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_release_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Install a release, retrying failed attempts with a fixed delay
    pub async fn install(
        &self,
        descriptor: &ReleaseDescriptor,
        policy: &InstallPolicy,
    ) -> Result<()> {
        let attempts = policy.max_retries.max(1);

        let mut args = vec!["install".to_string()];
        args.extend(descriptor.chart_args());
        args.extend(policy.flags());

        let mut attempt = 1;
        loop {
            match self.invoke(args.clone()).await {
                Ok(_) => {
                    tracing::info!(
                        release = %descriptor.name,
                        namespace = %descriptor.namespace,
                        attempt,
                        "release installed"
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    return Err(KubeError::RetriesExhausted {
                        name: descriptor.name.clone(),
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        release = %descriptor.name,
                        attempt,
                        attempts,
                        error = %e,
                        "install attempt failed, retrying in {:?}",
                        policy.retry_delay
                    );
                    tokio::time::sleep(policy.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Upgrade a release, optionally installing it when missing
    pub async fn upgrade(
        &self,
        descriptor: &ReleaseDescriptor,
        install_if_missing: bool,
        policy: &InstallPolicy,
    ) -> Result<()> {
        let mut args = vec!["upgrade".to_string()];
        args.extend(descriptor.chart_args());
        if install_if_missing {
            args.push("--install".to_string());
        }
        args.extend(policy.flags());

        self.invoke(args).await?;
        tracing::info!(
            release = %descriptor.name,
            namespace = %descriptor.namespace,
            "release upgraded"
        );
        Ok(())
    }

    /// Uninstall a release
    ///
    /// Returns `false` when the release was already absent.
    pub async fn uninstall(
        &self,
        name: &str,
        namespace: &str,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let mut args = vec![
            "uninstall".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        if wait {
            args.push("--wait".to_string());
        }
        if let Some(timeout) = timeout {
            args.push("--timeout".to_string());
            args.push(format_timeout(timeout));
        }

        match self.invoke(args).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_release_not_found() => {
                tracing::debug!(release = name, namespace, "release already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Register the chart's repository (`helm repo add --force-update`)
    pub async fn add_repo(&self, chart: &ChartRef) -> Result<()> {
        let args = vec![
            "repo".to_string(),
            "add".to_string(),
            chart.repo_name.clone(),
            chart.repo_url.clone(),
            "--force-update".to_string(),
        ];
        self.invoke(args).await.map(|_| ())
    }

    /// Refresh all repository indexes
    pub async fn update_repos(&self) -> Result<()> {
        self.invoke(vec!["repo".to_string(), "update".to_string()])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    fn descriptor() -> ReleaseDescriptor {
        ReleaseDescriptor::new("ts7", "train-ticket/trainticket", "ts7")
            .with_version("0.2.1")
            .with_values_file("/tmp/values.yaml")
    }

    fn fast_policy(max_retries: u32) -> InstallPolicy {
        InstallPolicy {
            max_retries,
            retry_delay: Duration::from_secs(5),
            wait: false,
            timeout: None,
            dry_run: false,
            atomic: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_succeeds_on_third_attempt() {
        let runner = MockRunner::new()
            .then(CommandOutput::failed(1, "Error: timed out"))
            .then(CommandOutput::failed(1, "Error: timed out"))
            .then(CommandOutput::ok("deployed"));
        let helm = ReleaseManager::with_runner(runner);

        let start = tokio::time::Instant::now();
        helm.install(&descriptor(), &fast_policy(3)).await.unwrap();

        assert_eq!(helm.runner().invocations().len(), 3);
        // Exactly two fixed-length pauses between the three attempts
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_exhausts_retries() {
        let runner = MockRunner::new().fail_always(1, "Error: chart not found");
        let helm = ReleaseManager::with_runner(runner);

        let start = tokio::time::Instant::now();
        let err = helm.install(&descriptor(), &fast_policy(3)).await.unwrap_err();

        match err {
            KubeError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("chart not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(helm.runner().invocations().len(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_first_try_no_sleep() {
        let helm = ReleaseManager::with_runner(MockRunner::new());

        let start = tokio::time::Instant::now();
        helm.install(&descriptor(), &fast_policy(3)).await.unwrap();

        assert_eq!(helm.runner().invocations().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_retries_still_attempts_once() {
        let runner = MockRunner::new().fail_always(2, "boom");
        let helm = ReleaseManager::with_runner(runner);

        assert!(helm.install(&descriptor(), &fast_policy(0)).await.is_err());
        assert_eq!(helm.runner().invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_install_arguments() {
        let helm = ReleaseManager::with_runner(MockRunner::new())
            .for_environment(&Environment::new("staging", "kind-staging"));

        let descriptor = descriptor()
            .with_create_namespace()
            .with_values(
                &RenderedValues::nest(&[
                    "global.image.tag=v2",
                    "a.list=x,y",
                    "services.port=31007",
                    "global.monitoring=TRUE",
                    "global.note=null",
                ])
                .unwrap(),
            );
        let policy = InstallPolicy {
            wait: true,
            atomic: true,
            dry_run: true,
            timeout: Some(Duration::from_secs(600)),
            ..fast_policy(1)
        };
        helm.install(&descriptor, &policy).await.unwrap();

        let calls = helm.runner().invocations();
        assert_eq!(
            calls[0],
            vec![
                "install",
                "ts7",
                "train-ticket/trainticket",
                "--namespace",
                "ts7",
                "--version",
                "0.2.1",
                "-f",
                "/tmp/values.yaml",
                "--set-string",
                "a.list=x\\,y",
                "--set-string",
                "global.image.tag=v2",
                "--set",
                "global.monitoring=true",
                "--set-string",
                "global.note=null",
                "--set-string",
                "services.port=31007",
                "--create-namespace",
                "--atomic",
                "--wait",
                "--timeout",
                "600s",
                "--dry-run",
                "--kube-context",
                "kind-staging",
            ]
        );
    }

    #[tokio::test]
    async fn test_exists() {
        let runner = MockRunner::new()
            .then(CommandOutput::ok("STATUS: deployed"))
            .then(CommandOutput::failed(1, "Error: release: not found"))
            .then(CommandOutput::failed(1, "Error: Kubernetes cluster unreachable"));
        let helm = ReleaseManager::with_runner(runner);

        assert!(helm.exists("ts0", "ts0").await.unwrap());
        assert!(!helm.exists("ts1", "ts1").await.unwrap());
        assert!(helm.exists("ts2", "ts2").await.is_err());

        assert_eq!(
            helm.runner().invocations()[0],
            vec!["status", "ts0", "--namespace", "ts0"]
        );
    }

    #[tokio::test]
    async fn test_uninstall_not_found_is_absent() {
        let runner = MockRunner::new()
            .then(CommandOutput::ok("release \"ts0\" uninstalled"))
            .then(CommandOutput::failed(
                1,
                "Error: uninstall: Release not loaded: ts1: release: not found",
            ));
        let helm = ReleaseManager::with_runner(runner);

        assert!(
            helm.uninstall("ts0", "ts0", true, Some(Duration::from_secs(90)))
                .await
                .unwrap()
        );
        assert!(!helm.uninstall("ts1", "ts1", false, None).await.unwrap());

        assert_eq!(
            helm.runner().invocations()[0],
            vec!["uninstall", "ts0", "--namespace", "ts0", "--wait", "--timeout", "90s"]
        );
        // Uninstall is never retried
        assert_eq!(helm.runner().invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_with_install() {
        let helm = ReleaseManager::with_runner(MockRunner::new());
        helm.upgrade(&descriptor(), true, &fast_policy(1)).await.unwrap();

        let call = &helm.runner().invocations()[0];
        assert_eq!(call[0], "upgrade");
        assert!(call.contains(&"--install".to_string()));
    }

    #[tokio::test]
    async fn test_repo_commands() {
        let helm = ReleaseManager::with_runner(MockRunner::new());
        let chart = ChartRef {
            repo_name: "train-ticket".to_string(),
            repo_url: "https://charts.example.com".to_string(),
            chart_name: "trainticket".to_string(),
            version: None,
        };

        helm.add_repo(&chart).await.unwrap();
        helm.update_repos().await.unwrap();

        let calls = helm.runner().invocations();
        assert_eq!(
            calls[0],
            vec![
                "repo",
                "add",
                "train-ticket",
                "https://charts.example.com",
                "--force-update"
            ]
        );
        assert_eq!(calls[1], vec!["repo", "update"]);
    }

    #[test]
    fn test_descriptor_for_chart() {
        let chart = ChartRef {
            repo_name: "repo".to_string(),
            repo_url: "https://x".to_string(),
            chart_name: "app".to_string(),
            version: Some("1.2.3".to_string()),
        };
        let d = ReleaseDescriptor::for_chart("rel", &chart, "ns");
        assert_eq!(d.chart, "repo/app");
        assert_eq!(d.version.as_deref(), Some("1.2.3"));
        assert!(!d.create_namespace);
    }

    #[test]
    fn test_render_command_quotes() {
        let cmd = render_command(
            Path::new("helm"),
            &["--set".to_string(), "a=b c".to_string(), "".to_string()],
        );
        assert_eq!(cmd, "helm --set 'a=b c' ''");
    }

    #[test]
    fn test_set_flag_by_leaf_type() {
        assert_eq!(set_flag("a.enabled=false"), "--set");
        assert_eq!(set_flag("a.port=08080"), "--set-string");
        assert_eq!(set_flag("a.value="), "--set-string");
    }

    #[test]
    fn test_escape_set_token() {
        assert_eq!(escape_set_token("a.b=1,2"), "a.b=1\\,2");
        assert_eq!(escape_set_token("path=C:\\x"), "path=C:\\\\x");
        assert_eq!(escape_set_token("plain=v"), "plain=v");
    }

    #[test]
    fn test_policy_from_defaults() {
        let policy = InstallPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(10));
        assert_eq!(policy.timeout, Some(Duration::from_secs(600)));
        assert!(!policy.wait);
    }
}
