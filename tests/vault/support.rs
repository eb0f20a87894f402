//! In-memory vault CLI used by the queue, session and tools tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use switchboard::credentials::SecretValue;
use switchboard::vault::{
    CommandQueue, CommandRunner, ExecResult, VaultCommand, VaultCredentials, VaultError,
    VaultSession,
};

type Handler = Box<dyn Fn(&VaultCommand) -> Result<ExecResult, VaultError> + Send + Sync>;
type Delay = Box<dyn Fn(&VaultCommand) -> Duration + Send + Sync>;

/// Successful CLI output.
pub fn ok(stdout: &str) -> Result<ExecResult, VaultError> {
    Ok(ExecResult {
        exit_code: Some(0),
        stdout: stdout.to_owned(),
        stderr: String::new(),
        duration: Duration::ZERO,
    })
}

/// Failed CLI output with a message on stderr.
pub fn fail(stderr: &str) -> Result<ExecResult, VaultError> {
    Ok(ExecResult {
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_owned(),
        duration: Duration::ZERO,
    })
}

/// Answers that behave like a healthy vault CLI.
pub fn happy_cli(command: &VaultCommand) -> Result<ExecResult, VaultError> {
    match command.subcommand() {
        "config" => ok("Saved setting `config`."),
        "login" => ok("You are logged in!"),
        "unlock" => ok("TOKEN123\n"),
        "sync" => ok("Syncing complete."),
        "lock" => ok("Your vault is locked."),
        "logout" => ok("You have logged out."),
        "status" => ok(r#"{"status":"unlocked","userEmail":"ops@example.com"}"#),
        "list" => ok(r#"[{"id":"abc","name":"github"}]"#),
        "get" => match command.args.get(1).map(String::as_str) {
            Some("password") => ok("s3cret"),
            _ => ok(r#"{"id":"abc","name":"github"}"#),
        },
        other => fail(&format!("unknown command {other}")),
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Records every call and answers through a handler.
pub struct FakeRunner {
    calls: Mutex<Vec<VaultCommand>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    handler: Handler,
    delay: Delay,
}

impl FakeRunner {
    pub fn new(
        handler: impl Fn(&VaultCommand) -> Result<ExecResult, VaultError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            handler: Box::new(handler),
            delay: Box::new(|_| Duration::ZERO),
        }
    }

    pub fn with_delay(
        mut self,
        delay: impl Fn(&VaultCommand) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self) -> Vec<VaultCommand> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.subcommand().to_owned())
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &VaultCommand) -> Result<ExecResult, VaultError> {
        self.calls.lock().expect("calls lock").push(command.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let delay = (self.delay)(command);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(command)
    }
}

pub fn credentials() -> VaultCredentials {
    VaultCredentials {
        client_id: SecretValue::new("user.client-id"),
        client_secret: SecretValue::new("client-secret"),
        password: SecretValue::new("hunter2"),
    }
}

/// A session over `runner` with a 60s sync interval.
pub fn session_with(runner: &Arc<FakeRunner>, server_url: Option<&str>) -> Arc<VaultSession> {
    let queue = Arc::new(CommandQueue::new(
        Arc::clone(runner) as Arc<dyn CommandRunner>,
        Duration::from_secs(5),
    ));
    VaultSession::new(
        queue,
        credentials(),
        Duration::from_secs(60),
        server_url.map(str::to_owned),
    )
}
