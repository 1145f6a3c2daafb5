//! Admin login and registration.
//!
//! The agent runs on behalf of an admin account. Where the credentials come
//! from is up to a [`CredentialResolver`]: an interactive prompt on a
//! terminal, or environment variables for headless hosts.

use crate::config::AdminEnv;
use crate::retry::{RetryManager, with_store_retry};
use crate::schedule::Clock;
use crate::store::{Admin, AdminStore, NewAdmin};
use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::io::{BufRead, IsTerminal, Write};
use tracing::{info, warn};

/// What the operator asked for.
#[derive(Debug)]
pub enum AdminRequest {
    Login {
        email: String,
        password: SecretString,
    },
    Register {
        name: String,
        email: String,
        phone: Option<String>,
        password: SecretString,
    },
}

pub trait CredentialResolver {
    /// Produce the next login or registration attempt. An error means no
    /// further attempts are possible.
    fn next_request(&mut self) -> Result<AdminRequest>;
}

/// Canonical form of an admin email: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Password digest stored in the admin table: base64(SHA-256("email:password")).
pub fn hash_password(email: &str, password: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_email(email).as_bytes());
    hasher.update(b":");
    hasher.update(password.expose_secret().as_bytes());
    BASE64.encode(hasher.finalize())
}

impl AdminRequest {
    fn normalized(mut self) -> Self {
        match &mut self {
            AdminRequest::Login { email, .. } | AdminRequest::Register { email, .. } => {
                *email = normalize_email(email);
            }
        }
        self
    }
}

/// Log in or register, asking the resolver again after a failed login.
///
/// Registering an email that already exists logs into that account instead.
/// Store connectivity failures are retried with `retry` without asking the
/// resolver again.
pub async fn ensure_admin<S, R, C>(
    store: &S,
    resolver: &mut R,
    retry: &RetryManager,
    clock: &C,
) -> Result<Admin>
where
    S: AdminStore,
    R: CredentialResolver,
    C: Clock,
{
    loop {
        let request = resolver.next_request()?.normalized();
        let admin =
            with_store_retry("admin lookup", retry, clock, || apply_request(store, &request))
                .await?;
        if let Some(admin) = admin {
            return Ok(admin);
        }
    }
}

/// `None` means the login was rejected.
async fn apply_request<S: AdminStore>(store: &S, request: &AdminRequest) -> Result<Option<Admin>> {
    match request {
        AdminRequest::Login { email, password } => {
            match store.find_admin_by_email(email).await? {
                Some(admin) if admin.password_hash == hash_password(email, password) => {
                    info!("Welcome back, {}!", admin.name);
                    Ok(Some(admin))
                }
                _ => {
                    warn!("Invalid credentials for {}. Try again or register.", email);
                    Ok(None)
                }
            }
        }
        AdminRequest::Register {
            name,
            email,
            phone,
            password,
        } => {
            if let Some(existing) = store.find_admin_by_email(email).await? {
                warn!("Admin {} already exists, logging you in.", email);
                return Ok(Some(existing));
            }

            let admin = store
                .insert_admin(NewAdmin {
                    name: name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                    password_hash: hash_password(email, password),
                })
                .await
                .context("failed to register admin")?;
            info!("Registration successful for {}", admin.email);
            Ok(Some(admin))
        }
    }
}

/// Hands out the credentials from the environment exactly once.
#[derive(Debug)]
pub struct EnvCredentials {
    admin: Option<AdminEnv>,
}

impl EnvCredentials {
    pub fn new(admin: AdminEnv) -> Self {
        Self { admin: Some(admin) }
    }
}

impl CredentialResolver for EnvCredentials {
    fn next_request(&mut self) -> Result<AdminRequest> {
        let admin = self
            .admin
            .take()
            .ok_or_else(|| anyhow!("environment credentials were rejected"))?;

        Ok(match admin.name {
            Some(name) => AdminRequest::Register {
                name,
                email: admin.email,
                phone: admin.phone,
                password: admin.password,
            },
            None => AdminRequest::Login {
                email: admin.email,
                password: admin.password,
            },
        })
    }
}

/// Asks on a terminal (or any reader/writer pair).
///
/// Passwords are read without echo when stdin is a terminal.
pub struct PromptCredentials<R, W> {
    input: R,
    output: W,
    hide_passwords: bool,
}

impl PromptCredentials<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        let stdin = std::io::stdin();
        Self {
            hide_passwords: stdin.is_terminal(),
            ..Self::new(stdin.lock(), std::io::stdout())
        }
    }
}

impl<R: BufRead, W: Write> PromptCredentials<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            hide_passwords: false,
        }
    }

    fn ask_password(&mut self, prompt: &str) -> Result<SecretString> {
        if self.hide_passwords {
            self.output.flush()?;
            let password =
                rpassword::prompt_password(prompt).context("failed to read password")?;
            return Ok(SecretString::from(password));
        }
        self.ask(prompt).map(SecretString::from)
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("input closed while waiting for '{}'", prompt.trim());
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> CredentialResolver for PromptCredentials<R, W> {
    fn next_request(&mut self) -> Result<AdminRequest> {
        let choice = self.ask("\nDo you already have an admin account? (y/n): ")?;

        if choice.eq_ignore_ascii_case("y") {
            let email = self.ask("Enter your email: ")?;
            let password = self.ask_password("Enter your password: ")?;
            return Ok(AdminRequest::Login { email, password });
        }

        writeln!(self.output, "\nRegistering new admin.")?;
        let name = self.ask("Enter your full name: ")?;
        let email = self.ask("Enter your email: ")?;
        let phone = self.ask("Enter contact number: ")?;
        let password = self.ask_password("Set your password: ")?;

        Ok(AdminRequest::Register {
            name,
            email,
            phone: (!phone.is_empty()).then_some(phone),
            password,
        })
    }
}

/// Prompt for the database host when it is not configured.
pub fn prompt_db_host<R: BufRead, W: Write>(input: R, output: W) -> Result<String> {
    let mut prompt = PromptCredentials::new(input, output);
    let host = prompt.ask("Enter database host IP (e.g., 10.132.93.84): ")?;
    if host.is_empty() {
        bail!("no database host given");
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::testing::RecordingClock;
    use crate::store::MemoryStore;
    use std::io::Cursor;
    use std::time::Duration;

    async fn run_ensure_admin<R: CredentialResolver>(
        store: &MemoryStore,
        resolver: &mut R,
    ) -> Result<Admin> {
        let retry = RetryManager::fixed(Duration::from_secs(5));
        ensure_admin(store, resolver, &retry, &RecordingClock::default()).await
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    struct Scripted(Vec<AdminRequest>);

    impl CredentialResolver for Scripted {
        fn next_request(&mut self) -> Result<AdminRequest> {
            if self.0.is_empty() {
                bail!("script exhausted");
            }
            Ok(self.0.remove(0))
        }
    }

    fn register(email: &str, password: &str) -> AdminRequest {
        AdminRequest::Register {
            name: "Asha Rao".into(),
            email: email.into(),
            phone: None,
            password: secret(password),
        }
    }

    #[test]
    fn test_hash_is_stable_and_salted_by_email() {
        let a = hash_password("ops@example.com", &secret("pw"));
        assert_eq!(a, hash_password(" OPS@example.com", &secret("pw")));
        assert_ne!(a, hash_password("dev@example.com", &secret("pw")));
        assert_ne!(a, "pw");
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let store = MemoryStore::new();
        let registered = run_ensure_admin(&store, &mut Scripted(vec![register("ops@example.com", "pw")]))
            .await
            .unwrap();

        let logged_in = run_ensure_admin(
            &store,
            &mut Scripted(vec![AdminRequest::Login {
                email: "ops@example.com".into(),
                password: secret("pw"),
            }]),
        )
        .await
        .unwrap();

        assert_eq!(registered, logged_in);
    }

    #[tokio::test]
    async fn test_duplicate_registration_returns_existing() {
        let store = MemoryStore::new();
        let first = run_ensure_admin(&store, &mut Scripted(vec![register("ops@example.com", "pw")]))
            .await
            .unwrap();
        let second = run_ensure_admin(
            &store,
            &mut Scripted(vec![register("ops@example.com", "other")]),
        )
        .await
        .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_wrong_password_asks_again() {
        let store = MemoryStore::new();
        run_ensure_admin(&store, &mut Scripted(vec![register("ops@example.com", "pw")]))
            .await
            .unwrap();

        let mut script = Scripted(vec![
            AdminRequest::Login {
                email: "ops@example.com".into(),
                password: secret("wrong"),
            },
            AdminRequest::Login {
                email: "ops@example.com".into(),
                password: secret("pw"),
            },
        ]);
        let admin = run_ensure_admin(&store, &mut script).await.unwrap();
        assert_eq!(admin.email, "ops@example.com");
        assert!(script.0.is_empty());
    }

    #[tokio::test]
    async fn test_env_credentials_give_up_after_rejection() {
        let store = MemoryStore::new();
        let mut env = EnvCredentials::new(AdminEnv {
            email: "ghost@example.com".into(),
            password: secret("pw"),
            name: None,
            phone: None,
        });

        let err = run_ensure_admin(&store, &mut env).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn test_prompt_registration_flow() {
        let input = Cursor::new("n\nAsha Rao\nops@example.com\n\nsecret\n");
        let mut prompt = PromptCredentials::new(input, Vec::new());

        match prompt.next_request().unwrap() {
            AdminRequest::Register {
                name, email, phone, ..
            } => {
                assert_eq!(name, "Asha Rao");
                assert_eq!(email, "ops@example.com");
                assert_eq!(phone, None);
            }
            other => panic!("expected registration, got {:?}", other),
        }
    }

    #[test]
    fn test_prompt_closed_input_is_an_error() {
        let mut prompt = PromptCredentials::new(Cursor::new("y\n"), Vec::new());
        assert!(prompt.next_request().is_err());
    }

    #[test]
    fn test_prompt_db_host() {
        let host = prompt_db_host(Cursor::new(" 10.1.2.3 \n"), Vec::new()).unwrap();
        assert_eq!(host, "10.1.2.3");
        assert!(prompt_db_host(Cursor::new("\n"), Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_email_case_and_whitespace_are_ignored() {
        let store = MemoryStore::new();
        let registered = run_ensure_admin(
            &store,
            &mut EnvCredentials::new(AdminEnv {
                email: "Ops@Example.com".into(),
                password: secret("pw"),
                name: Some("Ops".into()),
                phone: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(registered.email, "ops@example.com");

        let logged_in = run_ensure_admin(
            &store,
            &mut EnvCredentials::new(AdminEnv {
                email: "ops@example.com".into(),
                password: secret("pw"),
                name: None,
                phone: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(logged_in, registered);

        let duplicate =
            run_ensure_admin(&store, &mut Scripted(vec![register(" OPS@example.COM ", "x")]))
                .await
                .unwrap();
        assert_eq!(duplicate, registered);
    }

    #[tokio::test]
    async fn test_store_outage_does_not_consume_credentials() {
        let store = MemoryStore::new();
        store.inject_outage(2).await;
        let retry = RetryManager::fixed(Duration::from_secs(5));
        let clock = RecordingClock::default();

        // Environment credentials only yield once, so a re-ask would fail.
        let admin = ensure_admin(
            &store,
            &mut EnvCredentials::new(AdminEnv {
                email: "ops@example.com".into(),
                password: secret("pw"),
                name: Some("Ops".into()),
                phone: None,
            }),
            &retry,
            &clock,
        )
        .await
        .unwrap();

        assert_eq!(admin.email, "ops@example.com");
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_prompt_login_reads_password_from_reader() {
        let input = Cursor::new("y\nops@example.com\nhunter2\n");
        let mut prompt = PromptCredentials::new(input, Vec::new());

        match prompt.next_request().unwrap() {
            AdminRequest::Login { email, password } => {
                assert_eq!(email, "ops@example.com");
                assert_eq!(password.expose_secret(), "hunter2");
            }
            other => panic!("expected login, got {:?}", other),
        }
    }
}
