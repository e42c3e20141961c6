//! Power Controller
//!
//! Runs the two power transitions as strictly sequential pipelines:
//!
//! * on:  authenticate → resolve → dispatch
//! * off: connect over SSH → execute the shutdown command
//!
//! The first failing stage ends the run and its error is returned as is; nothing
//! is retried. One controller runs one operation at a time, so a second request
//! waits for the first to finish instead of interleaving requests to the router.

use crate::config::Config;
use crate::error::PowerError;
use crate::http::HttpClient;
use crate::models::{
    CommandOutput, Credentials, DeviceRecord, Phase, PowerState, RouterEndpoint, SessionToken,
    SshTarget,
};
use crate::parser::ListingLayout;
use crate::router::{self, RouterTransport};
use crate::ssh::{ShutdownClient, Ssh2Connector};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Surface a host integration (CLI, smart-home bridge, ...) drives
#[async_trait]
pub trait PowerSwitch: Send + Sync {
    /// Human-readable name of the switch
    fn name(&self) -> &str;

    async fn power_on(&self) -> Result<(), PowerError>;

    async fn power_off(&self) -> Result<(), PowerError>;

    fn power_state(&self) -> PowerState;
}

/// Everything a controller needs to know about its target
#[derive(Debug, Clone)]
pub struct PowerSettings {
    pub name: String,
    pub endpoint: RouterEndpoint,
    pub credentials: Credentials,
    pub target_name: String,
    pub layout: ListingLayout,
    pub ssh_target: SshTarget,
}

impl PowerSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            name: cfg.name.clone(),
            endpoint: cfg.endpoint()?,
            credentials: cfg.credentials(),
            target_name: cfg.router.target_name.trim().to_string(),
            layout: cfg.router.layout,
            ssh_target: cfg.ssh_target()?,
        })
    }
}

/// Puts the phase back to idle when a run ends, however it ends
struct IdleOnDrop<'a>(&'a watch::Sender<Phase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(Phase::Idle);
    }
}

pub struct PowerController {
    settings: PowerSettings,
    transport: Arc<dyn RouterTransport>,
    shutdown: ShutdownClient,
    phase: Arc<watch::Sender<Phase>>,
    in_flight: Mutex<()>,
}

impl PowerController {
    pub fn new(
        settings: PowerSettings,
        transport: Arc<dyn RouterTransport>,
        shutdown: ShutdownClient,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            settings,
            transport,
            shutdown,
            phase: Arc::new(phase),
            in_flight: Mutex::new(()),
        }
    }

    /// Controller talking to a real router over HTTP and a real host over SSH
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let settings = PowerSettings::from_config(cfg)?;
        let transport = Arc::new(HttpClient::new(&cfg.http)?);
        let shutdown = ShutdownClient::new(
            Arc::new(Ssh2Connector),
            cfg.ssh.command.clone(),
            Duration::from_secs(cfg.ssh.timeout),
        );
        Ok(Self::new(settings, transport, shutdown))
    }

    pub fn settings(&self) -> &PowerSettings {
        &self.settings
    }

    /// Current state-machine phase; `Idle` when nothing is running
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Follow phase changes as they happen
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Always `Off`.
    ///
    /// The controller is fire-and-forget: it never queries the machine, so it
    /// has no idea whether it is actually running. Hosts that show a toggle
    /// should treat this as "not known to be on".
    pub fn power_state(&self) -> PowerState {
        PowerState::Off
    }

    async fn begin(&self, operation: &str) -> MutexGuard<'_, ()> {
        match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(
                    "[{}] Another operation is running, {} waits for it",
                    self.settings.name,
                    operation
                );
                self.in_flight.lock().await
            }
        }
    }

    fn enter(&self, phase: Phase) {
        tracing::info!("[{}] {}...", self.settings.name, phase);
        self.phase.send_replace(phase);
    }

    /// Authenticate, then resolve the target with the fresh session
    async fn find_target(&self) -> Result<(SessionToken, DeviceRecord), PowerError> {
        let transport = self.transport.as_ref();
        let endpoint = &self.settings.endpoint;

        self.enter(Phase::Authenticating);
        let token = router::authenticate(transport, endpoint, &self.settings.credentials).await?;

        self.enter(Phase::Resolving);
        let record = router::resolve(
            transport,
            endpoint,
            &token,
            &self.settings.target_name,
            self.settings.layout.layouts(),
        )
        .await?;

        Ok((token, record))
    }

    /// Wake the target through the router.
    pub async fn power_on(&self) -> Result<(), PowerError> {
        let _running = self.begin("power on").await;
        let _idle = IdleOnDrop(&self.phase);

        let (token, record) = self.find_target().await?;

        self.enter(Phase::Dispatching);
        router::dispatch(
            self.transport.as_ref(),
            &self.settings.endpoint,
            &token,
            &record.hardware_address,
        )
        .await?;

        tracing::info!(
            "[{}] Wake request sent for {} ({})",
            self.settings.name,
            record.display_name,
            record.hardware_address
        );
        Ok(())
    }

    /// Log in and look the target up without waking it.
    pub async fn lookup(&self) -> Result<DeviceRecord, PowerError> {
        let _running = self.begin("lookup").await;
        let _idle = IdleOnDrop(&self.phase);

        let (_, record) = self.find_target().await?;
        Ok(record)
    }

    /// Shut the target down over SSH.
    pub async fn power_off(&self) -> Result<CommandOutput, PowerError> {
        let _running = self.begin("power off").await;
        let _idle = IdleOnDrop(&self.phase);

        self.enter(Phase::ConnectingSsh);
        let phase = Arc::clone(&self.phase);
        let name = self.settings.name.clone();
        let output = self
            .shutdown
            .shutdown(&self.settings.ssh_target, move || {
                // A late callback from a timed-out run must not revive the phase
                phase.send_if_modified(|p| {
                    let connecting = *p == Phase::ConnectingSsh;
                    if connecting {
                        tracing::info!("[{}] {}...", name, Phase::Executing);
                        *p = Phase::Executing;
                    }
                    connecting
                });
            })
            .await?;

        tracing::info!(
            "[{}] Shutdown command \"{}\" completed",
            self.settings.name,
            self.shutdown.command()
        );
        Ok(output)
    }
}

#[async_trait]
impl PowerSwitch for PowerController {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn power_on(&self) -> Result<(), PowerError> {
        PowerController::power_on(self).await
    }

    async fn power_off(&self) -> Result<(), PowerError> {
        PowerController::power_off(self).await.map(|_| ())
    }

    fn power_state(&self) -> PowerState {
        PowerController::power_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, ResolveError, ShutdownError, TransportError};
    use crate::models::SshCredential;
    use crate::router::testing::FakeRouter;
    use crate::router::Method;
    use crate::ssh::testing::{FakeConnector, Script};

    const LISTING: &str = r#"
        <table>
          <tr class="wol_main_tr">
            <td><input type="checkbox" name="wakeupchk" value="11:22:33:44:55:66"></td>
            <td><span class="wol_main_span">11:22:33:44:55:66</span></td>
            <td><span class="wol_main_span">NAS</span></td>
          </tr>
          <tr class="wol_main_tr">
            <td><input type="checkbox" name="wakeupchk" value="AA:BB:CC:DD:EE:FF"></td>
            <td><span class="wol_main_span">AA:BB:CC:DD:EE:FF</span></td>
            <td><span class="wol_main_span">Desktop-1</span></td>
          </tr>
        </table>"#;

    fn settings() -> PowerSettings {
        PowerSettings {
            name: "Desktop".into(),
            endpoint: RouterEndpoint::new("http://router.local", Some(8080)).unwrap(),
            credentials: Credentials {
                username: "admin".into(),
                password: "pw".into(),
            },
            target_name: "Desktop-1".into(),
            layout: ListingLayout::Auto,
            ssh_target: SshTarget {
                host: "desktop.local".into(),
                port: 22,
                username: "me".into(),
                credential: SshCredential::Password("pw".into()),
            },
        }
    }

    fn controller(router: Arc<FakeRouter>, script: Script) -> (PowerController, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::new(script));
        let shutdown =
            ShutdownClient::new(connector.clone(), "shutdown /s /t 0", Duration::from_secs(5));
        (PowerController::new(settings(), router, shutdown), connector)
    }

    fn login(token: &str) -> String {
        format!("<script>setCookie('{}');</script>", token)
    }

    #[tokio::test]
    async fn test_power_on_end_to_end() {
        let router = Arc::new(
            FakeRouter::new()
                .respond(&login("sess1"))
                .respond(LISTING)
                .respond("<html>ok</html>"),
        );
        let (ctl, connector) = controller(router.clone(), Script::clean());

        ctl.power_on().await.unwrap();

        let requests = router.requests();
        let steps: Vec<(Method, &str)> = requests
            .iter()
            .map(|r| (r.method, r.url.as_str()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (Method::Post, "http://router.local:8080/sess-bin/login_handler.cgi"),
                (
                    Method::Get,
                    "http://router.local:8080/sess-bin/timepro.cgi?tmenu=iframe&smenu=expertconfwollist"
                ),
                (Method::Post, "http://router.local:8080/sess-bin/timepro.cgi"),
            ]
        );
        assert_eq!(requests[2].field("wakeupchk"), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(requests[2].field("act"), Some("wake"));
        assert!(connector.connects.lock().unwrap().is_empty());
        assert_eq!(ctl.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_each_run_uses_its_own_session() {
        let router = Arc::new(
            FakeRouter::new()
                .respond(&login("first"))
                .respond(LISTING)
                .respond("")
                .respond(&login("second"))
                .respond(LISTING)
                .respond(""),
        );
        let (ctl, _) = controller(router.clone(), Script::clean());

        ctl.power_on().await.unwrap();
        ctl.power_on().await.unwrap();

        let cookies: Vec<Option<String>> = router.requests().into_iter().map(|r| r.cookie).collect();
        assert_eq!(
            cookies,
            vec![
                None,
                Some("efm_session_id=first".to_string()),
                Some("efm_session_id=first".to_string()),
                None,
                Some("efm_session_id=second".to_string()),
                Some("efm_session_id=second".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_login_failure_stops_pipeline() {
        let router = Arc::new(FakeRouter::new().respond("<html>wrong password</html>"));
        let (ctl, _) = controller(router.clone(), Script::clean());

        let err = ctl.power_on().await.unwrap_err();
        assert!(matches!(err, PowerError::Auth(AuthError::SessionTokenNotFound)));
        assert_eq!(router.requests().len(), 1);
        assert_eq!(ctl.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_unknown_device_skips_wake() {
        let listing = LISTING.replace("Desktop-1", "Laptop");
        let router = Arc::new(FakeRouter::new().respond(&login("s")).respond(&listing));
        let (ctl, _) = controller(router.clone(), Script::clean());

        let err = ctl.power_on().await.unwrap_err();
        assert!(matches!(
            err,
            PowerError::Resolve(ResolveError::DeviceNotFound(ref name)) if name == "Desktop-1"
        ));
        assert_eq!(router.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_list_timeout_reports_phase() {
        let router = Arc::new(
            FakeRouter::new()
                .respond(&login("s"))
                .fail(TransportError::Timeout),
        );
        let (ctl, _) = controller(router.clone(), Script::clean());

        let err = ctl.power_on().await.unwrap_err();
        assert!(matches!(
            err,
            PowerError::Timeout {
                phase: Phase::Resolving
            }
        ));
    }

    #[tokio::test]
    async fn test_overlapping_power_on_runs_do_not_interleave() {
        let router = Arc::new(
            FakeRouter::new()
                .with_delay(Duration::from_millis(20))
                .respond(&login("a"))
                .respond(LISTING)
                .respond("")
                .respond(&login("b"))
                .respond(LISTING)
                .respond(""),
        );
        let (ctl, _) = controller(router.clone(), Script::clean());

        let (first, second) = tokio::join!(ctl.power_on(), ctl.power_on());
        first.unwrap();
        second.unwrap();

        let methods: Vec<Method> = router.requests().iter().map(|r| r.method).collect();
        assert_eq!(
            methods,
            vec![
                Method::Post,
                Method::Get,
                Method::Post,
                Method::Post,
                Method::Get,
                Method::Post
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup_does_not_wake() {
        let router = Arc::new(FakeRouter::new().respond(&login("s")).respond(LISTING));
        let (ctl, _) = controller(router.clone(), Script::clean());

        let record = ctl.lookup().await.unwrap();
        assert_eq!(record.hardware_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(router.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_power_off() {
        let router = Arc::new(FakeRouter::new());
        let (ctl, connector) = controller(router.clone(), Script::clean());
        let mut phases = ctl.subscribe();

        ctl.power_off().await.unwrap();

        assert!(router.requests().is_empty());
        assert_eq!(*connector.connects.lock().unwrap(), vec!["desktop.local:22"]);
        assert_eq!(*connector.commands.lock().unwrap(), vec!["shutdown /s /t 0"]);
        assert!(phases.has_changed().unwrap());
        assert_eq!(*phases.borrow_and_update(), Phase::Idle);
        assert_eq!(ctl.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_power_off_connection_drop() {
        let router = Arc::new(FakeRouter::new());
        let (ctl, _) = controller(router, Script::DropMidStream);

        let err = PowerSwitch::power_off(&ctl).await.unwrap_err();
        assert!(matches!(err, PowerError::Shutdown(ShutdownError::StreamError(_))));
        assert_eq!(err.phase(), Phase::Executing);
    }

    #[tokio::test]
    async fn test_power_state_is_fixed_off() {
        let router = Arc::new(
            FakeRouter::new()
                .respond(&login("s"))
                .respond(LISTING)
                .respond(""),
        );
        let (ctl, _) = controller(router, Script::clean());

        assert_eq!(PowerSwitch::power_state(&ctl), PowerState::Off);
        PowerSwitch::power_on(&ctl).await.unwrap();
        assert!(!ctl.power_state().is_on());
        assert_eq!(PowerSwitch::name(&ctl), "Desktop");
    }

    #[test]
    fn test_settings_from_config() {
        let cfg = Config::parse(
            r#"
            name = "Gaming PC"

            [router]
            domain = "http://router.local"
            wol_port = 8080
            username = "admin"
            password = "pw"
            target_name = "  Desktop-1 "
        "#,
        )
        .unwrap();

        let ctl = PowerController::from_config(&cfg).unwrap();
        let settings = ctl.settings();
        assert_eq!(settings.name, "Gaming PC");
        assert_eq!(settings.target_name, "Desktop-1");
        assert_eq!(settings.ssh_target.address(), "router.local:22");
        assert_eq!(ctl.phase(), Phase::Idle);
    }
}
