//! Session orchestrator.
//!
//! Owns the transport, the codec, and both state machines. Every inbound
//! frame is decoded and routed to the auth handshake until it succeeds, then
//! to the channel lifecycle. A watchdog deadline is armed on every outbound
//! request; if it passes before the next transition the session fails with
//! a timeout. The transport is closed exactly once, on every exit path.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::traits::CustodyClient;
use permitpool_core::types::{AuthParams, AuthSession, ChannelId};
use permitpool_crypto::{AccountSigner, SessionSigner};

use crate::auth::{AuthHandshake, AuthStep};
use crate::config::{FlowConfig, YellowConfig};
use crate::custody::NitroliteCustody;
use crate::codec::{decode, Codec, Inbound, Outbound, Signing};
use crate::lifecycle::{ChannelLifecycle, FlowPlan, LifecycleStep, Phase, Submission};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};

/// How far the session goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Authenticate, then run the whole channel lifecycle
    FullFlow,
    /// Authenticate and stop
    AuthOnly,
}

/// Session tuning.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// How far to go
    pub mode: SessionMode,
    /// Window allowed between an outbound request and the next transition
    pub watchdog: Duration,
}

/// Per-run state shared by the orchestrator's log lines and report.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Run identifier
    pub session_id: Uuid,
    /// Account address
    pub account: String,
    /// Session key address
    pub session_key: String,
    /// Handshake outcome, once authenticated
    pub auth: Option<AuthSession>,
    /// Channel id, once created
    pub channel_id: Option<ChannelId>,
    /// Lifecycle phase reached
    pub phase: Phase,
    /// Confirmed on-chain submissions, in order
    pub submissions: Vec<Submission>,
}

/// Outcome of a successful run.
#[derive(Clone, Debug)]
pub struct SessionReport {
    /// Run identifier
    pub session_id: Uuid,
    /// Mode the run was started in
    pub mode: SessionMode,
    /// Account address
    pub account: String,
    /// Handshake outcome
    pub auth: AuthSession,
    /// Channel id (full flow only)
    pub channel_id: Option<ChannelId>,
    /// Version of the last settled state
    pub final_version: Option<u64>,
    /// Lifecycle phase reached (`Idle` for auth-only runs)
    pub phase: Phase,
    /// Confirmed on-chain submissions, in order
    pub submissions: Vec<Submission>,
}

/// One authenticated session over one transport.
pub struct Session<T, C> {
    transport: T,
    custody: C,
    codec: Codec,
    session_signer: SessionSigner,
    auth: AuthHandshake,
    lifecycle: ChannelLifecycle,
    options: SessionOptions,
    ctx: SessionContext,
    pending: Option<u64>,
    deadline: Instant,
}

impl<T, C> Session<T, C>
where
    T: Transport,
    C: CustodyClient,
{
    /// Assembles a session. `params` must announce `session_signer`'s address.
    pub fn new(
        transport: T,
        custody: C,
        account: AccountSigner,
        session_signer: SessionSigner,
        params: AuthParams,
        plan: FlowPlan,
        options: SessionOptions,
    ) -> Result<Self> {
        if !params.session_key().eq_ignore_ascii_case(&session_signer.address_string()) {
            return Err(PermitPoolError::Config(format!(
                "auth params announce session key {}, signer holds {}",
                params.session_key(),
                session_signer.address_string()
            )));
        }

        let ctx = SessionContext {
            session_id: Uuid::new_v4(),
            account: account.address_string(),
            session_key: session_signer.address_string(),
            auth: None,
            channel_id: None,
            phase: Phase::Idle,
            submissions: Vec::new(),
        };

        Ok(Self {
            lifecycle: ChannelLifecycle::new(ctx.account.clone(), plan),
            auth: AuthHandshake::new(account, params),
            codec: Codec::new(),
            deadline: Instant::now() + options.watchdog,
            pending: None,
            transport,
            custody,
            session_signer,
            options,
            ctx,
        })
    }

    /// Runs the session to completion and closes the transport.
    pub async fn run(mut self) -> Result<SessionReport> {
        let span = info_span!("session", session_id = %self.ctx.session_id);

        async move {
            let outcome = self.drive().await;

            if let Err(e) = self.transport.close().await {
                warn!(error = %e, "Failed to close transport");
            }

            match &outcome {
                Ok(report) => info!(
                    submissions = report.submissions.len(),
                    channel_id = ?report.channel_id,
                    "Session complete"
                ),
                Err(e) => error!(
                    phase = %self.phase_name(),
                    channel_id = ?self.ctx.channel_id,
                    settled = self.ctx.submissions.len(),
                    error = %e,
                    "Session failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<SessionReport> {
        info!(account = %self.ctx.account, session_key = %self.ctx.session_key, "Authenticating");
        let first = self.auth.start()?;
        self.send(first).await?;

        loop {
            let text = match self.next_event().await? {
                TransportEvent::Message(text) => text,
                TransportEvent::Undecodable(reason) => {
                    warn!(%reason, "Dropping undecodable frame");
                    continue;
                }
                TransportEvent::Closed(reason) => return Err(self.on_closed(reason)),
                TransportEvent::Error(e) => return Err(PermitPoolError::Transport(e)),
            };

            let frame = match decode(&text) {
                Ok(frame) => frame,
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, "Dropping unparseable frame");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let step = self.dispatch(frame).await;
            self.sync_context();
            if let Some(report) = step? {
                return Ok(report);
            }
        }
    }

    async fn next_event(&mut self) -> Result<TransportEvent> {
        match tokio::time::timeout_at(self.deadline, self.transport.next_event()).await {
            Ok(event) => Ok(event),
            Err(_) => Err(PermitPoolError::Timeout {
                phase: self.phase_name(),
                seconds: self.options.watchdog.as_secs(),
            }),
        }
    }

    async fn dispatch(&mut self, frame: Inbound) -> Result<Option<SessionReport>> {
        if !frame.method.is_error() {
            if let (Some(id), Some(pending)) = (frame.request_id, self.pending) {
                if id != pending {
                    debug!(id, pending, method = %frame.method, "Ignoring response to another request");
                    return Ok(None);
                }
            }
        }

        if !self.auth.is_authenticated() {
            return self.dispatch_auth(&frame).await;
        }

        if frame.method.is_error() {
            return Err(PermitPoolError::Server(frame.error_message()));
        }

        match self.lifecycle.on_frame(&frame, &self.custody).await? {
            LifecycleStep::Send(request) => {
                self.send(Outbound::session(request)).await?;
                Ok(None)
            }
            LifecycleStep::Complete => Ok(Some(self.report()?)),
            LifecycleStep::Ignored => {
                debug!(method = %frame.method, "Frame ignored");
                Ok(None)
            }
        }
    }

    async fn dispatch_auth(&mut self, frame: &Inbound) -> Result<Option<SessionReport>> {
        match self.auth.on_frame(frame).await? {
            AuthStep::Send(outbound) => {
                self.send(outbound).await?;
                Ok(None)
            }
            AuthStep::Authenticated(session) => {
                info!(address = %session.address, "Authenticated");
                self.ctx.auth = Some(session);

                if self.options.mode == SessionMode::AuthOnly {
                    return Ok(Some(self.report()?));
                }

                let request = self.lifecycle.begin()?;
                self.send(Outbound::session(request)).await?;
                Ok(None)
            }
            AuthStep::Ignored => Ok(None),
        }
    }

    async fn send(&mut self, outbound: Outbound) -> Result<()> {
        let rpc = self.codec.request(&outbound.request);
        let signatures = match outbound.signing {
            Signing::Unsigned => Vec::new(),
            Signing::Detached(sig) => vec![sig],
            Signing::SessionKey => vec![self.session_signer.sign_session_message(&rpc.payload())?],
        };

        let text = rpc.to_wire(&signatures)?;
        debug!(id = rpc.id, method = %rpc.method, "Sending request");
        self.transport.send(text).await?;

        self.pending = Some(rpc.id);
        self.deadline = Instant::now() + self.options.watchdog;
        Ok(())
    }

    fn on_closed(&mut self, reason: Option<String>) -> PermitPoolError {
        if let Err(e) = self.auth.on_closed(reason.as_deref()) {
            return e;
        }
        PermitPoolError::ConnectionClosed(reason.unwrap_or_else(|| {
            format!("server closed the connection during {}", self.lifecycle.phase().name())
        }))
    }

    fn phase_name(&self) -> String {
        if self.auth.is_authenticated() {
            self.lifecycle.phase().name().to_owned()
        } else {
            format!("auth ({:?})", self.auth.state())
        }
    }

    /// Mirrors the lifecycle's channel, phase and submissions into the context.
    fn sync_context(&mut self) {
        self.ctx.channel_id = self.lifecycle.channel().map(|c| c.id.clone());
        self.ctx.phase = self.lifecycle.phase();
        self.ctx.submissions = self.lifecycle.submissions().to_vec();
    }

    fn report(&mut self) -> Result<SessionReport> {
        self.sync_context();
        let auth = self
            .ctx
            .auth
            .clone()
            .ok_or_else(|| PermitPoolError::Internal("report before authentication".into()))?;

        Ok(SessionReport {
            session_id: self.ctx.session_id,
            mode: self.options.mode,
            account: self.ctx.account.clone(),
            auth,
            channel_id: self.ctx.channel_id.clone(),
            final_version: self.lifecycle.channel().map(|c| c.state.version),
            phase: self.ctx.phase,
            submissions: self.ctx.submissions.clone(),
        })
    }
}

/// Connects to the configured node and runs one session with a fresh session key.
///
/// The custody client is only built for [`SessionMode::FullFlow`]; auth-only
/// runs never touch the RPC endpoint.
pub async fn run_live(
    network: &YellowConfig,
    flow: &FlowConfig,
    account: AccountSigner,
    mode: SessionMode,
) -> Result<SessionReport> {
    network.validate()?;
    flow.validate()?;

    let session_signer = SessionSigner::generate();
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let params = flow.auth_params(&session_signer.address_string(), now)?;
    let plan = flow.plan(&account.address_string(), network)?;
    let custody = match mode {
        SessionMode::FullFlow => {
            let custody = NitroliteCustody::new(network, account.clone())?;
            debug!(custody = ?custody.custody_address(), chain_id = network.chain_id, "Custody client ready");
            Some(custody)
        }
        SessionMode::AuthOnly => None,
    };

    let transport = WebSocketTransport::connect(
        &network.ws_url,
        network.connect_attempts,
        Duration::from_millis(500),
    )
    .await?;

    let options = SessionOptions {
        mode,
        watchdog: network.watchdog(),
    };
    Session::new(transport, custody, account, session_signer, params, plan, options)?
        .run()
        .await
}
