//! Challenge/response authentication.
//!
//! ```text
//! Init ──start──▶ AwaitingChallenge ──auth_challenge──▶ AwaitingVerifyAck ──auth_verify──▶ Authenticated
//!                        │                                     │
//!                        └──────── auth_error / close ─────────┴──▶ Failed
//! ```
//!
//! The handshake owns the [`AuthParams`] sent in `auth_request`; the same
//! instance is handed to the account signer when the challenge arrives.

use serde_json::Value;
use tracing::{debug, info, warn};

use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::types::{AuthParams, AuthSession};
use permitpool_crypto::{AccountSigner, AuthDomain};

use crate::codec::{Inbound, Method, Outbound, Request};

/// Handshake state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing sent yet
    Init,
    /// `auth_request` sent
    AwaitingChallenge,
    /// `auth_verify` sent
    AwaitingVerifyAck,
    /// Server accepted the signature
    Authenticated,
    /// Terminal failure
    Failed,
}

/// What the caller should do after feeding a frame.
#[derive(Debug)]
pub enum AuthStep {
    /// Send this request
    Send(Outbound),
    /// Handshake finished
    Authenticated(AuthSession),
    /// Frame not relevant in the current state
    Ignored,
}

/// Client side of the auth handshake.
pub struct AuthHandshake {
    state: AuthState,
    account: AccountSigner,
    params: AuthParams,
    domain: AuthDomain,
}

impl AuthHandshake {
    /// Creates a handshake for `account` announcing `params`.
    pub fn new(account: AccountSigner, params: AuthParams) -> Self {
        let domain = AuthDomain::for_params(&params);
        Self {
            state: AuthState::Init,
            account,
            params,
            domain,
        }
    }

    /// Current state.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Parameters announced in `auth_request`.
    pub fn params(&self) -> &AuthParams {
        &self.params
    }

    /// True once the server accepted the signature.
    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Builds the unsigned `auth_request`.
    pub fn start(&mut self) -> Result<Outbound> {
        if self.state != AuthState::Init {
            return Err(PermitPoolError::Internal(format!(
                "auth handshake already started ({:?})",
                self.state
            )));
        }

        self.state = AuthState::AwaitingChallenge;
        Ok(Outbound::unsigned(Request::AuthRequest {
            address: self.account.address_string(),
            params: self.params.clone(),
        }))
    }

    /// Feeds one inbound frame.
    pub async fn on_frame(&mut self, frame: &Inbound) -> Result<AuthStep> {
        match (self.state, &frame.method) {
            (AuthState::AwaitingChallenge | AuthState::AwaitingVerifyAck, Method::AuthError)
            | (AuthState::AwaitingChallenge | AuthState::AwaitingVerifyAck, Method::Error) => {
                Err(self.fail(frame.error_message()))
            }
            (AuthState::AwaitingChallenge, Method::AuthChallenge) => self.on_challenge(frame).await,
            (AuthState::AwaitingVerifyAck, Method::AuthVerify) => self.on_verified(frame),
            (AuthState::Authenticated, Method::AuthChallenge) => {
                debug!("Ignoring challenge after authentication");
                Ok(AuthStep::Ignored)
            }
            (state, method) => {
                debug!(?state, %method, "Ignoring frame during auth");
                Ok(AuthStep::Ignored)
            }
        }
    }

    /// Reports a connection close. Fails the handshake unless it already succeeded.
    pub fn on_closed(&mut self, reason: Option<&str>) -> Result<()> {
        if self.is_authenticated() {
            return Ok(());
        }
        Err(self.fail(format!(
            "connection closed before authentication ({})",
            reason.unwrap_or("no reason")
        )))
    }

    async fn on_challenge(&mut self, frame: &Inbound) -> Result<AuthStep> {
        let challenge = match frame
            .payload
            .get("challenge_message")
            .or_else(|| frame.payload.get("challenge"))
        {
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(self.fail(format!("malformed challenge: {other}"))),
            None => return Err(self.fail("auth_challenge without a challenge")),
        };

        let signed = self
            .account
            .sign_structured(&self.params, self.domain.clone())
            .sign(&challenge)
            .await;
        let signature = match signed {
            Ok(sig) => sig,
            Err(e) => return Err(self.fail(format!("could not sign challenge: {e}"))),
        };

        info!("Challenge received; sending auth_verify");
        self.state = AuthState::AwaitingVerifyAck;
        Ok(AuthStep::Send(Outbound::detached(
            Request::AuthVerify { challenge },
            signature,
        )))
    }

    fn on_verified(&mut self, frame: &Inbound) -> Result<AuthStep> {
        if frame.payload.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(self.fail("server rejected the challenge signature"));
        }

        let session_key = frame
            .str_field("session_key")
            .unwrap_or(self.params.session_key())
            .to_owned();
        if !session_key.eq_ignore_ascii_case(self.params.session_key()) {
            return Err(self.fail(format!(
                "server confirmed session key {session_key}, expected {}",
                self.params.session_key()
            )));
        }

        let address = frame
            .str_field("address")
            .map(str::to_owned)
            .unwrap_or_else(|| self.account.address_string());
        if !address.eq_ignore_ascii_case(&self.account.address_string()) {
            warn!(%address, "Server confirmed a different account address");
        }

        self.state = AuthState::Authenticated;
        Ok(AuthStep::Authenticated(AuthSession {
            address,
            session_key,
            jwt_token: frame.str_field("jwt_token").map(str::to_owned),
        }))
    }

    fn fail(&mut self, reason: impl Into<String>) -> PermitPoolError {
        self.state = AuthState::Failed;
        PermitPoolError::Auth(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Signing};
    use permitpool_core::types::Allowance;
    use permitpool_crypto::{recover_policy_signer, SessionSigner};

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn handshake() -> (AuthHandshake, SessionSigner) {
        let account = AccountSigner::from_private_key(KEY).unwrap();
        let session = SessionSigner::generate();
        let params = AuthParams::new(
            session.address_string(),
            vec![Allowance::new("ytest.usd", "1000000000")],
            1_700_000_000,
            "permitpool.app",
            "PermitPool",
        )
        .unwrap();
        (AuthHandshake::new(account, params), session)
    }

    fn frame(raw: &str) -> Inbound {
        decode(raw).unwrap()
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let (mut auth, session) = handshake();

        let first = auth.start().unwrap();
        assert_eq!(first.signing, Signing::Unsigned);
        assert_eq!(auth.state(), AuthState::AwaitingChallenge);

        let step = auth
            .on_frame(&frame(r#"{"res":[1,"auth_challenge",{"challenge_message":"chal-123"},0]}"#))
            .await
            .unwrap();
        let AuthStep::Send(verify) = step else { panic!("expected auth_verify") };
        assert_eq!(verify.request, Request::AuthVerify { challenge: "chal-123".into() });

        let Signing::Detached(sig) = verify.signing else { panic!("expected detached signature") };
        let account = AccountSigner::from_private_key(KEY).unwrap();
        let recovered = recover_policy_signer(
            auth.params(),
            &AuthDomain::for_params(auth.params()),
            &account.address_string(),
            "chal-123",
            &sig,
        )
        .unwrap();
        assert_eq!(recovered, account.address());

        let ack = format!(
            r#"{{"res":[2,"auth_verify",{{"address":"{}","session_key":"{}","jwt_token":"jwt","success":true}},0]}}"#,
            account.address_string(),
            session.address_string()
        );
        let AuthStep::Authenticated(done) = auth.on_frame(&frame(&ack)).await.unwrap() else {
            panic!("expected authenticated")
        };
        assert_eq!(done.jwt_token.as_deref(), Some("jwt"));
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_challenge_after_auth_is_ignored() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();
        auth.on_frame(&frame(r#"{"res":[1,"auth_challenge",{"challenge":"c1"},0]}"#))
            .await
            .unwrap();
        auth.on_frame(&frame(r#"{"type":"auth_success"}"#)).await.unwrap();
        assert!(auth.is_authenticated());

        let step = auth
            .on_frame(&frame(r#"{"res":[1,"auth_challenge",{"challenge":"c2"},0]}"#))
            .await
            .unwrap();
        assert!(matches!(step, AuthStep::Ignored));
        assert_eq!(auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_auth_error_fails() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();

        let err = auth
            .on_frame(&frame(r#"{"res":[1,"auth_error",{"error":"bad signature"},0]}"#))
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
        assert_eq!(auth.state(), AuthState::Failed);
    }

    #[tokio::test]
    async fn test_rejected_verify_fails() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();
        auth.on_frame(&frame(r#"{"res":[1,"auth_challenge",{"challenge":"c1"},0]}"#))
            .await
            .unwrap();

        let err = auth
            .on_frame(&frame(r#"{"res":[2,"auth_verify",{"success":false},0]}"#))
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }

    #[tokio::test]
    async fn test_session_key_mismatch_fails() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();
        auth.on_frame(&frame(r#"{"res":[1,"auth_challenge",{"challenge":"c1"},0]}"#))
            .await
            .unwrap();

        let ack = r#"{"res":[2,"auth_verify",{"session_key":"0x1111111111111111111111111111111111111111"},0]}"#;
        assert!(auth.on_frame(&frame(ack)).await.unwrap_err().is_auth_error());
    }

    #[tokio::test]
    async fn test_malformed_challenge_fails() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();

        let err = auth
            .on_frame(&frame(r#"{"res":[1,"auth_challenge",{"challenge_message":42},0]}"#))
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_close_before_auth_fails() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();
        assert!(auth.on_closed(Some("going away")).unwrap_err().is_auth_error());
        assert_eq!(auth.state(), AuthState::Failed);
    }

    #[test]
    fn test_start_twice_is_internal_error() {
        let (mut auth, _) = handshake();
        auth.start().unwrap();
        assert!(matches!(auth.start(), Err(PermitPoolError::Internal(_))));
    }
}
