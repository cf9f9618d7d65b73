//! Channel lifecycle after authentication.
//!
//! ```text
//! Idle ─▶ AwaitingBalance ─▶ AwaitingChannel ─▶ AwaitingResize ─▶ AwaitingTransfer ─▶ AwaitingClose ─▶ Complete
//!   get_ledger_balances   create_channel     resize_channel    transfer          close_channel
//! ```
//!
//! Each server-signed state is settled on-chain (submit, then wait for the
//! receipt) before the next request is produced. Any error moves the
//! lifecycle to `Failed`.

use std::future::Future;
use std::time::Duration;

use ethers::types::U256;
use serde_json::Value;
use tracing::{info, warn};

use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::traits::CustodyClient;
use permitpool_core::types::{
    ChannelDescriptor, ChannelId, ChannelState, LedgerBalance, Receipt, ServerSignature,
    SignedState, StateIntent, Transfer, TxHash,
};

use crate::codec::{Inbound, Method, Request};

/// Lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Idle,
    /// `get_ledger_balances` sent
    AwaitingBalance,
    /// `create_channel` sent
    AwaitingChannel,
    /// `resize_channel` sent
    AwaitingResize,
    /// `transfer` sent
    AwaitingTransfer,
    /// `close_channel` sent
    AwaitingClose,
    /// Channel closed and settled
    Complete,
    /// Terminal failure
    Failed,
}

impl Phase {
    /// Response method this phase waits for.
    pub fn accepts(&self) -> Option<Method> {
        match self {
            Phase::AwaitingBalance => Some(Method::GetLedgerBalances),
            Phase::AwaitingChannel => Some(Method::CreateChannel),
            Phase::AwaitingResize => Some(Method::ResizeChannel),
            Phase::AwaitingTransfer => Some(Method::Transfer),
            Phase::AwaitingClose => Some(Method::CloseChannel),
            Phase::Idle | Phase::Complete | Phase::Failed => None,
        }
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::AwaitingBalance => "balance check",
            Phase::AwaitingChannel => "channel creation",
            Phase::AwaitingResize => "resize",
            Phase::AwaitingTransfer => "transfer",
            Phase::AwaitingClose => "close",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    /// True for `Complete` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

/// What the lifecycle does for one account.
#[derive(Clone, Debug)]
pub struct FlowPlan {
    /// Asset that must have a positive ledger balance
    pub funding_asset: String,
    /// Chain the channel lives on
    pub chain_id: u64,
    /// Token backing the channel
    pub token: String,
    /// Adjudicator the server's channel definition must name
    pub adjudicator: String,
    /// Challenge period the server's channel definition must name, seconds
    pub challenge_duration: u64,
    /// Amount moved into the channel on resize
    pub allocate_amount: U256,
    /// Account receiving allocations and final funds
    pub funds_destination: String,
    /// Off-chain transfer performed once funded
    pub transfer: Transfer,
    /// Bound on each submit + confirmation leg
    pub confirmation_timeout: Duration,
}

/// On-chain operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionKind {
    /// `Custody.create`
    Create,
    /// `Custody.resize`
    Resize,
    /// `Custody.close`
    Close,
}

impl SubmissionKind {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Create => "create",
            SubmissionKind::Resize => "resize",
            SubmissionKind::Close => "close",
        }
    }
}

/// A confirmed on-chain submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Operation
    pub kind: SubmissionKind,
    /// State version submitted
    pub version: u64,
    /// Confirmation
    pub receipt: Receipt,
}

/// The channel as last agreed with the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenChannel {
    /// Server-assigned id
    pub id: ChannelId,
    /// On-chain definition
    pub descriptor: ChannelDescriptor,
    /// Latest server-signed state
    pub state: ChannelState,
}

/// What the caller should do after feeding a frame.
#[derive(Debug)]
pub enum LifecycleStep {
    /// Send this request, signed by the session key
    Send(Request),
    /// Channel closed and settled
    Complete,
    /// Frame not relevant in the current phase
    Ignored,
}

/// Drives one channel from balance check to close.
#[derive(Debug)]
pub struct ChannelLifecycle {
    phase: Phase,
    account: String,
    plan: FlowPlan,
    balance: Option<LedgerBalance>,
    channel: Option<OpenChannel>,
    submissions: Vec<Submission>,
}

impl ChannelLifecycle {
    /// Creates a lifecycle for `account`.
    pub fn new(account: impl Into<String>, plan: FlowPlan) -> Self {
        Self {
            phase: Phase::Idle,
            account: account.into(),
            plan,
            balance: None,
            channel: None,
            submissions: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Balance observed in the first phase.
    pub fn balance(&self) -> Option<&LedgerBalance> {
        self.balance.as_ref()
    }

    /// The channel, once created.
    pub fn channel(&self) -> Option<&OpenChannel> {
        self.channel.as_ref()
    }

    /// Confirmed on-chain submissions, in order.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Produces the balance query.
    pub fn begin(&mut self) -> Result<Request> {
        if self.phase != Phase::Idle {
            return Err(PermitPoolError::Internal(format!(
                "lifecycle already started ({})",
                self.phase.name()
            )));
        }

        info!(step = 1, account = %self.account, "Checking ledger balance");
        self.phase = Phase::AwaitingBalance;
        Ok(Request::GetLedgerBalances {
            participant: self.account.clone(),
        })
    }

    /// Feeds one inbound frame. `custody` settles server-signed states.
    pub async fn on_frame<C>(&mut self, frame: &Inbound, custody: &C) -> Result<LifecycleStep>
    where
        C: CustodyClient + ?Sized,
    {
        let Some(expected) = self.phase.accepts() else {
            return Ok(LifecycleStep::Ignored);
        };
        if frame.method != expected {
            warn!(phase = self.phase.name(), method = %frame.method, "Ignoring out-of-order frame");
            return Ok(LifecycleStep::Ignored);
        }

        let result = match self.phase {
            Phase::AwaitingBalance => self.on_balances(frame),
            Phase::AwaitingChannel => self.on_channel_created(frame, custody).await,
            Phase::AwaitingResize => self.on_resized(frame, custody).await,
            Phase::AwaitingTransfer => self.on_transferred(frame),
            Phase::AwaitingClose => self.on_closed(frame, custody).await,
            _ => Ok(LifecycleStep::Ignored),
        };

        if result.is_err() {
            self.phase = Phase::Failed;
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PHASE HANDLERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn on_balances(&mut self, frame: &Inbound) -> Result<LifecycleStep> {
        let entries: &[Value] = match &frame.payload {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => obj
                .get("ledger_balances")
                .or_else(|| obj.get("balances"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };

        let balances = entries
            .iter()
            .map(LedgerBalance::from_json)
            .collect::<Result<Vec<_>>>()?;
        let asset = &self.plan.funding_asset;
        let balance = balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .unwrap_or(LedgerBalance {
                asset: asset.clone(),
                amount: U256::zero(),
            });

        if balance.amount.is_zero() {
            return Err(PermitPoolError::Precondition(format!(
                "no {asset} in the ledger for {}; fund the account before opening a channel",
                self.account
            )));
        }

        info!(step = 1, asset = %balance.asset, amount = %balance.amount, "Ledger balance available");
        self.balance = Some(balance);

        info!(step = 2, chain_id = self.plan.chain_id, token = %self.plan.token, "Requesting channel");
        self.phase = Phase::AwaitingChannel;
        Ok(LifecycleStep::Send(Request::CreateChannel {
            chain_id: self.plan.chain_id,
            token: self.plan.token.clone(),
        }))
    }

    async fn on_channel_created<C>(&mut self, frame: &Inbound, custody: &C) -> Result<LifecycleStep>
    where
        C: CustodyClient + ?Sized,
    {
        let channel_id = ChannelId::new(required_str(frame, "channel_id")?)?;
        let signed = signed_state(frame, channel_id)?;
        let descriptor = ChannelDescriptor::from_json(frame.payload.get("channel").ok_or_else(
            || PermitPoolError::Protocol("create_channel response missing 'channel'".into()),
        )?)?;

        self.check_descriptor(&descriptor)?;
        custody.verify_channel_id(&signed.channel_id, &descriptor)?;

        if signed.state.intent != StateIntent::Initialize {
            warn!(intent = ?signed.state.intent, "Initial state does not carry the initialize intent");
        }
        info!(step = 2, channel_id = %signed.channel_id, version = signed.state.version, "Channel prepared by server");

        self.settle(
            SubmissionKind::Create,
            signed.state.version,
            custody.create_channel(&descriptor, &signed.state, &signed.server_signature),
            custody,
        )
        .await?;

        let channel_id = signed.channel_id.clone();
        self.channel = Some(OpenChannel {
            id: signed.channel_id,
            descriptor,
            state: signed.state,
        });

        info!(step = 3, %channel_id, amount = %self.plan.allocate_amount, "Requesting resize");
        self.phase = Phase::AwaitingResize;
        Ok(LifecycleStep::Send(Request::ResizeChannel {
            channel_id,
            allocate_amount: self.plan.allocate_amount,
            funds_destination: self.plan.funds_destination.clone(),
        }))
    }

    async fn on_resized<C>(&mut self, frame: &Inbound, custody: &C) -> Result<LifecycleStep>
    where
        C: CustodyClient + ?Sized,
    {
        let signed = self.next_state(frame)?;
        info!(step = 3, version = signed.state.version, "Resize state signed by server");

        self.settle(
            SubmissionKind::Resize,
            signed.state.version,
            custody.resize_channel(&signed, &[]),
            custody,
        )
        .await?;

        let channel = self.open_channel_mut()?;
        channel.state = signed.state;

        info!(
            step = 4,
            destination = %self.plan.transfer.destination,
            "Sending off-chain transfer"
        );
        self.phase = Phase::AwaitingTransfer;
        Ok(LifecycleStep::Send(Request::Transfer(self.plan.transfer.clone())))
    }

    fn on_transferred(&mut self, _frame: &Inbound) -> Result<LifecycleStep> {
        let channel_id = self.open_channel_mut()?.id.clone();
        info!(step = 4, "Transfer acknowledged");

        info!(step = 5, %channel_id, "Requesting close");
        self.phase = Phase::AwaitingClose;
        Ok(LifecycleStep::Send(Request::CloseChannel {
            channel_id,
            funds_destination: self.plan.funds_destination.clone(),
        }))
    }

    async fn on_closed<C>(&mut self, frame: &Inbound, custody: &C) -> Result<LifecycleStep>
    where
        C: CustodyClient + ?Sized,
    {
        let signed = self.next_state(frame)?;
        if signed.state.intent != StateIntent::Finalize {
            warn!(intent = ?signed.state.intent, "Final state does not carry the finalize intent");
        }
        info!(step = 5, version = signed.state.version, "Final state signed by server");

        self.settle(
            SubmissionKind::Close,
            signed.state.version,
            custody.close_channel(&signed, &signed.state.data),
            custody,
        )
        .await?;

        self.open_channel_mut()?.state = signed.state;
        self.phase = Phase::Complete;
        Ok(LifecycleStep::Complete)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn check_descriptor(&self, descriptor: &ChannelDescriptor) -> Result<()> {
        if !descriptor.adjudicator.eq_ignore_ascii_case(&self.plan.adjudicator) {
            return Err(PermitPoolError::Protocol(format!(
                "channel names adjudicator {}, expected {}",
                descriptor.adjudicator, self.plan.adjudicator
            )));
        }
        if descriptor.challenge != self.plan.challenge_duration {
            return Err(PermitPoolError::Protocol(format!(
                "channel challenge period is {}s, expected {}s",
                descriptor.challenge, self.plan.challenge_duration
            )));
        }
        Ok(())
    }

    /// Parses a follow-up state and checks it against the current one.
    fn next_state(&mut self, frame: &Inbound) -> Result<SignedState> {
        let current = self.open_channel_mut()?;

        if let Some(echoed) = frame.str_field("channel_id") {
            if echoed != current.id.as_str() {
                return Err(PermitPoolError::Protocol(format!(
                    "{} response for channel {echoed}, expected {}",
                    frame.method, current.id
                )));
            }
        }

        let signed = signed_state(frame, current.id.clone())?;
        let expected = current
            .state
            .version
            .checked_add(1)
            .ok_or_else(|| PermitPoolError::Conversion("state version overflow".into()))?;
        if signed.state.version != expected {
            return Err(PermitPoolError::VersionMismatch {
                expected,
                actual: signed.state.version,
            });
        }

        Ok(signed)
    }

    fn open_channel_mut(&mut self) -> Result<&mut OpenChannel> {
        let phase = self.phase;
        self.channel.as_mut().ok_or_else(|| {
            PermitPoolError::Internal(format!("no channel recorded in phase {}", phase.name()))
        })
    }

    /// Awaits `submit`, then the receipt, within the confirmation timeout.
    async fn settle<C, F>(
        &mut self,
        kind: SubmissionKind,
        version: u64,
        submit: F,
        custody: &C,
    ) -> Result<Receipt>
    where
        C: CustodyClient + ?Sized,
        F: Future<Output = Result<TxHash>>,
    {
        let label = kind.as_str();
        let leg = async {
            let tx_hash = submit.await.map_err(|e| on_chain_error(label, e))?;
            info!(operation = label, ?tx_hash, "Submitted; waiting for confirmation");

            let receipt = custody
                .wait_for_receipt(tx_hash)
                .await
                .map_err(|e| on_chain_error(label, e))?;
            if !receipt.success {
                return Err(PermitPoolError::on_chain(
                    label,
                    format!("transaction {tx_hash:?} reverted"),
                ));
            }
            Ok(receipt)
        };

        let timeout = self.plan.confirmation_timeout;
        let receipt = tokio::time::timeout(timeout, leg)
            .await
            .map_err(|_| PermitPoolError::Timeout {
                phase: format!("{label} confirmation"),
                seconds: timeout.as_secs(),
            })??;

        info!(operation = label, block = ?receipt.block_number, "Confirmed on-chain");
        self.submissions.push(Submission {
            kind,
            version,
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }
}

fn required_str<'a>(frame: &'a Inbound, key: &str) -> Result<&'a str> {
    frame.str_field(key).ok_or_else(|| {
        PermitPoolError::Protocol(format!("{} response missing '{key}'", frame.method))
    })
}

fn signed_state(frame: &Inbound, channel_id: ChannelId) -> Result<SignedState> {
    let state = frame.payload.get("state").ok_or_else(|| {
        PermitPoolError::Protocol(format!("{} response missing 'state'", frame.method))
    })?;

    Ok(SignedState {
        channel_id,
        state: ChannelState::from_json(state)?,
        server_signature: ServerSignature::new(required_str(frame, "server_signature")?)?,
    })
}

fn on_chain_error(label: &str, error: PermitPoolError) -> PermitPoolError {
    match error {
        e @ PermitPoolError::OnChain { .. } => e,
        other => PermitPoolError::on_chain(label, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use async_trait::async_trait;
    use ethers::types::H256;
    use parking_lot::Mutex;
    use permitpool_core::types::TransferAllocation;
    use test_case::test_case;

    #[derive(Default)]
    struct RecordingCustody {
        calls: Mutex<Vec<String>>,
        revert: bool,
        stall: bool,
        foreign_id: bool,
    }

    impl RecordingCustody {
        fn receipt(&self, tx_hash: TxHash) -> Receipt {
            Receipt { tx_hash, block_number: Some(1), success: !self.revert }
        }
    }

    #[async_trait]
    impl CustodyClient for RecordingCustody {
        fn verify_channel_id(&self, channel_id: &ChannelId, _channel: &ChannelDescriptor) -> Result<()> {
            if self.foreign_id {
                return Err(PermitPoolError::Protocol(format!("{channel_id} is not derived from the channel")));
            }
            Ok(())
        }

        async fn create_channel(
            &self,
            _channel: &ChannelDescriptor,
            state: &ChannelState,
            _sig: &ServerSignature,
        ) -> Result<TxHash> {
            self.calls.lock().push(format!("create v{}", state.version));
            Ok(H256::from_low_u64_be(1))
        }

        async fn resize_channel(&self, s: &SignedState, _proofs: &[SignedState]) -> Result<TxHash> {
            self.calls.lock().push(format!("resize v{}", s.state.version));
            Ok(H256::from_low_u64_be(2))
        }

        async fn close_channel(&self, s: &SignedState, _data: &str) -> Result<TxHash> {
            self.calls.lock().push(format!("close v{}", s.state.version));
            Ok(H256::from_low_u64_be(3))
        }

        async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.calls.lock().push(format!("wait {}", tx_hash.to_low_u64_be()));
            Ok(self.receipt(tx_hash))
        }
    }

    fn plan() -> FlowPlan {
        FlowPlan {
            funding_asset: "ytest.usd".into(),
            chain_id: 11155111,
            token: "0xDB9F293e3898c9E5536A3be1b0C56c89d2b32DEb".into(),
            adjudicator: "0xcccc".into(),
            challenge_duration: 3600,
            allocate_amount: U256::from(100u64),
            funds_destination: "0xaaaa".into(),
            transfer: Transfer {
                destination: "0xbbbb".into(),
                allocations: vec![TransferAllocation { asset: "ytest.usd".into(), amount: "50".into() }],
            },
            confirmation_timeout: Duration::from_millis(200),
        }
    }

    fn created(version: u64) -> Inbound {
        created_with(version, "0xcccc", 3600)
    }

    fn created_with(version: u64, adjudicator: &str, challenge: u64) -> Inbound {
        decode(&format!(
            r#"{{"res":[2,"create_channel",{{
                "channel_id":"0xCH1",
                "channel":{{"participants":["0xaaaa","0xbbbb"],"adjudicator":"{adjudicator}","challenge":{challenge},"nonce":7}},
                "state":{{"intent":1,"version":{version},"state_data":"0x","allocations":[]}},
                "server_signature":"0xsig1"}},0]}}"#
        ))
        .unwrap()
    }

    fn follow_up(method: &str, version: u64, sig: &str) -> Inbound {
        decode(&format!(
            r#"{{"res":[3,"{method}",{{"channel_id":"0xCH1","state":{{"intent":2,"version":{version},"state_data":"0x","allocations":[]}},"server_signature":"{sig}"}},0]}}"#
        ))
        .unwrap()
    }

    async fn funded(custody: &RecordingCustody) -> ChannelLifecycle {
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();
        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"ytest.usd","amount":"500"}],0]}"#).unwrap();
        lc.on_frame(&balances, custody).await.unwrap();
        lc.on_frame(&created(0), custody).await.unwrap();
        lc
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let custody = RecordingCustody::default();
        let mut lc = funded(&custody).await;
        assert_eq!(lc.phase(), Phase::AwaitingResize);

        let step = lc.on_frame(&follow_up("resize_channel", 1, "0xsig2"), &custody).await.unwrap();
        assert!(matches!(step, LifecycleStep::Send(Request::Transfer(_))));

        let ack = decode(r#"{"res":[4,"transfer",{"transactions":[]},0]}"#).unwrap();
        let step = lc.on_frame(&ack, &custody).await.unwrap();
        assert!(matches!(step, LifecycleStep::Send(Request::CloseChannel { .. })));

        let step = lc.on_frame(&follow_up("close_channel", 2, "0xsig3"), &custody).await.unwrap();
        assert!(matches!(step, LifecycleStep::Complete));
        assert_eq!(lc.phase(), Phase::Complete);
        assert!(lc.phase().is_terminal());

        assert_eq!(
            *custody.calls.lock(),
            vec!["create v0", "wait 1", "resize v1", "wait 2", "close v2", "wait 3"]
        );
        let kinds: Vec<_> = lc.submissions().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SubmissionKind::Create, SubmissionKind::Resize, SubmissionKind::Close]);
        assert_eq!(lc.channel().unwrap().state.version, 2);
    }

    #[tokio::test]
    async fn test_zero_balance_is_precondition() {
        let custody = RecordingCustody::default();
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();

        let balances = decode(r#"{"res":[1,"get_ledger_balances",{"ledger_balances":[{"asset":"ytest.usd","amount":"0"}]},0]}"#).unwrap();
        let err = lc.on_frame(&balances, &custody).await.unwrap_err();

        assert!(matches!(err, PermitPoolError::Precondition(_)));
        assert_eq!(lc.phase(), Phase::Failed);
        assert!(custody.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_asset_is_precondition() {
        let custody = RecordingCustody::default();
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();

        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"eth","amount":"9"}],0]}"#).unwrap();
        let err = lc.on_frame(&balances, &custody).await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_version_must_advance_by_one() {
        let custody = RecordingCustody::default();
        let mut lc = funded(&custody).await;

        let err = lc
            .on_frame(&follow_up("resize_channel", 3, "0xsig2"), &custody)
            .await
            .unwrap_err();
        assert!(matches!(err, PermitPoolError::VersionMismatch { expected: 1, actual: 3 }));
        assert!(!custody.calls.lock().iter().any(|c| c.starts_with("resize")));
    }

    #[tokio::test]
    async fn test_out_of_order_frame_is_ignored() {
        let custody = RecordingCustody::default();
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();

        let step = lc.on_frame(&follow_up("resize_channel", 1, "0xsig2"), &custody).await.unwrap();
        assert!(matches!(step, LifecycleStep::Ignored));
        assert_eq!(lc.phase(), Phase::AwaitingBalance);
    }

    #[tokio::test]
    async fn test_resize_before_create_ack_is_ignored() {
        let custody = RecordingCustody::default();
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();
        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"ytest.usd","amount":"5"}],0]}"#).unwrap();
        lc.on_frame(&balances, &custody).await.unwrap();
        assert_eq!(lc.phase(), Phase::AwaitingChannel);

        let step = lc.on_frame(&follow_up("resize_channel", 1, "0xsig2"), &custody).await.unwrap();
        assert!(matches!(step, LifecycleStep::Ignored));
        assert_eq!(lc.phase(), Phase::AwaitingChannel);
        assert!(custody.calls.lock().is_empty());

        let step = lc.on_frame(&created(0), &custody).await.unwrap();
        assert!(matches!(step, LifecycleStep::Send(Request::ResizeChannel { .. })));
        assert_eq!(lc.phase(), Phase::AwaitingResize);
    }

    #[test_case("0xdddd", 3600 ; "foreign adjudicator")]
    #[test_case("0xcccc", 60 ; "short challenge period")]
    #[tokio::test]
    async fn test_unexpected_channel_definition_is_rejected(adjudicator: &str, challenge: u64) {
        let custody = RecordingCustody::default();
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();
        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"ytest.usd","amount":"5"}],0]}"#).unwrap();
        lc.on_frame(&balances, &custody).await.unwrap();

        let err = lc
            .on_frame(&created_with(0, adjudicator, challenge), &custody)
            .await
            .unwrap_err();
        assert!(matches!(err, PermitPoolError::Protocol(_)));
        assert_eq!(lc.phase(), Phase::Failed);
        assert!(custody.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_channel_id_not_derived_from_definition_is_rejected() {
        let custody = RecordingCustody { foreign_id: true, ..Default::default() };
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();
        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"ytest.usd","amount":"5"}],0]}"#).unwrap();
        lc.on_frame(&balances, &custody).await.unwrap();

        let err = lc.on_frame(&created(0), &custody).await.unwrap_err();
        assert!(matches!(err, PermitPoolError::Protocol(_)));
        assert!(custody.calls.lock().is_empty());
        assert!(lc.channel().is_none());
    }

    #[tokio::test]
    async fn test_missing_server_signature_is_protocol_error() {
        let custody = RecordingCustody::default();
        let mut lc = funded(&custody).await;

        let frame = decode(r#"{"type":"allocated","channel_id":"0xCH1","state":{"version":1}}"#).unwrap();
        let err = lc.on_frame(&frame, &custody).await.unwrap_err();
        assert!(matches!(err, PermitPoolError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_wrong_channel_is_protocol_error() {
        let custody = RecordingCustody::default();
        let mut lc = funded(&custody).await;

        let frame = decode(r#"{"res":[3,"resize_channel",{"channel_id":"0xOTHER","state":{"version":1},"server_signature":"0xsig2"},0]}"#).unwrap();
        assert!(matches!(
            lc.on_frame(&frame, &custody).await.unwrap_err(),
            PermitPoolError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_on_chain_error() {
        let custody = RecordingCustody { revert: true, ..Default::default() };
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();
        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"ytest.usd","amount":"5"}],0]}"#).unwrap();
        lc.on_frame(&balances, &custody).await.unwrap();

        let err = lc.on_frame(&created(0), &custody).await.unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert!(lc.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_confirmation_times_out() {
        let custody = RecordingCustody { stall: true, ..Default::default() };
        let mut lc = ChannelLifecycle::new("0xaaaa", plan());
        lc.begin().unwrap();
        let balances = decode(r#"{"res":[1,"get_ledger_balances",[{"asset":"ytest.usd","amount":"5"}],0]}"#).unwrap();
        lc.on_frame(&balances, &custody).await.unwrap();

        let err = lc.on_frame(&created(0), &custody).await.unwrap_err();
        assert!(matches!(err, PermitPoolError::Timeout { .. }));
        assert_eq!(lc.phase(), Phase::Failed);
    }
}
