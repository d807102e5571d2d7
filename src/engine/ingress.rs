use crate::errors::BetError;
use crate::types::{BetReceipt, BetRequest, CashOutReceipt, UserId};
use tokio::sync::{mpsc, oneshot};

/// Requests funnelled into the round engine's serialization point
pub enum Command {
    PlaceBet {
        request: BetRequest,
        response: oneshot::Sender<Result<BetReceipt, BetError>>,
    },
    CashOut {
        user_id: UserId,
        response: oneshot::Sender<Result<CashOutReceipt, BetError>>,
    },
}

/// Cloneable mailbox for the round engine
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub(super) fn new(sender: mpsc::Sender<Command>) -> Self {
        Self { sender }
    }

    pub async fn place_bet(&self, request: BetRequest) -> Result<BetReceipt, BetError> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Command::PlaceBet { request, response })
            .await
            .map_err(|_| BetError::EngineUnavailable)?;
        receiver.await.map_err(|_| BetError::EngineUnavailable)?
    }

    pub async fn cash_out(&self, user_id: impl Into<UserId>) -> Result<CashOutReceipt, BetError> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Command::CashOut {
                user_id: user_id.into(),
                response,
            })
            .await
            .map_err(|_| BetError::EngineUnavailable)?;
        receiver.await.map_err(|_| BetError::EngineUnavailable)?
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
