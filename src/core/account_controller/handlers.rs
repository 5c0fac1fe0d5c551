use ever_utils::*;
use num_bigint::BigUint;
use tokio::sync::mpsc;

use crate::core::models::*;
use crate::core::token_wallet::TokenWalletSubscriptionHandler;
use crate::core::ton_wallet::{TonWalletDetails, TonWalletSubscriptionHandler};

pub type EventsTx = mpsc::UnboundedSender<SubscriptionEvent>;
pub type EventsRx = mpsc::UnboundedReceiver<SubscriptionEvent>;

#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    EverWallet {
        address: Address,
        event: EverWalletEvent,
    },
    TokenWallet {
        owner: Address,
        root_token_contract: Address,
        event: TokenWalletEvent,
    },
}

#[derive(Debug, Clone)]
pub enum EverWalletEvent {
    MessageSent {
        pending_transaction: PendingTransaction,
        transaction: Option<TonWalletTransaction>,
    },
    MessageExpired(PendingTransaction),
    StateChanged(ContractState),
    TransactionsFound {
        transactions: Vec<TonWalletTransaction>,
        batch_info: TransactionsBatchInfo,
    },
    DetailsChanged(TonWalletDetails),
    CustodiansChanged(Vec<UInt256>),
    UnconfirmedTransactionsChanged(Vec<MultisigPendingTransaction>),
}

#[derive(Debug, Clone)]
pub enum TokenWalletEvent {
    BalanceChanged(BigUint),
    TransactionsFound {
        transactions: Vec<TokenWalletTransactionWithData>,
        batch_info: TransactionsBatchInfo,
    },
}

/// Forwards wallet events to the controller
pub struct EverWalletHandler {
    address: Address,
    events_tx: EventsTx,
}

impl EverWalletHandler {
    pub fn new(address: Address, events_tx: EventsTx) -> Self {
        Self { address, events_tx }
    }

    fn emit(&self, event: EverWalletEvent) {
        let event = SubscriptionEvent::EverWallet {
            address: self.address,
            event,
        };
        if self.events_tx.send(event).is_err() {
            log::debug!("Events receiver dropped for {}", self.address);
        }
    }
}

impl TonWalletSubscriptionHandler for EverWalletHandler {
    fn on_message_sent(
        &self,
        pending_transaction: PendingTransaction,
        transaction: Option<TonWalletTransaction>,
    ) {
        self.emit(EverWalletEvent::MessageSent {
            pending_transaction,
            transaction,
        });
    }

    fn on_message_expired(&self, pending_transaction: PendingTransaction) {
        self.emit(EverWalletEvent::MessageExpired(pending_transaction));
    }

    fn on_state_changed(&self, new_state: ContractState) {
        self.emit(EverWalletEvent::StateChanged(new_state));
    }

    fn on_transactions_found(
        &self,
        transactions: Vec<TonWalletTransaction>,
        batch_info: TransactionsBatchInfo,
    ) {
        self.emit(EverWalletEvent::TransactionsFound {
            transactions,
            batch_info,
        });
    }

    fn on_details_changed(&self, details: TonWalletDetails) {
        self.emit(EverWalletEvent::DetailsChanged(details));
    }

    fn on_custodians_changed(&self, custodians: Vec<UInt256>) {
        self.emit(EverWalletEvent::CustodiansChanged(custodians));
    }

    fn on_unconfirmed_transactions_changed(
        &self,
        unconfirmed_transactions: Vec<MultisigPendingTransaction>,
    ) {
        self.emit(EverWalletEvent::UnconfirmedTransactionsChanged(
            unconfirmed_transactions,
        ));
    }
}

pub struct TokenWalletHandler {
    owner: Address,
    root_token_contract: Address,
    events_tx: EventsTx,
}

impl TokenWalletHandler {
    pub fn new(owner: Address, root_token_contract: Address, events_tx: EventsTx) -> Self {
        Self {
            owner,
            root_token_contract,
            events_tx,
        }
    }

    fn emit(&self, event: TokenWalletEvent) {
        let event = SubscriptionEvent::TokenWallet {
            owner: self.owner,
            root_token_contract: self.root_token_contract,
            event,
        };
        if self.events_tx.send(event).is_err() {
            log::debug!("Events receiver dropped for {}", self.owner);
        }
    }
}

impl TokenWalletSubscriptionHandler for TokenWalletHandler {
    fn on_balance_changed(&self, balance: BigUint) {
        self.emit(TokenWalletEvent::BalanceChanged(balance));
    }

    fn on_transactions_found(
        &self,
        transactions: Vec<TokenWalletTransactionWithData>,
        batch_info: TransactionsBatchInfo,
    ) {
        self.emit(TokenWalletEvent::TransactionsFound {
            transactions,
            batch_info,
        });
    }
}
