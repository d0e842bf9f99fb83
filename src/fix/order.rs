//! Order state tracking: the pure order-status transition table, and an
//! order object that builds request messages and applies execution reports
//! against it.
//!
//! The transition table in [`change_status`] is the same shape for every
//! order regardless of instrument or venue, so it's kept as a free function
//! rather than a method — it's the one piece of this module callers may want
//! to use directly, e.g. to validate a status change coming from somewhere
//! other than an [`Order`].
//!
//! The request builders ([`Order::new_req`], [`Order::cancel_req`],
//! [`Order::replace_req`]) hand back a [`Message`], which is data only. To
//! put one on the wire, bridge it through [`MessageBuilder::from_message`]
//! and hand that to a [`FixApplicationHandle`]:
//!
//! ```rust,no_run
//! use fixsession::{SessionSettings, FixApplicationInitiator};
//! use fixsession::fix::encode::MessageBuilder;
//! use fixsession::fix::generated::Side;
//! use fixsession::fix::order::Order;
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! # let settings = SessionSettings::builder()
//! #     .with_sender_comp_id("my_id")
//! #     .with_target_comp_id("peer_id")
//! #     .with_store_path("./store".into())
//! #     .with_log_dir("./log".into())
//! #     .with_socket_addr("127.0.0.1:0".parse().unwrap())
//! #     .build()?;
//! let (handle, _receiver) = FixApplicationInitiator::build(settings)?.initiate().await?;
//!
//! let mut order = Order::new("X", "AAPL", Side::BUY, 200.0, 10.0);
//! let msg = order.new_req();
//! let builder = MessageBuilder::from_message(&handle.begin_string(), &msg);
//! handle.send_message_async(builder).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`MessageBuilder::from_message`]: crate::fix::encode::MessageBuilder::from_message
//! [`FixApplicationHandle`]: crate::FixApplicationHandle

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::fix::generated::{ExecType, OrdType, Side};
use crate::fix::message::Message;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("illegal transition from {from:?} via {msg_kind:?}")]
    IllegalTransition {
        from: OrderStatus,
        msg_kind: RequestKind,
    },
    #[error("ClOrdID on execution report does not match this order")]
    ClOrdIdMismatch,
    #[error("a cancel or replace request is already outstanding for this order")]
    PendingAmendment,
    #[error("unknown OrdStatus value {0:?}")]
    UnknownOrdStatus(char),
    #[error("order cannot be canceled from its current state")]
    NotCancelable,
    #[error("order cannot be replaced from its current state")]
    NotReplaceable,
    #[error("replace request has no price or qty change")]
    NoPriceOrQtyChange,
}

/// The application-level lifecycle of one order. A superset of the wire
/// `OrdStatus(39)` values: `Created` exists only locally, before the first
/// `NewOrderSingle` is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Created,
    PendingNew,
    New,
    PartiallyFilled,
    Filled,
    DoneForDay,
    Canceled,
    Replaced,
    PendingCancel,
    Stopped,
    Rejected,
    Suspended,
    Calculated,
    Expired,
    AcceptedForBidding,
    PendingReplace,
}

impl TryFrom<char> for OrderStatus {
    type Error = OrderError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        Ok(match c {
            '0' => OrderStatus::New,
            '1' => OrderStatus::PartiallyFilled,
            '2' => OrderStatus::Filled,
            '3' => OrderStatus::DoneForDay,
            '4' => OrderStatus::Canceled,
            '5' => OrderStatus::Replaced,
            '6' => OrderStatus::PendingCancel,
            '7' => OrderStatus::Stopped,
            '8' => OrderStatus::Rejected,
            '9' => OrderStatus::Suspended,
            'A' => OrderStatus::PendingNew,
            'B' => OrderStatus::Calculated,
            'C' => OrderStatus::Expired,
            'D' => OrderStatus::AcceptedForBidding,
            'E' => OrderStatus::PendingReplace,
            other => return Err(OrderError::UnknownOrdStatus(other)),
        })
    }
}

/// Which incoming/outgoing request kind is driving the status change. Mirrors
/// the four message kinds the transition table distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ExecutionReport,
    OrderCancelReject,
    OrderCancelRequest,
    OrderCancelReplaceRequest,
}

/// The order status transition table.
///
/// Returns `Ok(Some(status))` if the transition is valid and changes status,
/// `Ok(None)` if the transition is valid but leaves status unchanged (e.g. a
/// duplicate `NEW` execution report), or `Err` if the transition is invalid
/// for the order's current status.
pub fn change_status(
    status: OrderStatus,
    kind: RequestKind,
    exec_type: Option<ExecType>,
    msg_status: OrderStatus,
) -> Result<Option<OrderStatus>, OrderError> {
    use OrderStatus::*;
    use RequestKind::*;

    let illegal = || OrderError::IllegalTransition {
        from: status,
        msg_kind: kind,
    };

    match kind {
        ExecutionReport => execution_report_transition(status, exec_type, msg_status, kind),
        OrderCancelReject => match status {
            Created | AcceptedForBidding => Err(illegal()),
            _ => Ok(Some(msg_status)),
        },
        OrderCancelRequest | OrderCancelReplaceRequest => match status {
            PendingCancel | PendingReplace => Ok(None),
            New | Suspended | PartiallyFilled => Ok(Some(msg_status)),
            _ => Err(illegal()),
        },
    }
}

fn execution_report_transition(
    status: OrderStatus,
    exec_type: Option<ExecType>,
    msg_status: OrderStatus,
    kind: RequestKind,
) -> Result<Option<OrderStatus>, OrderError> {
    use OrderStatus::*;

    let illegal = || OrderError::IllegalTransition {
        from: status,
        msg_kind: kind,
    };

    match status {
        Created => match msg_status {
            PendingNew | Rejected => Ok(Some(msg_status)),
            _ => Err(illegal()),
        },
        PendingNew => match msg_status {
            Rejected | New | Filled | PartiallyFilled | Canceled | Suspended => {
                Ok(Some(msg_status))
            }
            _ => Err(illegal()),
        },
        New => match msg_status {
            New => Ok(None),
            PendingNew | Created | AcceptedForBidding => Err(illegal()),
            _ => Ok(Some(msg_status)),
        },
        Filled | Canceled | Rejected | Expired => Ok(None),
        Suspended => match msg_status {
            New | PartiallyFilled | Canceled => Ok(Some(msg_status)),
            Suspended => Ok(None),
            _ => Err(illegal()),
        },
        PartiallyFilled => match msg_status {
            Filled | PartiallyFilled | PendingReplace | PendingCancel | Canceled | Expired
            | Suspended | Stopped => Ok(Some(msg_status)),
            _ => Err(illegal()),
        },
        PendingCancel => match msg_status {
            Canceled => Ok(Some(msg_status)),
            Created => Err(illegal()),
            _ => Ok(None),
        },
        PendingReplace => match exec_type {
            Some(ExecType::REPLACE) => match msg_status {
                New | PartiallyFilled | Filled | Canceled => Ok(Some(msg_status)),
                _ => Err(illegal()),
            },
            _ => match msg_status {
                Created | AcceptedForBidding => Err(illegal()),
                _ => Ok(None),
            },
        },
        DoneForDay | Stopped | Calculated | AcceptedForBidding => Ok(None),
    }
}

lazy_static! {
    static ref RE_CLORD_ROOT: Regex = Regex::new(r"^(.+)--(\d+)$").unwrap();
}

fn clord_root(clord_id: &str) -> &str {
    match RE_CLORD_ROOT.captures(clord_id) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(clord_id),
        None => clord_id,
    }
}

/// One working order: identifiers, quantities, and the status it believes
/// it's in. Builds outbound request messages and applies inbound execution
/// reports and cancel rejects against itself.
pub struct Order {
    clord_id: String,
    clord_id_root: String,
    clord_seq: u32,
    orig_clord_id: Option<String>,
    order_id: Option<String>,
    symbol: String,
    side: char,
    ord_type: char,
    account: String,
    price: f64,
    qty: f64,
    leaves_qty: f64,
    cum_qty: f64,
    avg_px: f64,
    status: OrderStatus,
}

impl Order {
    pub fn new(clord_id: &str, symbol: &str, side: Side, price: f64, qty: f64) -> Self {
        Order {
            clord_id_root: clord_root(clord_id).to_string(),
            clord_id: clord_id.to_string(),
            clord_seq: 0,
            orig_clord_id: None,
            order_id: None,
            symbol: symbol.to_string(),
            side: char::from(side),
            ord_type: char::from(OrdType::LIMIT),
            account: String::from("000000"),
            price,
            qty,
            leaves_qty: 0.0,
            cum_qty: 0.0,
            avg_px: f64::NAN,
            status: OrderStatus::Created,
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn clord_id(&self) -> &str {
        &self.clord_id
    }

    /// The `ClOrdID` of the outstanding cancel/replace request, if one is in flight.
    pub fn orig_clord_id(&self) -> Option<&str> {
        self.orig_clord_id.as_deref()
    }

    fn clord_next(&mut self) -> String {
        self.clord_seq += 1;
        format!("{}--{}", self.clord_id_root, self.clord_seq)
    }

    /// Builds the `NewOrderSingle`, assigning this order's first `ClOrdID`.
    pub fn new_req(&mut self) -> Message {
        assert_eq!(self.status, OrderStatus::Created);

        self.clord_id = self.clord_next();
        let mut msg = Message::new('D');
        msg.set(11, self.clord_id.clone()).unwrap();
        msg.set(55, self.symbol.clone()).unwrap();
        msg.set(1, self.account.clone()).unwrap();
        msg.set(40, self.ord_type.to_string()).unwrap();
        msg.set(54, self.side.to_string()).unwrap();
        msg.set(44, self.price.to_string()).unwrap();
        msg.set(38, self.qty.to_string()).unwrap();

        self.status = OrderStatus::PendingNew;
        msg
    }

    pub fn can_cancel(&self) -> bool {
        change_status(
            self.status,
            RequestKind::OrderCancelRequest,
            None,
            OrderStatus::PendingCancel,
        )
        .is_ok()
    }

    pub fn can_replace(&self) -> bool {
        change_status(
            self.status,
            RequestKind::OrderCancelReplaceRequest,
            None,
            OrderStatus::PendingReplace,
        )
        .is_ok()
    }

    pub fn cancel_req(&mut self) -> Result<Message, OrderError> {
        if !self.can_cancel() {
            return Err(OrderError::NotCancelable);
        }
        if self.orig_clord_id.is_some() {
            return Err(OrderError::PendingAmendment);
        }
        self.orig_clord_id = Some(self.clord_id.clone());
        self.clord_id = self.clord_next();

        let mut msg = Message::new('F');
        msg.set(11, self.clord_id.clone()).unwrap();
        msg.set(38, self.qty.to_string()).unwrap();
        msg.set(41, self.orig_clord_id.clone().unwrap()).unwrap();
        msg.set(55, self.symbol.clone()).unwrap();
        msg.set(54, self.side.to_string()).unwrap();

        self.status = OrderStatus::PendingCancel;
        Ok(msg)
    }

    pub fn replace_req(&mut self, price: Option<f64>, qty: Option<f64>) -> Result<Message, OrderError> {
        if !self.can_replace() {
            return Err(OrderError::NotReplaceable);
        }
        let price = price.filter(|p| p.is_finite() && *p != self.price).unwrap_or(self.price);
        let qty = qty.filter(|q| q.is_finite() && *q != 0.0 && *q != self.qty).unwrap_or(self.qty);
        if price == self.price && qty == self.qty {
            return Err(OrderError::NoPriceOrQtyChange);
        }
        if self.orig_clord_id.is_some() {
            return Err(OrderError::PendingAmendment);
        }

        self.orig_clord_id = Some(self.clord_id.clone());
        self.clord_id = self.clord_next();

        let mut msg = Message::new('G');
        msg.set(11, self.clord_id.clone()).unwrap();
        msg.set(41, self.orig_clord_id.clone().unwrap()).unwrap();
        msg.set(40, self.ord_type.to_string()).unwrap();
        msg.set(55, self.symbol.clone()).unwrap();
        msg.set(44, price.to_string()).unwrap();
        msg.set(38, qty.to_string()).unwrap();
        msg.set(54, self.side.to_string()).unwrap();

        self.status = OrderStatus::PendingReplace;
        Ok(msg)
    }

    /// Applies an incoming `ExecutionReport`. Returns `Ok(true)` if status
    /// changed, `Ok(false)` if the report was valid but didn't move status.
    pub fn process_execution_report(
        &mut self,
        clord_id: &str,
        exec_type: ExecType,
        order_status: OrderStatus,
        order_id: &str,
        cum_qty: f64,
        leaves_qty: f64,
        avg_px: f64,
        new_price: Option<f64>,
        new_qty: Option<f64>,
    ) -> Result<bool, OrderError> {
        if clord_id != self.clord_id && Some(clord_id) != self.orig_clord_id.as_deref() {
            return Err(OrderError::ClOrdIdMismatch);
        }

        let was_pending_amendment =
            matches!(self.status, OrderStatus::PendingCancel | OrderStatus::PendingReplace);

        let new_status =
            change_status(self.status, RequestKind::ExecutionReport, Some(exec_type), order_status)?;

        self.order_id = Some(order_id.to_string());
        self.leaves_qty = leaves_qty;
        self.cum_qty = cum_qty;
        self.avg_px = avg_px;

        if exec_type == ExecType::REPLACE {
            if let Some(p) = new_price {
                self.price = p;
            }
            if let Some(q) = new_qty {
                self.qty = q;
            }
        }

        match new_status {
            Some(s) => {
                if was_pending_amendment
                    && !matches!(s, OrderStatus::PendingCancel | OrderStatus::PendingReplace)
                {
                    self.orig_clord_id = None;
                }
                self.status = s;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies an incoming `OrderCancelReject`. Returns `Ok(true)` if status changed.
    pub fn process_cancel_reject(&mut self, order_status: OrderStatus) -> Result<bool, OrderError> {
        let new_status = match change_status(
            self.status,
            RequestKind::OrderCancelReject,
            None,
            order_status,
        ) {
            Ok(s) => s,
            Err(_) => None,
        };
        if order_status == OrderStatus::Rejected {
            self.leaves_qty = 0.0;
        }
        self.orig_clord_id = None;
        match new_status {
            Some(s) => {
                self.status = s;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_order_moves_created_to_pending_new() {
        let mut order = Order::new("root", "AAPL", Side::BUY, 100.0, 10.0);
        let msg = order.new_req();
        assert_eq!(order.status(), OrderStatus::PendingNew);
        assert_eq!(msg.get(11).unwrap(), "root--1");
    }

    #[test]
    fn pending_new_to_new_via_execution_report() {
        let mut order = Order::new("root", "AAPL", Side::BUY, 100.0, 10.0);
        order.new_req();
        let clord = order.clord_id().to_string();
        let changed = order
            .process_execution_report(&clord, ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap();
        assert!(changed);
        assert_eq!(order.status(), OrderStatus::New);
    }

    #[test]
    fn cannot_cancel_before_acknowledged() {
        let order = Order::new("root", "AAPL", Side::BUY, 100.0, 10.0);
        assert!(!order.can_cancel());
    }

    #[test]
    fn cancel_from_new_requires_pending_cancel_then_canceled() {
        let mut order = Order::new("root", "AAPL", Side::BUY, 100.0, 10.0);
        order.new_req();
        let clord = order.clord_id().to_string();
        order
            .process_execution_report(&clord, ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap();

        assert!(order.can_cancel());
        order.cancel_req().unwrap();
        assert_eq!(order.status(), OrderStatus::PendingCancel);

        let clord = order.clord_id().to_string();
        let changed = order
            .process_execution_report(&clord, ExecType::CANCELED, OrderStatus::Canceled, "ord-1", 0.0, 0.0, f64::NAN, None, None)
            .unwrap();
        assert!(changed);
        assert!(order.is_finished());
    }

    #[test]
    fn execution_report_with_wrong_clord_id_errors() {
        let mut order = Order::new("root", "AAPL", Side::BUY, 100.0, 10.0);
        order.new_req();
        let err = order
            .process_execution_report("not-the-clord-id", ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap_err();
        assert_eq!(err, OrderError::ClOrdIdMismatch);
    }

    #[test]
    fn cancel_while_cancel_already_outstanding_is_rejected() {
        let mut order = Order::new("root", "AAPL", Side::BUY, 100.0, 10.0);
        order.new_req();
        let clord = order.clord_id().to_string();
        order
            .process_execution_report(&clord, ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap();

        order.cancel_req().unwrap();
        let err = order.cancel_req().unwrap_err();
        assert_eq!(err, OrderError::PendingAmendment);
    }

    #[test]
    fn vanilla_fill_to_completion() {
        let mut order = Order::new("X", "AAPL", Side::BUY, 200.0, 10.0);
        order.new_req();
        let clord = order.clord_id().to_string();
        order
            .process_execution_report(&clord, ExecType::PENDING_NEW, OrderStatus::PendingNew, "ord-1", 0.0, 0.0, f64::NAN, None, None)
            .unwrap();
        order
            .process_execution_report(&clord, ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap();
        order
            .process_execution_report(&clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 2.0, 8.0, 120.0, None, None)
            .unwrap();
        order
            .process_execution_report(&clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 3.0, 7.0, 120.0, None, None)
            .unwrap();
        order
            .process_execution_report(&clord, ExecType::FILL, OrderStatus::Filled, "ord-1", 10.0, 0.0, 120.0, None, None)
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(order.cum_qty, 10.0);
        assert_eq!(order.leaves_qty, 0.0);
        assert_eq!(order.avg_px, 120.0);
        assert!(order.is_finished());
    }

    #[test]
    fn cancel_race_with_fills_in_flight() {
        let mut order = Order::new("X", "AAPL", Side::BUY, 200.0, 10.0);
        order.new_req();
        let clord = order.clord_id().to_string();
        order
            .process_execution_report(&clord, ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap();
        order
            .process_execution_report(&clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 2.0, 8.0, f64::NAN, None, None)
            .unwrap();

        order.cancel_req().unwrap();
        let orig_clord = clord;
        assert_eq!(order.orig_clord_id(), Some(orig_clord.as_str()));

        // a fill under the original ClOrdID races in while the cancel is pending.
        order
            .process_execution_report(&orig_clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 5.0, 5.0, f64::NAN, None, None)
            .unwrap();
        assert_eq!(order.status(), OrderStatus::PendingCancel);

        order
            .process_execution_report(&orig_clord, ExecType::PENDING_CANCEL, OrderStatus::PendingCancel, "ord-1", 5.0, 5.0, f64::NAN, None, None)
            .unwrap();
        order
            .process_execution_report(&orig_clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 6.0, 4.0, f64::NAN, None, None)
            .unwrap();

        order
            .process_execution_report(&orig_clord, ExecType::CANCELED, OrderStatus::Canceled, "ord-1", 6.0, 0.0, f64::NAN, None, None)
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Canceled);
        assert_eq!(order.cum_qty, 6.0);
        assert_eq!(order.orig_clord_id(), None);
    }

    #[test]
    fn replace_increase_under_fire() {
        let mut order = Order::new("X", "AAPL", Side::BUY, 200.0, 10.0);
        order.new_req();
        let clord = order.clord_id().to_string();
        order
            .process_execution_report(&clord, ExecType::NEW, OrderStatus::New, "ord-1", 0.0, 10.0, f64::NAN, None, None)
            .unwrap();
        order
            .process_execution_report(&clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 1.0, 9.0, f64::NAN, None, None)
            .unwrap();

        order.replace_req(Some(300.0), Some(12.0)).unwrap();
        let orig_clord = clord;
        assert_eq!(order.orig_clord_id(), Some(orig_clord.as_str()));

        // a fill under the original ClOrdID races in while the replace is pending.
        order
            .process_execution_report(&orig_clord, ExecType::PARTIAL_FILL, OrderStatus::PartiallyFilled, "ord-1", 1.1, 10.9, f64::NAN, None, None)
            .unwrap();
        assert_eq!(order.status(), OrderStatus::PendingReplace);

        order
            .process_execution_report(&orig_clord, ExecType::REPLACE, OrderStatus::New, "ord-1", 1.1, 10.9, f64::NAN, Some(300.0), Some(12.0))
            .unwrap();
        assert_eq!(order.status(), OrderStatus::New);
        assert_eq!(order.orig_clord_id(), None);
        assert_eq!(order.price, 300.0);
        assert_eq!(order.qty, 12.0);

        let new_clord = order.clord_id().to_string();
        order
            .process_execution_report(&new_clord, ExecType::FILL, OrderStatus::Filled, "ord-1", 12.0, 0.0, f64::NAN, None, None)
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Filled);
        assert_eq!(order.price, 300.0);
        assert_eq!(order.qty, 12.0);
        assert_eq!(order.cum_qty, 12.0);
    }

    #[test]
    fn clord_root_strips_sequence_suffix() {
        assert_eq!(clord_root("abc--3"), "abc");
        assert_eq!(clord_root("abc"), "abc");
    }
}
