//! Tag-value encode/decode for the FIX-4.4 subset in spec.md section 4.1.

use crate::error::{ExchangeError, ExchangeResult};
use crate::fix::message::{ExecutionReport, FixMessage, Heartbeat, NewOrderSingle, OrdStatus, Side};
use std::collections::HashMap;

pub const SOH: char = '\u{0001}';

const TAG_BEGIN_STRING: u32 = 8;
const TAG_BODY_LENGTH: u32 = 9;
const TAG_MSG_TYPE: u32 = 35;
const TAG_SENDER: u32 = 49;
const TAG_TARGET: u32 = 56;
const TAG_SEQ: u32 = 34;
const TAG_SENDING_TIME: u32 = 52;
const TAG_CL_ORD_ID: u32 = 11;
const TAG_SYMBOL: u32 = 55;
const TAG_SIDE: u32 = 54;
const TAG_ORDER_QTY: u32 = 38;
const TAG_PRICE: u32 = 44;
const TAG_ORDER_ID: u32 = 37;
const TAG_EXEC_ID: u32 = 17;
const TAG_ORD_STATUS: u32 = 39;
const TAG_EXEC_TYPE: u32 = 150;
const TAG_LAST_QTY: u32 = 32;
const TAG_LAST_PX: u32 = 31;
const TAG_LEAVES_QTY: u32 = 151;
const TAG_CUM_QTY: u32 = 14;
const TAG_TEXT: u32 = 58;
const TAG_SOURCE: u32 = 6007;
const TAG_CHECKSUM: u32 = 10;

fn format_price(p: f64) -> String {
    format!("{:.8}", p)
}

fn validate_new_order_single(m: &NewOrderSingle) -> ExchangeResult<()> {
    if m.cl_ord_id.is_empty() {
        return Err(ExchangeError::InvalidField(TAG_CL_ORD_ID, "ClOrdID must not be empty".into()));
    }
    if m.symbol.is_empty() || m.symbol.len() > 8 {
        return Err(ExchangeError::InvalidField(
            TAG_SYMBOL,
            "Symbol must be 1-8 chars".into(),
        ));
    }
    if !(0.01..=1_000_000.0).contains(&m.price) {
        return Err(ExchangeError::InvalidField(
            TAG_PRICE,
            format!("Price {} outside [0.01, 1000000]", m.price),
        ));
    }
    if !(1..=10_000).contains(&m.order_qty) {
        return Err(ExchangeError::InvalidField(
            TAG_ORDER_QTY,
            format!("OrderQty {} outside [1, 10000]", m.order_qty),
        ));
    }
    Ok(())
}

/// Owns the outgoing sequence counter for one FIX session. Each strategy
/// owns its own `Codec` instance; sequence counters are never shared across
/// strategies (spec.md section 5).
#[derive(Debug, Clone)]
pub struct Codec {
    pub sender: String,
    pub target: String,
    out_seq: u32,
    expected_in_seq: u32,
}

impl Codec {
    pub fn new(sender: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            target: target.into(),
            out_seq: 1,
            expected_in_seq: 1,
        }
    }

    pub fn next_out_seq(&self) -> u32 {
        self.out_seq
    }

    pub fn expected_in_seq(&self) -> u32 {
        self.expected_in_seq
    }

    /// Encode a message, validating it first, and advance the outgoing
    /// sequence counter on success.
    pub fn encode(&mut self, msg: &FixMessage, sending_time: &str) -> ExchangeResult<String> {
        if let FixMessage::NewOrderSingle(ref nos) = msg {
            validate_new_order_single(nos)?;
        }

        let mut fields: Vec<(u32, String)> = vec![
            (TAG_MSG_TYPE, msg.msg_type().to_string()),
            (TAG_SENDER, self.sender.clone()),
            (TAG_TARGET, self.target.clone()),
            (TAG_SEQ, self.out_seq.to_string()),
            (TAG_SENDING_TIME, sending_time.to_string()),
        ];

        match msg {
            FixMessage::NewOrderSingle(nos) => {
                fields.push((TAG_CL_ORD_ID, nos.cl_ord_id.clone()));
                fields.push((TAG_SYMBOL, nos.symbol.clone()));
                fields.push((TAG_SIDE, nos.side.fix_code().to_string()));
                fields.push((TAG_PRICE, format_price(nos.price)));
                fields.push((TAG_ORDER_QTY, nos.order_qty.to_string()));
                fields.push((TAG_SOURCE, nos.source.clone()));
            }
            FixMessage::Heartbeat(_) => {}
            FixMessage::ExecutionReport(er) => {
                fields.push((TAG_CL_ORD_ID, er.cl_ord_id.clone()));
                fields.push((TAG_ORDER_ID, er.order_id.clone()));
                fields.push((TAG_EXEC_ID, er.exec_id.clone()));
                fields.push((TAG_ORD_STATUS, er.ord_status.ord_status_code().to_string()));
                fields.push((TAG_EXEC_TYPE, er.ord_status.exec_type_code().to_string()));
                fields.push((TAG_SYMBOL, er.symbol.clone()));
                fields.push((TAG_SIDE, er.side.fix_code().to_string()));
                fields.push((TAG_ORDER_QTY, er.order_qty.to_string()));
                if let Some(qty) = er.last_qty {
                    fields.push((TAG_LAST_QTY, qty.to_string()));
                }
                if let Some(px) = er.last_px {
                    fields.push((TAG_LAST_PX, format_price(px)));
                }
                fields.push((TAG_LEAVES_QTY, er.leaves_qty.to_string()));
                fields.push((TAG_CUM_QTY, er.cum_qty.to_string()));
                fields.push((TAG_PRICE, format_price(er.price)));
                if let Some(ref text) = er.text {
                    fields.push((TAG_TEXT, text.clone()));
                }
                fields.push((TAG_SOURCE, er.source.clone()));
            }
        }

        let body: String = fields
            .iter()
            .map(|(tag, val)| format!("{tag}={val}{SOH}"))
            .collect();
        let body_length = body.len();

        let prefix = format!("{TAG_BEGIN_STRING}=FIX.4.4{SOH}{TAG_BODY_LENGTH}={body_length}{SOH}");
        let without_checksum = format!("{prefix}{body}");
        let checksum: u32 = without_checksum.bytes().map(|b| b as u32).sum::<u32>() % 256;
        let full = format!("{without_checksum}{TAG_CHECKSUM}={checksum:03}{SOH}");

        self.out_seq += 1;
        Ok(full)
    }

    /// Parse one complete frame from `buf`. Returns `Ok(None)` when the
    /// buffer does not yet contain a full frame. Never panics.
    pub fn decode(&mut self, buf: &str) -> ExchangeResult<Option<FixMessage>> {
        if !buf.contains(&format!("{TAG_BEGIN_STRING}=FIX.4.4{SOH}")) {
            return Ok(None);
        }
        if !buf.contains(&format!("{TAG_CHECKSUM}=")) {
            return Ok(None);
        }

        let mut fields: HashMap<u32, String> = HashMap::new();
        for segment in buf.split(SOH) {
            if segment.is_empty() {
                continue;
            }
            let mut parts = segment.splitn(2, '=');
            let tag = parts.next().unwrap_or_default();
            let val = parts.next().unwrap_or_default();
            let tag: u32 = match tag.parse() {
                Ok(t) => t,
                Err(_) => return Err(ExchangeError::ParseError(format!("non-numeric tag: {tag}"))),
            };
            fields.insert(tag, val.to_string());
        }

        let msg_type = fields
            .get(&TAG_MSG_TYPE)
            .ok_or_else(|| ExchangeError::ParseError("missing MsgType (35)".into()))?
            .clone();

        if let Some(seq) = fields.get(&TAG_SEQ).and_then(|s| s.parse::<u32>().ok()) {
            self.expected_in_seq = seq + 1;
        }

        let msg = match msg_type.as_str() {
            "D" => {
                let cl_ord_id = fields
                    .get(&TAG_CL_ORD_ID)
                    .ok_or_else(|| ExchangeError::ParseError("missing ClOrdID (11)".into()))?
                    .clone();
                let symbol = fields
                    .get(&TAG_SYMBOL)
                    .ok_or_else(|| ExchangeError::ParseError("missing Symbol (55)".into()))?
                    .clone();
                let side = fields
                    .get(&TAG_SIDE)
                    .and_then(|s| Side::from_fix_code(s))
                    .ok_or_else(|| ExchangeError::ParseError("missing/invalid Side (54)".into()))?;
                let price: f64 = fields
                    .get(&TAG_PRICE)
                    .ok_or_else(|| ExchangeError::ParseError("missing Price (44)".into()))?
                    .parse()
                    .map_err(|_| ExchangeError::ParseError("unparseable Price (44)".into()))?;
                let order_qty: u32 = fields
                    .get(&TAG_ORDER_QTY)
                    .ok_or_else(|| ExchangeError::ParseError("missing OrderQty (38)".into()))?
                    .parse()
                    .map_err(|_| ExchangeError::ParseError("unparseable OrderQty (38)".into()))?;
                let source = fields.get(&TAG_SOURCE).cloned().unwrap_or_default();
                let sending_time = fields.get(&TAG_SENDING_TIME).cloned().unwrap_or_default();
                let nos = NewOrderSingle {
                    cl_ord_id,
                    symbol,
                    side,
                    price,
                    order_qty,
                    sending_time,
                    source,
                };
                validate_new_order_single(&nos)?;
                FixMessage::NewOrderSingle(nos)
            }
            "0" => FixMessage::Heartbeat(Heartbeat {
                sending_time: fields.get(&TAG_SENDING_TIME).cloned().unwrap_or_default(),
            }),
            "8" => {
                let ord_status_code = fields.get(&TAG_ORD_STATUS).map(String::as_str);
                let ord_status = match ord_status_code {
                    Some("1") => OrdStatus::PartiallyFilled,
                    Some("2") => OrdStatus::Filled,
                    _ => {
                        return Err(ExchangeError::ParseError("missing/invalid OrdStatus (39)".into()))
                    }
                };
                FixMessage::ExecutionReport(ExecutionReport {
                    cl_ord_id: fields.get(&TAG_CL_ORD_ID).cloned().unwrap_or_default(),
                    order_id: fields.get(&TAG_ORDER_ID).cloned().unwrap_or_default(),
                    exec_id: fields.get(&TAG_EXEC_ID).cloned().unwrap_or_default(),
                    ord_status,
                    symbol: fields.get(&TAG_SYMBOL).cloned().unwrap_or_default(),
                    side: fields
                        .get(&TAG_SIDE)
                        .and_then(|s| Side::from_fix_code(s))
                        .ok_or_else(|| ExchangeError::ParseError("missing/invalid Side (54)".into()))?,
                    order_qty: fields
                        .get(&TAG_ORDER_QTY)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    last_qty: fields.get(&TAG_LAST_QTY).and_then(|s| s.parse().ok()),
                    last_px: fields.get(&TAG_LAST_PX).and_then(|s| s.parse().ok()),
                    leaves_qty: fields
                        .get(&TAG_LEAVES_QTY)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    cum_qty: fields.get(&TAG_CUM_QTY).and_then(|s| s.parse().ok()).unwrap_or(0),
                    price: fields.get(&TAG_PRICE).and_then(|s| s.parse().ok()).unwrap_or(0.0),
                    text: fields.get(&TAG_TEXT).cloned(),
                    source: fields.get(&TAG_SOURCE).cloned().unwrap_or_default(),
                })
            }
            other => return Err(ExchangeError::ParseError(format!("unsupported MsgType: {other}"))),
        };

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> NewOrderSingle {
        NewOrderSingle {
            cl_ord_id: "CL1".into(),
            symbol: "AAPL".into(),
            side: Side::Buy,
            price: 101.0,
            order_qty: 5,
            sending_time: "20260101-00:00:00".into(),
            source: "momentum".into(),
        }
    }

    #[test]
    fn round_trip_new_order_single() {
        let mut codec = Codec::new("MY_COMPANY", "EXCHANGE");
        let msg = FixMessage::NewOrderSingle(sample_order());
        let wire = codec.encode(&msg, "20260101-00:00:00").unwrap();
        assert!(wire.contains(&format!("35=D{SOH}")));

        let mut decoder = Codec::new("EXCHANGE", "MY_COMPANY");
        let parsed = decoder.decode(&wire).unwrap().unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn price_formatted_to_eight_fractional_digits() {
        let mut codec = Codec::new("MY_COMPANY", "EXCHANGE");
        let mut order = sample_order();
        order.price = 101.0;
        let wire = codec.encode(&FixMessage::NewOrderSingle(order), "t").unwrap();
        assert!(wire.contains(&format!("44=101.00000000{SOH}")));
    }

    #[test]
    fn rejects_symbol_too_long() {
        let mut codec = Codec::new("A", "B");
        let mut order = sample_order();
        order.symbol = "TOOLONGSYMBOL".into();
        let err = codec.encode(&FixMessage::NewOrderSingle(order), "t").unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidField(55, _)));
    }

    #[test]
    fn rejects_qty_out_of_range() {
        let mut codec = Codec::new("A", "B");
        let mut order = sample_order();
        order.order_qty = 10_001;
        let err = codec.encode(&FixMessage::NewOrderSingle(order), "t").unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidField(38, _)));
    }

    #[test]
    fn sequence_counter_increments_on_successful_encode() {
        let mut codec = Codec::new("A", "B");
        assert_eq!(codec.next_out_seq(), 1);
        codec
            .encode(&FixMessage::Heartbeat(Heartbeat { sending_time: "t".into() }), "t")
            .unwrap();
        assert_eq!(codec.next_out_seq(), 2);
    }

    #[test]
    fn decode_resynchronises_expected_seq() {
        let mut codec = Codec::new("A", "B");
        codec
            .encode(&FixMessage::Heartbeat(Heartbeat { sending_time: "t".into() }), "t")
            .unwrap();
        codec
            .encode(&FixMessage::Heartbeat(Heartbeat { sending_time: "t".into() }), "t")
            .unwrap();

        let mut decoder = Codec::new("B", "A");
        let wire = format!("8=FIX.4.4{SOH}9=20{SOH}35=0{SOH}34=7{SOH}10=000{SOH}");
        let _ = decoder.decode(&wire);
        assert_eq!(decoder.expected_in_seq(), 8);
    }

    #[test]
    fn incomplete_buffer_yields_no_message() {
        let mut decoder = Codec::new("A", "B");
        assert_eq!(decoder.decode("not a fix frame").unwrap(), None);
    }

    #[test]
    fn checksum_is_mod_256_zero_padded() {
        let mut codec = Codec::new("A", "B");
        let wire = codec
            .encode(&FixMessage::Heartbeat(Heartbeat { sending_time: "t".into() }), "t")
            .unwrap();
        let checksum_field = wire
            .split(SOH)
            .find(|s| s.starts_with("10="))
            .expect("checksum field present");
        assert_eq!(checksum_field.len(), "10=".len() + 3);
    }
}
