//! Event router (C2): manual log decoding for the Aave V3 Pool and its
//! price oracles, against the exact indexed-topic / data-offset layout of
//! each event rather than a `sol!`-generated decoder, since the engine
//! only ever needs the affected-user address and a couple of numeric
//! fields out of each event, never a full ABI-typed struct.

use alloy::primitives::{keccak256, Address, B256, I256, U256};
use alloy::rpc::types::Log;
use smallvec::{smallvec, SmallVec};

/// Every pool event this engine recognises touches at most two addresses
/// (the position owner and, for a `Withdraw`, its `to`) -- small enough to
/// stay on the stack rather than heap-allocate a `Vec` per decoded log.
pub type AffectedUsers = SmallVec<[Address; 2]>;

/// Event signature constants. `RESERVE_DATA_UPDATED` is computed at load
/// time to avoid hand-transcribing a 32-byte literal incorrectly.
pub mod signatures {
    use super::*;

    /// keccak256("Supply(address,address,address,uint256,uint16)")
    pub const SUPPLY: B256 = B256::new([
        0x2b, 0x62, 0x77, 0x36, 0xbc, 0xa1, 0x5c, 0xd5, 0x38, 0x1d, 0xcf, 0x80, 0xb0, 0xbf, 0x11,
        0xfd, 0x19, 0x7d, 0x01, 0xa0, 0x37, 0xc5, 0x2b, 0x92, 0x7a, 0x88, 0x1a, 0x10, 0xfb, 0x73,
        0xba, 0x61,
    ]);

    /// keccak256("Withdraw(address,address,address,uint256)")
    pub const WITHDRAW: B256 = B256::new([
        0x31, 0x15, 0xd1, 0x44, 0x9a, 0x7b, 0x73, 0x2c, 0x98, 0x6c, 0xba, 0x18, 0x24, 0x4e, 0x89,
        0x7a, 0x45, 0x0f, 0x61, 0xe1, 0xbb, 0x8d, 0x58, 0x9c, 0xd2, 0xe6, 0x9e, 0x6c, 0x89, 0x24,
        0xf9, 0xf7,
    ]);

    /// keccak256("Borrow(address,address,address,uint256,uint8,uint256,uint16)")
    pub const BORROW: B256 = B256::new([
        0xb3, 0xd0, 0x84, 0x82, 0x0f, 0xb1, 0xa9, 0xde, 0xcf, 0xfb, 0x17, 0x64, 0x36, 0xbd, 0x02,
        0x55, 0x8d, 0x15, 0xfa, 0xc9, 0xb0, 0xdd, 0xfe, 0xd8, 0xc4, 0x65, 0xbc, 0x73, 0x59, 0xd7,
        0xdc, 0xe0,
    ]);

    /// keccak256("Repay(address,address,address,uint256,bool)")
    pub const REPAY: B256 = B256::new([
        0xa5, 0x34, 0xc8, 0xdb, 0xe7, 0x1f, 0x87, 0x1f, 0x9f, 0x35, 0x30, 0xe9, 0x7a, 0x74, 0x60,
        0x1f, 0xea, 0x17, 0xb4, 0x26, 0xca, 0xe0, 0x2e, 0x1c, 0x5a, 0xee, 0x42, 0xc9, 0x6c, 0x78,
        0x40, 0x51,
    ]);

    /// keccak256("LiquidationCall(address,address,address,uint256,uint256,address,bool)")
    pub const LIQUIDATION_CALL: B256 = B256::new([
        0xe4, 0x13, 0xa3, 0x21, 0xe8, 0x68, 0x1d, 0x83, 0x1f, 0x4d, 0xbc, 0xcb, 0xca, 0x79, 0x0d,
        0x29, 0x52, 0xb5, 0x6f, 0x97, 0x79, 0x08, 0xe4, 0x5b, 0xe3, 0x73, 0x35, 0x53, 0x3e, 0x00,
        0x52, 0x86,
    ]);

    /// keccak256("AnswerUpdated(int256,uint256,uint256)")
    pub const ANSWER_UPDATED: B256 = B256::new([
        0x05, 0x59, 0x88, 0x4f, 0xd3, 0x34, 0x29, 0x55, 0xd1, 0xfc, 0x4b, 0x32, 0xf8, 0x0a, 0xb7,
        0x04, 0x98, 0x87, 0xe6, 0xe4, 0x32, 0x88, 0x03, 0x12, 0xfa, 0xea, 0x3c, 0x13, 0x6b, 0x0c,
        0xdb, 0xc4,
    ]);

    /// ReserveDataUpdated(address indexed reserve, uint256 liquidityRate,
    /// uint256 stableBorrowRate, uint256 variableBorrowRate,
    /// uint256 liquidityIndex, uint256 variableBorrowIndex)
    pub fn reserve_data_updated() -> B256 {
        keccak256(b"ReserveDataUpdated(address,uint256,uint256,uint256,uint256,uint256)")
    }

    pub fn pool_signatures() -> Vec<B256> {
        vec![SUPPLY, WITHDRAW, BORROW, REPAY, LIQUIDATION_CALL, reserve_data_updated()]
    }
}

/// A single decoded chain event, reduced to what the candidate manager and
/// edge emitter need: which user(s) it touches and enough context to log.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Supply {
        reserve: Address,
        user: Address,
        on_behalf_of: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    Withdraw {
        reserve: Address,
        user: Address,
        to: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    Borrow {
        reserve: Address,
        user: Address,
        on_behalf_of: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    Repay {
        reserve: Address,
        user: Address,
        repayer: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    LiquidationCall {
        collateral_asset: Address,
        debt_asset: Address,
        user: Address,
        block_number: u64,
        tx_hash: B256,
    },
    ReserveDataUpdated {
        reserve: Address,
        block_number: u64,
        tx_hash: B256,
    },
    AnswerUpdated {
        oracle: Address,
        asset: Address,
        price: U256,
        round_id: U256,
        block_number: u64,
        tx_hash: B256,
    },
    /// A log whose topic0 matched none of the signatures this router
    /// recognises. Carried through as a value (rather than `None`) so the
    /// caller can count and log-once it the same way as any other event,
    /// instead of special-casing a missing decode.
    Unknown {
        topic0: B256,
        block_number: u64,
        tx_hash: B256,
    },
}

impl DecodedEvent {
    /// Addresses this event should cause a HF re-scan for. Pool events that
    /// directly change one user's position return that user; a price
    /// update is caller-specific (the router cannot know which users are
    /// exposed to an asset — that's the candidate manager's job once the
    /// price trigger fires) so it returns nothing here.
    pub fn affected_users(&self) -> AffectedUsers {
        match self {
            Self::Supply { user, on_behalf_of, .. } => {
                if on_behalf_of == user {
                    smallvec![*user]
                } else {
                    smallvec![*user, *on_behalf_of]
                }
            }
            Self::Withdraw { user, to, .. } => {
                if to == user {
                    smallvec![*user]
                } else {
                    smallvec![*user, *to]
                }
            }
            Self::Borrow { user, on_behalf_of, .. } => {
                if on_behalf_of == user {
                    smallvec![*user]
                } else {
                    smallvec![*user, *on_behalf_of]
                }
            }
            Self::Repay { user, repayer, .. } => {
                if repayer == user {
                    smallvec![*user]
                } else {
                    smallvec![*user, *repayer]
                }
            }
            Self::LiquidationCall { user, .. } => smallvec![*user],
            Self::ReserveDataUpdated { .. } | Self::AnswerUpdated { .. } | Self::Unknown { .. } => {
                SmallVec::new()
            }
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Supply { block_number, .. }
            | Self::Withdraw { block_number, .. }
            | Self::Borrow { block_number, .. }
            | Self::Repay { block_number, .. }
            | Self::LiquidationCall { block_number, .. }
            | Self::ReserveDataUpdated { block_number, .. }
            | Self::AnswerUpdated { block_number, .. }
            | Self::Unknown { block_number, .. } => *block_number,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Supply { .. } => "Supply",
            Self::Withdraw { .. } => "Withdraw",
            Self::Borrow { .. } => "Borrow",
            Self::Repay { .. } => "Repay",
            Self::LiquidationCall { .. } => "LiquidationCall",
            Self::ReserveDataUpdated { .. } => "ReserveDataUpdated",
            Self::AnswerUpdated { .. } => "AnswerUpdated",
            Self::Unknown { .. } => "Unknown",
        }
    }
}

/// Decode a single Pool log into a [`DecodedEvent`]. An unrecognised
/// topic0 still decodes, as [`DecodedEvent::Unknown`] — only a malformed
/// payload (no topics at all) returns `None`; a single bad log must not
/// stall the listener either way.
pub fn decode_pool_log(log: &Log) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.is_empty() {
        return None;
    }
    let sig = topics[0];
    let block_number = log.block_number.unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();

    if sig == signatures::SUPPLY {
        decode_supply(log, block_number, tx_hash)
    } else if sig == signatures::WITHDRAW {
        decode_withdraw(log, block_number, tx_hash)
    } else if sig == signatures::BORROW {
        decode_borrow(log, block_number, tx_hash)
    } else if sig == signatures::REPAY {
        decode_repay(log, block_number, tx_hash)
    } else if sig == signatures::LIQUIDATION_CALL {
        decode_liquidation_call(log, block_number, tx_hash)
    } else if sig == signatures::reserve_data_updated() {
        decode_reserve_data_updated(log, block_number, tx_hash)
    } else {
        Some(DecodedEvent::Unknown {
            topic0: sig,
            block_number,
            tx_hash,
        })
    }
}

/// Decode an `AnswerUpdated` log from a Chainlink-style aggregator, given
/// the asset symbol that feed is known to serve.
pub fn decode_answer_updated(log: &Log, asset: Address) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 3 {
        return None;
    }

    let price_i256 = I256::from_be_bytes(topics[1].0);
    if price_i256.is_negative() {
        return None;
    }
    let price = price_i256.into_raw();
    let round_id = U256::from_be_bytes(topics[2].0);
    let block_number = log.block_number.unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();

    Some(DecodedEvent::AnswerUpdated {
        oracle: log.address(),
        asset,
        price,
        round_id,
        block_number,
        tx_hash,
    })
}

fn decode_supply(log: &Log, block_number: u64, tx_hash: B256) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 3 {
        return None;
    }
    let reserve = Address::from_slice(&topics[1][12..]);
    let on_behalf_of = Address::from_slice(&topics[2][12..]);
    // referralCode sits in topics[3]; not needed here.
    if log.data().data.len() < 64 {
        return None;
    }
    let user = Address::from_slice(&log.data().data[12..32]);
    let amount = U256::from_be_slice(&log.data().data[32..64]);
    Some(DecodedEvent::Supply {
        reserve,
        user,
        on_behalf_of,
        amount,
        block_number,
        tx_hash,
    })
}

fn decode_withdraw(log: &Log, block_number: u64, tx_hash: B256) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 4 {
        return None;
    }
    let reserve = Address::from_slice(&topics[1][12..]);
    let user = Address::from_slice(&topics[2][12..]);
    let to = Address::from_slice(&topics[3][12..]);
    if log.data().data.len() < 32 {
        return None;
    }
    let amount = U256::from_be_slice(&log.data().data[0..32]);
    Some(DecodedEvent::Withdraw {
        reserve,
        user,
        to,
        amount,
        block_number,
        tx_hash,
    })
}

fn decode_borrow(log: &Log, block_number: u64, tx_hash: B256) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 3 {
        return None;
    }
    let reserve = Address::from_slice(&topics[1][12..]);
    let on_behalf_of = Address::from_slice(&topics[2][12..]);
    // referralCode sits in topics[3]; not needed here.
    if log.data().data.len() < 64 {
        return None;
    }
    let user = Address::from_slice(&log.data().data[12..32]);
    let amount = U256::from_be_slice(&log.data().data[32..64]);
    Some(DecodedEvent::Borrow {
        reserve,
        user,
        on_behalf_of,
        amount,
        block_number,
        tx_hash,
    })
}

fn decode_repay(log: &Log, block_number: u64, tx_hash: B256) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 4 {
        return None;
    }
    let reserve = Address::from_slice(&topics[1][12..]);
    let user = Address::from_slice(&topics[2][12..]);
    let repayer = Address::from_slice(&topics[3][12..]);
    if log.data().data.len() < 32 {
        return None;
    }
    let amount = U256::from_be_slice(&log.data().data[0..32]);
    Some(DecodedEvent::Repay {
        reserve,
        user,
        repayer,
        amount,
        block_number,
        tx_hash,
    })
}

fn decode_liquidation_call(log: &Log, block_number: u64, tx_hash: B256) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 4 {
        return None;
    }
    let collateral_asset = Address::from_slice(&topics[1][12..]);
    let debt_asset = Address::from_slice(&topics[2][12..]);
    let user = Address::from_slice(&topics[3][12..]);
    Some(DecodedEvent::LiquidationCall {
        collateral_asset,
        debt_asset,
        user,
        block_number,
        tx_hash,
    })
}

fn decode_reserve_data_updated(log: &Log, block_number: u64, tx_hash: B256) -> Option<DecodedEvent> {
    let topics = log.topics();
    if topics.len() < 2 {
        return None;
    }
    let reserve = Address::from_slice(&topics[1][12..]);
    Some(DecodedEvent::ReserveDataUpdated {
        reserve,
        block_number,
        tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_data_updated_signature_is_nonzero() {
        assert_ne!(signatures::reserve_data_updated(), B256::ZERO);
    }

    #[test]
    fn test_reserve_data_updated_signature_is_stable() {
        // keccak256 is deterministic; the computed signature must not
        // drift between calls within a process.
        assert_eq!(
            signatures::reserve_data_updated(),
            signatures::reserve_data_updated()
        );
    }

    #[test]
    fn test_pool_signatures_lists_all_six() {
        assert_eq!(signatures::pool_signatures().len(), 6);
    }

    #[test]
    fn test_affected_users_for_liquidation_call() {
        let user = Address::repeat_byte(0x09);
        let event = DecodedEvent::LiquidationCall {
            collateral_asset: Address::ZERO,
            debt_asset: Address::ZERO,
            user,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event.affected_users().to_vec(), vec![user]);
    }

    #[test]
    fn test_withdraw_affected_users_unions_user_and_to() {
        let user = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let event = DecodedEvent::Withdraw {
            reserve: Address::ZERO,
            user,
            to,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        let affected = event.affected_users();
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&user));
        assert!(affected.contains(&to));
    }

    #[test]
    fn test_withdraw_affected_users_dedupes_when_to_equals_user() {
        let user = Address::repeat_byte(0x03);
        let event = DecodedEvent::Withdraw {
            reserve: Address::ZERO,
            user,
            to: user,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event.affected_users().to_vec(), vec![user]);
    }

    #[test]
    fn test_supply_affected_users_unions_user_and_on_behalf_of() {
        let user = Address::repeat_byte(0x07);
        let on_behalf_of = Address::repeat_byte(0x08);
        let event = DecodedEvent::Supply {
            reserve: Address::ZERO,
            user,
            on_behalf_of,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        let affected = event.affected_users();
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&user));
        assert!(affected.contains(&on_behalf_of));
    }

    #[test]
    fn test_supply_affected_users_dedupes_when_on_behalf_of_equals_user() {
        let user = Address::repeat_byte(0x0a);
        let event = DecodedEvent::Supply {
            reserve: Address::ZERO,
            user,
            on_behalf_of: user,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event.affected_users().to_vec(), vec![user]);
    }

    #[test]
    fn test_borrow_affected_users_unions_user_and_on_behalf_of() {
        let user = Address::repeat_byte(0x0b);
        let on_behalf_of = Address::repeat_byte(0x0c);
        let event = DecodedEvent::Borrow {
            reserve: Address::ZERO,
            user,
            on_behalf_of,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        let affected = event.affected_users();
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&user));
        assert!(affected.contains(&on_behalf_of));
    }

    #[test]
    fn test_borrow_affected_users_dedupes_when_on_behalf_of_equals_user() {
        let user = Address::repeat_byte(0x0d);
        let event = DecodedEvent::Borrow {
            reserve: Address::ZERO,
            user,
            on_behalf_of: user,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event.affected_users().to_vec(), vec![user]);
    }

    #[test]
    fn test_repay_affected_users_unions_user_and_repayer() {
        let user = Address::repeat_byte(0x04);
        let repayer = Address::repeat_byte(0x05);
        let event = DecodedEvent::Repay {
            reserve: Address::ZERO,
            user,
            repayer,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        let affected = event.affected_users();
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&user));
        assert!(affected.contains(&repayer));
    }

    #[test]
    fn test_repay_affected_users_dedupes_when_repayer_equals_user() {
        let user = Address::repeat_byte(0x06);
        let event = DecodedEvent::Repay {
            reserve: Address::ZERO,
            user,
            repayer: user,
            amount: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event.affected_users().to_vec(), vec![user]);
    }

    #[test]
    fn test_unknown_event_has_no_affected_users() {
        let event = DecodedEvent::Unknown {
            topic0: B256::repeat_byte(0xff),
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert!(event.affected_users().is_empty());
        assert_eq!(event.kind(), "Unknown");
    }

    #[test]
    fn test_price_event_has_no_directly_affected_user() {
        let event = DecodedEvent::AnswerUpdated {
            oracle: Address::ZERO,
            asset: Address::ZERO,
            price: U256::ZERO,
            round_id: U256::ZERO,
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert!(event.affected_users().is_empty());
    }
}
