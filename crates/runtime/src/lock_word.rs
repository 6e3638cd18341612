//! The first word of every object.
//!
//! The lock word holds the object's monitor state. During
//! compaction it is overwritten with the object's forwarding
//! address; any real state is saved by the collector and
//! written back once the object has moved.

use crate::Address;

const STATE_SHIFT: u32 = 62;
const STATE_THIN: u64 = 0;
const STATE_FAT: u64 = 1;
const STATE_HASH: u64 = 2;
const STATE_FORWARDED: u64 = 3;

const PAYLOAD_MASK: u64 = (1 << STATE_SHIFT) - 1;
const THIN_COUNT_SHIFT: u32 = 16;

/// Forwarding addresses are stored without their alignment bits.
const FORWARDING_SHIFT: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum LockWord {
    #[default]
    Unlocked,
    /// Held by `thread` (never zero), re-entered `count` times.
    ThinLocked { thread: u16, count: u16 },
    /// Inflated into the monitor with the given id.
    FatLocked { monitor_id: u32 },
    /// Relocated to `address`. Only seen during compaction.
    Forwarded { address: Address },
    /// Carries the identity hash code.
    Hashed { hash: u32 },
}

impl LockWord {
    pub fn decode(raw: u64) -> Self {
        let payload = raw & PAYLOAD_MASK;
        match raw >> STATE_SHIFT {
            STATE_THIN => {
                let thread = payload as u16;
                let count = (payload >> THIN_COUNT_SHIFT) as u16;
                if thread == 0 && count == 0 {
                    LockWord::Unlocked
                } else {
                    LockWord::ThinLocked { thread, count }
                }
            }
            STATE_FAT => LockWord::FatLocked {
                monitor_id: payload as u32,
            },
            STATE_HASH => LockWord::Hashed {
                hash: payload as u32,
            },
            _ => LockWord::Forwarded {
                address: Address((payload << FORWARDING_SHIFT) as usize),
            },
        }
    }

    pub fn encode(self) -> u64 {
        match self {
            LockWord::Unlocked => 0,
            LockWord::ThinLocked { thread, count } => {
                debug_assert_ne!(thread, 0, "thin lock without an owner");
                (STATE_THIN << STATE_SHIFT)
                    | (u64::from(count) << THIN_COUNT_SHIFT)
                    | u64::from(thread)
            }
            LockWord::FatLocked { monitor_id } => {
                (STATE_FAT << STATE_SHIFT) | u64::from(monitor_id)
            }
            LockWord::Hashed { hash } => (STATE_HASH << STATE_SHIFT) | u64::from(hash),
            LockWord::Forwarded { address } => {
                debug_assert!(address.is_aligned(1 << FORWARDING_SHIFT));
                let payload = (address.0 as u64) >> FORWARDING_SHIFT;
                debug_assert_eq!(payload & !PAYLOAD_MASK, 0);
                (STATE_FORWARDED << STATE_SHIFT) | payload
            }
        }
    }

    pub fn forwarding_address(self) -> Option<Address> {
        match self {
            LockWord::Forwarded { address } => Some(address),
            _ => None,
        }
    }
}
