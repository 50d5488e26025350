//! Monitoring (CMT / MBM) register definitions
//!
//! Software selects an (RMID, event) pair in `IA32_QM_EVTSEL`, then reads the
//! counter from `IA32_QM_CTR`.

use crate::error::Result;
use crate::register::{BitField, RegisterLayout};

/// RDT monitoring event IDs
pub mod events {
    /// L3 cache occupancy
    pub const LLC_OCCUPANCY: u8 = 0x01;

    /// L3 total external bandwidth
    pub const TOTAL_MEM_BW: u8 = 0x02;

    /// L3 local external bandwidth
    pub const LOCAL_MEM_BW: u8 = 0x03;
}

pub const EVTSEL_EVENT_ID: BitField = BitField::new("event_id", 0, 8);
pub const EVTSEL_RMID: BitField = BitField::new("rmid", 32, 10);

pub const QM_CTR_DATA: BitField = BitField::new("data", 0, 62);
pub const QM_CTR_UNAVAILABLE: BitField = BitField::new("unavailable", 62, 1);
pub const QM_CTR_ERROR: BitField = BitField::new("error", 63, 1);

/// QM Event Select Register layout
///
/// ## Register Format
///
/// | Bits   | Field     | Description                  |
/// |--------|-----------|------------------------------|
/// | 0-7    | event_id  | Event ID to monitor          |
/// | 8-31   | reserved  |                              |
/// | 32-41  | rmid      | Resource Monitoring ID       |
/// | 42-63  | reserved  |                              |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QmEventSelect {
    pub rmid: u32,
    pub event_id: u8,
}

impl RegisterLayout for QmEventSelect {
    fn to_msr_value(&self) -> u64 {
        (self.event_id as u64) | ((self.rmid as u64 & EVTSEL_RMID.max()) << EVTSEL_RMID.shift)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            rmid: EVTSEL_RMID.extract(value) as u32,
            event_id: EVTSEL_EVENT_ID.extract(value) as u8,
        }
    }

    fn validate(&self) -> Result<()> {
        EVTSEL_RMID.insert(0, self.rmid as u64).map(|_| ())
    }
}

pub fn encode_event_select(rmid: u64, event_id: u64) -> Result<u64> {
    let raw = EVTSEL_EVENT_ID.insert(0, event_id)?;
    EVTSEL_RMID.insert(raw, rmid)
}

/// Returns `(rmid, event_id)`
pub fn decode_event_select(raw: u64) -> (u32, u8) {
    let evtsel = QmEventSelect::from_msr_value(raw);
    (evtsel.rmid, evtsel.event_id)
}

/// Decoded `IA32_QM_CTR` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterReading {
    Value(u64),
    /// No data for the selected RMID/event yet
    Unavailable,
    /// Unsupported RMID or event
    Error,
}

impl CounterReading {
    pub fn value(&self) -> Option<u64> {
        match self {
            CounterReading::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Flags are checked before the data bits; bit 63 wins over bit 62.
pub fn decode_counter(raw: u64) -> CounterReading {
    if QM_CTR_ERROR.extract(raw) != 0 {
        CounterReading::Error
    } else if QM_CTR_UNAVAILABLE.extract(raw) != 0 {
        CounterReading::Unavailable
    } else {
        CounterReading::Value(QM_CTR_DATA.extract(raw))
    }
}
