use rdtctl_raw::rdt::mon::{decode_counter, encode_event_select, CounterReading};
use rdtctl_raw::rdt::msr::{IA32_QM_CTR, IA32_QM_EVTSEL};

use crate::common::MsrAccess;
use crate::error::Result;

/// Select `(rmid, event_id)` and read the counter through `lcore`
pub fn read_counter(
    msr: &dyn MsrAccess,
    lcore: u32,
    rmid: u32,
    event_id: u8,
) -> Result<CounterReading> {
    msr.write(
        lcore,
        IA32_QM_EVTSEL,
        encode_event_select(rmid as u64, event_id as u64)?,
    )?;
    Ok(decode_counter(msr.read(lcore, IA32_QM_CTR)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMsr;

    #[test]
    fn test_read_counter_selects_event() {
        let msr = FakeMsr::new();
        msr.set(1, IA32_QM_CTR, 1234);

        assert_eq!(
            read_counter(&msr, 1, 5, 2).unwrap(),
            CounterReading::Value(1234)
        );
        assert_eq!(msr.get(1, IA32_QM_EVTSEL), (5u64 << 32) | 2);
    }

    #[test]
    fn test_read_counter_flags() {
        let msr = FakeMsr::new();
        msr.set(0, IA32_QM_CTR, 1 << 62);
        assert_eq!(
            read_counter(&msr, 0, 1, 1).unwrap(),
            CounterReading::Unavailable
        );
    }
}
