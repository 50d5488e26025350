pub type Result<T> = std::result::Result<T, RegisterError>;

/// Errors raised while encoding register values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("value {value:#x} for field '{field}' is out of range (max {max:#x})")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("cache mask {0:#x} is not a contiguous run of bits")]
    NonContiguousMask(u64),

    #[error("cache mask must have at least one bit set")]
    EmptyMask,
}

impl RegisterError {
    pub fn out_of_range(field: &'static str, value: u64, max: u64) -> Self {
        Self::ValueOutOfRange { field, value, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_display() {
        let err = RegisterError::out_of_range("rmid", 0x400, 0x3FF);
        assert_eq!(
            err.to_string(),
            "value 0x400 for field 'rmid' is out of range (max 0x3ff)"
        );
    }
}
