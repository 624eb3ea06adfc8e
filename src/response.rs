use bitfield::bitfield;

bitfield! {
    /// R1 response bitset.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct R1Response(u8);
    impl Debug;
    pub in_idle_state, _: 0;
    pub erase_reset, _: 1;
    pub illigal_command, _: 2;
    pub command_crc_error, _: 3;
    pub erase_sequence_error, _: 4;
    pub address_error, _: 5;
    pub parameter_error, _: 6;
    pub invalid, _: 7;
}

impl R1Response {
    /// Card is ready, no error bits.
    pub const READY_STATE: Self = Self(0x00);
    /// Card is in idle state, no error bits.
    pub const IN_IDLE_STATE: Self = Self(0x01);
    /// Card is busy or didn't answer at all.
    pub const NO_RESPONSE: Self = Self(0xFF);

    /// Response byte has a start bit.
    pub fn is_valid(&self) -> bool {
        !self.invalid()
    }

    /// Command was accepted, regardless of the idle bit.
    pub fn is_accepted(&self) -> bool {
        self.0 <= Self::IN_IDLE_STATE.0
    }
}

/// R3 OCR payload.
pub type R3OcrPayload = [u8; 4];

#[cfg(test)]
mod tests {
    use super::R1Response;

    #[test]
    fn test_r1_validity() {
        assert!(R1Response::READY_STATE.is_valid());
        assert!(R1Response(0x05).is_valid());
        assert!(!R1Response::NO_RESPONSE.is_valid());
        assert!(!R1Response(0x80).is_valid());
    }

    #[test]
    fn test_r1_acceptance() {
        assert!(R1Response::READY_STATE.is_accepted());
        assert!(R1Response::IN_IDLE_STATE.is_accepted());
        assert!(!R1Response(0x05).is_accepted());
        assert!(R1Response(0x05).illigal_command());
        assert!(!R1Response::NO_RESPONSE.is_accepted());
    }
}
