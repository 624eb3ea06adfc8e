use bitfield::bitfield;

bitfield! {
    /// Device status flags.
    ///
    /// Empty status means the device is initialized and ready.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Status(u8);
    impl Debug;
    /// Device has not been initialized.
    pub not_initialized, set_not_initialized: 0;
    /// No medium in the socket.
    pub no_media, set_no_media: 1;
    /// Medium is write protected.
    pub write_protected, set_write_protected: 2;
}

impl Status {
    /// Initialized and ready.
    pub const READY: Self = Self(0x00);
    /// Initial state of the driver.
    pub const NOT_INITIALIZED: Self = Self(0x01);

    /// Returns `true` if no flag is raised.
    pub fn is_ready(&self) -> bool {
        self.0 == Self::READY.0
    }

    /// Raw FatFs `DSTATUS` byte.
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::NOT_INITIALIZED
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn test_flags_combine() {
        let mut status = Status::default();
        assert!(status.not_initialized());
        assert!(!status.is_ready());

        status.set_no_media(true);
        assert!(status.not_initialized());
        assert!(status.no_media());
        assert_eq!(status.bits(), 0x03);

        status.set_no_media(false);
        status.set_not_initialized(false);
        assert!(status.is_ready());
        assert_eq!(status, Status::READY);
    }
}
