use embedded_hal::blocking::spi::Transfer;

/// SPI clock rate of the card bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum BusClock {
    /// Bring-up rate, 100..400 kHz.
    Slow,
    /// Operating rate after successful initialization.
    Fast,
}

/// Full-duplex exchange with the card.
///
/// Every outgoing unit yields an incoming one, which must be consumed even
/// when only the outbound direction matters.
pub trait Transport {
    /// Transport error.
    type Error: core::fmt::Debug;

    /// Send one byte and receive one byte.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Send one 16-bit word and receive one, most significant byte first.
    fn exchange_word(&mut self, word: u16) -> Result<u16, Self::Error> {
        let [hi, lo] = word.to_be_bytes();
        let hi = self.exchange(hi)?;
        let lo = self.exchange(lo)?;

        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Switch the bus clock.
    fn set_clock(&mut self, _clock: BusClock) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Clock switching hook of [`SpiTransport`].
pub type ClockHook<Spi> = fn(&mut Spi, BusClock) -> Result<(), <Spi as Transfer<u8>>::Error>;

/// [`Transport`] over a blocking `embedded-hal` SPI.
pub struct SpiTransport<Spi: Transfer<u8>> {
    spi: Spi,
    clock: Option<ClockHook<Spi>>,
}

impl<Spi: Transfer<u8>> SpiTransport<Spi> {
    /// Creates a new [`SpiTransport<Spi>`] which never switches the clock.
    pub fn new(spi: Spi) -> Self {
        Self { spi, clock: None }
    }

    /// Creates a new [`SpiTransport<Spi>`] switching the clock with `clock`.
    pub fn with_clock(spi: Spi, clock: ClockHook<Spi>) -> Self {
        Self {
            spi,
            clock: Some(clock),
        }
    }

    /// Releases the SPI.
    pub fn free(self) -> Spi {
        self.spi
    }
}

impl<Spi: Transfer<u8>> Transport for SpiTransport<Spi>
where
    Spi::Error: core::fmt::Debug,
{
    type Error = Spi::Error;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        self.spi.transfer(&mut [byte]).map(|b| b[0])
    }

    fn set_clock(&mut self, clock: BusClock) -> Result<(), Self::Error> {
        match self.clock {
            Some(hook) => hook(&mut self.spi, clock),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BusClock, SpiTransport, Transport};
    use embedded_hal::blocking::spi::Transfer;
    use std::vec::Vec;

    /// Loopback SPI that inverts every byte.
    struct Inverter {
        sent: Vec<u8>,
        clock: Option<BusClock>,
    }

    impl Transfer<u8> for Inverter {
        type Error = ();

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
            for word in words.iter_mut() {
                self.sent.push(*word);
                *word = !*word;
            }
            Ok(words)
        }
    }

    #[test]
    fn test_exchange_word_is_big_endian() {
        let mut transport = SpiTransport::new(Inverter {
            sent: Vec::new(),
            clock: None,
        });

        assert_eq!(transport.exchange(0x0F), Ok(0xF0));
        assert_eq!(transport.exchange_word(0x1234), Ok(0xEDCB));
        assert_eq!(transport.free().sent, [0x0F, 0x12, 0x34]);
    }

    #[test]
    fn test_clock_hook() {
        let mut transport = SpiTransport::with_clock(
            Inverter {
                sent: Vec::new(),
                clock: None,
            },
            |spi, clock| {
                spi.clock = Some(clock);
                Ok(())
            },
        );

        assert_eq!(transport.set_clock(BusClock::Fast), Ok(()));
        assert_eq!(transport.free().clock, Some(BusClock::Fast));
    }
}
