use crate::transport::Transport;

/// Dummy CRC sent after every data block.
const DUMMY_CRC: [u8; 2] = [0xFF, 0xFF];
/// Filler word clocked out while receiving.
const FILL_WORD: u16 = 0xFFFF;

/// Moves the body of one data block: token + 512-byte payload + trailer.
///
/// Picked once at driver construction: [`WordTransfer`] for programmed
/// I/O or [`DmaEngine`](crate::DmaEngine) for scatter-gather DMA.
pub trait SectorTransfer<T: Transport> {
    /// Bring the transfer machinery to idle after power on.
    fn reset(&mut self) {}

    /// Send `token`, `data` and a dummy CRC.
    fn send_sector(&mut self, bus: &mut T, token: u8, data: &[u8]) -> Result<(), T::Error>;

    /// Receive `data` and discard the CRC. The start token is already consumed.
    fn receive_sector(&mut self, bus: &mut T, data: &mut [u8]) -> Result<(), T::Error>;
}

/// Programmed I/O sector transfer, 16 bits per exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTransfer;

impl<T: Transport> SectorTransfer<T> for WordTransfer {
    fn send_sector(&mut self, bus: &mut T, token: u8, data: &[u8]) -> Result<(), T::Error> {
        bus.exchange(token)?;

        for pair in data.chunks_exact(2) {
            bus.exchange_word(u16::from_be_bytes([pair[0], pair[1]]))?;
        }

        for byte in DUMMY_CRC {
            bus.exchange(byte)?;
        }

        Ok(())
    }

    fn receive_sector(&mut self, bus: &mut T, data: &mut [u8]) -> Result<(), T::Error> {
        for pair in data.chunks_exact_mut(2) {
            pair.copy_from_slice(&bus.exchange_word(FILL_WORD)?.to_be_bytes());
        }

        for byte in DUMMY_CRC {
            bus.exchange(byte)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SectorTransfer, WordTransfer};
    use crate::transport::Transport;
    use std::{collections::VecDeque, vec::Vec};

    #[derive(Default)]
    struct Script {
        replies: VecDeque<u8>,
        bytes: Vec<u8>,
        words: usize,
    }

    impl Transport for Script {
        type Error = ();

        fn exchange(&mut self, byte: u8) -> Result<u8, ()> {
            self.bytes.push(byte);
            Ok(self.replies.pop_front().unwrap_or(0xFF))
        }

        fn exchange_word(&mut self, word: u16) -> Result<u16, ()> {
            self.words += 1;
            let [hi, lo] = word.to_be_bytes();
            Ok(u16::from_be_bytes([self.exchange(hi)?, self.exchange(lo)?]))
        }
    }

    #[test]
    fn test_send_uses_words() {
        let mut bus = Script::default();
        let data: Vec<u8> = (0..512).map(|i| i as u8).collect();

        WordTransfer.send_sector(&mut bus, 0xFE, &data).unwrap();

        assert_eq!(bus.words, 256);
        assert_eq!(bus.bytes.len(), 1 + 512 + 2);
        assert_eq!(bus.bytes[0], 0xFE);
        assert_eq!(bus.bytes[1..513], data[..]);
        assert_eq!(bus.bytes[513..], [0xFF, 0xFF]);
    }

    #[test]
    fn test_receive_keeps_byte_order() {
        let mut bus = Script::default();
        bus.replies = (0..512).map(|i| (i % 251) as u8).collect();
        bus.replies.extend([0xAB, 0xCD]);

        let mut data = [0u8; 512];
        WordTransfer.receive_sector(&mut bus, &mut data).unwrap();

        assert!(data.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
        assert!(bus.replies.is_empty());
        assert!(bus.bytes.iter().all(|&b| b == 0xFF));
    }
}
