//! Scatter-gather DMA sector transfers.
//!
//! A sector moves as one hardware-driven chain per direction: control byte,
//! 512-byte payload, 2-byte trailer. The transmit and receive channels of the
//! SPI peripheral run together, the receive channel signals completion.

use crate::{consts::BLOCK_SIZE, transfer::SectorTransfer, transport::Transport};

use heapless::spsc::{Consumer, Producer, Queue};

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// Size of the payload segment.
const PAYLOAD_SIZE: usize = BLOCK_SIZE;
/// Size of the trailer segment (dummy CRC).
const TRAILER_SIZE: usize = 2;
/// Filler clocked out while receiving.
const FILL_BYTE: u8 = 0xFF;
/// Burst size granted to a channel before re-arbitration.
const ARBITRATION_SIZE: u8 = 4;

/// DMA channel of the SPI peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Channel {
    /// Memory to the SPI data register.
    Tx,
    /// SPI data register to memory.
    Rx,
}

/// Direction of a sector transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Direction {
    /// Host to card.
    ToCard,
    /// Card to host.
    FromCard,
}

/// Address increment of one side of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Increment {
    /// Every unit goes to/from the same address.
    None,
    /// Address advances by one byte per unit.
    Byte,
}

/// Channel control word. Transfer unit is always one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct ChannelControl {
    pub source: Increment,
    pub destination: Increment,
    pub arbitration: u8,
}

impl ChannelControl {
    const fn new(source: Increment, destination: Increment) -> Self {
        Self {
            source,
            destination,
            arbitration: ARBITRATION_SIZE,
        }
    }

    /// Control words of the (Tx, Rx) channels for `direction`.
    pub const fn for_direction(direction: Direction) -> (Self, Self) {
        match direction {
            Direction::ToCard => (
                Self::new(Increment::Byte, Increment::None),
                Self::new(Increment::None, Increment::None),
            ),
            Direction::FromCard => (
                Self::new(Increment::None, Increment::None),
                Self::new(Increment::None, Increment::Byte),
            ),
        }
    }
}

/// How the channel proceeds after a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum SegmentMode {
    /// Continue with the next segment of the chain.
    ScatterGather,
    /// Last segment: stop and raise completion.
    Basic,
}

/// Memory-side source of a transmit segment.
///
/// With [`Increment::None`] all `count` units are read from `source[0]`.
#[derive(Debug)]
pub struct TxSegment<'a> {
    pub source: &'a [u8],
    pub count: usize,
    pub increment: Increment,
    pub mode: SegmentMode,
}

/// Memory-side sink of a receive segment.
///
/// With [`Increment::None`] all `count` units are written to `sink[0]`.
#[derive(Debug)]
pub struct RxSegment<'a> {
    pub sink: &'a mut [u8],
    pub count: usize,
    pub increment: Increment,
    pub mode: SegmentMode,
}

impl<'a> TxSegment<'a> {
    fn chained(source: &'a [u8]) -> Self {
        Self {
            count: source.len(),
            source,
            increment: Increment::Byte,
            mode: SegmentMode::ScatterGather,
        }
    }

    fn terminal(self) -> Self {
        Self {
            mode: SegmentMode::Basic,
            ..self
        }
    }

    fn repeat(source: &'a [u8; 1], count: usize) -> Self {
        Self {
            source,
            count,
            increment: Increment::None,
            mode: SegmentMode::Basic,
        }
    }
}

impl<'a> RxSegment<'a> {
    fn chained(sink: &'a mut [u8]) -> Self {
        Self {
            count: sink.len(),
            sink,
            increment: Increment::Byte,
            mode: SegmentMode::ScatterGather,
        }
    }

    fn terminal(self) -> Self {
        Self {
            mode: SegmentMode::Basic,
            ..self
        }
    }

    fn discard(sink: &'a mut [u8; 1], count: usize) -> Self {
        Self {
            sink,
            count,
            increment: Increment::None,
            mode: SegmentMode::Basic,
        }
    }
}

/// DMA controller channels wired to the SPI peripheral.
pub trait DmaChannels {
    /// Route SPI DMA requests and the completion interrupt, drain the receive FIFO.
    fn attach(&mut self);

    /// Stop routing SPI DMA requests.
    fn detach(&mut self);

    /// Program the control word of `channel`.
    fn configure(&mut self, channel: Channel, control: ChannelControl);

    /// Load both chains without starting them.
    ///
    /// Segments stay borrowed by the caller until both channels report
    /// [`is_stopped`](DmaChannels::is_stopped) and are disabled, so the
    /// controller may keep their addresses for the duration of the run.
    fn load(&mut self, tx: &[TxSegment<'_>], rx: &mut [RxSegment<'_>]);

    /// Start servicing requests on `channel`.
    fn enable(&mut self, channel: Channel);

    /// Stop servicing requests on `channel`.
    fn disable(&mut self, channel: Channel);

    /// `channel` ran its chain to the end, or was never started.
    fn is_stopped(&self, channel: Channel) -> bool;
}

/// Blocking side of the completion signal.
pub trait CompletionWait {
    /// Block until the completion interrupt posted.
    fn wait(&mut self);
}

/// Single-slot completion channel storage.
pub type CompletionQueue = Queue<(), 2>;

/// Interrupt side of the completion signal.
pub struct CompletionSender<'a>(Producer<'a, (), 2>);

/// Thread side of the completion signal.
pub struct CompletionReceiver<'a>(Consumer<'a, (), 2>);

/// Splits `queue` into the interrupt and thread ends of the completion signal.
pub fn completion_channel(queue: &mut CompletionQueue) -> (CompletionSender<'_>, CompletionReceiver<'_>) {
    let (producer, consumer) = queue.split();

    (CompletionSender(producer), CompletionReceiver(consumer))
}

impl CompletionSender<'_> {
    /// Post completion without blocking. A pending post absorbs the new one.
    pub fn post(&mut self) {
        let _ = self.0.enqueue(());
    }

    /// Body of the SPI interrupt handler: post once the receive chain stopped.
    pub fn on_interrupt(&mut self, rx_stopped: bool) {
        if rx_stopped {
            self.post();
        }
    }
}

impl CompletionWait for CompletionReceiver<'_> {
    fn wait(&mut self) {
        while self.0.dequeue().is_none() {
            core::hint::spin_loop();
        }
    }
}

/// Sector transfers driven by scatter-gather DMA.
///
/// Control and trailer scratch bytes live in the engine, the payload
/// segment borrows the caller's sector for one call only.
pub struct DmaEngine<D: DmaChannels, W: CompletionWait> {
    channels: D,
    completion: W,
    token: [u8; 1],
    trailer_out: [u8; TRAILER_SIZE],
    trailer_in: [u8; TRAILER_SIZE],
    fill: [u8; 1],
    discard: [u8; 1],
}

impl<D: DmaChannels, W: CompletionWait> DmaEngine<D, W> {
    /// Creates a new [`DmaEngine<D, W>`].
    ///
    /// `channels` - DMA channels of the SPI peripheral.
    /// `completion` - signal posted by the SPI interrupt.
    pub fn new(channels: D, completion: W) -> Self {
        Self {
            channels,
            completion,
            token: [0xFC],
            trailer_out: [0xFF; TRAILER_SIZE],
            trailer_in: [0xFF; TRAILER_SIZE],
            fill: [FILL_BYTE],
            discard: [0x00],
        }
    }

    /// DMA channels.
    pub fn channels(&self) -> &D {
        &self.channels
    }

    /// Disable both channels.
    pub fn reset(&mut self) {
        self.channels.disable(Channel::Rx);
        self.channels.disable(Channel::Tx);
        self.channels.detach();
    }

    /// Send `token`, `data` and a dummy CRC as one chain.
    pub fn send(&mut self, token: u8, data: &[u8]) {
        debug_assert_eq!(data.len(), PAYLOAD_SIZE);

        self.prepare(Direction::ToCard);
        self.token[0] = token;

        let Self {
            channels,
            completion,
            token,
            trailer_out,
            discard,
            ..
        } = self;

        let chain = [
            TxSegment::chained(&token[..]),
            TxSegment::chained(data),
            TxSegment::chained(&trailer_out[..]).terminal(),
        ];
        let total = chain.iter().map(|s| s.count).sum::<usize>();
        let mut drain = [RxSegment::discard(discard, total)];

        Self::run(channels, completion, &chain, &mut drain);
    }

    /// Receive `data` and the trailer as one chain.
    ///
    /// The start token is consumed by the poll beforehand, so the chain
    /// starts at the payload.
    pub fn receive(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len(), PAYLOAD_SIZE);

        self.prepare(Direction::FromCard);

        let Self {
            channels,
            completion,
            trailer_in,
            fill,
            ..
        } = self;

        let mut chain = [
            RxSegment::chained(data),
            RxSegment::chained(&mut trailer_in[..]).terminal(),
        ];
        let total = chain.iter().map(|s| s.count).sum::<usize>();
        let clock = [TxSegment::repeat(fill, total)];

        Self::run(channels, completion, &clock, &mut chain);
    }

    /// Wait for the previous chain and reprogram both channels for `direction`.
    fn prepare(&mut self, direction: Direction) {
        while !(self.channels.is_stopped(Channel::Tx) && self.channels.is_stopped(Channel::Rx)) {
            core::hint::spin_loop();
        }

        let (tx, rx) = ChannelControl::for_direction(direction);

        self.channels.attach();
        self.channels.configure(Channel::Rx, rx);
        self.channels.configure(Channel::Tx, tx);

        trace!("DMA armed, direction: {:?}", direction);
    }

    fn run(channels: &mut D, completion: &mut W, tx: &[TxSegment<'_>], rx: &mut [RxSegment<'_>]) {
        channels.load(tx, rx);
        channels.enable(Channel::Rx);
        channels.enable(Channel::Tx);

        completion.wait();

        while !channels.is_stopped(Channel::Rx) {
            core::hint::spin_loop();
        }

        channels.disable(Channel::Rx);
        channels.disable(Channel::Tx);
        channels.detach();
    }
}

impl<T: Transport, D: DmaChannels, W: CompletionWait> SectorTransfer<T> for DmaEngine<D, W> {
    fn reset(&mut self) {
        DmaEngine::reset(self);
    }

    fn send_sector(&mut self, _bus: &mut T, token: u8, data: &[u8]) -> Result<(), T::Error> {
        self.send(token, data);
        Ok(())
    }

    fn receive_sector(&mut self, _bus: &mut T, data: &mut [u8]) -> Result<(), T::Error> {
        self.receive(data);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{collections::VecDeque, vec::Vec};

    /// Expand a transmit chain into the bytes it clocks out.
    pub(crate) fn clocked_out(tx: &[TxSegment<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in tx {
            for i in 0..segment.count {
                out.push(match segment.increment {
                    Increment::Byte => segment.source[i],
                    Increment::None => segment.source[0],
                });
            }
        }
        out
    }

    /// Scatter `bytes` into a receive chain.
    pub(crate) fn clock_in(rx: &mut [RxSegment<'_>], bytes: &[u8]) {
        let mut bytes = bytes.iter();
        for segment in rx.iter_mut() {
            for i in 0..segment.count {
                let byte = bytes.next().copied().unwrap_or(0xFF);
                match segment.increment {
                    Increment::Byte => segment.sink[i] = byte,
                    Increment::None => segment.sink[0] = byte,
                }
            }
        }
    }

    /// Controller echoing queued replies and recording everything it did.
    struct RecordingChannels<'a> {
        irq: CompletionSender<'a>,
        replies: VecDeque<u8>,
        sent: Vec<u8>,
        configured: Vec<(Channel, ChannelControl)>,
        modes: Vec<(usize, SegmentMode)>,
        enabled: [bool; 2],
        running: bool,
        attached: bool,
    }

    impl<'a> RecordingChannels<'a> {
        fn new(irq: CompletionSender<'a>) -> Self {
            Self {
                irq,
                replies: VecDeque::new(),
                sent: Vec::new(),
                configured: Vec::new(),
                modes: Vec::new(),
                enabled: [false; 2],
                running: false,
                attached: false,
            }
        }
    }

    impl DmaChannels for RecordingChannels<'_> {
        fn attach(&mut self) {
            self.attached = true;
        }

        fn detach(&mut self) {
            self.attached = false;
        }

        fn configure(&mut self, channel: Channel, control: ChannelControl) {
            self.configured.push((channel, control));
        }

        fn load(&mut self, tx: &[TxSegment<'_>], rx: &mut [RxSegment<'_>]) {
            assert!(self.attached);
            let out = clocked_out(tx);
            let incoming: Vec<u8> = out
                .iter()
                .map(|_| self.replies.pop_front().unwrap_or(0xFF))
                .collect();
            clock_in(rx, &incoming);
            self.sent.extend(out);
            self.modes = rx.iter().map(|s| (s.count, s.mode)).collect();
            self.running = true;
        }

        fn enable(&mut self, channel: Channel) {
            self.enabled[channel as usize] = true;
            if self.enabled == [true; 2] {
                self.running = false;
                self.irq.on_interrupt(true);
            }
        }

        fn disable(&mut self, channel: Channel) {
            self.enabled[channel as usize] = false;
        }

        fn is_stopped(&self, _channel: Channel) -> bool {
            !self.running
        }
    }

    #[test]
    fn test_send_chain() {
        let mut queue = CompletionQueue::new();
        let (irq, done) = completion_channel(&mut queue);
        let mut engine = DmaEngine::new(RecordingChannels::new(irq), done);

        let data = [0x5A; PAYLOAD_SIZE];
        engine.send(0xFC, &data);

        let channels = engine.channels();
        assert_eq!(channels.sent.len(), 1 + PAYLOAD_SIZE + 2);
        assert_eq!(channels.sent[0], 0xFC);
        assert!(channels.sent[1..=PAYLOAD_SIZE].iter().all(|&b| b == 0x5A));
        assert_eq!(channels.sent[PAYLOAD_SIZE + 1..], [0xFF, 0xFF]);
        assert_eq!(
            channels.configured,
            [
                (Channel::Rx, ChannelControl::new(Increment::None, Increment::None)),
                (Channel::Tx, ChannelControl::new(Increment::Byte, Increment::None)),
            ]
        );
        assert_eq!(channels.modes, [(PAYLOAD_SIZE + 3, SegmentMode::Basic)]);
        assert_eq!(channels.enabled, [false; 2]);
        assert!(!channels.attached);
    }

    #[test]
    fn test_receive_chain() {
        let mut queue = CompletionQueue::new();
        let (irq, done) = completion_channel(&mut queue);
        let mut channels = RecordingChannels::new(irq);
        channels.replies = (0..PAYLOAD_SIZE).map(|i| i as u8).collect();
        channels.replies.extend([0x12, 0x34]);
        let mut engine = DmaEngine::new(channels, done);

        let mut data = [0u8; PAYLOAD_SIZE];
        engine.receive(&mut data);

        assert!(data.iter().enumerate().all(|(i, &b)| b == i as u8));
        assert_eq!(engine.trailer_in, [0x12, 0x34]);

        let channels = engine.channels();
        assert!(channels.sent.iter().all(|&b| b == FILL_BYTE));
        assert_eq!(channels.sent.len(), PAYLOAD_SIZE + 2);
        assert_eq!(
            channels.modes,
            [
                (PAYLOAD_SIZE, SegmentMode::ScatterGather),
                (2, SegmentMode::Basic),
            ]
        );
        assert_eq!(
            channels.configured[0],
            (Channel::Rx, ChannelControl::new(Increment::None, Increment::Byte))
        );
    }

    #[test]
    fn test_completion_posts_once() {
        let mut queue = CompletionQueue::new();
        let (mut irq, mut done) = completion_channel(&mut queue);

        irq.on_interrupt(false);
        assert!(done.0.dequeue().is_none());

        irq.on_interrupt(true);
        irq.on_interrupt(true);
        done.wait();
        assert!(done.0.dequeue().is_none());
    }
}
